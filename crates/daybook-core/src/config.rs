use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::ErrorCode;

/// How a failed remote write is undone locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStrategy {
    /// Undo only the failed mutation's delta on top of the latest
    /// server-confirmed state of the touched record.
    #[default]
    Rebase,
    /// Restore the whole collection value captured when the mutation began.
    /// Change events merged while the write was in flight are discarded.
    Snapshot,
}

impl RollbackStrategy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rebase" | "delta" => Some(Self::Rebase),
            "snapshot" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default)]
    pub rollback: RollbackStrategy,
    #[serde(default = "default_placeholder_prefix")]
    pub placeholder_prefix: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            rollback: RollbackStrategy::default(),
            placeholder_prefix: default_placeholder_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RewardsSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

/// Defaults for the deterministic simulator; the CLI flags override these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSection {
    #[serde(default = "default_sim_seeds")]
    pub seeds: u64,
    #[serde(default = "default_sim_clients")]
    pub clients: usize,
    #[serde(default = "default_sim_rounds")]
    pub rounds: u64,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            seeds: default_sim_seeds(),
            clients: default_sim_clients(),
            rounds: default_sim_rounds(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub rewards: RewardsSection,
    #[serde(default)]
    pub sim: SimSection,
}

impl SyncConfig {
    /// Reject values that would break placeholder detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder prefix is empty or whitespace.
    pub fn validate(&self) -> Result<()> {
        if self.sync.placeholder_prefix.trim().is_empty() {
            bail!("sync.placeholder_prefix must not be empty");
        }
        Ok(())
    }
}

/// User-level overrides; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub rollback: Option<RollbackStrategy>,
    #[serde(default)]
    pub rewards: Option<bool>,
}

/// Load `.daybook/config.toml` under `project_root`, or defaults if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<SyncConfig> {
    let path = project_root.join(".daybook/config.toml");
    if !path.exists() {
        return Ok(SyncConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<SyncConfig>(&content).with_context(|| parse_failure(&path))
}

/// Load `<config_dir>/daybook/config.toml`, or defaults if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("daybook/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content).with_context(|| parse_failure(&path))
}

/// Resolve the effective config: project file, then user file, then env.
///
/// # Errors
///
/// Returns an error if either file fails to parse or the merged config is
/// invalid.
pub fn resolve_config(project_root: &Path) -> Result<SyncConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;
    let config = merge(
        project,
        &user,
        env::var("DAYBOOK_ROLLBACK").ok(),
        env::var("DAYBOOK_PLACEHOLDER_PREFIX").ok(),
    );
    config.validate()?;
    Ok(config)
}

fn parse_failure(path: &Path) -> String {
    let code = ErrorCode::ConfigParseError;
    let mut message = format!("{code}: {} {}", code.message(), path.display());
    if let Some(hint) = code.hint() {
        message.push_str(". ");
        message.push_str(hint);
    }
    message
}

fn merge(
    mut config: SyncConfig,
    user: &UserConfig,
    env_rollback: Option<String>,
    env_prefix: Option<String>,
) -> SyncConfig {
    if let Some(rollback) = user.rollback {
        config.sync.rollback = rollback;
    }
    if let Some(enabled) = user.rewards {
        config.rewards.enabled = enabled;
    }

    match env_rollback.as_deref().map(RollbackStrategy::parse) {
        Some(Some(rollback)) => config.sync.rollback = rollback,
        Some(None) => tracing::warn!(
            value = env_rollback.as_deref().unwrap_or_default(),
            "ignoring unknown DAYBOOK_ROLLBACK value"
        ),
        None => {}
    }

    if let Some(prefix) = env_prefix.filter(|p| !p.trim().is_empty()) {
        config.sync.placeholder_prefix = prefix;
    }

    config
}

const fn default_true() -> bool {
    true
}

fn default_placeholder_prefix() -> String {
    "temp-".to_string()
}

const fn default_sim_seeds() -> u64 {
    100
}

const fn default_sim_clients() -> usize {
    3
}

const fn default_sim_rounds() -> u64 {
    32
}
