//! Multi-seed campaigns over the simulator.
//!
//! Runs a range of seeds with shared parameters, collects pass/fail per seed
//! and remembers the first failure so it can be replayed.

use std::ops::Range;

use anyhow::{Result, bail};
use daybook_core::config::{SimSection, SyncSection};
use serde::{Deserialize, Serialize};

use crate::clock::ClockConfig;
use crate::network::FaultConfig;
use crate::oracle::InvariantViolation;
use crate::simulator::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub clients: usize,
    pub rounds: u64,
    pub act_rate_percent: u8,
    pub foreign_write_percent: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
    pub sync: SyncSection,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self::from_section(&SimSection::default(), &SyncSection::default())
    }
}

impl CampaignConfig {
    /// Campaign sized by the `[sim]` config section, seeds starting at 0.
    #[must_use]
    pub fn from_section(sim: &SimSection, sync: &SyncSection) -> Self {
        let base = SimulationConfig::default();
        Self {
            seed_range: 0..sim.seeds,
            clients: sim.clients,
            rounds: sim.rounds,
            act_rate_percent: base.act_rate_percent,
            foreign_write_percent: base.foreign_write_percent,
            fault: base.fault,
            clock: base.clock,
            sync: sync.clone(),
        }
    }

    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            clients: self.clients,
            rounds: self.rounds,
            act_rate_percent: self.act_rate_percent,
            foreign_write_percent: self.foreign_write_percent,
            fault: self.fault,
            clock: self.clock,
            sync: self.sync.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// Lowest failing seed, the one to replay first.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that hit a placeholder claim or an in-flight merge under failures.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything a replay produces.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub seed: u64,
    pub result: SimulationResult,
    pub fingerprint: String,
}

/// Run every seed in the campaign.
///
/// # Errors
///
/// Returns an error if the config is invalid or a simulation cannot run.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let result = simulate(seed, config)?;
        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if result.oracle.passed {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }

    tracing::info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        interesting = report.interesting_states_reached,
        "campaign finished"
    );
    Ok(report)
}

/// Run one seed: `Ok(Ok(()))` on pass, `Ok(Err(violations))` on failure.
///
/// # Errors
///
/// The outer error means the simulation itself could not run.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let result = simulate(seed, config)?;
    if result.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(result.oracle.violations))
    }
}

/// Re-run one seed keeping the full trace.
///
/// # Errors
///
/// Returns an error when config validation or the simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let result = simulate(seed, config)?;
    Ok(DetailedTrace {
        seed,
        fingerprint: result.trace_fingerprint(),
        result,
    })
}

fn simulate(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    Simulator::new(config.sim_config_for_seed(seed))?.run()
}
