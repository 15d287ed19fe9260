//! Injected collaborators shared by every synchronizer instance.
//!
//! Session, clock, config and the rewards hook are passed in explicitly so
//! tests and the simulator can substitute fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::config::SyncConfig;
use crate::entity::EntityKind;

/// Source of wall-clock time for `created_at` / `updated_at` stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Supplies the identity of the signed-in owner, if any.
pub trait Session: Send + Sync {
    fn owner_id(&self) -> Option<String>;
}

/// Session fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    owner_id: Option<String>,
}

impl StaticSession {
    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
        }
    }

    #[must_use]
    pub const fn signed_out() -> Self {
        Self { owner_id: None }
    }
}

impl Session for StaticSession {
    fn owner_id(&self) -> Option<String> {
        self.owner_id.clone()
    }
}

/// Session whose owner changes at runtime (sign-in, sign-out).
#[derive(Debug, Default)]
pub struct SwitchableSession {
    owner_id: Mutex<Option<String>>,
}

impl SwitchableSession {
    pub fn sign_in(&self, owner_id: impl Into<String>) {
        *self.owner_id.lock() = Some(owner_id.into());
    }

    pub fn sign_out(&self) {
        *self.owner_id.lock() = None;
    }
}

impl Session for SwitchableSession {
    fn owner_id(&self) -> Option<String> {
        self.owner_id.lock().clone()
    }
}

/// A record whose completion flag was just turned on and confirmed remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub kind: EntityKind,
    pub owner_id: String,
    pub record_id: String,
}

/// Rewards/XP collaborator notified when something is completed.
///
/// Calls are fire-and-forget; an error is logged and otherwise ignored.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completed(&self, completion: Completion) -> anyhow::Result<()>;
}

/// Everything a synchronizer needs from the outside world.
#[derive(Clone)]
pub struct SyncContext {
    pub session: Arc<dyn Session>,
    pub clock: Arc<dyn Clock>,
    pub config: SyncConfig,
    pub rewards: Option<Arc<dyn CompletionHook>>,
}

impl SyncContext {
    pub fn new(session: Arc<dyn Session>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        Self {
            session,
            clock,
            config,
            rewards: None,
        }
    }

    #[must_use]
    pub fn with_rewards(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.rewards = Some(hook);
        self
    }

    /// The rewards hook, if one is installed and rewards are enabled.
    #[must_use]
    pub fn active_rewards(&self) -> Option<Arc<dyn CompletionHook>> {
        if self.config.rewards.enabled {
            self.rewards.clone()
        } else {
            None
        }
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("owner_id", &self.session.owner_id())
            .field("config", &self.config)
            .field("rewards", &self.rewards.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).single().expect("valid time");
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn rewards_respect_config_switch() {
        struct Noop;
        #[async_trait]
        impl CompletionHook for Noop {
            async fn on_completed(&self, _completion: Completion) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut ctx = SyncContext::new(
            Arc::new(StaticSession::signed_in("u1")),
            Arc::new(SystemClock),
            SyncConfig::default(),
        )
        .with_rewards(Arc::new(Noop));
        assert!(ctx.active_rewards().is_some());

        ctx.config.rewards.enabled = false;
        assert!(ctx.active_rewards().is_none());
    }
}
