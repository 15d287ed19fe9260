use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Ranges used when assigning each simulated device its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Wall time of round 0, in Unix milliseconds.
    pub base_millis: i64,
    /// Milliseconds one round advances an ideal clock.
    pub tick_millis: i64,
    pub max_abs_drift_ppm: i32,
    pub max_abs_skew_millis: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            // 2024-06-01T08:00:00Z
            base_millis: 1_717_228_800_000,
            tick_millis: 250,
            max_abs_drift_ppm: 200,
            max_abs_skew_millis: 90_000,
        }
    }
}

impl ClockConfig {
    /// Draw a device clock inside the configured ranges.
    #[must_use]
    pub fn assign(&self, rng: &mut DeterministicRng) -> ClockSpec {
        ClockSpec {
            base_millis: self.base_millis,
            tick_millis: self.tick_millis,
            drift_ppm: symmetric(rng, i64::from(self.max_abs_drift_ppm))
                .try_into()
                .unwrap_or(0),
            skew_millis: symmetric(rng, self.max_abs_skew_millis),
        }
    }

    /// The server's clock: no skew, no drift.
    #[must_use]
    pub const fn ideal(&self) -> ClockSpec {
        ClockSpec {
            base_millis: self.base_millis,
            tick_millis: self.tick_millis,
            drift_ppm: 0,
            skew_millis: 0,
        }
    }
}

fn symmetric(rng: &mut DeterministicRng, max_abs: i64) -> i64 {
    let max_abs = max_abs.max(0);
    let span = u64::try_from(max_abs).unwrap_or(0).saturating_mul(2).saturating_add(1);
    i64::try_from(rng.below(span)).unwrap_or(0) - max_abs
}

/// One device's clock parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSpec {
    pub base_millis: i64,
    pub tick_millis: i64,
    pub drift_ppm: i32,
    pub skew_millis: i64,
}

/// Device wall clock with skew, drift and freezes.
///
/// Local stamps only ever reach `updated_at` of optimistic records and
/// `created_at` of drafts, so a badly behaved device clock must not affect
/// convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedClock {
    spec: ClockSpec,
    frozen: Option<Frozen>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frozen {
    at_millis: i64,
    until_round: u64,
}

impl SimulatedClock {
    #[must_use]
    pub const fn new(spec: ClockSpec) -> Self {
        Self { spec, frozen: None }
    }

    #[must_use]
    pub const fn spec(&self) -> ClockSpec {
        self.spec
    }

    #[must_use]
    pub fn now_millis(&self, round: u64) -> i64 {
        if let Some(frozen) = self.frozen.filter(|f| round < f.until_round) {
            return frozen.at_millis;
        }

        let elapsed = self
            .spec
            .tick_millis
            .saturating_mul(i64::try_from(round).unwrap_or(i64::MAX));
        let drift = elapsed
            .saturating_mul(i64::from(self.spec.drift_ppm))
            .saturating_div(1_000_000);

        self.spec
            .base_millis
            .saturating_add(self.spec.skew_millis)
            .saturating_add(elapsed)
            .saturating_add(drift)
    }

    #[must_use]
    pub fn now(&self, round: u64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(self.now_millis(round))
    }

    /// Stop the clock at its current reading for `rounds` rounds.
    pub fn freeze(&mut self, round: u64, rounds: u64) {
        let at_millis = self.now_millis(round);
        self.frozen = Some(Frozen {
            at_millis,
            until_round: round.saturating_add(rounds),
        });
    }

    #[must_use]
    pub fn is_frozen(&self, round: u64) -> bool {
        self.frozen.is_some_and(|f| round < f.until_round)
    }
}
