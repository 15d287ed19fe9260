//! Fault-injecting message queue between the simulated server and clients.
//!
//! Messages are delayed and reordered; messages flowing to clients may also
//! be duplicated. Nothing is ever dropped: the change feed and write
//! responses of the real provider are at-least-once, and the reconciler's
//! job is to cope with everything short of loss.

use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Index of a simulated client device.
pub type ClientId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    pub max_delay_rounds: u8,
    /// Chance a server-to-client message is delivered twice.
    pub duplicate_rate_percent: u8,
    /// Chance, per round, that ready messages arrive shuffled.
    pub reorder_rate_percent: u8,
    /// Chance, per round, that a client sees a garbage change payload.
    pub malformed_rate_percent: u8,
    /// Chance the server rejects a write.
    pub write_failure_percent: u8,
    /// Chance, per round, that a client's clock freezes.
    pub freeze_rate_percent: u8,
    pub freeze_duration_rounds: u8,
    /// Chance, per round, that a client remounts (fresh fetch and subscription).
    pub remount_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 3,
            duplicate_rate_percent: 10,
            reorder_rate_percent: 25,
            malformed_rate_percent: 3,
            write_failure_percent: 10,
            freeze_rate_percent: 5,
            freeze_duration_rounds: 4,
            remount_rate_percent: 2,
        }
    }
}

impl FaultConfig {
    /// Delay only: no duplication, reordering or failures.
    #[must_use]
    pub const fn calm() -> Self {
        Self {
            max_delay_rounds: 1,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            malformed_rate_percent: 0,
            write_failure_percent: 0,
            freeze_rate_percent: 0,
            freeze_duration_rounds: 0,
            remount_rate_percent: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct InFlight<M> {
    deliver_at_round: u64,
    /// Receiving client, or the sending client for server-bound traffic.
    client: ClientId,
    /// Subscription generation of the receiving client when sent.
    generation: u64,
    message: M,
}

/// A message leaving the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered<M> {
    pub client: ClientId,
    pub generation: u64,
    pub message: M,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub delay_rounds: u8,
    pub duplicated: bool,
}

/// Queue for one direction of traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedNetwork<M> {
    queue: Vec<InFlight<M>>,
    fault: FaultConfig,
    duplicates: bool,
}

impl<M: Clone> SimulatedNetwork<M> {
    /// `duplicates` enables duplicate delivery for this direction.
    #[must_use]
    pub const fn new(fault: FaultConfig, duplicates: bool) -> Self {
        Self {
            queue: Vec::new(),
            fault,
            duplicates,
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn send(
        &mut self,
        client: ClientId,
        generation: u64,
        message: M,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        let bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.below(bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = self.duplicates && rng.chance(self.fault.duplicate_rate_percent);
        if duplicated {
            // The copy may overtake the original.
            let extra = rng.below(bound);
            self.queue.push(InFlight {
                deliver_at_round: round.saturating_add(extra),
                client,
                generation,
                message: message.clone(),
            });
        }
        self.queue.push(InFlight {
            deliver_at_round,
            client,
            generation,
            message,
        });

        SendOutcome {
            delay_rounds: delay,
            duplicated,
        }
    }

    /// Messages due by `round`, in send order unless this round reorders them.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> Vec<Delivered<M>> {
        let (ready, later): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|m| m.deliver_at_round <= round);
        self.queue = later;

        let mut ready: Vec<Delivered<M>> = ready
            .into_iter()
            .map(|m| Delivered {
                client: m.client,
                generation: m.generation,
                message: m.message,
            })
            .collect();
        if ready.len() > 1 && rng.chance(self.fault.reorder_rate_percent) {
            rng.shuffle(&mut ready);
        }
        ready
    }

    /// Everything still queued, regardless of delay; used to reach quiescence.
    pub fn drain_all(&mut self, rng: &mut DeterministicRng) -> Vec<Delivered<M>> {
        self.deliver_ready(u64::MAX, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_delivers_same_round() {
        let mut rng = DeterministicRng::new(1);
        let mut net = SimulatedNetwork::new(
            FaultConfig {
                max_delay_rounds: 0,
                ..FaultConfig::calm()
            },
            false,
        );
        let outcome = net.send(0, 0, "hello", 3, &mut rng);
        assert_eq!(outcome.delay_rounds, 0);
        let got = net.deliver_ready(3, &mut rng);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, "hello");
        assert!(net.is_idle());
    }

    #[test]
    fn delayed_messages_wait() {
        let mut rng = DeterministicRng::new(2);
        let mut net = SimulatedNetwork::new(
            FaultConfig {
                max_delay_rounds: 5,
                ..FaultConfig::calm()
            },
            false,
        );
        for i in 0..50 {
            let _ = net.send(1, 0, i, 0, &mut rng);
        }
        let early = net.deliver_ready(0, &mut rng).len();
        let rest = net.drain_all(&mut rng).len();
        assert_eq!(early + rest, 50);
        assert!(early < 50);
    }

    #[test]
    fn duplicates_only_where_enabled() {
        let fault = FaultConfig {
            duplicate_rate_percent: 100,
            ..FaultConfig::calm()
        };
        let mut rng = DeterministicRng::new(3);

        let mut uplink = SimulatedNetwork::new(fault, false);
        let _ = uplink.send(0, 0, 'a', 0, &mut rng);
        assert_eq!(uplink.pending_len(), 1);

        let mut downlink = SimulatedNetwork::new(fault, true);
        let outcome = downlink.send(0, 0, 'a', 0, &mut rng);
        assert!(outcome.duplicated);
        assert_eq!(downlink.drain_all(&mut rng).len(), 2);
    }

    #[test]
    fn reordering_keeps_every_message() {
        let fault = FaultConfig {
            max_delay_rounds: 0,
            reorder_rate_percent: 100,
            ..FaultConfig::calm()
        };
        let mut rng = DeterministicRng::new(4);
        let mut net = SimulatedNetwork::new(fault, false);
        for i in 0..10 {
            let _ = net.send(0, 0, i, 0, &mut rng);
        }
        let mut got: Vec<i32> = net.deliver_ready(0, &mut rng).into_iter().map(|d| d.message).collect();
        got.sort_unstable();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }
}
