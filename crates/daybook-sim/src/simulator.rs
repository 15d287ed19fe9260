//! Round-based driver tying clients, server and network together.
//!
//! Each round: inject environmental faults, let clients act, carry requests
//! to the server, then carry responses and change events back. After the
//! last round the network is drained until idle and the oracle runs.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use daybook_core::change::RawChange;
use daybook_core::config::{SimSection, SyncSection};
use daybook_core::model::task::{Task, TaskScope};
use daybook_core::SyncError;
use daybook_core::sync::{IgnoreReason, MutationId, MutationTicket, Reconciled};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::client::{OpKind, SimClient, TITLES};
use crate::clock::{ClockConfig, SimulatedClock};
use crate::network::{ClientId, FaultConfig, SimulatedNetwork};
use crate::oracle::{ConvergenceOracle, OracleResult};
use crate::rng::DeterministicRng;
use crate::server::{Commit, Response, ServerStats, SimulatedServer};

const OWNER: &str = "u1";
const FOREIGN_OWNER: &str = "u2";
/// Clients stop acting once draining starts, so one pass normally empties
/// both queues.
const MAX_DRAIN_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub clients: usize,
    pub rounds: u64,
    /// Chance each client issues a mutation in a round.
    pub act_rate_percent: u8,
    /// Chance, per round, of a write by another account.
    pub foreign_write_percent: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
    pub sync: SyncSection,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let sim = SimSection::default();
        Self {
            seed: 0,
            clients: sim.clients,
            rounds: sim.rounds,
            act_rate_percent: 60,
            foreign_write_percent: 5,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
            sync: SyncSection::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if there are no clients or no rounds.
    pub fn validate(&self) -> Result<()> {
        if self.clients == 0 {
            bail!("clients must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    Issued {
        client: ClientId,
        mutation: u64,
        op: OpKind,
    },
    /// The engine refused the action locally.
    Refused { client: ClientId, code: String },
    Committed { client: ClientId, mutation: u64, id: String },
    /// Accepted without touching a row (a delete that matched nothing).
    Unchanged { client: ClientId, mutation: u64 },
    WriteFailed { client: ClientId, mutation: u64, code: String },
    Settled { client: ClientId, mutation: u64, ok: bool },
    ChangeApplied {
        client: ClientId,
        id: String,
        outcome: String,
    },
    MalformedInjected { client: ClientId },
    /// A message addressed to an engine the client has since replaced.
    Discarded { client: ClientId, generation: u64 },
    Remounted {
        client: ClientId,
        generation: u64,
        rows: usize,
    },
    ClockFrozen { client: ClientId, rounds: u64 },
    ForeignWrite { id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub mutations: usize,
    pub refused: usize,
    pub write_failures: usize,
    pub changes_delivered: usize,
    pub claimed_placeholders: usize,
    pub merged_in_flight: usize,
    pub stale_ignored: usize,
    pub discarded: usize,
    pub malformed: usize,
    pub remounts: usize,
    pub freezes: usize,
    pub server: ServerStats,
}

impl SimulationStats {
    /// Whether the run hit the races the reconciler exists for: a server
    /// record replacing a placeholder, or a change event landing on a record
    /// with an in-flight edit while writes were failing.
    #[must_use]
    pub const fn interesting(&self) -> bool {
        self.claimed_placeholders > 0 || (self.merged_in_flight > 0 && self.write_failures > 0)
    }
}

/// Final per-client state, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub scope: String,
    pub generation: u64,
    pub visible: usize,
    pub observed: usize,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    pub oracle: OracleResult,
    pub stats: SimulationStats,
    pub clients: Vec<ClientSummary>,
    pub server_rows: usize,
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    /// blake3 digest of the serialized trace; equal for equal seeds.
    #[must_use]
    pub fn trace_fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for event in &self.trace {
            // TraceEvent only holds strings and integers.
            if let Ok(line) = serde_json::to_vec(event) {
                hasher.update(&line);
                hasher.update(b"\n");
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone)]
struct Uplink {
    ticket: MutationTicket<Task>,
}

#[derive(Debug, Clone)]
enum Downlink {
    Change(RawChange),
    Response { mutation: MutationId, response: Response },
}

pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    server: SimulatedServer,
    clients: Vec<SimClient>,
    uplink: SimulatedNetwork<Uplink>,
    downlink: SimulatedNetwork<Downlink>,
    trace: Vec<TraceEvent>,
    stats: SimulationStats,
}

impl Simulator {
    /// Seed the server and load every client from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = DeterministicRng::new(config.seed);
        let days = [day(1)?, day(2)?];

        let mut server = SimulatedServer::new(
            SimulatedClock::new(config.clock.ideal()),
            config.fault.write_failure_percent,
        );
        server.seed(OWNER, &TITLES[..2], days[0]);
        server.seed(OWNER, &TITLES[2..], days[1]);

        let clients = (0..config.clients)
            .map(|id| {
                // Alternate between a day view and the full list.
                let scope = if id % 2 == 0 {
                    TaskScope::day(days[0])
                } else {
                    TaskScope::all()
                };
                let clock = SimulatedClock::new(config.clock.assign(&mut rng));
                let mut client = SimClient::new(id, OWNER, scope, config.sync.clone(), days, clock);
                client.remount(server.rows_for(OWNER));
                client
            })
            .collect();

        Ok(Self {
            uplink: SimulatedNetwork::new(config.fault, false),
            downlink: SimulatedNetwork::new(config.fault, true),
            rng,
            server,
            clients,
            trace: Vec::new(),
            stats: SimulationStats::default(),
            config,
        })
    }

    /// Run every round, drain the network and check the invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if a change cannot be encoded or the network does
    /// not go idle.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.inject_faults(round)?;
            self.act(round);
            self.pump(round, false)?;
        }

        let last = self.config.rounds;
        let mut passes = 0;
        while !(self.uplink.is_idle() && self.downlink.is_idle()) {
            passes += 1;
            if passes > MAX_DRAIN_PASSES {
                bail!(
                    "network still busy after {MAX_DRAIN_PASSES} drain passes ({} up, {} down)",
                    self.uplink.pending_len(),
                    self.downlink.pending_len()
                );
            }
            self.pump(last, true)?;
        }

        self.stats.server = self.server.stats();
        let oracle = ConvergenceOracle::check_all(&self.server, &mut self.clients);
        let interesting_state_reached = self.stats.interesting();
        info!(
            seed = self.config.seed,
            passed = oracle.passed,
            mutations = self.stats.mutations,
            commits = self.stats.server.commits,
            interesting = interesting_state_reached,
            "simulation finished"
        );

        Ok(SimulationResult {
            trace: self.trace.clone(),
            oracle,
            stats: self.stats,
            clients: self.clients.iter().map(summarize).collect(),
            server_rows: self.server.len(),
            interesting_state_reached,
        })
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    fn inject_faults(&mut self, round: u64) -> Result<()> {
        let fault = self.config.fault;
        for id in 0..self.clients.len() {
            if self.rng.chance(fault.freeze_rate_percent) {
                let rounds = u64::from(fault.freeze_duration_rounds);
                self.clients[id].clock_mut().freeze(round, rounds);
                self.stats.freezes += 1;
                self.record(round, TraceEventKind::ClockFrozen { client: id, rounds });
            }
            if self.rng.chance(fault.remount_rate_percent) {
                let rows = self.server.rows_for(OWNER);
                let count = rows.len();
                let client = &mut self.clients[id];
                client.remount(rows);
                let generation = client.generation();
                self.stats.remounts += 1;
                self.record(
                    round,
                    TraceEventKind::Remounted {
                        client: id,
                        generation,
                        rows: count,
                    },
                );
            }
            if self.rng.chance(fault.malformed_rate_percent) {
                let garbage = malformed_payload(&mut self.rng);
                let generation = self.clients[id].generation();
                let _ = self.downlink.send(id, generation, Downlink::Change(garbage), round, &mut self.rng);
                self.record(round, TraceEventKind::MalformedInjected { client: id });
            }
        }

        if self.rng.chance(self.config.foreign_write_percent) {
            let commit = self.server.foreign_insert(FOREIGN_OWNER, day(1)?, round);
            self.record(
                round,
                TraceEventKind::ForeignWrite {
                    id: commit.event.id().to_string(),
                },
            );
            self.broadcast(&commit, round)?;
        }
        Ok(())
    }

    fn act(&mut self, round: u64) {
        for id in 0..self.clients.len() {
            if !self.rng.chance(self.config.act_rate_percent) {
                continue;
            }
            let client = &mut self.clients[id];
            let generation = client.generation();
            match client.act(round, &mut self.rng) {
                Ok((op, ticket)) => {
                    self.stats.mutations += 1;
                    self.record(
                        round,
                        TraceEventKind::Issued {
                            client: id,
                            mutation: ticket.mutation.0,
                            op,
                        },
                    );
                    let _ = self.uplink.send(id, generation, Uplink { ticket }, round, &mut self.rng);
                }
                Err(err) => {
                    self.stats.refused += 1;
                    self.record(
                        round,
                        TraceEventKind::Refused {
                            client: id,
                            code: err.code().to_string(),
                        },
                    );
                }
            }
        }
    }

    /// Move ready traffic in both directions; `drain` ignores delays.
    fn pump(&mut self, round: u64, drain: bool) -> Result<()> {
        let requests = if drain {
            self.uplink.drain_all(&mut self.rng)
        } else {
            self.uplink.deliver_ready(round, &mut self.rng)
        };
        for delivered in requests {
            let ticket = delivered.message.ticket;
            let (response, commit) =
                self.server
                    .handle(&ticket.owner_id, &ticket.request, round, &mut self.rng);
            let mutation = ticket.mutation.0;
            let kind = match (&commit, &response) {
                (Some(commit), _) => TraceEventKind::Committed {
                    client: delivered.client,
                    mutation,
                    id: commit.event.id().to_string(),
                },
                (None, Response::Inserted(Err(err)) | Response::Written(Err(err))) => {
                    TraceEventKind::WriteFailed {
                        client: delivered.client,
                        mutation,
                        code: err.kind.code().to_string(),
                    }
                }
                (None, _) => TraceEventKind::Unchanged {
                    client: delivered.client,
                    mutation,
                },
            };
            self.record(round, kind);

            let _ = self.downlink.send(
                delivered.client,
                delivered.generation,
                Downlink::Response {
                    mutation: ticket.mutation,
                    response,
                },
                round,
                &mut self.rng,
            );
            if let Some(commit) = commit {
                self.broadcast(&commit, round)?;
            }
        }

        let messages = if drain {
            self.downlink.drain_all(&mut self.rng)
        } else {
            self.downlink.deliver_ready(round, &mut self.rng)
        };
        for delivered in messages {
            let id = delivered.client;
            if delivered.generation != self.clients[id].generation() {
                self.stats.discarded += 1;
                self.record(
                    round,
                    TraceEventKind::Discarded {
                        client: id,
                        generation: delivered.generation,
                    },
                );
                continue;
            }
            match delivered.message {
                Downlink::Change(raw) => self.deliver_change(round, id, raw),
                Downlink::Response { mutation, response } => {
                    self.deliver_response(round, id, mutation, response);
                }
            }
        }
        Ok(())
    }

    /// Send a committed change to every client, whatever its owner; the
    /// engine must filter foreign rows itself.
    fn broadcast(&mut self, commit: &Commit, round: u64) -> Result<()> {
        let raw = RawChange::encode(&commit.event)
            .with_context(|| format!("encoding change for {}", commit.event.id()))?;
        for id in 0..self.clients.len() {
            let generation = self.clients[id].generation();
            let _ = self
                .downlink
                .send(id, generation, Downlink::Change(raw.clone()), round, &mut self.rng);
        }
        Ok(())
    }

    fn deliver_change(&mut self, round: u64, id: ClientId, raw: RawChange) {
        let target = raw
            .old
            .as_ref()
            .or(raw.new.as_ref())
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let outcome = self.clients[id].receive_change(raw);
        self.stats.changes_delivered += 1;
        match outcome {
            Reconciled::ClaimedPlaceholder { .. } => self.stats.claimed_placeholders += 1,
            Reconciled::Merged => self.stats.merged_in_flight += 1,
            Reconciled::Ignored(IgnoreReason::Stale) => self.stats.stale_ignored += 1,
            Reconciled::Ignored(IgnoreReason::Malformed) => self.stats.malformed += 1,
            _ => {}
        }
        debug!(round, client = id, id = %target, ?outcome, "change delivered");
        self.record(
            round,
            TraceEventKind::ChangeApplied {
                client: id,
                id: target,
                outcome: format!("{outcome:?}"),
            },
        );
    }

    fn deliver_response(&mut self, round: u64, id: ClientId, mutation: MutationId, response: Response) {
        let ok = match self.clients[id].receive_response(mutation, response) {
            Ok(()) => true,
            Err(SyncError::Cancelled) => {
                // Duplicate delivery of an answer already consumed.
                self.stats.discarded += 1;
                false
            }
            Err(_) => {
                self.stats.write_failures += 1;
                false
            }
        };
        self.record(
            round,
            TraceEventKind::Settled {
                client: id,
                mutation: mutation.0,
                ok,
            },
        );
    }
}

fn summarize(client: &SimClient) -> ClientSummary {
    ClientSummary {
        id: client.id(),
        scope: client
            .scope()
            .date
            .map_or_else(|| "all".to_string(), |date| date.to_string()),
        generation: client.generation(),
        visible: client.engine().records().len(),
        observed: client.observed().len(),
    }
}

fn day(d: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(2024, 6, d).with_context(|| format!("invalid day {d}"))
}

/// Payloads a misbehaving channel might push.
fn malformed_payload(rng: &mut DeterministicRng) -> RawChange {
    match rng.below(4) {
        0 => RawChange {
            event_type: "TRUNCATE".to_string(),
            new: None,
            old: None,
        },
        1 => RawChange {
            event_type: "INSERT".to_string(),
            new: None,
            old: None,
        },
        2 => RawChange {
            event_type: "DELETE".to_string(),
            new: Some(json!({})),
            old: Some(json!({})),
        },
        _ => RawChange {
            event_type: "UPDATE".to_string(),
            new: Some(json!({ "id": "tsk-000001", "title": 42 })),
            old: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            clients: 3,
            rounds: 16,
            foreign_write_percent: 0,
            fault: FaultConfig::calm(),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimulationConfig {
            clients: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn calm_run_converges() {
        let mut sim = Simulator::new(calm(1)).expect("config");
        let result = sim.run().expect("run");
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert!(result.stats.mutations > 0);
        assert_eq!(result.stats.server.injected_failures, 0);
    }

    #[test]
    fn faulty_run_converges() {
        let mut sim = Simulator::new(SimulationConfig {
            seed: 5,
            ..SimulationConfig::default()
        })
        .expect("config");
        let result = sim.run().expect("run");
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
    }

    #[test]
    fn same_seed_same_trace() {
        let a = Simulator::new(calm(9)).expect("config").run().expect("run");
        let b = Simulator::new(calm(9)).expect("config").run().expect("run");
        assert_eq!(a.trace, b.trace);
        assert_eq!(a.trace_fingerprint(), b.trace_fingerprint());
    }

    #[test]
    fn different_seeds_differ() {
        let a = Simulator::new(calm(1)).expect("config").run().expect("run");
        let b = Simulator::new(calm(2)).expect("config").run().expect("run");
        assert_ne!(a.trace_fingerprint(), b.trace_fingerprint());
    }

    #[test]
    fn malformed_payloads_never_decode() {
        let mut rng = DeterministicRng::new(0);
        for _ in 0..16 {
            assert!(malformed_payload(&mut rng).decode::<Task>().is_err());
        }
    }

    #[test]
    fn foreign_writes_stay_invisible() {
        let mut sim = Simulator::new(SimulationConfig {
            foreign_write_percent: 100,
            ..calm(3)
        })
        .expect("config");
        let result = sim.run().expect("run");
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert!(
            result
                .trace
                .iter()
                .any(|e| matches!(e.kind, TraceEventKind::ForeignWrite { .. }))
        );
    }
}
