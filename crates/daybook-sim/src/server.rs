//! Single-table simulated backend for `tasks`.
//!
//! Behaves like the in-memory store in `daybook-core`, minus async: ids are
//! minted server-side, every committed write gets a strictly increasing
//! server stamp and produces exactly one change event, and writes can be
//! made to fail at a configured rate.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use daybook_core::change::ChangeEvent;
use daybook_core::entity::{Entity, Patch};
use daybook_core::error::RemoteError;
use daybook_core::model::task::{Task, TaskPatch};
use daybook_core::sync::WriteRequest;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::SimulatedClock;
use crate::rng::DeterministicRng;

/// What the server sends back for one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Inserted(Result<Task, RemoteError>),
    Written(Result<(), RemoteError>),
}

impl Response {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Inserted(Ok(_)) | Self::Written(Ok(())))
    }
}

/// A committed write, in commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub owner_id: String,
    pub event: ChangeEvent<Task>,
}

/// Server-side counters reported with a simulation result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub commits: usize,
    pub injected_failures: usize,
    pub not_found: usize,
}

#[derive(Debug, Clone)]
pub struct SimulatedServer {
    rows: BTreeMap<String, Task>,
    next_id: u64,
    last_stamp: Option<DateTime<Utc>>,
    clock: SimulatedClock,
    failure_percent: u8,
    log: Vec<Commit>,
    stats: ServerStats,
}

impl SimulatedServer {
    #[must_use]
    pub fn new(clock: SimulatedClock, failure_percent: u8) -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
            last_stamp: None,
            clock,
            failure_percent,
            log: Vec::new(),
            stats: ServerStats::default(),
        }
    }

    /// Insert rows directly, without events or failure injection.
    pub fn seed(&mut self, owner_id: &str, titles: &[&str], date: NaiveDate) {
        for (position, title) in (1_i64..).zip(titles) {
            let stamp = self.stamp(0);
            let id = self.mint_id();
            let mut task = Task::new(id.clone(), owner_id, *title, date, stamp);
            task.position = position;
            self.rows.insert(id, task);
        }
    }

    /// Rows visible to `owner_id`, ordered by id.
    #[must_use]
    pub fn rows_for(&self, owner_id: &str) -> Vec<Task> {
        self.rows
            .values()
            .filter(|row| row.owner_id == owner_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn log(&self) -> &[Commit] {
        &self.log
    }

    #[must_use]
    pub const fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Execute one write for `owner_id`. Returns the response for the
    /// caller; a successful write is also appended to the commit log.
    pub fn handle(
        &mut self,
        owner_id: &str,
        request: &WriteRequest<Task>,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> (Response, Option<Commit>) {
        if rng.chance(self.failure_percent) {
            self.stats.injected_failures += 1;
            let err = if rng.chance(50) {
                RemoteError::network("connection reset by peer")
            } else {
                RemoteError::constraint("new row violates row-level security policy").with_code("42501")
            };
            debug!(round, error = %err, "injected write failure");
            return match request {
                WriteRequest::Insert(_) => (Response::Inserted(Err(err)), None),
                WriteRequest::Update { .. } | WriteRequest::Delete { .. } => {
                    (Response::Written(Err(err)), None)
                }
            };
        }

        match request {
            WriteRequest::Insert(record) => {
                let row = self.insert(record, round);
                let commit = self.commit(owner_id, ChangeEvent::Insert(row.clone()));
                (Response::Inserted(Ok(row)), Some(commit))
            }
            WriteRequest::Update { id, patch } => match self.update(owner_id, id, patch, round) {
                Ok(row) => {
                    let commit = self.commit(owner_id, ChangeEvent::Update(row));
                    (Response::Written(Ok(())), Some(commit))
                }
                Err(err) => (Response::Written(Err(err)), None),
            },
            WriteRequest::Delete { id } => match self.delete(owner_id, id) {
                Ok(true) => {
                    let commit = self.commit(owner_id, ChangeEvent::Delete { id: id.clone() });
                    (Response::Written(Ok(())), Some(commit))
                }
                Ok(false) => (Response::Written(Ok(())), None),
                Err(err) => (Response::Written(Err(err)), None),
            },
        }
    }

    /// A write by some other account; it must never surface on our clients.
    pub fn foreign_insert(&mut self, owner_id: &str, date: NaiveDate, round: u64) -> Commit {
        let draft = Task::new(String::new(), owner_id, "someone else's task", date, self.clock.now(round));
        let row = self.insert(&draft, round);
        self.commit(owner_id, ChangeEvent::Insert(row))
    }

    fn insert(&mut self, record: &Task, round: u64) -> Task {
        let mut row = record.clone();
        row.set_id(self.mint_id());
        row.set_updated_at(self.stamp(round));
        self.rows.insert(row.id.clone(), row.clone());
        trace!(id = %row.id, "row inserted");
        row
    }

    fn update(
        &mut self,
        owner_id: &str,
        id: &str,
        patch: &TaskPatch,
        round: u64,
    ) -> Result<Task, RemoteError> {
        let stamp = self.stamp(round);
        match self.rows.get_mut(id) {
            Some(row) if row.owner_id == owner_id => {
                patch.apply(row);
                row.set_updated_at(stamp);
                trace!(id, "row updated");
                Ok(row.clone())
            }
            Some(_) => Err(RemoteError::permission(format!("row {id} belongs to another owner"))),
            None => {
                self.stats.not_found += 1;
                Err(RemoteError::not_found(format!("row {id} does not exist")))
            }
        }
    }

    /// `Ok(false)` when the row was already gone: zero rows matched.
    fn delete(&mut self, owner_id: &str, id: &str) -> Result<bool, RemoteError> {
        match self.rows.get(id) {
            Some(row) if row.owner_id != owner_id => {
                Err(RemoteError::permission(format!("row {id} belongs to another owner")))
            }
            Some(_) => {
                self.rows.remove(id);
                trace!(id, "row deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn commit(&mut self, owner_id: &str, event: ChangeEvent<Task>) -> Commit {
        self.stats.commits += 1;
        let commit = Commit {
            owner_id: owner_id.to_string(),
            event,
        };
        self.log.push(commit.clone());
        commit
    }

    fn mint_id(&mut self) -> String {
        let id = format!("{}-{:06}", Task::KIND.id_prefix(), self.next_id);
        self.next_id += 1;
        id
    }

    fn stamp(&mut self, round: u64) -> DateTime<Utc> {
        let now = self.clock.now(round);
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}
