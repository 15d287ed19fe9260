use chrono::NaiveDate;
use daybook_core::change::RawChange;
use daybook_core::config::SyncSection;
use daybook_core::error::SyncError;
use daybook_core::model::task::{Task, TaskDraft, TaskPatch, TaskScope};
use daybook_core::sync::{MutationId, MutationTicket, Reconciled, SyncEngine};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::SimulatedClock;
use crate::network::ClientId;
use crate::rng::DeterministicRng;
use crate::server::Response;

/// Few distinct titles on two days, so look-alike creates from different
/// devices are common.
pub const TITLES: [&str; 4] = ["Write report", "Call mom", "Gym", "Groceries"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Create,
    Rename,
    Move,
    Toggle,
    Delete,
}

/// One simulated device running a `tasks` collection.
#[derive(Debug)]
pub struct SimClient {
    id: ClientId,
    owner: String,
    scope: TaskScope,
    sync: SyncSection,
    days: [NaiveDate; 2],
    engine: SyncEngine<Task>,
    clock: SimulatedClock,
    generation: u64,
    /// Change payloads delivered to the current engine, in arrival order.
    observed: Vec<RawChange>,
}

impl SimClient {
    #[must_use]
    pub fn new(
        id: ClientId,
        owner: impl Into<String>,
        scope: TaskScope,
        sync: SyncSection,
        days: [NaiveDate; 2],
        clock: SimulatedClock,
    ) -> Self {
        let owner = owner.into();
        let engine = SyncEngine::new(owner.clone(), scope.clone(), &sync);
        Self {
            id,
            owner,
            scope,
            sync,
            days,
            engine,
            clock,
            generation: 0,
            observed: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub const fn scope(&self) -> &TaskScope {
        &self.scope
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn engine(&self) -> &SyncEngine<Task> {
        &self.engine
    }

    #[must_use]
    pub fn observed(&self) -> &[RawChange] {
        &self.observed
    }

    pub fn clock_mut(&mut self) -> &mut SimulatedClock {
        &mut self.clock
    }

    /// Fresh engine loaded from `rows`; everything in flight for the old one
    /// is abandoned.
    pub fn remount(&mut self, rows: Vec<Task>) {
        self.generation += 1;
        self.engine = SyncEngine::new(self.owner.clone(), self.scope.clone(), &self.sync);
        self.engine.load(rows);
        self.observed.clear();
    }

    /// Pick and optimistically apply one user action.
    ///
    /// # Errors
    ///
    /// Returns the engine's refusal when the chosen record cannot be edited.
    pub fn act(
        &mut self,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> Result<(OpKind, MutationTicket<Task>), SyncError> {
        let now = self.clock.now(round);
        let editable: Vec<String> = self
            .engine
            .records()
            .iter()
            .filter(|task| !self.engine.is_placeholder(&task.id))
            .map(|task| task.id.clone())
            .collect();

        let roll = rng.below(100);
        let target = rng.pick(&editable).cloned();
        let (kind, ticket) = match (roll, target) {
            (0..30, _) | (_, None) => {
                let title = rng.pick(&TITLES).copied().unwrap_or("Untitled");
                let date = self.days[rng.index(self.days.len())];
                (OpKind::Create, self.engine.begin_create(TaskDraft::new(title, date), now))
            }
            (30..45, Some(id)) => {
                let title = rng.pick(&TITLES).copied().unwrap_or("Untitled");
                (OpKind::Rename, self.engine.begin_update(&id, TaskPatch::title(title), now)?)
            }
            (45..60, Some(id)) => {
                let date = self.days[rng.index(self.days.len())];
                (OpKind::Move, self.engine.begin_update(&id, TaskPatch::date(date), now)?)
            }
            (60..85, Some(id)) => (OpKind::Toggle, self.engine.begin_toggle(&id, now)?),
            (_, Some(id)) => (OpKind::Delete, self.engine.begin_delete(&id)?),
        };
        trace!(client = self.id, ?kind, mutation = ?ticket.mutation, "issued");
        Ok((kind, ticket))
    }

    pub fn receive_change(&mut self, raw: RawChange) -> Reconciled {
        let outcome = self.engine.apply_raw(&raw);
        self.observed.push(raw);
        outcome
    }

    /// Fold a write response into the engine.
    ///
    /// # Errors
    ///
    /// Whatever the engine reports: the remote error after a rollback, or
    /// [`SyncError::Cancelled`] for a response it already consumed.
    pub fn receive_response(&mut self, mutation: MutationId, response: Response) -> Result<(), SyncError> {
        match response {
            Response::Inserted(outcome) => self.engine.settle_insert(mutation, outcome),
            Response::Written(outcome) => self.engine.settle_write(mutation, outcome),
        }
    }

    /// Re-deliver every change this engine has seen, returning the index of
    /// the first one that altered the collection.
    pub fn replay_observed(&mut self) -> Option<usize> {
        let observed = self.observed.clone();
        for (index, raw) in observed.iter().enumerate() {
            let before = self.engine.records().to_vec();
            self.engine.apply_raw(raw);
            if self.engine.records() != before.as_slice() {
                return Some(index);
            }
        }
        None
    }
}
