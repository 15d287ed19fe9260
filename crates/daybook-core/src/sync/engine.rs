//! The synchronous core of the optimistic collection synchronizer.
//!
//! [`SyncEngine`] owns one local collection and never performs I/O. Every
//! user action is split into a `begin_*` call, which applies the mutation
//! optimistically and hands back a [`MutationTicket`] describing the remote
//! write, and a `settle_*` call reporting how that write ended. Change events
//! from the push stream are folded in with [`SyncEngine::apply_change`].
//!
//! # Model
//!
//! The engine keeps, per record id:
//!
//! - the **base**: the latest server-confirmed record, accepted only if its
//!   `updated_at` is not older than the last one seen (last-write-wins on
//!   server stamps),
//! - a **tombstone** once the server confirmed a delete,
//! - the **pending** local mutations targeting it, in issue order.
//!
//! The visible record is the base with pending mutations replayed on top, so
//! a change event arriving mid-flight refreshes the base without clobbering
//! the local edit, and a failed write is undone by replaying the remaining
//! mutations. Updates stay replayed after the store accepts them until a
//! server record carrying their fields arrives, which is normally their echo.
//! A record counts even when it is stale, since the echo of a write that was
//! later overwritten loses the timestamp comparison.
//!
//! Stamps and tombstones are kept for every id of the owner seen during the
//! engine's life, in scope or not: dropping them would let a late event for a
//! record that left the scope bring back an older version. The bound is the
//! number of distinct ids observed between mounts; a remount starts empty.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::change::{ChangeEvent, RawChange};
use crate::collection::{CollectionView, LocalCollection, Status};
use crate::config::{RollbackStrategy, SyncSection};
use crate::entity::{Entity, Patch, PlaceholderIds, Scope};
use crate::error::{RemoteError, SyncError};
use crate::policy::SortPolicy;
use crate::sync::pending::{MutationId, MutationTicket, Pending, PendingOp, Phase, WriteRequest};

/// What [`SyncEngine::apply_change`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// A record new to this collection was added.
    Appended,
    /// An in-flight placeholder was replaced by the server record.
    ClaimedPlaceholder { placeholder: String },
    /// A visible record was replaced (or entered the scope).
    Upserted,
    /// The server state was recorded but local in-flight edits stay on top.
    Merged,
    /// A record left the collection.
    Removed,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ForeignOwner,
    OutOfScope,
    AlreadyKnown,
    Stale,
    Tombstoned,
    /// Delete for an id this collection never held.
    Absent,
    Malformed,
}

pub struct SyncEngine<E: Entity> {
    owner: String,
    scope: E::Scope,
    policy: Box<dyn SortPolicy<E>>,
    rollback: RollbackStrategy,
    placeholders: PlaceholderIds,
    collection: LocalCollection<E>,
    base: HashMap<String, E>,
    confirmed: HashMap<String, DateTime<Utc>>,
    tombstones: HashSet<String>,
    pending: BTreeMap<MutationId, Pending<E>>,
    next_mutation: u64,
}

impl<E: Entity> SyncEngine<E> {
    /// New engine in the `loading` state, sorted by the entity's default order.
    pub fn new(owner: impl Into<String>, scope: E::Scope, config: &SyncSection) -> Self {
        Self {
            owner: owner.into(),
            scope,
            policy: Box::new(E::Order::default()),
            rollback: config.rollback,
            placeholders: PlaceholderIds::new(config.placeholder_prefix.clone()),
            collection: LocalCollection::new(Status::Loading),
            base: HashMap::new(),
            confirmed: HashMap::new(),
            tombstones: HashSet::new(),
            pending: BTreeMap::new(),
            next_mutation: 0,
        }
    }

    /// Replace the sort policy and re-sort.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn SortPolicy<E>>) -> Self {
        self.policy = policy;
        self.sort();
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub const fn scope(&self) -> &E::Scope {
        &self.scope
    }

    #[must_use]
    pub fn records(&self) -> &[E] {
        self.collection.records()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&E> {
        self.collection.get(id)
    }

    #[must_use]
    pub fn view(&self) -> CollectionView<E> {
        self.collection.view()
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.collection.status()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.collection.error()
    }

    pub fn clear_error(&mut self) {
        self.collection.clear_error();
    }

    /// Surface a locally rejected mutation on the error string.
    pub fn report(&mut self, err: &SyncError) {
        self.collection.set_error(err.display_message());
    }

    /// Number of mutations not yet folded back into server state.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of mutations whose remote write has not settled.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.pending
            .values()
            .filter(|p| p.phase == Phase::InFlight)
            .count()
    }

    #[must_use]
    pub fn is_placeholder(&self, id: &str) -> bool {
        self.placeholders.is_placeholder(id)
    }

    #[must_use]
    pub fn policy(&self) -> &dyn SortPolicy<E> {
        self.policy.as_ref()
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    pub fn begin_loading(&mut self) {
        self.collection.set_status(Status::Loading);
    }

    /// Fold in the result of the initial (or a manual re-) fetch.
    ///
    /// Records older than something already seen on the change stream are
    /// skipped, so subscribing before fetching never loses an event.
    pub fn load(&mut self, records: Vec<E>) {
        let fetched = records.len();
        let mut accepted = 0_usize;
        for record in records {
            if record.owner_id() == self.owner && self.accept_base(record) {
                accepted += 1;
            }
        }
        self.rebuild_all();
        self.collection.set_status(Status::Ready);
        self.collection.clear_error();
        debug!(
            kind = %E::KIND,
            fetched,
            accepted,
            visible = self.collection.len(),
            "collection loaded"
        );
    }

    pub fn fail_load(&mut self, err: &RemoteError) {
        warn!(kind = %E::KIND, error = %err, "initial fetch failed");
        self.collection.set_status(Status::Error);
        self.collection
            .set_error(SyncError::Remote(err.clone()).display_message());
    }

    // -----------------------------------------------------------------------
    // Mutation applier
    // -----------------------------------------------------------------------

    /// Insert a placeholder record built from `draft`.
    pub fn begin_create(&mut self, draft: E::Draft, now: DateTime<Utc>) -> MutationTicket<E> {
        let id = self.placeholders.mint();
        let mut record = E::from_draft(draft, id.clone(), self.owner.clone(), now);
        if E::ORDERED {
            let next = self.collection.max_position().map_or(1, |max| max.saturating_add(1));
            record.set_position(next);
        }

        let snapshot = self.snapshot();
        let mutation = self.push_pending(
            id.clone(),
            PendingOp::Create {
                placeholder: record.clone(),
                claimed_by: None,
            },
            snapshot,
        );
        self.refresh(&id);
        self.sort();
        debug!(kind = %E::KIND, placeholder = %id, "optimistic create");

        MutationTicket {
            mutation,
            owner_id: self.owner.clone(),
            request: WriteRequest::Insert(record),
            completes: false,
        }
    }

    /// Apply `patch` to the record with `id`.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if no such record is visible,
    /// [`SyncError::PlaceholderPending`] if it has not been persisted yet.
    pub fn begin_update(
        &mut self,
        id: &str,
        patch: E::Patch,
        now: DateTime<Utc>,
    ) -> Result<MutationTicket<E>, SyncError> {
        let mut next = self.check_target(id)?.clone();
        patch.apply(&mut next);
        next.set_updated_at(now);

        let snapshot = self.snapshot();
        let mutation = self.push_pending(
            id.to_string(),
            PendingOp::Update {
                patch: patch.clone(),
                stamp: now,
                reflected: false,
            },
            snapshot,
        );

        if self.in_scope(&next) {
            self.collection.upsert(next);
        } else {
            self.collection.remove(id);
        }
        self.sort();
        debug!(kind = %E::KIND, id, empty = patch.is_empty(), "optimistic update");

        Ok(MutationTicket {
            mutation,
            owner_id: self.owner.clone(),
            request: WriteRequest::Update {
                id: id.to_string(),
                patch,
            },
            completes: false,
        })
    }

    /// Flip the record's toggle field.
    ///
    /// # Errors
    ///
    /// Same as [`begin_update`](Self::begin_update).
    pub fn begin_toggle(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<MutationTicket<E>, SyncError> {
        let toggled = self.check_target(id)?.toggled();
        let mut ticket = self.begin_update(id, toggled.patch, now)?;
        ticket.completes = toggled.now_on && E::TOGGLE_IS_COMPLETION;
        Ok(ticket)
    }

    /// Remove the record with `id`.
    ///
    /// # Errors
    ///
    /// Same as [`begin_update`](Self::begin_update).
    pub fn begin_delete(&mut self, id: &str) -> Result<MutationTicket<E>, SyncError> {
        self.check_target(id)?;
        let snapshot = self.snapshot();
        let mutation = self.push_pending(id.to_string(), PendingOp::Delete, snapshot);
        self.collection.remove(id);
        debug!(kind = %E::KIND, id, "optimistic delete");

        Ok(MutationTicket {
            mutation,
            owner_id: self.owner.clone(),
            request: WriteRequest::Delete { id: id.to_string() },
            completes: false,
        })
    }

    /// Report the outcome of an [`WriteRequest::Insert`].
    ///
    /// # Errors
    ///
    /// Returns the remote error (after rolling back) when the insert failed,
    /// or [`SyncError::Cancelled`] if the mutation is unknown to this engine.
    pub fn settle_insert(
        &mut self,
        mutation: MutationId,
        outcome: Result<E, RemoteError>,
    ) -> Result<(), SyncError> {
        let pending = self.take_pending(mutation)?;
        let claimed_by = match pending.op {
            PendingOp::Create { ref claimed_by, .. } => claimed_by.clone(),
            _ => {
                warn!(kind = %E::KIND, ?mutation, "insert outcome reported for a non-create mutation");
                self.pending.insert(mutation, pending);
                return Err(SyncError::Cancelled);
            }
        };

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                if claimed_by.is_some() {
                    debug!(
                        kind = %E::KIND,
                        placeholder = %pending.target,
                        "insert reported failure but the server record already arrived"
                    );
                }
                self.roll_back(&pending);
                return Err(self.fail(&pending.target, err));
            }
        };

        let server_id = record.id().to_string();
        if let Some(claimed) = claimed_by.as_deref().filter(|c| *c != server_id) {
            debug!(
                kind = %E::KIND,
                placeholder = %pending.target,
                claimed,
                server_id = %server_id,
                "placeholder had collapsed into a look-alike record"
            );
        }
        self.collection.remove(&pending.target);
        self.accept_base(record);
        self.refresh(&server_id);
        self.sort();
        debug!(kind = %E::KIND, placeholder = %pending.target, id = %server_id, "create confirmed");
        Ok(())
    }

    /// Report the outcome of an update or delete.
    ///
    /// # Errors
    ///
    /// Returns the remote error (after rolling back) when the write failed,
    /// or [`SyncError::Cancelled`] if the mutation is unknown to this engine.
    pub fn settle_write(
        &mut self,
        mutation: MutationId,
        outcome: Result<(), RemoteError>,
    ) -> Result<(), SyncError> {
        let mut pending = self.take_pending(mutation)?;
        let target = pending.target.clone();

        if matches!(pending.op, PendingOp::Create { .. }) {
            warn!(kind = %E::KIND, ?mutation, "write outcome reported for a create mutation");
            self.pending.insert(mutation, pending);
            return Err(SyncError::Cancelled);
        }
        if let Err(err) = outcome {
            self.roll_back(&pending);
            return Err(self.fail(&target, err));
        }

        if matches!(pending.op, PendingOp::Delete) {
            self.tombstone(&target);
            self.refresh(&target);
            debug!(kind = %E::KIND, id = %target, "delete confirmed");
            return Ok(());
        }

        // A tombstoned target never produces another server record.
        let gone = self.tombstones.contains(&target);
        if let PendingOp::Update { patch, reflected, .. } = &mut pending.op {
            *reflected = *reflected
                || gone
                || self.base.get(&target).is_some_and(|base| carries(base, patch));
        }
        pending.phase = Phase::Acked;
        let echoed = pending.is_settled_update();
        if !echoed {
            self.pending.insert(mutation, pending);
        }
        self.refresh(&target);
        self.sort();
        debug!(kind = %E::KIND, id = %target, echoed, "update confirmed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Change stream reconciler
    // -----------------------------------------------------------------------

    /// Decode and fold in one raw payload. Malformed payloads are dropped.
    pub fn apply_raw(&mut self, raw: &RawChange) -> Reconciled {
        match raw.decode::<E>() {
            Ok(event) => self.apply_change(event),
            Err(err) => {
                warn!(
                    kind = %E::KIND,
                    code = %err.code(),
                    error = %err,
                    event_type = %raw.event_type,
                    "dropping malformed change event"
                );
                Reconciled::Ignored(IgnoreReason::Malformed)
            }
        }
    }

    /// Fold one change event into the collection.
    ///
    /// Idempotent: applying the same event again reports `Ignored` or an
    /// equivalent upsert and leaves the collection unchanged.
    pub fn apply_change(&mut self, event: ChangeEvent<E>) -> Reconciled {
        let outcome = match event {
            ChangeEvent::Insert(record) => self.reconcile_insert(record),
            ChangeEvent::Update(record) => self.reconcile_update(record),
            ChangeEvent::Delete { id } => self.reconcile_delete(&id),
        };
        debug!(kind = %E::KIND, ?outcome, "change event reconciled");
        outcome
    }

    fn reconcile_insert(&mut self, record: E) -> Reconciled {
        if record.owner_id() != self.owner {
            return Reconciled::Ignored(IgnoreReason::ForeignOwner);
        }
        let id = record.id().to_string();
        if self.tombstones.contains(&id) {
            return Reconciled::Ignored(IgnoreReason::Tombstoned);
        }
        if self.confirmed.contains_key(&id) || self.collection.contains(&id) {
            return Reconciled::Ignored(IgnoreReason::AlreadyKnown);
        }
        if !self.scope.contains(&record) {
            self.accept_base(record);
            return Reconciled::Ignored(IgnoreReason::OutOfScope);
        }

        let claim = self.pending.iter_mut().find_map(|(_, pending)| {
            let matches = pending
                .unclaimed_placeholder()
                .is_some_and(|placeholder| placeholder.same_logical(&record));
            if !matches {
                return None;
            }
            if let PendingOp::Create { claimed_by, .. } = &mut pending.op {
                *claimed_by = Some(id.clone());
            }
            Some(pending.target.clone())
        });

        self.accept_base(record);
        self.refresh(&id);
        let outcome = match claim {
            Some(placeholder) => {
                self.refresh(&placeholder);
                Reconciled::ClaimedPlaceholder { placeholder }
            }
            None => Reconciled::Appended,
        };
        self.sort();
        outcome
    }

    fn reconcile_update(&mut self, record: E) -> Reconciled {
        if record.owner_id() != self.owner {
            return Reconciled::Ignored(IgnoreReason::ForeignOwner);
        }
        let id = record.id().to_string();
        if self.tombstones.contains(&id) {
            return Reconciled::Ignored(IgnoreReason::Tombstoned);
        }
        let pending_before = self.pending.len();
        if !self.accept_base(record) {
            // A stale record can still be the echo that settles an acked write.
            if self.pending.len() != pending_before {
                self.refresh(&id);
                self.sort();
            }
            return Reconciled::Ignored(IgnoreReason::Stale);
        }

        let was_visible = self.collection.contains(&id);
        self.refresh(&id);
        self.sort();

        if self.has_in_flight(&id) {
            Reconciled::Merged
        } else if self.collection.contains(&id) {
            Reconciled::Upserted
        } else if was_visible {
            Reconciled::Removed
        } else {
            Reconciled::Ignored(IgnoreReason::OutOfScope)
        }
    }

    fn reconcile_delete(&mut self, id: &str) -> Reconciled {
        let fresh = !self.tombstones.contains(id);
        let was_visible = self.collection.contains(id);
        self.tombstone(id);
        self.refresh(id);

        if was_visible {
            Reconciled::Removed
        } else if fresh {
            Reconciled::Ignored(IgnoreReason::Absent)
        } else {
            Reconciled::Ignored(IgnoreReason::Tombstoned)
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn in_scope(&self, record: &E) -> bool {
        record.owner_id() == self.owner && self.scope.contains(record)
    }

    fn sort(&mut self) {
        self.collection.sort(self.policy.as_ref());
    }

    fn snapshot(&self) -> Option<Vec<E>> {
        match self.rollback {
            RollbackStrategy::Snapshot => Some(self.collection.records().to_vec()),
            RollbackStrategy::Rebase => None,
        }
    }

    fn has_in_flight(&self, id: &str) -> bool {
        self.pending
            .values()
            .any(|p| p.target == id && p.phase == Phase::InFlight)
    }

    fn check_target(&self, id: &str) -> Result<&E, SyncError> {
        if self.placeholders.is_placeholder(id) && self.collection.contains(id) {
            return Err(SyncError::PlaceholderPending(id.to_string()));
        }
        self.collection
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    fn push_pending(
        &mut self,
        target: String,
        op: PendingOp<E>,
        snapshot: Option<Vec<E>>,
    ) -> MutationId {
        let mutation = MutationId(self.next_mutation);
        self.next_mutation += 1;
        self.pending.insert(
            mutation,
            Pending {
                target,
                op,
                phase: Phase::InFlight,
                snapshot,
            },
        );
        mutation
    }

    fn take_pending(&mut self, mutation: MutationId) -> Result<Pending<E>, SyncError> {
        self.pending.remove(&mutation).ok_or_else(|| {
            debug!(kind = %E::KIND, ?mutation, "outcome for unknown mutation ignored");
            SyncError::Cancelled
        })
    }

    /// Record a server-confirmed version. Returns false if it is stale or the
    /// id is tombstoned.
    fn accept_base(&mut self, record: E) -> bool {
        let id = record.id().to_string();
        if self.tombstones.contains(&id) {
            return false;
        }
        self.note_server_record(&record);
        if self
            .confirmed
            .get(&id)
            .is_some_and(|seen| record.updated_at() < *seen)
        {
            return false;
        }

        self.confirmed.insert(id.clone(), record.updated_at());
        if self.in_scope(&record) {
            self.base.insert(id, record);
        } else {
            self.base.remove(&id);
        }
        true
    }

    fn tombstone(&mut self, id: &str) {
        self.tombstones.insert(id.to_string());
        self.base.remove(id);
        self.drop_acked(id);
    }

    /// Mark pending updates on the record's id whose fields it already
    /// carries, then drop the ones the store has acknowledged.
    fn note_server_record(&mut self, record: &E) {
        let id = record.id();
        for pending in self.pending.values_mut().filter(|p| p.target == id) {
            if let PendingOp::Update { patch, reflected, .. } = &mut pending.op {
                *reflected = *reflected || carries(record, patch);
            }
        }
        self.pending.retain(|_, p| !p.is_settled_update());
    }

    fn drop_acked(&mut self, id: &str) {
        self.pending
            .retain(|_, p| !(p.target == id && p.phase == Phase::Acked));
    }

    /// Base record with every pending mutation for `id` replayed in order.
    fn project(&self, id: &str) -> Option<E> {
        let mut current = if self.tombstones.contains(id) {
            None
        } else {
            self.base.get(id).cloned()
        };

        for pending in self.pending.values().filter(|p| p.target == id) {
            match &pending.op {
                PendingOp::Create {
                    placeholder,
                    claimed_by: None,
                } => current = Some(placeholder.clone()),
                PendingOp::Create { .. } => {}
                PendingOp::Update { patch, stamp, .. } => {
                    if let Some(record) = current.as_mut() {
                        patch.apply(record);
                        record.set_updated_at(*stamp);
                    }
                }
                PendingOp::Delete => current = None,
            }
        }

        current.filter(|record| self.in_scope(record))
    }

    fn refresh(&mut self, id: &str) {
        match self.project(id) {
            Some(record) => {
                self.collection.upsert(record);
            }
            None => {
                self.collection.remove(id);
            }
        }
    }

    fn rebuild_all(&mut self) {
        let mut ids: Vec<String> = self.base.keys().cloned().collect();
        ids.extend(self.pending.values().map(|p| p.target.clone()));
        ids.sort_unstable();
        ids.dedup();

        let records = ids.iter().filter_map(|id| self.project(id)).collect();
        self.collection.replace_all(records);
        self.sort();
    }

    fn roll_back(&mut self, pending: &Pending<E>) {
        match (self.rollback, &pending.snapshot) {
            (RollbackStrategy::Snapshot, Some(snapshot)) => {
                self.collection.replace_all(snapshot.clone());
            }
            _ => self.refresh(&pending.target),
        }
        self.sort();
    }

    fn fail(&mut self, target: &str, err: RemoteError) -> SyncError {
        warn!(kind = %E::KIND, id = target, error = %err, strategy = ?self.rollback, "remote write failed; rolled back");
        let err = SyncError::Remote(err);
        self.collection.set_error(err.display_message());
        err
    }
}

/// Whether applying `patch` to `record` leaves every field but `updated_at`
/// as it is.
fn carries<E: Entity>(record: &E, patch: &E::Patch) -> bool {
    let mut patched = record.clone();
    patch.apply(&mut patched);
    patched.set_updated_at(record.updated_at());
    patched == *record
}

impl<E: Entity> fmt::Debug for SyncEngine<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("kind", &E::KIND)
            .field("owner", &self.owner)
            .field("scope", &self.scope)
            .field("rollback", &self.rollback)
            .field("visible", &self.collection.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
