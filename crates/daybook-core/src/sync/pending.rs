//! Bookkeeping for mutations whose remote write has not been folded back in.

use chrono::{DateTime, Utc};

use crate::entity::Entity;

/// Monotonic id of a local mutation within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(pub u64);

/// The remote call a mutation needs.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest<E: Entity> {
    /// Insert the placeholder record; the store assigns the real id.
    Insert(E),
    Update { id: String, patch: E::Patch },
    Delete { id: String },
}

/// Handed back by every `begin_*` call; the caller performs `request`
/// against the remote store and reports the outcome with the matching
/// `settle_*` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationTicket<E: Entity> {
    pub mutation: MutationId,
    pub owner_id: String,
    pub request: WriteRequest<E>,
    /// Set for toggles that turned a completion flag on.
    pub completes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    InFlight,
    /// The store accepted the write but its echo has not been seen yet.
    Acked,
}

#[derive(Debug, Clone)]
pub(crate) enum PendingOp<E: Entity> {
    Create {
        placeholder: E,
        /// Server id of the insert event that replaced the placeholder early.
        claimed_by: Option<String>,
    },
    Update {
        patch: E::Patch,
        stamp: DateTime<Utc>,
        /// A server record already carrying the patch has been seen.
        reflected: bool,
    },
    Delete,
}

#[derive(Debug, Clone)]
pub(crate) struct Pending<E: Entity> {
    /// Record id the mutation targets (the placeholder id for creates).
    pub target: String,
    pub op: PendingOp<E>,
    pub phase: Phase,
    /// Whole visible collection when the mutation began; only kept for the
    /// snapshot rollback strategy.
    pub snapshot: Option<Vec<E>>,
}

impl<E: Entity> Pending<E> {
    pub(crate) fn unclaimed_placeholder(&self) -> Option<&E> {
        match &self.op {
            PendingOp::Create {
                placeholder,
                claimed_by: None,
            } if self.phase == Phase::InFlight => Some(placeholder),
            _ => None,
        }
    }

    /// Whether the store has accepted this update and a server record
    /// carrying it has arrived, so replaying it changes nothing.
    pub(crate) const fn is_settled_update(&self) -> bool {
        matches!(
            (&self.op, self.phase),
            (PendingOp::Update { reflected: true, .. }, Phase::Acked)
        )
    }
}
