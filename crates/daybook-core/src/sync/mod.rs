//! The optimistic collection synchronizer.
//!
//! [`engine`] holds the pure reconciliation logic; [`synchronizer`] drives it
//! from tokio tasks against a [`RemoteStore`](crate::remote::RemoteStore) and
//! a [`ChangeFeed`](crate::remote::ChangeFeed).

pub mod engine;
pub mod pending;
pub mod synchronizer;

pub use engine::{IgnoreReason, Reconciled, SyncEngine};
pub use pending::{MutationId, MutationTicket, WriteRequest};
pub use synchronizer::{PendingWrite, Synchronizer};
