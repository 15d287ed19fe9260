//! daybook-core library.
//!
//! Keeps per-scope, in-memory collections of dashboard records (tasks,
//! habits, habit logs, goals, canvas notes, canvas groups) in sync with a
//! hosted store: local mutations apply immediately, remote writes reconcile
//! or roll back, and a push stream of change events is merged into the same
//! collection without duplicating placeholders or clobbering local edits.
//!
//! # Conventions
//!
//! - **Errors**: library errors are `thiserror` enums carrying an
//!   [`ErrorCode`](error::ErrorCode); config loading returns `anyhow::Result`.
//! - **Logging**: `tracing` macros. `debug!` for reconciliation decisions,
//!   `info!` for mounts, `warn!` for rollbacks and dropped payloads.
//! - **Time**: never read the system clock directly; go through
//!   [`Clock`](context::Clock).

pub mod change;
pub mod collection;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod memory;
pub mod model;
pub mod policy;
pub mod remote;
pub mod sync;

pub use collection::{CollectionView, Status};
pub use context::SyncContext;
pub use entity::{Entity, EntityKind};
pub use error::{RemoteError, SyncError};
pub use sync::{PendingWrite, SyncEngine, Synchronizer};
