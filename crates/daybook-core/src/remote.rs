//! Seams to the hosted backend: the table API and the realtime channel.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::change::RawChange;
use crate::entity::Entity;
use crate::error::RemoteError;

/// Table operations for one entity type.
///
/// Every write is scoped by owner as well as id; a store must refuse to touch
/// another owner's rows.
#[async_trait]
pub trait RemoteStore<E: Entity>: Send + Sync {
    /// All of `owner_id`'s records inside `scope`.
    async fn select(&self, owner_id: &str, scope: &E::Scope) -> Result<Vec<E>, RemoteError>;

    /// Persist a new record. The returned record carries the server id and
    /// server-assigned timestamps; the id of `record` is a placeholder.
    async fn insert(&self, record: &E) -> Result<E, RemoteError>;

    async fn update(&self, owner_id: &str, id: &str, patch: &E::Patch) -> Result<(), RemoteError>;

    async fn delete(&self, owner_id: &str, id: &str) -> Result<(), RemoteError>;
}

/// Push channel of change events for one entity table.
///
/// Delivery is at-least-once with no ordering guarantee relative to direct
/// writes. Dropping the stream releases the subscription.
pub trait ChangeFeed<E: Entity>: Send + Sync {
    fn subscribe(&self, owner_id: &str, scope: &E::Scope) -> BoxStream<'static, RawChange>;
}
