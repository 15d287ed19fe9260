//! The visible, id-unique local collection plus its external status.

use serde::Serialize;

use crate::entity::Entity;
use crate::policy::{self, SortPolicy};

/// External status of a collection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Ready,
    Error,
}

/// Immutable copy of a collection handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionView<E> {
    pub records: Vec<E>,
    pub status: Status,
    pub error: Option<String>,
}

impl<E> CollectionView<E> {
    /// View of a collection with no owner: empty and not loading.
    #[must_use]
    pub const fn signed_out(error: Option<String>) -> Self {
        Self {
            records: Vec::new(),
            status: Status::Ready,
            error,
        }
    }
}

impl<E: Entity> CollectionView<E> {
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(Entity::id).collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&E> {
        self.records.iter().find(|record| record.id() == id)
    }
}

/// Ordered records, unique by id.
///
/// Every write goes through [`upsert`](Self::upsert) or
/// [`remove`](Self::remove), which keep the uniqueness invariant; ordering is
/// restored by [`sort`](Self::sort).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCollection<E> {
    records: Vec<E>,
    status: Status,
    error: Option<String>,
}

impl<E: Entity> LocalCollection<E> {
    #[must_use]
    pub const fn new(status: Status) -> Self {
        Self {
            records: Vec::new(),
            status,
            error: None,
        }
    }

    #[must_use]
    pub fn records(&self) -> &[E] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&E> {
        self.records.iter().find(|record| record.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Insert or replace by id. Returns the replaced record, if any.
    pub fn upsert(&mut self, record: E) -> Option<E> {
        match self.records.iter_mut().find(|r| r.id() == record.id()) {
            Some(slot) => Some(std::mem::replace(slot, record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<E> {
        let index = self.records.iter().position(|r| r.id() == id)?;
        Some(self.records.remove(index))
    }

    /// Replace the whole record list, e.g. when restoring a snapshot.
    pub fn replace_all(&mut self, records: Vec<E>) {
        self.records = records;
    }

    pub fn sort(&mut self, policy: &dyn SortPolicy<E>) {
        policy::apply(policy, &mut self.records);
    }

    /// Highest explicit position among current records.
    #[must_use]
    pub fn max_position(&self) -> Option<i64> {
        self.records.iter().filter_map(Entity::position).max()
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    #[must_use]
    pub fn view(&self) -> CollectionView<E> {
        CollectionView {
            records: self.records.clone(),
            status: self.status,
            error: self.error.clone(),
        }
    }
}
