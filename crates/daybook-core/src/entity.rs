//! Traits every synchronized record type implements.
//!
//! An entity plugs into the generic synchronizer by naming four companions:
//!
//! - a [`Scope`] deciding which records belong in one collection instance,
//! - a [`Patch`] describing a partial update with set semantics,
//! - a draft type holding the fields supplied at creation time,
//! - a [`SortPolicy`] giving the display order.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::policy::SortPolicy;

/// The remote tables backing each entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Habit,
    HabitLog,
    Goal,
    Note,
    CanvasGroup,
}

impl EntityKind {
    /// Remote table name.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Task => "tasks",
            Self::Habit => "habits",
            Self::HabitLog => "habit_logs",
            Self::Goal => "goals",
            Self::Note => "canvas_notes",
            Self::CanvasGroup => "canvas_groups",
        }
    }

    /// Short prefix used when a store mints server ids.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Task => "tsk",
            Self::Habit => "hab",
            Self::HabitLog => "hlg",
            Self::Goal => "gol",
            Self::Note => "nte",
            Self::CanvasGroup => "grp",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Which records belong in one local collection.
///
/// Ownership is checked separately; a scope only narrows further (one day,
/// one canvas, one habit).
pub trait Scope<E>: Clone + fmt::Debug + Send + Sync + 'static {
    fn contains(&self, record: &E) -> bool;
}

/// A partial update. Applying the same patch twice must equal applying it
/// once, which is why toggles are expressed as "set to" rather than "flip".
pub trait Patch<E>:
    Clone + fmt::Debug + Default + PartialEq + Send + Sync + Serialize + 'static
{
    fn apply(&self, record: &mut E);

    /// True when the patch sets no fields.
    fn is_empty(&self) -> bool;
}

/// Result of asking an entity for its toggle patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggled<P> {
    pub patch: P,
    /// Value of the toggle field after the patch is applied.
    pub now_on: bool,
}

/// A record type that can live in a synchronized collection.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Scope: Scope<Self>;
    type Patch: Patch<Self>;
    type Draft: Clone + fmt::Debug + Send + Sync + 'static;
    type Order: SortPolicy<Self> + Default + 'static;

    const KIND: EntityKind;

    /// Whether records carry an explicit `position` that new records append to.
    const ORDERED: bool = false;

    /// Whether turning the toggle field on counts as completing the record.
    const TOGGLE_IS_COMPLETION: bool = false;

    /// Build a fresh record from creation-time fields.
    fn from_draft(draft: Self::Draft, id: String, owner_id: String, now: DateTime<Utc>) -> Self;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn owner_id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    fn position(&self) -> Option<i64> {
        None
    }

    fn set_position(&mut self, _position: i64) {}

    /// Whether `other` is the same logical record as `self` even though the
    /// ids differ. Used to collapse a placeholder into the server record that
    /// the change stream delivers before the insert call returns.
    fn same_logical(&self, other: &Self) -> bool;

    /// Patch flipping this record's boolean toggle field.
    fn toggled(&self) -> Toggled<Self::Patch>;
}

/// Mints placeholder ids (`temp-1`, `temp-2`, ...) and recognises them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderIds {
    prefix: String,
    next: u64,
}

impl PlaceholderIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    pub fn mint(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    #[must_use]
    pub fn is_placeholder(&self, id: &str) -> bool {
        id.starts_with(&self.prefix)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Compare by `created_at`, then `id`; the tail of every sort policy.
pub fn created_then_id<E: Entity>(a: &E, b: &E) -> Ordering {
    a.created_at()
        .cmp(&b.created_at())
        .then_with(|| a.id().cmp(b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_ids_are_sequential_and_detectable() {
        let mut ids = PlaceholderIds::new("temp-");
        assert_eq!(ids.mint(), "temp-1");
        assert_eq!(ids.mint(), "temp-2");
        assert!(ids.is_placeholder("temp-2"));
        assert!(!ids.is_placeholder("tsk-000001"));
    }

    #[test]
    fn table_names_are_distinct() {
        let kinds = [
            EntityKind::Task,
            EntityKind::Habit,
            EntityKind::HabitLog,
            EntityKind::Goal,
            EntityKind::Note,
            EntityKind::CanvasGroup,
        ];
        let mut tables: Vec<_> = kinds.iter().map(|k| k.table()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), kinds.len());
    }
}
