use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, Patch, Scope, Toggled, created_then_id};
use crate::model::record_columns;
use crate::policy::{SortPolicy, open_first};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

/// A recurring activity the owner wants to track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Habit {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
    /// Times per period the habit should be done.
    #[serde(default = "default_target")]
    pub target: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const fn default_target() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HabitDraft {
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub target: u32,
    pub color: Option<String>,
}

impl HabitDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            frequency: Frequency::default(),
            target: default_target(),
            color: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HabitPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl Patch<Habit> for HabitPatch {
    fn apply(&self, habit: &mut Habit) {
        if let Some(name) = &self.name {
            habit.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            habit.description.clone_from(description);
        }
        if let Some(frequency) = self.frequency {
            habit.frequency = frequency;
        }
        if let Some(target) = self.target {
            habit.target = target;
        }
        if let Some(color) = &self.color {
            habit.color.clone_from(color);
        }
        if let Some(archived) = self.archived {
            habit.archived = archived;
        }
        if let Some(position) = self.position {
            habit.position = position;
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `archived: None` keeps every habit; `Some(flag)` keeps only matching ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HabitScope {
    pub archived: Option<bool>,
}

impl HabitScope {
    #[must_use]
    pub const fn all() -> Self {
        Self { archived: None }
    }

    #[must_use]
    pub const fn active() -> Self {
        Self {
            archived: Some(false),
        }
    }
}

impl Scope<Habit> for HabitScope {
    fn contains(&self, habit: &Habit) -> bool {
        self.archived.is_none_or(|archived| habit.archived == archived)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HabitOrder;

impl SortPolicy<Habit> for HabitOrder {
    fn compare(&self, a: &Habit, b: &Habit) -> Ordering {
        open_first(a.archived, b.archived)
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| created_then_id(a, b))
    }
}

impl Entity for Habit {
    type Scope = HabitScope;
    type Patch = HabitPatch;
    type Draft = HabitDraft;
    type Order = HabitOrder;

    const KIND: EntityKind = EntityKind::Habit;
    const ORDERED: bool = true;

    fn from_draft(draft: HabitDraft, id: String, owner_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            name: draft.name,
            description: draft.description,
            frequency: draft.frequency,
            target: draft.target,
            color: draft.color,
            archived: false,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    record_columns!();

    fn position(&self) -> Option<i64> {
        Some(self.position)
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    fn same_logical(&self, other: &Self) -> bool {
        self.owner_id == other.owner_id && self.name == other.name
    }

    fn toggled(&self) -> Toggled<HabitPatch> {
        Toggled {
            patch: HabitPatch {
                archived: Some(!self.archived),
                ..HabitPatch::default()
            },
            now_on: !self.archived,
        }
    }
}
