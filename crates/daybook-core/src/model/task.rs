use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, Patch, Scope, Toggled, created_then_id};
use crate::model::record_columns;
use crate::policy::{SortPolicy, open_first};

/// Task priority. Higher priorities sort first among open tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A to-do item planned for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Open, medium-priority task at position 0.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            notes: None,
            date,
            completed: false,
            priority: Priority::default(),
            position: 0,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Fields supplied when creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub priority: Priority,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            date,
            notes: None,
            priority: Priority::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }
}

impl Patch<Task> for TaskPatch {
    fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(notes) = &self.notes {
            task.notes.clone_from(notes);
        }
        if let Some(date) = self.date {
            task.date = date;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(position) = self.position {
            task.position = position;
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One day's tasks, or every task when `date` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskScope {
    pub date: Option<NaiveDate>,
}

impl TaskScope {
    #[must_use]
    pub const fn day(date: NaiveDate) -> Self {
        Self { date: Some(date) }
    }

    #[must_use]
    pub const fn all() -> Self {
        Self { date: None }
    }
}

impl Scope<Task> for TaskScope {
    fn contains(&self, task: &Task) -> bool {
        self.date.is_none_or(|date| task.date == date)
    }
}

/// Open before completed, then priority (high first), then position, then
/// creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOrder;

impl SortPolicy<Task> for TaskOrder {
    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        open_first(a.completed, b.completed)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| created_then_id(a, b))
    }
}

impl Entity for Task {
    type Scope = TaskScope;
    type Patch = TaskPatch;
    type Draft = TaskDraft;
    type Order = TaskOrder;

    const KIND: EntityKind = EntityKind::Task;
    const ORDERED: bool = true;
    const TOGGLE_IS_COMPLETION: bool = true;

    fn from_draft(draft: TaskDraft, id: String, owner_id: String, now: DateTime<Utc>) -> Self {
        Self {
            notes: draft.notes,
            priority: draft.priority,
            ..Self::new(id, owner_id, draft.title, draft.date, now)
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
        self.owner_id == other.owner_id && self.date == other.date && self.title == other.title
    }

    fn toggled(&self) -> Toggled<TaskPatch> {
        Toggled {
            patch: TaskPatch::completed(!self.completed),
            now_on: !self.completed,
        }
    }
}
