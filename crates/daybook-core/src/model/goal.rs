use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, Patch, Scope, Toggled, created_then_id};
use crate::model::record_columns;
use crate::policy::{SortPolicy, open_first, some_first};

/// A longer-running objective with an optional deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    /// Percent complete, 0..=100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalDraft {
    pub title: String,
    pub description: Option<String>,
    pub target_date: Option<NaiveDate>,
}

impl GoalDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            target_date: None,
        }
    }

    #[must_use]
    pub const fn due(mut self, date: NaiveDate) -> Self {
        self.target_date = Some(date);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GoalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl GoalPatch {
    /// Set progress, clamped to 100.
    #[must_use]
    pub fn progress(percent: u8) -> Self {
        Self {
            progress: Some(percent.min(100)),
            ..Self::default()
        }
    }
}

impl Patch<Goal> for GoalPatch {
    fn apply(&self, goal: &mut Goal) {
        if let Some(title) = &self.title {
            goal.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            goal.description.clone_from(description);
        }
        if let Some(target_date) = self.target_date {
            goal.target_date = target_date;
        }
        if let Some(progress) = self.progress {
            goal.progress = progress.min(100);
        }
        if let Some(completed) = self.completed {
            goal.completed = completed;
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalScope {
    /// Hide completed goals.
    pub open_only: bool,
}

impl GoalScope {
    #[must_use]
    pub const fn all() -> Self {
        Self { open_only: false }
    }

    #[must_use]
    pub const fn open() -> Self {
        Self { open_only: true }
    }
}

impl Scope<Goal> for GoalScope {
    fn contains(&self, goal: &Goal) -> bool {
        !(self.open_only && goal.completed)
    }
}

/// Open first, then nearest deadline (goals without one last).
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalOrder;

impl SortPolicy<Goal> for GoalOrder {
    fn compare(&self, a: &Goal, b: &Goal) -> Ordering {
        open_first(a.completed, b.completed)
            .then_with(|| some_first(a.target_date.as_ref(), b.target_date.as_ref()))
            .then_with(|| created_then_id(a, b))
    }
}

impl Entity for Goal {
    type Scope = GoalScope;
    type Patch = GoalPatch;
    type Draft = GoalDraft;
    type Order = GoalOrder;

    const KIND: EntityKind = EntityKind::Goal;
    const TOGGLE_IS_COMPLETION: bool = true;

    fn from_draft(draft: GoalDraft, id: String, owner_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            title: draft.title,
            description: draft.description,
            target_date: draft.target_date,
            progress: 0,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    record_columns!();

    fn same_logical(&self, other: &Self) -> bool {
        self.owner_id == other.owner_id
            && self.title == other.title
            && self.target_date == other.target_date
    }

    fn toggled(&self) -> Toggled<GoalPatch> {
        Toggled {
            patch: GoalPatch {
                completed: Some(!self.completed),
                ..GoalPatch::default()
            },
            now_on: !self.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{at, day};

    fn goal(id: &str, due: Option<u32>) -> Goal {
        let draft = GoalDraft::new(id);
        let draft = match due {
            Some(d) => draft.due(day(d)),
            None => draft,
        };
        Goal::from_draft(draft, id.to_string(), "u1".to_string(), at(0))
    }

    #[test]
    fn nearest_deadline_first_and_undated_last() {
        let mut goals = vec![goal("none", None), goal("late", Some(20)), goal("soon", Some(3))];
        crate::policy::apply(&GoalOrder, &mut goals);
        let ids: Vec<_> = goals.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["soon", "late", "none"]);
    }

    #[test]
    fn progress_is_clamped() {
        let mut g = goal("g", None);
        GoalPatch::progress(250).apply(&mut g);
        assert_eq!(g.progress, 100);
    }

    #[test]
    fn open_scope_drops_completed() {
        let mut g = goal("g", None);
        g.completed = true;
        assert!(!GoalScope::open().contains(&g));
        assert!(GoalScope::all().contains(&g));
    }
}
