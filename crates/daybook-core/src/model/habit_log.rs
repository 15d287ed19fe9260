//! Per-day check-ins against a habit.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, Patch, Scope, Toggled, created_then_id};
use crate::model::record_columns;
use crate::policy::SortPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitLog {
    pub id: String,
    pub owner_id: String,
    pub habit_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HabitLogDraft {
    pub habit_id: String,
    pub date: NaiveDate,
    pub completed: bool,
    pub note: Option<String>,
}

impl HabitLogDraft {
    /// A completed check-in for `habit_id` on `date`.
    pub fn done(habit_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            habit_id: habit_id.into(),
            date,
            completed: true,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HabitLogPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
}

impl Patch<HabitLog> for HabitLogPatch {
    fn apply(&self, log: &mut HabitLog) {
        if let Some(completed) = self.completed {
            log.completed = completed;
        }
        if let Some(note) = &self.note {
            log.note.clone_from(note);
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Narrow by day, by habit, or both. The default keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HabitLogScope {
    pub date: Option<NaiveDate>,
    pub habit_id: Option<String>,
}

impl HabitLogScope {
    #[must_use]
    pub const fn day(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            habit_id: None,
        }
    }

    pub fn habit(habit_id: impl Into<String>) -> Self {
        Self {
            date: None,
            habit_id: Some(habit_id.into()),
        }
    }
}

impl Scope<HabitLog> for HabitLogScope {
    fn contains(&self, log: &HabitLog) -> bool {
        self.date.is_none_or(|date| log.date == date)
            && self
                .habit_id
                .as_deref()
                .is_none_or(|habit_id| log.habit_id == habit_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HabitLogOrder;

impl SortPolicy<HabitLog> for HabitLogOrder {
    fn compare(&self, a: &HabitLog, b: &HabitLog) -> Ordering {
        a.date
            .cmp(&b.date)
            .then_with(|| a.habit_id.cmp(&b.habit_id))
            .then_with(|| created_then_id(a, b))
    }
}

impl Entity for HabitLog {
    type Scope = HabitLogScope;
    type Patch = HabitLogPatch;
    type Draft = HabitLogDraft;
    type Order = HabitLogOrder;

    const KIND: EntityKind = EntityKind::HabitLog;
    const TOGGLE_IS_COMPLETION: bool = true;

    fn from_draft(draft: HabitLogDraft, id: String, owner_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            habit_id: draft.habit_id,
            date: draft.date,
            completed: draft.completed,
            note: draft.note,
            created_at: now,
            updated_at: now,
        }
    }

    record_columns!();

    /// One log per habit per day.
    fn same_logical(&self, other: &Self) -> bool {
        self.owner_id == other.owner_id && self.habit_id == other.habit_id && self.date == other.date
    }

    fn toggled(&self) -> Toggled<HabitLogPatch> {
        Toggled {
            patch: HabitLogPatch {
                completed: Some(!self.completed),
                note: None,
            },
            now_on: !self.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{at, day};

    #[test]
    fn scope_combines_day_and_habit() {
        let log = HabitLog::from_draft(
            HabitLogDraft::done("hab-1", day(1)),
            "hlg-1".to_string(),
            "u1".to_string(),
            at(0),
        );
        assert!(HabitLogScope::day(day(1)).contains(&log));
        assert!(HabitLogScope::habit("hab-1").contains(&log));
        let both = HabitLogScope {
            date: Some(day(1)),
            habit_id: Some("hab-2".to_string()),
        };
        assert!(!both.contains(&log));
    }

    #[test]
    fn logs_sort_by_day_then_habit() {
        let make = |id: &str, habit: &str, d: u32| {
            HabitLog::from_draft(
                HabitLogDraft::done(habit, day(d)),
                id.to_string(),
                "u1".to_string(),
                at(0),
            )
        };
        let mut logs = vec![make("x", "hab-2", 2), make("y", "hab-2", 1), make("z", "hab-1", 1)];
        crate::policy::apply(&HabitLogOrder, &mut logs);
        let ids: Vec<_> = logs.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y", "x"]);
    }
}
