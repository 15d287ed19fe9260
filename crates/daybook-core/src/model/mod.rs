//! The six record types of the dashboard.
//!
//! | Type | Scope | Toggle | Order |
//! |---|---|---|---|
//! | [`Task`](task::Task) | optional date | `completed` | open, priority, position |
//! | [`Habit`](habit::Habit) | archived filter | `archived` | active, position |
//! | [`HabitLog`](habit_log::HabitLog) | optional date / habit | `completed` | date, habit |
//! | [`Goal`](goal::Goal) | open filter | `completed` | open, target date |
//! | [`Note`](note::Note) | canvas | `pinned` | pinned, z |
//! | [`CanvasGroup`](canvas_group::CanvasGroup) | canvas | `collapsed` | position |

pub mod canvas_group;
pub mod goal;
pub mod habit;
pub mod habit_log;
pub mod note;
pub mod task;

/// Accessors shared by every record struct with the standard
/// `id` / `owner_id` / `created_at` / `updated_at` columns.
macro_rules! record_columns {
    () => {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn owner_id(&self) -> &str {
            &self.owner_id
        }

        fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
            self.created_at
        }

        fn updated_at(&self) -> chrono::DateTime<chrono::Utc> {
            self.updated_at
        }

        fn set_updated_at(&mut self, at: chrono::DateTime<chrono::Utc>) {
            self.updated_at = at;
        }
    };
}

pub(crate) use record_columns;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    pub fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).expect("valid date")
    }

    pub fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0)
            .single()
            .expect("valid time")
    }
}
