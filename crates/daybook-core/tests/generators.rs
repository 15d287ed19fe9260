#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use daybook_core::change::ChangeEvent;
use daybook_core::entity::Scope;
use daybook_core::model::task::{Task, TaskOrder, TaskScope};
use daybook_core::policy;
use proptest::prelude::*;

pub const OWNER: &str = "u1";
const TITLES: [&str; 4] = ["Write report", "Call mom", "Gym", "Groceries"];

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).expect("valid date")
}

pub fn stamp(tick: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0)
        .single()
        .expect("valid time")
        + Duration::seconds(tick)
}

/// One server-side change made by some client.
#[derive(Debug, Clone)]
pub enum Op {
    Create { date: u32, title: usize },
    Rename { target: usize, title: usize },
    Move { target: usize, date: u32 },
    Complete { target: usize, done: bool },
    Delete { target: usize },
}

pub fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..=2, 0..TITLES.len()).prop_map(|(date, title)| Op::Create { date, title }),
        (any::<usize>(), 0..TITLES.len()).prop_map(|(target, title)| Op::Rename { target, title }),
        (any::<usize>(), 1u32..=2).prop_map(|(target, date)| Op::Move { target, date }),
        (any::<usize>(), any::<bool>()).prop_map(|(target, done)| Op::Complete { target, done }),
        any::<usize>().prop_map(|target| Op::Delete { target }),
    ]
}

pub fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(), 0..40)
}

/// Server rows before the history, the change events it produced (one per
/// committed write, stamps strictly increasing) and the rows after it.
#[derive(Debug, Clone)]
pub struct History {
    pub initial: Vec<Task>,
    pub events: Vec<ChangeEvent<Task>>,
    pub live: BTreeMap<String, Task>,
}

impl History {
    /// Rows in `scope`, in display order.
    pub fn expected(&self, scope: &TaskScope) -> Vec<Task> {
        let mut rows: Vec<Task> = self
            .live
            .values()
            .filter(|task| scope.contains(task))
            .cloned()
            .collect();
        policy::apply(&TaskOrder, &mut rows);
        rows
    }
}

pub fn build_history(ops: &[Op]) -> History {
    let mut live = BTreeMap::new();
    for i in 0..3_i64 {
        let mut task = Task::new(format!("tsk-{i:04}"), OWNER, format!("seed {i}"), day(1), stamp(0));
        task.position = i;
        live.insert(task.id.clone(), task);
    }
    let initial: Vec<Task> = live.values().cloned().collect();

    let mut next = 3_i64;
    let mut events = Vec::new();
    for (tick, op) in (1_i64..).zip(ops) {
        let now = stamp(tick);
        let target = |target: usize, live: &BTreeMap<String, Task>| {
            if live.is_empty() {
                None
            } else {
                live.keys().nth(target % live.len()).cloned()
            }
        };
        match *op {
            Op::Create { date, title } => {
                let mut task = Task::new(format!("tsk-{next:04}"), OWNER, TITLES[title], day(date), now);
                task.position = next;
                next += 1;
                live.insert(task.id.clone(), task.clone());
                events.push(ChangeEvent::Insert(task));
            }
            Op::Rename { target: t, title } => {
                if let Some(task) = target(t, &live).and_then(|id| live.get_mut(&id)) {
                    task.title = TITLES[title].to_string();
                    task.updated_at = now;
                    events.push(ChangeEvent::Update(task.clone()));
                }
            }
            Op::Move { target: t, date } => {
                if let Some(task) = target(t, &live).and_then(|id| live.get_mut(&id)) {
                    task.date = day(date);
                    task.updated_at = now;
                    events.push(ChangeEvent::Update(task.clone()));
                }
            }
            Op::Complete { target: t, done } => {
                if let Some(task) = target(t, &live).and_then(|id| live.get_mut(&id)) {
                    task.completed = done;
                    task.updated_at = now;
                    events.push(ChangeEvent::Update(task.clone()));
                }
            }
            Op::Delete { target: t } => {
                if let Some(id) = target(t, &live) {
                    live.remove(&id);
                    events.push(ChangeEvent::Delete { id });
                }
            }
        }
    }

    History {
        initial,
        events,
        live,
    }
}

/// A history plus its events delivered shuffled and partly duplicated.
pub fn arb_delivery() -> impl Strategy<Value = (History, Vec<ChangeEvent<Task>>)> {
    (arb_ops(), prop::collection::vec(any::<prop::sample::Index>(), 0..8)).prop_flat_map(
        |(ops, dupes)| {
            let history = build_history(&ops);
            let mut deliveries = history.events.clone();
            if !history.events.is_empty() {
                for dupe in &dupes {
                    deliveries.push(history.events[dupe.index(history.events.len())].clone());
                }
            }
            (Just(history), Just(deliveries).prop_shuffle())
        },
    )
}
