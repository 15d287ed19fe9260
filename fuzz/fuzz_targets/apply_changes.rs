#![no_main]

use chrono::NaiveDate;
use daybook_core::change::RawChange;
use daybook_core::config::SyncSection;
use daybook_core::model::task::{Task, TaskScope};
use daybook_core::policy;
use daybook_core::sync::SyncEngine;
use libfuzzer_sys::fuzz_target;

// Feed a newline-separated stream of payloads to an engine twice; the
// second pass must not change anything and the collection stays sorted
// with unique ids.
fuzz_target!(|data: &[u8]| {
    let Some(day) = NaiveDate::from_ymd_opt(2024, 6, 1) else {
        return;
    };
    let payloads: Vec<RawChange> = data
        .split(|b| *b == b'\n')
        .filter_map(|line| serde_json::from_slice::<serde_json::Value>(line).ok())
        .filter_map(|value| RawChange::from_value(value).ok())
        .collect();

    let mut engine: SyncEngine<Task> = SyncEngine::new("u1", TaskScope::day(day), &SyncSection::default());
    engine.load(Vec::new());
    for raw in &payloads {
        engine.apply_raw(raw);
    }

    let settled = engine.records().to_vec();
    for raw in &payloads {
        engine.apply_raw(raw);
    }
    assert_eq!(engine.records(), settled.as_slice());
    assert!(policy::is_sorted(engine.policy(), engine.records()));

    let mut ids: Vec<&str> = settled.iter().map(|t| t.id.as_str()).collect();
    ids.sort_unstable();
    let total = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), total);
});
