use daybook_core::config::{RollbackStrategy, SyncSection};
use daybook_core::error::RemoteError;
use daybook_core::model::task::{Task, TaskScope};
use daybook_core::policy;
use daybook_core::sync::SyncEngine;
use proptest::prelude::*;

#[path = "generators.rs"]
mod generators;
use generators::*;

fn loaded(history: &History, scope: TaskScope) -> SyncEngine<Task> {
    let config = SyncSection {
        rollback: RollbackStrategy::Rebase,
        ..SyncSection::default()
    };
    let mut engine = SyncEngine::new(OWNER, scope, &config);
    engine.load(history.initial.clone());
    engine
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    // Delivery order and duplication never change the outcome.
    #[test]
    fn shuffled_duplicated_events_converge((history, deliveries) in arb_delivery()) {
        let scope = TaskScope::day(day(1));
        let mut engine = loaded(&history, scope.clone());
        for event in deliveries {
            engine.apply_change(event);
        }
        let expected = history.expected(&scope);
        prop_assert_eq!(engine.records(), expected.as_slice());
    }

    #[test]
    fn unscoped_collection_converges((history, deliveries) in arb_delivery()) {
        let scope = TaskScope::all();
        let mut engine = loaded(&history, scope.clone());
        for event in deliveries {
            engine.apply_change(event);
        }
        let expected = history.expected(&scope);
        prop_assert_eq!(engine.records(), expected.as_slice());
    }

    // A local write failing at any point in the stream leaves exactly the
    // server state behind.
    #[test]
    fn failed_local_toggle_leaves_server_state(
        (history, deliveries) in arb_delivery(),
        fail_at in any::<prop::sample::Index>(),
    ) {
        let scope = TaskScope::day(day(1));
        let mut engine = loaded(&history, scope.clone());
        let ticket = engine.begin_toggle("tsk-0000", stamp(0)).expect("seed row present");

        let fail_at = fail_at.index(deliveries.len() + 1);
        for (i, event) in deliveries.into_iter().enumerate() {
            if i == fail_at {
                let _ = engine.settle_write(ticket.mutation, Err(RemoteError::network("offline")));
            }
            engine.apply_change(event);
        }
        let _ = engine.settle_write(ticket.mutation, Err(RemoteError::network("offline")));

        prop_assert_eq!(engine.pending_len(), 0);
        let expected = history.expected(&scope);
        prop_assert_eq!(engine.records(), expected.as_slice());
    }

    #[test]
    fn collection_is_always_sorted_and_unique((history, deliveries) in arb_delivery()) {
        let mut engine = loaded(&history, TaskScope::all());
        for event in deliveries {
            engine.apply_change(event);
            prop_assert!(policy::is_sorted(engine.policy(), engine.records()));
            let mut ids: Vec<&str> = engine.records().iter().map(|t| t.id.as_str()).collect();
            let total = ids.len();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }
    }
}
