//! End-to-end behaviour of the synchronous engine: optimistic mutations,
//! write outcomes and change events interleaved in the orders the realtime
//! channel can produce.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use daybook_core::change::ChangeEvent;
use daybook_core::config::{RollbackStrategy, SyncSection};
use daybook_core::error::{ErrorCode, RemoteError};
use daybook_core::model::task::{Priority, Task, TaskDraft, TaskPatch, TaskScope};
use daybook_core::policy;
use daybook_core::sync::{Reconciled, SyncEngine, WriteRequest};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).expect("valid date")
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0)
        .single()
        .expect("valid time")
}

fn task(id: &str, order: i64) -> Task {
    let mut task = Task::new(id, "u1", format!("task {id}"), day(1), at(0));
    task.position = order;
    task
}

fn engine(rollback: RollbackStrategy, records: Vec<Task>) -> SyncEngine<Task> {
    let config = SyncSection {
        rollback,
        ..SyncSection::default()
    };
    let mut engine = SyncEngine::new("u1", TaskScope::day(day(1)), &config);
    engine.load(records);
    engine
}

fn ids(engine: &SyncEngine<Task>) -> Vec<String> {
    engine.records().iter().map(|t| t.id.clone()).collect()
}

fn server_copy(placeholder: &Task, id: &str, minute: u32) -> Task {
    let mut server = placeholder.clone();
    server.id = id.to_string();
    server.updated_at = at(minute);
    server
}

// ---------------------------------------------------------------------------
// Toggle
// ---------------------------------------------------------------------------

#[test]
fn toggle_completion_reorders_then_reverts_on_failure() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1), task("b", 2)]);

    let ticket = engine.begin_toggle("a", at(1)).expect("a exists");
    assert!(ticket.completes);
    assert_eq!(ids(&engine), vec!["b", "a"]);
    assert!(engine.get("a").is_some_and(|a| a.completed));

    let err = engine
        .settle_write(ticket.mutation, Err(RemoteError::network("connection reset")))
        .expect_err("write failed");
    assert_eq!(err.code(), ErrorCode::RemoteNetwork);
    assert_eq!(ids(&engine), vec!["a", "b"]);
    assert!(engine.get("a").is_some_and(|a| !a.completed));
    assert!(engine.error().is_some_and(|e| e.contains("connection reset")));
}

#[test]
fn toggling_back_off_is_not_a_completion() {
    let mut done = task("a", 1);
    done.completed = true;
    let mut engine = engine(RollbackStrategy::Rebase, vec![done]);
    let ticket = engine.begin_toggle("a", at(1)).expect("a exists");
    assert!(!ticket.completes);
    assert_eq!(
        ticket.request,
        WriteRequest::Update {
            id: "a".to_string(),
            patch: TaskPatch::completed(false),
        }
    );
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

#[test]
fn insert_event_before_insert_returns_never_duplicates() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![]);
    let ticket = engine.begin_create(TaskDraft::new("X", day(1)), at(1));
    let WriteRequest::Insert(placeholder) = ticket.request.clone() else {
        panic!("create must issue an insert");
    };
    assert_eq!(ids(&engine), vec!["temp-1"]);

    let server = server_copy(&placeholder, "tsk-000001", 2);
    assert_eq!(
        engine.apply_change(ChangeEvent::Insert(server.clone())),
        Reconciled::ClaimedPlaceholder {
            placeholder: "temp-1".to_string()
        }
    );
    assert_eq!(ids(&engine), vec!["tsk-000001"]);

    engine
        .settle_insert(ticket.mutation, Ok(server.clone()))
        .expect("insert ok");
    assert_eq!(engine.records(), &[server]);
    assert_eq!(engine.pending_len(), 0);
}

#[test]
fn insert_returning_before_its_event_never_duplicates() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![]);
    let ticket = engine.begin_create(TaskDraft::new("X", day(1)), at(1));
    let WriteRequest::Insert(placeholder) = ticket.request.clone() else {
        panic!("create must issue an insert");
    };
    let server = server_copy(&placeholder, "tsk-000001", 2);

    engine
        .settle_insert(ticket.mutation, Ok(server.clone()))
        .expect("insert ok");
    assert_eq!(ids(&engine), vec!["tsk-000001"]);

    engine.apply_change(ChangeEvent::Insert(server.clone()));
    engine.apply_change(ChangeEvent::Insert(server.clone()));
    assert_eq!(engine.records(), &[server]);
}

#[test]
fn two_creates_with_the_same_title_claim_one_placeholder_each() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![]);
    let first = engine.begin_create(TaskDraft::new("X", day(1)), at(1));
    let second = engine.begin_create(TaskDraft::new("X", day(1)), at(1));
    let (WriteRequest::Insert(p1), WriteRequest::Insert(p2)) =
        (first.request.clone(), second.request.clone())
    else {
        panic!("creates must issue inserts");
    };

    let s1 = server_copy(&p1, "tsk-000001", 2);
    let s2 = server_copy(&p2, "tsk-000002", 3);
    engine.apply_change(ChangeEvent::Insert(s1.clone()));
    engine.apply_change(ChangeEvent::Insert(s2.clone()));
    assert_eq!(ids(&engine), vec!["tsk-000001", "tsk-000002"]);

    engine.settle_insert(second.mutation, Ok(s2)).expect("ok");
    engine.settle_insert(first.mutation, Ok(s1)).expect("ok");
    assert_eq!(ids(&engine), vec!["tsk-000001", "tsk-000002"]);
}

#[test]
fn failed_create_removes_placeholder_and_reports() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let ticket = engine.begin_create(TaskDraft::new("X", day(1)), at(1));
    assert_eq!(engine.records().len(), 2);

    engine
        .settle_insert(ticket.mutation, Err(RemoteError::constraint("title too long")))
        .expect_err("insert failed");
    assert_eq!(ids(&engine), vec!["a"]);
    assert!(engine.error().is_some_and(|e| e.starts_with("E3003")));
}

#[test]
fn placeholder_edits_are_refused_until_persisted() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![]);
    let ticket = engine.begin_create(TaskDraft::new("X", day(1)), at(1));
    assert!(engine.begin_toggle("temp-1", at(2)).is_err());

    let WriteRequest::Insert(placeholder) = ticket.request.clone() else {
        panic!("create must issue an insert");
    };
    engine
        .settle_insert(ticket.mutation, Ok(server_copy(&placeholder, "tsk-000001", 2)))
        .expect("ok");
    assert!(engine.begin_toggle("tsk-000001", at(3)).is_ok());
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

#[test]
fn update_moving_record_out_of_scope_removes_it() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("t", 1)]);
    let mut moved = task("t", 1);
    moved.date = day(2);
    moved.updated_at = at(5);

    assert_eq!(engine.apply_change(ChangeEvent::Update(moved)), Reconciled::Removed);
    assert!(engine.records().is_empty());
}

#[test]
fn update_moving_record_into_scope_adds_it() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![]);
    let mut tomorrow = task("t", 1);
    tomorrow.date = day(2);
    engine.apply_change(ChangeEvent::Insert(tomorrow.clone()));
    assert!(engine.records().is_empty());

    let mut today = tomorrow;
    today.date = day(1);
    today.updated_at = at(5);
    assert_eq!(engine.apply_change(ChangeEvent::Update(today)), Reconciled::Upserted);
    assert_eq!(ids(&engine), vec!["t"]);
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn failed_update_restores_the_exact_record() {
    let original = task("a", 1);
    let mut engine = engine(RollbackStrategy::Rebase, vec![original.clone(), task("b", 2)]);
    let before = engine.view();

    let ticket = engine
        .begin_update(
            "a",
            TaskPatch {
                title: Some("renamed".to_string()),
                priority: Some(Priority::High),
                ..TaskPatch::default()
            },
            at(4),
        )
        .expect("a exists");
    assert_ne!(engine.get("a"), Some(&original));

    engine
        .settle_write(ticket.mutation, Err(RemoteError::permission("denied")))
        .expect_err("write failed");
    assert_eq!(engine.get("a"), Some(&original));
    assert_eq!(engine.records(), before.records.as_slice());
}

#[test]
fn delete_then_fail_restores_original_in_order() {
    let records = vec![task("a", 1), task("b", 2), task("c", 3)];
    let mut engine = engine(RollbackStrategy::Rebase, records.clone());

    let ticket = engine.begin_delete("b").expect("b exists");
    assert_eq!(ids(&engine), vec!["a", "c"]);

    engine
        .settle_write(ticket.mutation, Err(RemoteError::network("offline")))
        .expect_err("delete failed");
    assert_eq!(engine.records(), records.as_slice());
    assert!(policy::is_sorted(engine.policy(), engine.records()));
}

#[test]
fn snapshot_rollback_matches_rebase_without_interference() {
    for strategy in [RollbackStrategy::Rebase, RollbackStrategy::Snapshot] {
        let records = vec![task("a", 1), task("b", 2)];
        let mut engine = engine(strategy, records.clone());
        let ticket = engine.begin_toggle("a", at(1)).expect("a exists");
        engine
            .settle_write(ticket.mutation, Err(RemoteError::network("offline")))
            .expect_err("failed");
        assert_eq!(engine.records(), records.as_slice(), "{strategy:?}");
    }
}

#[test]
fn snapshot_rollback_drops_events_merged_while_in_flight() {
    let mut other_device = task("z", 9);
    other_device.updated_at = at(2);

    let mut snapshot = engine(RollbackStrategy::Snapshot, vec![task("a", 1)]);
    let ticket = snapshot.begin_toggle("a", at(1)).expect("a exists");
    snapshot.apply_change(ChangeEvent::Insert(other_device.clone()));
    snapshot
        .settle_write(ticket.mutation, Err(RemoteError::network("offline")))
        .expect_err("failed");
    assert_eq!(ids(&snapshot), vec!["a"], "snapshot restores the stale collection");

    let mut rebase = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let ticket = rebase.begin_toggle("a", at(1)).expect("a exists");
    rebase.apply_change(ChangeEvent::Insert(other_device));
    rebase
        .settle_write(ticket.mutation, Err(RemoteError::network("offline")))
        .expect_err("failed");
    assert_eq!(ids(&rebase), vec!["a", "z"]);
}

#[test]
fn failed_update_keeps_concurrent_server_change_to_same_record() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let ticket = engine
        .begin_update("a", TaskPatch::title("mine"), at(1))
        .expect("a exists");

    let mut theirs = task("a", 1);
    theirs.priority = Priority::High;
    theirs.updated_at = at(2);
    engine.apply_change(ChangeEvent::Update(theirs.clone()));

    engine
        .settle_write(ticket.mutation, Err(RemoteError::network("offline")))
        .expect_err("failed");
    assert_eq!(engine.get("a"), Some(&theirs));
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

#[test]
fn in_flight_local_edit_is_not_clobbered_by_remote_update() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    engine
        .begin_update("a", TaskPatch::title("mine"), at(1))
        .expect("a exists");

    let mut theirs = task("a", 1);
    theirs.priority = Priority::High;
    theirs.updated_at = at(2);
    assert_eq!(engine.apply_change(ChangeEvent::Update(theirs)), Reconciled::Merged);

    let visible = engine.get("a").expect("still visible");
    assert_eq!(visible.title, "mine");
    assert_eq!(visible.priority, Priority::High);
}

#[test]
fn acked_edit_survives_remote_change_that_lands_before_the_ack() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let ticket = engine
        .begin_update("a", TaskPatch::title("mine"), at(1))
        .expect("a exists");

    let mut theirs = task("a", 1);
    theirs.priority = Priority::High;
    theirs.updated_at = at(2);
    engine.apply_change(ChangeEvent::Update(theirs.clone()));
    engine.settle_write(ticket.mutation, Ok(())).expect("ok");

    let visible = engine.get("a").expect("still visible");
    assert_eq!(visible.title, "mine");
    assert_eq!(visible.priority, Priority::High);
    assert_eq!(engine.pending_len(), 1);

    let mut echo = theirs;
    echo.title = "mine".to_string();
    echo.updated_at = at(3);
    engine.apply_change(ChangeEvent::Update(echo.clone()));
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.get("a"), Some(&echo));
}

#[test]
fn echo_of_one_acked_update_keeps_the_other_visible() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let title = engine
        .begin_update("a", TaskPatch::title("t1"), at(1))
        .expect("a exists");
    let priority = TaskPatch {
        priority: Some(Priority::High),
        ..TaskPatch::default()
    };
    let raise = engine.begin_update("a", priority, at(2)).expect("a exists");
    engine.settle_write(title.mutation, Ok(())).expect("ok");
    engine.settle_write(raise.mutation, Ok(())).expect("ok");

    let mut first_echo = task("a", 1);
    first_echo.title = "t1".to_string();
    first_echo.updated_at = at(3);
    engine.apply_change(ChangeEvent::Update(first_echo.clone()));

    let visible = engine.get("a").expect("still visible");
    assert_eq!(visible.title, "t1");
    assert_eq!(visible.priority, Priority::High);
    assert_eq!(engine.pending_len(), 1);

    let mut second_echo = first_echo;
    second_echo.priority = Priority::High;
    second_echo.updated_at = at(4);
    engine.apply_change(ChangeEvent::Update(second_echo.clone()));
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.get("a"), Some(&second_echo));
}

#[test]
fn stale_echo_settles_a_write_another_device_overwrote() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let ticket = engine
        .begin_update("a", TaskPatch::title("mine"), at(1))
        .expect("a exists");
    engine.settle_write(ticket.mutation, Ok(())).expect("ok");

    // The server applied our write at 09:03 and theirs at 09:04, but theirs
    // is delivered first.
    let mut theirs = task("a", 1);
    theirs.title = "theirs".to_string();
    theirs.updated_at = at(4);
    engine.apply_change(ChangeEvent::Update(theirs.clone()));
    assert_eq!(engine.get("a").map(|t| t.title.as_str()), Some("mine"));

    let mut echo = task("a", 1);
    echo.title = "mine".to_string();
    echo.updated_at = at(3);
    assert_eq!(
        engine.apply_change(ChangeEvent::Update(echo)),
        Reconciled::Ignored(daybook_core::sync::IgnoreReason::Stale)
    );
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.get("a"), Some(&theirs));
}

#[test]
fn echo_of_own_write_is_a_noop() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1), task("b", 2)]);
    let ticket = engine.begin_toggle("a", at(1)).expect("a exists");
    engine.settle_write(ticket.mutation, Ok(())).expect("ok");
    let optimistic = engine.view();

    let mut echo = task("a", 1);
    echo.completed = true;
    echo.updated_at = at(1);
    engine.apply_change(ChangeEvent::Update(echo.clone()));
    engine.apply_change(ChangeEvent::Update(echo));
    assert_eq!(engine.view(), optimistic);
    assert_eq!(engine.pending_len(), 0);
}

#[test]
fn duplicate_insert_events_are_idempotent() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let mut fresh = task("n", 5);
    fresh.updated_at = at(3);

    assert_eq!(engine.apply_change(ChangeEvent::Insert(fresh.clone())), Reconciled::Appended);
    let once = engine.view();
    engine.apply_change(ChangeEvent::Insert(fresh.clone()));
    engine.apply_change(ChangeEvent::Insert(fresh));
    assert_eq!(engine.view(), once);
}

#[test]
fn noop_update_keeps_display_order() {
    let mut engine = engine(
        RollbackStrategy::Rebase,
        vec![task("a", 1), task("b", 2), task("c", 3)],
    );
    let before = ids(&engine);
    engine
        .begin_update("b", TaskPatch::default(), at(9))
        .expect("b exists");
    assert_eq!(ids(&engine), before);
}

#[test]
fn delete_event_for_unknown_id_is_harmless() {
    let mut engine = engine(RollbackStrategy::Rebase, vec![task("a", 1)]);
    let before = engine.view();
    engine.apply_change(ChangeEvent::Delete {
        id: "ghost".to_string(),
    });
    assert_eq!(engine.view(), before);
}
