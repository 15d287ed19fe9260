use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use daybook_core::change::{ChangeEvent, RawChange};
use daybook_core::config::SyncSection;
use daybook_core::model::task::{Task, TaskDraft, TaskPatch, TaskScope};
use daybook_core::sync::SyncEngine;

const SIZES: [usize; 3] = [50, 500, 2_000];

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
}

fn stamp(tick: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0)
        .single()
        .expect("valid time")
        + Duration::milliseconds(tick)
}

fn rows(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| {
            let mut task = Task::new(format!("tsk-{i:06}"), "u1", format!("task {i}"), day(), stamp(0));
            task.position = i64::try_from(i).unwrap_or(i64::MAX);
            task.completed = i % 3 == 0;
            task
        })
        .collect()
}

fn loaded(count: usize) -> SyncEngine<Task> {
    let mut engine = SyncEngine::new("u1", TaskScope::day(day()), &SyncSection::default());
    engine.load(rows(count));
    engine
}

fn bench_update_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile.update_event");

    for size in SIZES {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut engine = loaded(size);
            let mut tick = 1_i64;
            b.iter(|| {
                let mut task = rows(1).remove(0);
                task.title = format!("rev {tick}");
                task.updated_at = stamp(tick);
                tick += 1;
                black_box(engine.apply_change(ChangeEvent::Update(task)))
            });
        });
    }

    group.finish();
}

fn bench_raw_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile.decode");
    let raw = RawChange::encode(&ChangeEvent::Insert(rows(1).remove(0))).expect("encode");

    group.throughput(Throughput::Elements(1));
    group.bench_function("insert", |b| {
        b.iter(|| black_box(raw.decode::<Task>()));
    });

    group.finish();
}

fn bench_optimistic_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile.optimistic");

    for size in SIZES {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut engine = loaded(size);
            b.iter(|| {
                let create = engine.begin_create(TaskDraft::new("bench", day()), stamp(1));
                let _ = engine.settle_insert(
                    create.mutation,
                    Err(daybook_core::RemoteError::network("bench")),
                );
                let update = engine
                    .begin_update("tsk-000001", TaskPatch::title("bench"), stamp(1))
                    .expect("row present");
                black_box(engine.settle_write(
                    update.mutation,
                    Err(daybook_core::RemoteError::network("bench")),
                ))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_update_events,
    bench_raw_decode,
    bench_optimistic_round_trip
);
criterion_main!(benches);
