//! # Traversal Benchmarks
//!
//! Performance benchmarks for waypoint-core graph operations.
//!
//! Run with: `cargo bench -p waypoint-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use waypoint_core::{
    Abilities, Anchor, Archetype, ArchetypeKind, EdgeQuery, EdgeSpec, Machine, ObjectSpatial,
    Session,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Step {
    index: usize,
}

impl Archetype for Step {
    const NAME: &'static str = "Step";
    const KIND: ArchetypeKind = ArchetypeKind::Node;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Runner {
    count: usize,
}

impl Archetype for Runner {
    const NAME: &'static str = "Runner";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities.on_entry::<Step, _>("run", |v| {
            v.walker_mut::<Runner>()?.count += 1;
            v.visit_refs(&EdgeQuery::out())?;
            Ok(())
        });
    }
}

/// Create N steps with edges between consecutive steps.
fn create_line(session: &Session, size: usize) -> Vec<Anchor> {
    let steps: Vec<Anchor> = (0..size)
        .map(|index| session.attach(Step { index }).expect("attach"))
        .collect();
    for pair in steps.windows(2) {
        session
            .connect(&pair[0], &pair[1], EdgeSpec::generic())
            .expect("connect");
    }
    steps
}

/// Create a hub with N-1 outgoing spokes.
fn create_star(session: &Session, size: usize) -> Anchor {
    let hub = session.attach(Step { index: 0 }).expect("attach");
    for index in 1..size {
        let spoke = session.attach(Step { index }).expect("attach");
        session
            .connect(&hub, &spoke, EdgeSpec::generic())
            .expect("connect");
    }
    hub
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_connect(c: &mut Criterion) {
    let mut group = c.benchmark_group("connect");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let machine = Machine::in_memory().expect("machine");
                let session = machine.session(None).expect("session");
                black_box(create_line(&session, size))
            });
        });
    }

    group.finish();
}

fn bench_refs(c: &mut Criterion) {
    let mut group = c.benchmark_group("refs");

    for size in [100, 1000].iter() {
        let machine = Machine::in_memory().expect("machine");
        let session = machine.session(None).expect("session");
        let hub = create_star(&session, *size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(session.refs(&hub, &EdgeQuery::out())));
        });
    }

    group.finish();
}

fn bench_walk_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("walk_line");

    for size in [100, 500, 1000].iter() {
        let machine = Machine::in_memory().expect("machine");
        let session = machine.session(None).expect("session");
        let steps = create_line(&session, *size);
        let walker = session.attach(Runner::default()).expect("walker");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(session.spawn(&steps[0], &walker)));
        });
    }

    group.finish();
}

fn bench_spawn_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_parallel");

    for size in [8, 64].iter() {
        let machine = Machine::in_memory().expect("machine");
        let session = machine.session(None).expect("session");
        let starts: Vec<Anchor> = (0..*size)
            .map(|_| create_line(&session, 10).remove(0))
            .collect();
        let walker = session.attach(Runner::default()).expect("walker");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(session.spawn_parallel(&walker, &starts)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_connect,
    bench_refs,
    bench_walk_line,
    bench_spawn_parallel
);
criterion_main!(benches);
