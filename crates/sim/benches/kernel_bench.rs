use criterion::{black_box, criterion_group, criterion_main, Criterion};
use demevo_sim::Simulation;

const BENCH_SCRIPT: &str = "
    initialize {
        initializeMutationRate(1e-6);
        initializeMutationType('m1', 0.5, 'f', 0.0);
        initializeGenomicElementType('g1', m1, 1.0);
        initializeGenomicElement(g1, 0, 99999);
        initializeRecombinationRate(1e-7);
    }
    1 early { sim.addSubpop('p1', 100); }
    1000000 late { }
";

fn bench_generation_step(c: &mut Criterion) {
    let mut sim = Simulation::new(BENCH_SCRIPT, Some(42)).unwrap();
    sim.initialize().unwrap();
    // warm up past the founding generation
    sim.run_one_generation().unwrap();

    c.bench_function("generation_step_n100", |b| {
        b.iter(|| {
            black_box(sim.run_one_generation().unwrap());
        })
    });
}

fn bench_initialize(c: &mut Criterion) {
    c.bench_function("parse_and_initialize", |b| {
        b.iter(|| {
            let mut sim = Simulation::new(black_box(BENCH_SCRIPT), Some(42)).unwrap();
            sim.initialize().unwrap();
            black_box(sim.generation())
        })
    });
}

criterion_group!(benches, bench_generation_step, bench_initialize);
criterion_main!(benches);
