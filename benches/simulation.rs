//! Performance benchmarks for canopy-mosaic

use canopy_mosaic::solver::BoxcarConfig;
use canopy_mosaic::output::NullSink;
use canopy_mosaic::{BoxcarSolver, Config, Cwm, Ecosystem, MemorySink, Solver};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_config(n_patches: usize, parallel: bool) -> Config {
    let mut config = Config::default();
    config.simulation.n_patches = n_patches;
    config.simulation.parallel = parallel;
    config.simulation.seed = Some(42);
    config.cohorts = BoxcarConfig {
        n_cohorts: 50,
        ..Default::default()
    };
    config
}

fn benchmark_ecosystem_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("ecosystem_step");

    for n_patches in [1, 10, 50].iter() {
        for parallel in [false, true] {
            let config = bench_config(*n_patches, parallel);
            let params = config.cohorts.clone();
            let mut eco = Ecosystem::new(config, |_| BoxcarSolver::new(params.clone())).unwrap();
            let mut sink = MemorySink::new();
            let mut t = eco.time;

            // Warm up
            for _ in 0..10 {
                eco.step(t, &mut sink).unwrap();
                t += 1.0;
            }

            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, n_patches), n_patches, |b, _| {
                b.iter(|| {
                    let mut sink = NullSink;
                    eco.step(t, &mut sink).unwrap();
                    t += 1.0;
                });
            });
        }
    }

    group.finish();
}

fn benchmark_cwm_update(c: &mut Criterion) {
    let params = BoxcarConfig {
        n_cohorts: 200,
        ..Default::default()
    };
    let mut solver = BoxcarSolver::new(params);
    for spp in &Config::default().species {
        solver.add_species(&spp.name, &spp.traits).unwrap();
    }
    for k in 0..solver.species_count() {
        for i in 0..solver.cohort_count(k) {
            solver.set_density(k, i, 1.0);
        }
    }
    solver.sync_state();

    let mut cwm = Cwm::new(solver.species_count());
    c.bench_function("cwm_update", |b| {
        b.iter(|| cwm.update(black_box(0.0), &solver).unwrap());
    });
}

criterion_group!(benches, benchmark_ecosystem_step, benchmark_cwm_update);

criterion_main!(benches);
