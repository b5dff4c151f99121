//! Integration tests for canopy-mosaic

use canopy_mosaic::config::SpeciesConfig;
use canopy_mosaic::solver::BoxcarConfig;
use canopy_mosaic::{
    BoxcarSolver, Cohort, CohortField, Config, Ecosystem, MemorySink, PlantCohort, PlantTraits,
    SimError, Solver, StaticSolver, TsvOutput,
};
use tempfile::tempdir;

fn single_species_config() -> Config {
    let mut config = Config::default();
    config.simulation.start = 1000.0;
    config.simulation.end = 1049.0;
    config.simulation.dt = 1.0;
    config.simulation.n_patches = 1;
    config.simulation.initial_density = 1.0;
    config.disturbance.return_interval = 100.0;
    config.species = vec![SpeciesConfig {
        name: "only".to_string(),
        traits: PlantTraits::default(),
    }];
    config
}

fn static_solver() -> StaticSolver {
    StaticSolver::new(PlantCohort::new(0.01, 0.0, PlantTraits::default()))
}

fn boxcar_config() -> Config {
    let mut config = Config::default();
    config.simulation.start = 1000.0;
    config.simulation.end = 1030.0;
    config.simulation.n_patches = 4;
    config.disturbance.first_clear = 1005.0;
    config.disturbance.return_interval = 8.0;
    config.cohorts = BoxcarConfig {
        n_cohorts: 15,
        ..Default::default()
    };
    config
}

#[test]
fn test_single_patch_without_seed_input() {
    let config = single_species_config();
    let mut eco = Ecosystem::new_with_seed(config, 12345, |_| static_solver()).unwrap();
    let mut sink = MemorySink::new();

    eco.run(&mut sink).unwrap();

    assert_eq!(eco.steps, 50);
    assert_eq!(eco.disturbance_log.count(), 0);
    assert_eq!(eco.patches[0].clock().next_clear(), 1050.0);

    for rec in sink.patch_records(0) {
        assert_eq!(rec.cwm.n_ind, 1.0);
        assert_eq!(rec.cwm.n_ind_vec, vec![1.0]);
        assert_eq!(rec.cwm.height_vec.len(), 1);
        assert_eq!(rec.cwm.basal_area_vec.len(), 1);
        assert_eq!(rec.cwm.lma_vec.len(), 1);
        assert_eq!(rec.seed_rain, vec![0.0]);
    }
    for rec in sink.ecosystem_records() {
        assert_eq!(rec.cwm.n_ind, 1.0);
        assert_eq!(rec.cwm.species_count(), 1);
    }
}

#[test]
fn test_clear_resets_every_patch() {
    let mut config = boxcar_config();
    config.simulation.end = 1005.0;
    let params = config.cohorts.clone();
    let mut eco =
        Ecosystem::new_with_seed(config, 7, |_| BoxcarSolver::new(params.clone())).unwrap();
    let mut sink = MemorySink::new();

    eco.run(&mut sink).unwrap();

    assert_eq!(eco.disturbance_log.count(), 4);
    for patch in &eco.patches {
        let solver = patch.solver();
        for k in 0..solver.species_count() {
            let lai0 = solver.initial_lai(k);
            for i in 0..solver.cohort_count(k) {
                let cohort = solver.cohort(k, i);
                assert_eq!(cohort.density(), 0.0);
                assert_eq!(cohort.get(CohortField::Lai), lai0);
            }
        }
        let next = patch.clock().next_clear();
        assert!(next >= 1005.0 && next <= 2005.0);
    }

    // aggregates emitted on the clearing step still describe the stand before the clear
    let last = sink.ecosystem_records().last().unwrap();
    assert!(last.cwm.n_ind > 0.0);
}

#[test]
fn test_parallel_matches_sequential() {
    let config = boxcar_config();
    let params = config.cohorts.clone();

    let mut sequential = MemorySink::new();
    let mut eco = Ecosystem::new_with_seed(config.clone(), 99, |_| {
        BoxcarSolver::new(params.clone())
    })
    .unwrap();
    eco.run(&mut sequential).unwrap();

    let mut parallel_config = config;
    parallel_config.simulation.parallel = true;
    let mut parallel = MemorySink::new();
    let mut eco_par = Ecosystem::new_with_seed(parallel_config, 99, |_| {
        BoxcarSolver::new(params.clone())
    })
    .unwrap();
    eco_par.run(&mut parallel).unwrap();

    assert_eq!(sequential.records, parallel.records);
    assert_eq!(
        eco.disturbance_log.events,
        eco_par.disturbance_log.events
    );
    assert!(eco.disturbance_log.count() >= 4);
}

#[test]
fn test_ecosystem_records_are_patch_means() {
    let config = boxcar_config();
    let params = config.cohorts.clone();
    let n_patches = config.simulation.n_patches;
    let mut eco =
        Ecosystem::new_with_seed(config, 3, |_| BoxcarSolver::new(params.clone())).unwrap();
    let mut sink = MemorySink::new();
    eco.run(&mut sink).unwrap();

    let ecosystem: Vec<_> = sink.ecosystem_records().collect();
    for rec in &ecosystem {
        let patches: Vec<_> = sink
            .records
            .iter()
            .filter(|r| r.patch.is_some() && r.time == rec.time)
            .collect();
        assert_eq!(patches.len(), n_patches);

        let mean_n = patches.iter().map(|r| r.cwm.n_ind).sum::<f64>() / n_patches as f64;
        let mean_gpp = patches.iter().map(|r| r.props.gpp).sum::<f64>() / n_patches as f64;
        assert!((rec.cwm.n_ind - mean_n).abs() <= 1e-12 * mean_n.abs().max(1.0));
        assert!((rec.props.gpp - mean_gpp).abs() <= 1e-12 * mean_gpp.abs().max(1.0));

        // every patch receives the same seed rain
        for r in &patches {
            assert_eq!(r.seed_rain, rec.seed_rain);
        }
    }
}

#[test]
fn test_solver_failure_aborts_run() {
    let mut config = single_species_config();
    config.simulation.n_patches = 2;
    let mut eco = Ecosystem::new_with_seed(config, 1, |i| {
        if i == 1 {
            static_solver().fail_after(1010.0)
        } else {
            static_solver()
        }
    })
    .unwrap();
    let mut sink = MemorySink::new();

    let err = eco.run(&mut sink).unwrap_err();
    assert!(matches!(err, SimError::Solver { patch: 1, .. }));
    assert_eq!(eco.time, 1010.0);
    assert!(!sink.finished);
}

#[test]
fn test_tsv_run_writes_tables() {
    let dir = tempdir().unwrap();
    let mut config = boxcar_config();
    config.simulation.n_patches = 2;
    config.simulation.end = 1009.0;
    config.output.dir = dir.path().to_path_buf();
    config.output.experiment = "test".to_string();

    let params = config.cohorts.clone();
    let mut eco = Ecosystem::new_with_seed(config.clone(), 5, |_| {
        BoxcarSolver::new(params.clone())
    })
    .unwrap();
    let out_dir = config.output_dir();
    let mut sink = TsvOutput::create(&out_dir, &config.output, 2, eco.species_count()).unwrap();
    eco.run(&mut sink).unwrap();

    let read = |rel: &str| std::fs::read_to_string(out_dir.join(rel)).unwrap();

    // header plus one row per year
    assert_eq!(read(&config.output.emergent_props).lines().count(), 11);
    assert_eq!(read(&config.output.cwm_avg).lines().count(), 11);
    // header plus one row per species and year
    assert_eq!(read(&config.output.cwm_per_species).lines().count(), 21);
    assert_eq!(read("Patch1/seeds.txt").lines().count(), 10);

    let heights = read("Patch0/species_0_height.txt");
    let first = heights.lines().next().unwrap();
    assert_eq!(first.split('\t').count(), 1 + 15);
}

#[test]
fn test_unrunnable_configs_rejected_at_startup() {
    let mut config = single_species_config();
    config.simulation.end = f64::INFINITY;
    let result = Ecosystem::new_with_seed(config, 1, |_| static_solver());
    assert!(matches!(result, Err(SimError::Config(_))));

    let mut config = boxcar_config();
    config.cohorts.step_size = 0.0;
    let params = config.cohorts.clone();
    let result = Ecosystem::new_with_seed(config, 1, |_| BoxcarSolver::new(params.clone()));
    assert!(matches!(result, Err(SimError::Config(_))));
}
