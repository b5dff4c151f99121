//! Ecosystem driver - the multi-patch time loop.

use crate::aggregate::{Cwm, EmergentProps};
use crate::config::{Config, SpeciesConfig};
use crate::error::SimError;
use crate::output::{OutputSink, StepRecord};
use crate::patch::Patch;
use crate::seed_rain::{pool_seed_output, SeedHistory};
use crate::solver::Solver;
use crate::stats::{DisturbanceLog, EcosystemStats, StatsHistory};
use rand::prelude::*;
use rayon::prelude::*;

/// A fixed set of patches coupled through a shared seed rain
pub struct Ecosystem<S: Solver> {
    pub patches: Vec<Patch<S>>,

    // Seed rain shared by every patch
    pub seed_history: SeedHistory,

    // Ecosystem-level aggregates (mean over patches)
    pub cwm: Cwm,
    pub props: EmergentProps,

    // State
    pub time: f64,
    pub steps: u64,

    // Configuration
    pub config: Config,
    species: Vec<SpeciesConfig>,

    // Statistics
    pub stats: EcosystemStats,
    pub stats_history: StatsHistory,
    pub disturbance_log: DisturbanceLog,

    seed: u64,
}

impl<S: Solver + Send> Ecosystem<S> {
    /// Create an ecosystem; the seed comes from the config or the OS
    pub fn new<F>(config: Config, make_solver: F) -> Result<Self, SimError>
    where
        F: FnMut(usize) -> S,
    {
        let seed = config
            .simulation
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen());
        Self::new_with_seed(config, seed, make_solver)
    }

    /// Create an ecosystem with a specific seed for reproducibility.
    ///
    /// `make_solver` is called once per patch index.
    pub fn new_with_seed<F>(config: Config, seed: u64, mut make_solver: F) -> Result<Self, SimError>
    where
        F: FnMut(usize) -> S,
    {
        config.validate().map_err(SimError::Config)?;
        let species = config.species_table().map_err(SimError::Config)?;
        let n_species = species.len();

        let mut patches = Vec::with_capacity(config.simulation.n_patches);
        for i in 0..config.simulation.n_patches {
            let mut patch = Patch::new(i, make_solver(i), &config.disturbance, seed);
            patch.initialize(&species, &config.simulation)?;
            patches.push(patch);
        }

        log::info!(
            "Ecosystem: {} patches, {} species, seed {}",
            patches.len(),
            n_species,
            seed
        );

        Ok(Self {
            patches,
            seed_history: SeedHistory::new(n_species, config.seed_rain.window),
            cwm: Cwm::new(n_species),
            props: EmergentProps::new(),
            time: config.simulation.start,
            steps: 0,
            stats: EcosystemStats::new(),
            stats_history: StatsHistory::new(config.logging.stats_interval),
            disturbance_log: DisturbanceLog::new(),
            species,
            config,
            seed,
        })
    }

    /// Main simulation step
    pub fn step(&mut self, t: f64, sink: &mut dyn OutputSink) -> Result<(), SimError> {
        // Phase 1: Advance every patch (parallel if enabled)
        self.advance_patches(t)?;

        // Phase 2: Pool newborn output; every patch has advanced at this point
        let per_patch: Vec<&[f64]> = self.patches.iter().map(|p| p.newborns()).collect();
        let pooled = pool_seed_output(&per_patch, self.species_count());

        // Phase 3: Smooth and hand the same seed rain to every patch
        self.seed_history.push(t, &pooled);
        for patch in &mut self.patches {
            patch.apply_seed_rain(&self.seed_history)?;
        }
        let seed_rain = self.seed_history.smoothed();

        // Phase 4: Aggregate (parallel if enabled) and emit
        self.aggregate_patches(t)?;
        for patch in &self.patches {
            patch.emit(t, &seed_rain, sink)?;
        }

        // Phase 5: Disturbance
        let mut clears = 0;
        for patch in &mut self.patches {
            if patch.disturb(t)? {
                clears += 1;
                self.disturbance_log
                    .record(patch.id(), t, patch.clock().next_clear());
            }
        }

        // Phase 6: Ecosystem means
        self.average_patches();

        // Phase 7: Emit ecosystem aggregates
        sink.write_ecosystem(&StepRecord {
            patch: None,
            time: t,
            cwm: &self.cwm,
            props: &self.props,
            seed_rain: &seed_rain,
        })?;

        self.time = t;
        self.steps += 1;
        self.update_stats(t, &seed_rain, clears);

        Ok(())
    }

    fn advance_patches(&mut self, t: f64) -> Result<(), SimError> {
        if self.config.simulation.parallel {
            self.patches.par_iter_mut().try_for_each(|p| p.advance(t))
        } else {
            self.patches.iter_mut().try_for_each(|p| p.advance(t))
        }
    }

    fn aggregate_patches(&mut self, t: f64) -> Result<(), SimError> {
        if self.config.simulation.parallel {
            self.patches.par_iter_mut().try_for_each(|p| p.aggregate(t))
        } else {
            self.patches.iter_mut().try_for_each(|p| p.aggregate(t))
        }
    }

    /// Arithmetic mean of the patch aggregates
    fn average_patches(&mut self) {
        let mut cwm = Cwm::new(self.species_count());
        let mut props = EmergentProps::new();
        for patch in &self.patches {
            cwm += patch.cwm();
            props += patch.props();
        }
        let n = self.patches.len() as f64;
        cwm /= n;
        props /= n;
        self.cwm = cwm;
        self.props = props;
    }

    fn update_stats(&mut self, t: f64, seed_rain: &[f64], clears: usize) {
        self.stats.time = t;
        self.stats.step = self.steps;
        self.stats.update(&self.cwm, &self.props, seed_rain, clears);
        log::debug!("t = {}: {}", t, self.stats.summary());

        // Record history
        if (self.steps - 1) % self.config.logging.stats_interval == 0 {
            self.stats_history.record(self.stats.clone());
        }
    }

    /// Run every configured timestep, then flush the sink
    pub fn run(&mut self, sink: &mut dyn OutputSink) -> Result<(), SimError> {
        self.run_with_callback(sink, |_, _| {})
    }

    /// Run with callback for progress updates
    pub fn run_with_callback<F>(&mut self, sink: &mut dyn OutputSink, mut callback: F) -> Result<(), SimError>
    where
        F: FnMut(&Ecosystem<S>, usize),
    {
        for (i, t) in self.config.time_points().into_iter().enumerate() {
            self.step(t, sink)?;
            callback(self, i);
        }
        sink.finish()?;
        Ok(())
    }

    /// Close every patch
    pub fn close(&mut self) -> Result<(), SimError> {
        for patch in &mut self.patches {
            patch.close()?;
        }
        Ok(())
    }
}

impl<S: Solver> Ecosystem<S> {
    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    pub fn species_names(&self) -> Vec<String> {
        self.species.iter().map(|s| s.name.clone()).collect()
    }

    pub fn n_patches(&self) -> usize {
        self.patches.len()
    }

    /// Get seed for reproducibility
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationError;
    use crate::cohort::{PlantCohort, PlantTraits};
    use crate::output::MemorySink;
    use crate::solver::{BoxcarConfig, BoxcarSolver, StaticSolver};
    use approx::assert_relative_eq;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.simulation.start = 1000.0;
        config.simulation.end = 1009.0;
        config.simulation.n_patches = 2;
        config.logging.stats_interval = 5;
        config.cohorts = BoxcarConfig {
            n_cohorts: 12,
            ..Default::default()
        };
        config
    }

    fn boxcar(config: &Config) -> impl FnMut(usize) -> BoxcarSolver + '_ {
        move |_| BoxcarSolver::new(config.cohorts.clone())
    }

    #[test]
    fn test_ecosystem_creation() {
        let config = test_config();
        let eco = Ecosystem::new_with_seed(config.clone(), 1, boxcar(&config)).unwrap();

        assert_eq!(eco.n_patches(), 2);
        assert_eq!(eco.species_count(), 2);
        assert_eq!(eco.cwm.species_count(), 2);
        assert_eq!(eco.seed(), 1);
        assert_eq!(eco.species_names(), vec!["Tall_dense", "Short_light"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.simulation.n_patches = 0;
        let result = Ecosystem::new_with_seed(config.clone(), 1, boxcar(&config));
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_run_emits_every_step() {
        let config = test_config();
        let mut eco = Ecosystem::new_with_seed(config.clone(), 1, boxcar(&config)).unwrap();
        let mut sink = MemorySink::new();

        eco.run(&mut sink).unwrap();

        assert_eq!(eco.steps, 10);
        assert_eq!(eco.time, 1009.0);
        assert_eq!(sink.ecosystem_records().count(), 10);
        assert_eq!(sink.patch_records(0).count(), 10);
        assert_eq!(sink.patch_records(1).count(), 10);
        assert!(sink.finished);
        // steps 1 and 6
        assert_eq!(eco.stats_history.snapshots.len(), 2);
    }

    #[test]
    fn test_ecosystem_is_mean_of_patches() {
        let mut config = test_config();
        config.simulation.n_patches = 3;
        config.simulation.end = 1000.0;

        // patch i carries density i + 1 in its only cohort
        let mut eco = Ecosystem::new_with_seed(config, 5, |i| {
            let template = PlantCohort::new(0.5, 0.0, PlantTraits::default());
            StaticSolver::new(template).with_newborns(i as f64)
        })
        .unwrap();
        for (i, patch) in eco.patches.iter_mut().enumerate() {
            for k in 0..2 {
                patch.solver_mut().set_density(k, 0, i as f64 + 1.0);
            }
            patch.solver_mut().sync_state();
        }

        let mut sink = MemorySink::new();
        eco.step(1000.0, &mut sink).unwrap();

        assert_relative_eq!(eco.cwm.n_ind, 4.0);
        assert_relative_eq!(eco.cwm.n_ind_vec[0], 2.0);
        let mean_gpp: f64 = eco.patches.iter().map(|p| p.props().gpp).sum::<f64>() / 3.0;
        assert_relative_eq!(eco.props.gpp, mean_gpp);

        // pooled newborns: mean of 0, 1, 2
        assert_eq!(eco.seed_history.smoothed(), vec![1.0, 1.0]);
        for patch in &eco.patches {
            assert_eq!(patch.solver().birth_flux(0), 1.0);
        }
    }

    #[test]
    fn test_failed_aggregation_aborts_before_emission() {
        let mut config = test_config();
        config.simulation.end = 1001.0;

        // patch 1 registers its species without any cohort
        let mut eco = Ecosystem::new_with_seed(config, 2, |i| {
            let solver = StaticSolver::default();
            if i == 1 {
                solver.with_cohorts_per_species(0)
            } else {
                solver
            }
        })
        .unwrap();
        let mut sink = MemorySink::new();

        let err = eco.run(&mut sink).unwrap_err();
        assert!(matches!(
            err,
            SimError::Aggregation {
                patch: 1,
                source: AggregationError::MissingReferenceCohort { species: 0 }
            }
        ));
        assert!(sink.records.is_empty());
        assert!(!sink.finished);
        assert_eq!(eco.steps, 0);
    }

    #[test]
    fn test_close() {
        let config = test_config();
        let mut eco = Ecosystem::new_with_seed(config.clone(), 1, boxcar(&config)).unwrap();
        eco.close().unwrap();
        let mut sink = MemorySink::new();
        assert!(matches!(
            eco.step(1000.0, &mut sink),
            Err(SimError::Lifecycle { .. })
        ));
    }
}
