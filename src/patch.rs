//! A single patch: one solver, its species and a disturbance clock.
//!
//! A patch is driven through the same phases every timestep:
//!
//! ```text
//! Uninitialized -> Active -> Advanced -> Aggregated -> Active -> ... -> Closed
//!                  initialize  advance    aggregate    disturb         close
//! ```
//!
//! Seed rain is applied while `Advanced`, emission happens while
//! `Aggregated`. Calls made in any other phase fail with
//! [`SimError::Lifecycle`].

use crate::aggregate::{AggregationError, Cwm, EmergentProps};
use crate::cohort::{Cohort, CohortField};
use crate::config::{DisturbanceConfig, SimulationConfig, SpeciesConfig};
use crate::error::SimError;
use crate::output::{CohortRow, OutputSink, StepRecord};
use crate::seed_rain::SeedHistory;
use crate::solver::Solver;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchPhase {
    Uninitialized,
    Active,
    Advanced,
    Aggregated,
    Closed,
}

/// Deadline of the next stand-replacing clear
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisturbanceClock {
    next_clear: f64,
    return_interval: f64,
    max_interval: f64,
    clears: u64,
}

impl DisturbanceClock {
    pub fn new(first_clear: f64, return_interval: f64, max_interval: f64) -> Self {
        Self {
            next_clear: first_clear,
            return_interval,
            max_interval,
            clears: 0,
        }
    }

    pub fn from_config(config: &DisturbanceConfig) -> Self {
        Self::new(
            config.first_clear,
            config.return_interval,
            config.max_interval,
        )
    }

    pub fn is_due(&self, t: f64) -> bool {
        t >= self.next_clear
    }

    /// Exponential waiting time with mean `return_interval`, before capping
    pub fn draw_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        // 1 - u lies in (0, 1]
        let u: f64 = 1.0 - rng.gen::<f64>();
        -u.ln() * self.return_interval
    }

    /// Record a clear at `t` and draw the next deadline
    pub fn schedule_next<R: Rng + ?Sized>(&mut self, t: f64, rng: &mut R) -> f64 {
        let interval = self.draw_interval(rng).min(self.max_interval);
        self.next_clear = t + interval;
        self.clears += 1;
        self.next_clear
    }

    pub fn next_clear(&self) -> f64 {
        self.next_clear
    }

    pub fn return_interval(&self) -> f64 {
        self.return_interval
    }

    /// Number of clears so far
    pub fn clears(&self) -> u64 {
        self.clears
    }
}

/// One patch of the mosaic
pub struct Patch<S: Solver> {
    id: usize,
    solver: S,
    cwm: Cwm,
    props: EmergentProps,
    clock: DisturbanceClock,
    /// Newborn output of the last advance, per species
    newborns: Vec<f64>,
    phase: PatchPhase,
    rng: ChaCha8Rng,
}

impl<S: Solver> Patch<S> {
    /// Create an uninitialized patch; the RNG stream is derived from `seed` and `id`
    pub fn new(id: usize, solver: S, disturbance: &DisturbanceConfig, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(id as u64);
        Self {
            id,
            solver,
            cwm: Cwm::default(),
            props: EmergentProps::new(),
            clock: DisturbanceClock::from_config(disturbance),
            newborns: Vec::new(),
            phase: PatchPhase::Uninitialized,
            rng,
        }
    }

    fn expect_phase(&self, expected: PatchPhase) -> Result<(), SimError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SimError::Lifecycle {
                patch: self.id,
                expected,
                found: self.phase,
            })
        }
    }

    fn aggregation_error(&self, source: AggregationError) -> SimError {
        SimError::Aggregation {
            patch: self.id,
            source,
        }
    }

    /// Register species, seed the smallest cohort of each and start the clock
    pub fn initialize(
        &mut self,
        species: &[SpeciesConfig],
        sim: &SimulationConfig,
    ) -> Result<(), SimError> {
        self.expect_phase(PatchPhase::Uninitialized)?;

        for entry in species {
            self.solver
                .add_species(&entry.name, &entry.traits)
                .map_err(|source| SimError::Solver {
                    patch: self.id,
                    source,
                })?;
        }

        self.solver.reset_state(sim.start);
        let n_species = self.solver.species_count();
        for k in 0..n_species {
            if self.solver.cohort_count(k) > 0 {
                self.solver.set_density(k, 0, sim.initial_density);
            }
        }
        self.solver.sync_state();

        self.cwm = Cwm::new(n_species);
        self.props = EmergentProps::new();
        self.newborns = vec![0.0; n_species];
        self.phase = PatchPhase::Active;

        log::info!(
            "Patch {}: {} species, first clear at t = {}",
            self.id,
            n_species,
            self.clock.next_clear()
        );
        Ok(())
    }

    /// Integrate the solver to `t` and record newborn output
    pub fn advance(&mut self, t: f64) -> Result<(), SimError> {
        self.expect_phase(PatchPhase::Active)?;
        self.solver.advance(t).map_err(|source| SimError::Solver {
            patch: self.id,
            source,
        })?;
        let newborns = self.solver.newborns_out(t);
        let n_species = self.cwm.species_count();
        if newborns.len() != n_species {
            return Err(self.aggregation_error(AggregationError::SpeciesCountMismatch {
                expected: n_species,
                found: newborns.len(),
            }));
        }
        self.newborns = newborns;
        self.phase = PatchPhase::Advanced;
        Ok(())
    }

    /// Newborn output of the last advance, per species
    pub fn newborns(&self) -> &[f64] {
        &self.newborns
    }

    /// Set every species' birth flux to the smoothed ecosystem seed rain
    pub fn apply_seed_rain(&mut self, history: &SeedHistory) -> Result<(), SimError> {
        self.expect_phase(PatchPhase::Advanced)?;
        let n_species = self.solver.species_count();
        if history.species_count() != n_species {
            return Err(self.aggregation_error(AggregationError::SpeciesCountMismatch {
                expected: n_species,
                found: history.species_count(),
            }));
        }
        for k in 0..n_species {
            self.solver.set_birth_flux(k, history.get(k));
        }
        Ok(())
    }

    /// Recompute the community-weighted means and emergent properties
    pub fn aggregate(&mut self, t: f64) -> Result<(), SimError> {
        self.expect_phase(PatchPhase::Advanced)?;
        self.cwm
            .update(t, &self.solver)
            .map_err(|source| self.aggregation_error(source))?;
        self.props.update(t, &self.solver);
        self.phase = PatchPhase::Aggregated;
        Ok(())
    }

    /// Hand the aggregates and raw cohort state to `sink`
    pub fn emit(
        &self,
        t: f64,
        seed_rain: &[f64],
        sink: &mut dyn OutputSink,
    ) -> Result<(), SimError> {
        self.expect_phase(PatchPhase::Aggregated)?;
        let record = StepRecord {
            patch: Some(self.id),
            time: t,
            cwm: &self.cwm,
            props: &self.props,
            seed_rain,
        };
        let rows = if sink.wants_cohorts() {
            self.cohort_rows()
        } else {
            Vec::new()
        };
        sink.write_patch(&record, &rows)?;
        Ok(())
    }

    /// Clear the patch if its deadline has been reached; returns whether it did
    pub fn disturb(&mut self, t: f64) -> Result<bool, SimError> {
        self.expect_phase(PatchPhase::Aggregated)?;
        self.phase = PatchPhase::Active;
        if !self.clock.is_due(t) {
            return Ok(false);
        }

        self.clear();
        let next = self.clock.schedule_next(t, &mut self.rng);
        log::info!("Patch {}: cleared at t = {}, next clear at t = {:.2}", self.id, t, next);
        Ok(true)
    }

    /// Empty every cohort and reset its leaf area; size structure is kept
    fn clear(&mut self) {
        for k in 0..self.solver.species_count() {
            let lai0 = self.solver.initial_lai(k);
            for i in 0..self.solver.cohort_count(k) {
                self.solver.cohort_mut(k, i).set_lai(lai0);
                self.solver.set_density(k, i, 0.0);
            }
        }
        self.solver.sync_state();
    }

    /// Release the species; the patch can not be driven afterwards
    pub fn close(&mut self) -> Result<(), SimError> {
        if self.phase == PatchPhase::Closed {
            return Err(SimError::Lifecycle {
                patch: self.id,
                expected: PatchPhase::Active,
                found: PatchPhase::Closed,
            });
        }
        self.solver.clear_species();
        self.newborns.clear();
        self.phase = PatchPhase::Closed;
        Ok(())
    }

    /// Raw state of every cohort, species by species
    pub fn cohort_rows(&self) -> Vec<CohortRow> {
        let mut rows = Vec::new();
        for k in 0..self.solver.species_count() {
            for i in 0..self.solver.cohort_count(k) {
                let c = self.solver.cohort(k, i);
                rows.push(CohortRow {
                    species: k,
                    size: c.size(),
                    density: c.density(),
                    height: c.get(CohortField::Height),
                    lai: c.get(CohortField::Lai),
                    mortality: c.get(CohortField::MortalityRate),
                    seed_pool: c.get(CohortField::SeedPool),
                    rgr: c.get(CohortField::RelativeGrowthRate),
                    gpp: crate::aggregate::ratio(
                        c.get(CohortField::Gpp),
                        c.get(CohortField::CrownArea),
                    ),
                });
            }
        }
        rows
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> PatchPhase {
        self.phase
    }

    pub fn cwm(&self) -> &Cwm {
        &self.cwm
    }

    pub fn props(&self) -> &EmergentProps {
        &self.props
    }

    pub fn clock(&self) -> &DisturbanceClock {
        &self.clock
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{PlantCohort, PlantTraits};
    use crate::config::Config;
    use crate::output::MemorySink;
    use crate::solver::{BoxcarConfig, BoxcarSolver, StaticSolver};
    use approx::assert_relative_eq;

    fn config() -> Config {
        let mut config = Config::default();
        config.simulation.start = 1000.0;
        config.simulation.initial_density = 1.0;
        config.n_species = Some(1);
        config
    }

    fn static_patch(config: &Config) -> Patch<StaticSolver> {
        let template = PlantCohort::new(0.01, 0.0, PlantTraits::default());
        let mut patch = Patch::new(0, StaticSolver::new(template), &config.disturbance, 42);
        let species = config.species_table().unwrap();
        patch.initialize(&species, &config.simulation).unwrap();
        patch
    }

    fn boxcar_patch(config: &Config) -> Patch<BoxcarSolver> {
        let params = BoxcarConfig {
            n_cohorts: 10,
            ..Default::default()
        };
        let mut patch = Patch::new(1, BoxcarSolver::new(params), &config.disturbance, 42);
        let species = config.species_table().unwrap();
        patch.initialize(&species, &config.simulation).unwrap();
        patch
    }

    #[test]
    fn test_initialize_sets_density_and_first_clear() {
        let config = config();
        let patch = static_patch(&config);

        assert_eq!(patch.phase(), PatchPhase::Active);
        assert_eq!(patch.solver().species_count(), 1);
        assert_eq!(patch.solver().cohort(0, 0).density(), 1.0);
        assert_eq!(patch.solver().state_density(0, 0), 1.0);
        assert_eq!(patch.clock().next_clear(), 1050.0);
    }

    #[test]
    fn test_step_phases() {
        let config = config();
        let mut patch = static_patch(&config);
        let mut history = SeedHistory::new(1, 10.0);
        let mut sink = MemorySink::new();

        patch.advance(1000.0).unwrap();
        assert_eq!(patch.phase(), PatchPhase::Advanced);
        history.push(1000.0, &[0.5]);
        patch.apply_seed_rain(&history).unwrap();
        assert_eq!(patch.solver().birth_flux(0), 0.5);

        patch.aggregate(1000.0).unwrap();
        assert_relative_eq!(patch.cwm().n_ind, 1.0);
        patch.emit(1000.0, &history.smoothed(), &mut sink).unwrap();
        assert!(!patch.disturb(1000.0).unwrap());
        assert_eq!(patch.phase(), PatchPhase::Active);

        let rec = &sink.records[0];
        assert_eq!(rec.patch, Some(0));
        assert_eq!(rec.cohorts.len(), 1);
        assert_eq!(rec.seed_rain, vec![0.5]);
    }

    #[test]
    fn test_out_of_order_calls() {
        let config = config();
        let mut patch = static_patch(&config);

        let err = patch.aggregate(1000.0).unwrap_err();
        assert!(matches!(
            err,
            SimError::Lifecycle {
                expected: PatchPhase::Advanced,
                found: PatchPhase::Active,
                ..
            }
        ));
        assert!(patch.disturb(1000.0).is_err());

        patch.close().unwrap();
        assert!(patch.advance(1001.0).is_err());
        assert!(patch.close().is_err());
        assert_eq!(patch.solver().species_count(), 0);
    }

    #[test]
    fn test_clear_zeroes_density_and_resets_lai() {
        let mut config = config();
        config.disturbance.first_clear = 1002.0;
        let mut patch = boxcar_patch(&config);

        for t in [1000.0, 1001.0, 1002.0] {
            patch.advance(t).unwrap();
            patch.aggregate(t).unwrap();
            let cleared = patch.disturb(t).unwrap();
            assert_eq!(cleared, t >= 1002.0);
        }

        let solver = patch.solver();
        let lai0 = solver.initial_lai(0);
        for i in 0..solver.cohort_count(0) {
            assert_eq!(solver.cohort(0, i).density(), 0.0);
            assert_eq!(solver.cohort(0, i).get(CohortField::Lai), lai0);
        }
        assert_eq!(patch.clock().clears(), 1);
        let next = patch.clock().next_clear();
        assert!(next >= 1002.0 && next <= 1002.0 + config.disturbance.max_interval);

        // the emptied population stays empty without seed input
        patch.advance(1003.0).unwrap();
        patch.aggregate(1003.0).unwrap();
        assert_eq!(patch.cwm().n_ind, 0.0);
        assert_eq!(patch.cwm().height, 0.0);
    }

    #[test]
    fn test_solver_failure_propagates() {
        let config = config();
        let template = PlantCohort::new(0.01, 0.0, PlantTraits::default());
        let solver = StaticSolver::new(template).fail_after(1000.5);
        let mut patch = Patch::new(3, solver, &config.disturbance, 1);
        patch
            .initialize(&config.species_table().unwrap(), &config.simulation)
            .unwrap();

        patch.advance(1000.0).unwrap();
        patch.aggregate(1000.0).unwrap();
        patch.disturb(1000.0).unwrap();
        let err = patch.advance(1001.0).unwrap_err();
        assert!(matches!(err, SimError::Solver { patch: 3, .. }));
    }

    #[test]
    fn test_seed_history_mismatch() {
        let config = config();
        let mut patch = static_patch(&config);
        patch.advance(1000.0).unwrap();
        let history = SeedHistory::new(2, 10.0);
        assert!(matches!(
            patch.apply_seed_rain(&history),
            Err(SimError::Aggregation { .. })
        ));
    }

    #[test]
    fn test_newborn_output_length_checked() {
        let config = config();
        let mut patch = static_patch(&config);
        // a species the patch never registered makes the output one entry too long
        patch.solver_mut().push_species("stray", Vec::new(), 0.0);

        let err = patch.advance(1000.0).unwrap_err();
        assert!(matches!(
            err,
            SimError::Aggregation {
                patch: 0,
                source: AggregationError::SpeciesCountMismatch {
                    expected: 1,
                    found: 2
                }
            }
        ));
        assert_eq!(patch.phase(), PatchPhase::Active);
    }

    #[test]
    fn test_recurring_interval_is_exponential() {
        let clock = DisturbanceClock::new(1050.0, 100.0, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 20_000;
        let mean = (0..n).map(|_| clock.draw_interval(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 100.0).abs() < 3.0, "mean interval {}", mean);
    }

    #[test]
    fn test_interval_capped() {
        let mut clock = DisturbanceClock::new(0.0, 1.0e6, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for i in 0..100 {
            let t = i as f64;
            let next = clock.schedule_next(t, &mut rng);
            assert!(next - t >= 0.0 && next - t <= 1000.0);
        }
        assert_eq!(clock.clears(), 100);
    }

    #[test]
    fn test_patch_rng_streams_differ() {
        let config = config();
        let template = PlantCohort::new(0.01, 0.0, PlantTraits::default());
        let mut a = Patch::new(0, StaticSolver::new(template.clone()), &config.disturbance, 9);
        let mut b = Patch::new(1, StaticSolver::new(template), &config.disturbance, 9);
        let da = a.clock.schedule_next(0.0, &mut a.rng);
        let db = b.clock.schedule_next(0.0, &mut b.rng);
        assert_ne!(da, db);
    }
}
