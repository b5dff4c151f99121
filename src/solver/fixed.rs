//! A solver whose cohort snapshots do not change when time advances.
//!
//! Useful for dry runs of the orchestration layer and for tests: every
//! integral is a plain density weighted sum over the stored cohorts and
//! newborn output is a configured constant per species.

use super::{Integrand, Solver, SolverError};
use crate::cohort::{Cohort, PlantCohort, PlantTraits};

#[derive(Clone, Debug)]
struct StaticSpecies {
    name: String,
    cohorts: Vec<PlantCohort>,
    /// Densities the solver integrates with, refreshed by `sync_state`
    state: Vec<f64>,
    birth_flux: f64,
    newborns: f64,
}

/// Constant-snapshot solver
#[derive(Clone, Debug)]
pub struct StaticSolver {
    template: PlantCohort,
    species: Vec<StaticSpecies>,
    newborns: f64,
    cohorts_per_species: usize,
    time: f64,
    fail_after: Option<f64>,
}

impl StaticSolver {
    /// Species registered through [`Solver::add_species`] get one copy of
    /// `template` with their own traits.
    pub fn new(template: PlantCohort) -> Self {
        Self {
            template,
            species: Vec::new(),
            newborns: 0.0,
            cohorts_per_species: 1,
            time: 0.0,
            fail_after: None,
        }
    }

    /// Newborn output reported by species registered after this call
    pub fn with_newborns(mut self, newborns: f64) -> Self {
        self.newborns = newborns;
        self
    }

    /// Copies of the template each species registered after this call gets
    pub fn with_cohorts_per_species(mut self, n: usize) -> Self {
        self.cohorts_per_species = n;
        self
    }

    /// Make every advance beyond `time` fail
    pub fn fail_after(mut self, time: f64) -> Self {
        self.fail_after = Some(time);
        self
    }

    /// Register a species with an explicit cohort list
    pub fn push_species(&mut self, name: &str, cohorts: Vec<PlantCohort>, newborns: f64) -> usize {
        let state = cohorts.iter().map(|c| c.density).collect();
        self.species.push(StaticSpecies {
            name: name.to_string(),
            cohorts,
            state,
            birth_flux: 0.0,
            newborns,
        });
        self.species.len() - 1
    }

    /// Name a species was registered with
    pub fn species_name(&self, species: usize) -> &str {
        &self.species[species].name
    }

    /// Last birth flux handed to a species
    pub fn birth_flux(&self, species: usize) -> f64 {
        self.species[species].birth_flux
    }

    /// Density the integrator currently uses for a cohort
    pub fn state_density(&self, species: usize, index: usize) -> f64 {
        self.species[species].state[index]
    }
}

impl Default for StaticSolver {
    fn default() -> Self {
        Self::new(PlantCohort::new(0.01, 0.0, PlantTraits::default()))
    }
}

impl Solver for StaticSolver {
    type Cohort = PlantCohort;

    fn species_count(&self) -> usize {
        self.species.len()
    }

    fn cohort_count(&self, species: usize) -> usize {
        self.species[species].cohorts.len()
    }

    fn cohort(&self, species: usize, index: usize) -> &PlantCohort {
        &self.species[species].cohorts[index]
    }

    fn cohort_mut(&mut self, species: usize, index: usize) -> &mut PlantCohort {
        &mut self.species[species].cohorts[index]
    }

    fn initial_lai(&self, _species: usize) -> f64 {
        self.template.geometry.lai
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn add_species(&mut self, name: &str, traits: &PlantTraits) -> Result<usize, SolverError> {
        let mut cohort = self.template.clone();
        cohort.traits = *traits;
        let newborns = self.newborns;
        let cohorts = vec![cohort; self.cohorts_per_species];
        Ok(self.push_species(name, cohorts, newborns))
    }

    fn clear_species(&mut self) {
        self.species.clear();
    }

    fn reset_state(&mut self, t0: f64) {
        self.time = t0;
        self.sync_state();
    }

    fn advance(&mut self, target: f64) -> Result<(), SolverError> {
        if target < self.time {
            return Err(SolverError::InvalidTarget {
                current: self.time,
                target,
            });
        }
        if let Some(limit) = self.fail_after {
            if target > limit {
                return Err(SolverError::Integration {
                    time: target,
                    message: "forced failure".to_string(),
                });
            }
        }
        self.time = target;
        Ok(())
    }

    fn integrate(&self, f: Integrand<'_, PlantCohort>, _time: f64, species: usize) -> f64 {
        let spp = &self.species[species];
        spp.cohorts
            .iter()
            .zip(&spp.state)
            .map(|(c, &u)| f(c) * u)
            .sum()
    }

    fn integrate_above(
        &self,
        f: Integrand<'_, PlantCohort>,
        _time: f64,
        min_size: f64,
        species: usize,
    ) -> f64 {
        let spp = &self.species[species];
        spp.cohorts
            .iter()
            .zip(&spp.state)
            .filter(|(c, _)| c.size() > min_size)
            .map(|(c, &u)| f(c) * u)
            .sum()
    }

    fn newborns_out(&self, _time: f64) -> Vec<f64> {
        self.species.iter().map(|s| s.newborns).collect()
    }

    fn set_birth_flux(&mut self, species: usize, value: f64) {
        self.species[species].birth_flux = value;
    }

    fn set_density(&mut self, species: usize, index: usize, value: f64) {
        self.species[species].cohorts[index].density = value;
    }

    fn sync_state(&mut self) {
        for spp in &mut self.species {
            spp.state = spp.cohorts.iter().map(|c| c.density).collect();
        }
    }
}
