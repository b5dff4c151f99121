//! Contract between the patch layer and a cohort solver.
//!
//! The solver owns the size distributions of every species and advances
//! them in time. The patch layer only reads cohorts, asks for density
//! weighted integrals, feeds birth fluxes back in and, on disturbance,
//! edits cohort densities and asks the solver to resynchronise.

pub mod boxcar;
pub mod fixed;

pub use boxcar::{BoxcarConfig, BoxcarSolver};
pub use fixed::StaticSolver;

use crate::cohort::{Cohort, PlantTraits};

/// Integrand evaluated on one cohort
pub type Integrand<'a, C> = &'a dyn Fn(&C) -> f64;

/// A size-structured population solver
pub trait Solver {
    type Cohort: Cohort;

    /// Number of registered species
    fn species_count(&self) -> usize;

    /// Number of cohorts currently carried for a species
    fn cohort_count(&self, species: usize) -> usize;

    /// Read a cohort
    fn cohort(&self, species: usize, index: usize) -> &Self::Cohort;

    /// Mutable access to a cohort's snapshot (not the integrator state)
    fn cohort_mut(&mut self, species: usize, index: usize) -> &mut Self::Cohort;

    /// The structurally last cohort of a species, used for species-constant traits
    fn reference_cohort(&self, species: usize) -> Option<&Self::Cohort> {
        match self.cohort_count(species) {
            0 => None,
            n => Some(self.cohort(species, n - 1)),
        }
    }

    /// Leaf-area-index a freshly established cohort of this species starts with
    fn initial_lai(&self, species: usize) -> f64;

    /// Time the solver state currently refers to
    fn current_time(&self) -> f64;

    /// Register a species and return its index
    fn add_species(&mut self, name: &str, traits: &PlantTraits) -> Result<usize, SolverError>;

    /// Drop every registered species
    fn clear_species(&mut self);

    /// Reset the solver clock and rebuild internal state from the cohorts
    fn reset_state(&mut self, t0: f64);

    /// Integrate forward to `target`
    fn advance(&mut self, target: f64) -> Result<(), SolverError>;

    /// Density weighted integral of `f` over a species' cohorts at `time`
    fn integrate(&self, f: Integrand<'_, Self::Cohort>, time: f64, species: usize) -> f64;

    /// As [`Solver::integrate`], restricted to cohorts with size above `min_size`
    fn integrate_above(
        &self,
        f: Integrand<'_, Self::Cohort>,
        time: f64,
        min_size: f64,
        species: usize,
    ) -> f64;

    /// Per-species newborn (seed) flux for the step ending at `time`
    fn newborns_out(&self, time: f64) -> Vec<f64>;

    /// Boundary input used by the next advance
    fn set_birth_flux(&mut self, species: usize, value: f64);

    /// Edit a cohort's density; takes effect after [`Solver::sync_state`]
    fn set_density(&mut self, species: usize, index: usize, value: f64);

    /// Push edited cohort snapshots back into the integrator state
    fn sync_state(&mut self);
}

/// Errors reported by a solver
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Integration failed numerically
    Integration { time: f64, message: String },
    /// Requested target lies before the current solver time
    InvalidTarget { current: f64, target: f64 },
    /// Species could not be registered
    Setup(String),
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integration { time, message } => {
                write!(f, "integration failed at t = {}: {}", time, message)
            }
            Self::InvalidTarget { current, target } => {
                write!(f, "cannot step backwards from t = {} to t = {}", current, target)
            }
            Self::Setup(msg) => write!(f, "species setup failed: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {}
