//! Reductions of a patch's cohort population into scalar summaries.
//!
//! - [`Cwm`]: community-weighted means and per-species demographic totals
//! - [`EmergentProps`]: canopy-scale flux and mass totals per ground area

pub mod cwm;
pub mod emergent;

pub use cwm::{Cwm, BASAL_AREA_MIN_SIZE};
pub use emergent::EmergentProps;

/// Quotient with 0/0 (and x/0) defined as 0.
///
/// Species or whole patches with no individuals (e.g. right after a
/// clear) produce zero means instead of NaN.
#[inline]
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Adds `rhs` into `lhs` elementwise
pub(crate) fn add_into(lhs: &mut [f64], rhs: &[f64]) {
    assert_eq!(
        lhs.len(),
        rhs.len(),
        "per-species vectors must have the same species count"
    );
    for (a, b) in lhs.iter_mut().zip(rhs) {
        *a += b;
    }
}

/// Divides every element by `s`
pub(crate) fn scale_by(values: &mut [f64], s: f64) {
    for v in values {
        *v /= s;
    }
}

/// Errors raised while reducing a population
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// A species has no cohort to read its constant traits from
    MissingReferenceCohort { species: usize },
    /// A per-species input does not match the species registry
    SpeciesCountMismatch { expected: usize, found: usize },
}

impl std::fmt::Display for AggregationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingReferenceCohort { species } => {
                write!(f, "species {} has no cohorts to read traits from", species)
            }
            Self::SpeciesCountMismatch { expected, found } => {
                write!(f, "expected {} species, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for AggregationError {}
