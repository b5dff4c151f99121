//! Canopy-scale flux and mass totals.
//!
//! Every field is a sum over species of a density weighted integral. Nothing
//! is normalised by the number of individuals: the results are totals per
//! unit ground area.

use crate::cohort::{Cohort, CohortField};
use crate::solver::Solver;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, DivAssign};

/// Emergent ecosystem properties of one patch (or an average of patches)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergentProps {
    /// Gross primary production
    pub gpp: f64,
    /// Net primary production
    pub npp: f64,
    /// Autotrophic respiration (leaf + root + stem)
    pub resp_auto: f64,
    /// Transpiration
    pub trans: f64,
    /// Leaf area per unit ground area
    pub lai: f64,
    pub leaf_mass: f64,
    pub stem_mass: f64,
    pub croot_mass: f64,
    pub froot_mass: f64,
}

impl EmergentProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute every field from the solver's population at time `t`
    pub fn update<S: Solver>(&mut self, t: f64, solver: &S) {
        let total = |f: &dyn Fn(&S::Cohort) -> f64| -> f64 {
            (0..solver.species_count())
                .map(|k| solver.integrate(f, t, k))
                .sum()
        };
        let field_total = |field| total(&|c: &S::Cohort| c.get(field));

        self.gpp = field_total(CohortField::Gpp);
        self.npp = field_total(CohortField::Npp);
        self.trans = field_total(CohortField::Transpiration);
        self.resp_auto = total(&|c: &S::Cohort| {
            c.get(CohortField::LeafRespiration)
                + c.get(CohortField::RootRespiration)
                + c.get(CohortField::StemRespiration)
        });
        self.lai = total(&|c: &S::Cohort| {
            c.get(CohortField::CrownArea) * c.get(CohortField::Lai)
        });
        self.leaf_mass = field_total(CohortField::LeafMass);
        self.stem_mass = field_total(CohortField::StemMass);
        self.croot_mass = field_total(CohortField::CoarseRootMass);
        self.froot_mass = field_total(CohortField::FineRootMass);
    }

    /// Coarse plus fine root mass
    pub fn root_mass(&self) -> f64 {
        self.croot_mass + self.froot_mass
    }
}

impl AddAssign<&EmergentProps> for EmergentProps {
    fn add_assign(&mut self, rhs: &EmergentProps) {
        self.gpp += rhs.gpp;
        self.npp += rhs.npp;
        self.resp_auto += rhs.resp_auto;
        self.trans += rhs.trans;
        self.lai += rhs.lai;
        self.leaf_mass += rhs.leaf_mass;
        self.stem_mass += rhs.stem_mass;
        self.croot_mass += rhs.croot_mass;
        self.froot_mass += rhs.froot_mass;
    }
}

impl Add<&EmergentProps> for EmergentProps {
    type Output = EmergentProps;

    fn add(mut self, rhs: &EmergentProps) -> EmergentProps {
        self += rhs;
        self
    }
}

impl DivAssign<f64> for EmergentProps {
    fn div_assign(&mut self, s: f64) {
        self.gpp /= s;
        self.npp /= s;
        self.resp_auto /= s;
        self.trans /= s;
        self.lai /= s;
        self.leaf_mass /= s;
        self.stem_mass /= s;
        self.croot_mass /= s;
        self.froot_mass /= s;
    }
}
