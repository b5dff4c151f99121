//! Community-weighted means and per-species demographic summaries.

use super::{add_into, ratio, scale_by, AggregationError};
use crate::cohort::{Cohort, CohortField};
use crate::solver::Solver;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Add, AddAssign, DivAssign};

/// Only cohorts larger than this contribute to basal area
pub const BASAL_AREA_MIN_SIZE: f64 = 0.1;

/// Community-weighted summary of one patch (or an average of patches)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cwm {
    /// Individuals per unit ground area
    pub n_ind: f64,
    /// Biomass per unit ground area
    pub biomass: f64,
    /// Basal area of cohorts above [`BASAL_AREA_MIN_SIZE`]
    pub basal_area: f64,
    /// Crown area per unit ground area
    pub canopy_area: f64,
    /// Unweighted mean over species of the per-species mean height
    pub height: f64,
    pub lma: f64,
    pub p50: f64,
    pub hmat: f64,
    pub wood_density: f64,
    /// Mean stomatal conductance (no per-species breakdown)
    pub gs: f64,

    pub n_ind_vec: Vec<f64>,
    pub biomass_vec: Vec<f64>,
    pub basal_area_vec: Vec<f64>,
    pub canopy_area_vec: Vec<f64>,
    pub height_vec: Vec<f64>,
    pub lma_vec: Vec<f64>,
    pub p50_vec: Vec<f64>,
    pub hmat_vec: Vec<f64>,
    pub wood_density_vec: Vec<f64>,
}

impl Cwm {
    /// Zeroed summary for `n_species` species
    pub fn new(n_species: usize) -> Self {
        let zeros = vec![0.0; n_species];
        Self {
            n_ind_vec: zeros.clone(),
            biomass_vec: zeros.clone(),
            basal_area_vec: zeros.clone(),
            canopy_area_vec: zeros.clone(),
            height_vec: zeros.clone(),
            lma_vec: zeros.clone(),
            p50_vec: zeros.clone(),
            hmat_vec: zeros.clone(),
            wood_density_vec: zeros,
            ..Default::default()
        }
    }

    /// Number of species the per-species vectors cover
    pub fn species_count(&self) -> usize {
        self.n_ind_vec.len()
    }

    /// Recompute every field from the solver's population at time `t`.
    ///
    /// On error `self` is left untouched.
    pub fn update<S: Solver>(&mut self, t: f64, solver: &S) -> Result<(), AggregationError> {
        let n = solver.species_count();

        // Species-constant traits come from one reference cohort per species
        let reference = (0..n)
            .map(|k| {
                solver
                    .reference_cohort(k)
                    .ok_or(AggregationError::MissingReferenceCohort { species: k })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut next = Cwm::new(n);

        next.n_ind_vec = (0..n).map(|k| solver.integrate(&|_| 1.0, t, k)).collect();
        next.n_ind = next.n_ind_vec.iter().sum();

        next.biomass_vec = integrate_each(solver, t, CohortField::Biomass);
        next.biomass = next.biomass_vec.iter().sum();

        next.basal_area_vec = (0..n)
            .map(|k| {
                solver.integrate_above(
                    &|c: &S::Cohort| {
                        let d = c.get(CohortField::Diameter);
                        PI * d * d / 4.0
                    },
                    t,
                    BASAL_AREA_MIN_SIZE,
                    k,
                )
            })
            .collect();
        next.basal_area = next.basal_area_vec.iter().sum();

        next.canopy_area_vec = integrate_each(solver, t, CohortField::CrownArea);
        next.canopy_area = next.canopy_area_vec.iter().sum();

        // Per-species mean height, then an unweighted mean across species
        next.height_vec = integrate_each(solver, t, CohortField::Height)
            .into_iter()
            .zip(&next.n_ind_vec)
            .map(|(h, &count)| ratio(h, count))
            .collect();
        next.height = ratio(next.height_vec.iter().sum(), n as f64);

        let n_ind = next.n_ind;
        let weighted_mean =
            |field| ratio(integrate_each(solver, t, field).iter().sum(), n_ind);
        let from_reference = |field| reference.iter().map(|c| c.get(field)).collect::<Vec<_>>();

        next.hmat = weighted_mean(CohortField::MaturationHeight);
        next.hmat_vec = from_reference(CohortField::MaturationHeight);

        next.lma = weighted_mean(CohortField::Lma);
        next.lma_vec = from_reference(CohortField::Lma);

        next.wood_density = weighted_mean(CohortField::WoodDensity);
        next.wood_density_vec = from_reference(CohortField::WoodDensity);

        next.p50 = weighted_mean(CohortField::P50);
        next.p50_vec = from_reference(CohortField::P50);

        next.gs = weighted_mean(CohortField::StomatalConductance);

        *self = next;
        Ok(())
    }

    /// Specific leaf area (inverse of LMA), 0 when LMA is 0
    pub fn sla(&self) -> f64 {
        ratio(1.0, self.lma)
    }

    fn vectors_mut(&mut self) -> [&mut Vec<f64>; 9] {
        [
            &mut self.n_ind_vec,
            &mut self.biomass_vec,
            &mut self.basal_area_vec,
            &mut self.canopy_area_vec,
            &mut self.height_vec,
            &mut self.lma_vec,
            &mut self.p50_vec,
            &mut self.hmat_vec,
            &mut self.wood_density_vec,
        ]
    }

    fn vectors(&self) -> [&Vec<f64>; 9] {
        [
            &self.n_ind_vec,
            &self.biomass_vec,
            &self.basal_area_vec,
            &self.canopy_area_vec,
            &self.height_vec,
            &self.lma_vec,
            &self.p50_vec,
            &self.hmat_vec,
            &self.wood_density_vec,
        ]
    }
}

/// Density weighted integral of one field, per species
fn integrate_each<S: Solver>(solver: &S, t: f64, field: CohortField) -> Vec<f64> {
    (0..solver.species_count())
        .map(|k| solver.integrate(&|c: &S::Cohort| c.get(field), t, k))
        .collect()
}

impl AddAssign<&Cwm> for Cwm {
    /// # Panics
    ///
    /// If the species counts differ.
    fn add_assign(&mut self, rhs: &Cwm) {
        self.n_ind += rhs.n_ind;
        self.biomass += rhs.biomass;
        self.basal_area += rhs.basal_area;
        self.canopy_area += rhs.canopy_area;
        self.height += rhs.height;
        self.lma += rhs.lma;
        self.p50 += rhs.p50;
        self.hmat += rhs.hmat;
        self.wood_density += rhs.wood_density;
        self.gs += rhs.gs;

        for (lhs, rhs) in self.vectors_mut().into_iter().zip(rhs.vectors()) {
            add_into(lhs, rhs);
        }
    }
}

impl Add<&Cwm> for Cwm {
    type Output = Cwm;

    fn add(mut self, rhs: &Cwm) -> Cwm {
        self += rhs;
        self
    }
}

impl DivAssign<f64> for Cwm {
    fn div_assign(&mut self, s: f64) {
        self.n_ind /= s;
        self.biomass /= s;
        self.basal_area /= s;
        self.canopy_area /= s;
        self.height /= s;
        self.lma /= s;
        self.p50 /= s;
        self.hmat /= s;
        self.wood_density /= s;
        self.gs /= s;

        for v in self.vectors_mut() {
            scale_by(v, s);
        }
    }
}
