//! Fixed-grid boxcar solver with toy allometries.
//!
//! Each species carries one cohort per size class on a log-spaced grid.
//! Densities move up the grid with an upwind growth flux, are removed by
//! size-dependent mortality and enter the smallest class through the birth
//! flux. Physiology is deliberately minimal: it exists so the patch and
//! ecosystem layers can be run end to end without an external model.

use super::{Integrand, Solver, SolverError};
use crate::cohort::{Cohort, PlantCohort, PlantTraits};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Wood density at which growth runs at the nominal rate (kg m-3)
const REFERENCE_WOOD_DENSITY: f64 = 690.0;

/// Largest fraction of a class that may leave it in one sub-step
const MAX_TRANSFER_FRACTION: f64 = 0.5;

/// Grid and physiology parameters for [`BoxcarSolver`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxcarConfig {
    /// Size classes per species
    pub n_cohorts: usize,
    /// Smallest stem diameter (m), also the size of newborns
    pub size_min: f64,
    /// Largest stem diameter (m)
    pub size_max: f64,
    /// Nominal integration sub-step (yr)
    pub step_size: f64,
    /// Leaf-area-index of a newly established cohort
    pub lai0: f64,
    /// Leaf-area-index cohorts relax towards
    pub lai_max: f64,
    /// Relaxation rate of leaf-area-index (yr-1)
    pub lai_rate: f64,
    /// Initial slope of the height-diameter curve
    pub height_slope: f64,
    /// Crown area per unit height x diameter
    pub crown_coef: f64,
    /// Stem form factor applied to the cylinder volume
    pub form_factor: f64,
    /// Coarse root mass per unit stem mass
    pub coarse_root_ratio: f64,
    /// Fine root mass per unit leaf mass
    pub fine_root_ratio: f64,
    /// Gross production per unit leaf area (kg m-2 yr-1)
    pub gpp_per_leaf_area: f64,
    /// Leaf respiration as a fraction of GPP
    pub leaf_respiration: f64,
    /// Stem respiration per kg stem (yr-1)
    pub stem_respiration: f64,
    /// Fine root respiration per kg fine root (yr-1)
    pub root_respiration: f64,
    /// Water transpired per unit GPP
    pub water_use: f64,
    /// Stomatal conductance at full leaf area (mol m-2 s-1)
    pub gs_max: f64,
    /// Diameter growth of a small, reference-density tree (m yr-1)
    pub growth_rate: f64,
    /// Background mortality (yr-1)
    pub mortality_base: f64,
    /// Extra mortality of the smallest individuals (yr-1)
    pub mortality_juvenile: f64,
    /// Diameter scale over which juvenile mortality decays (m)
    pub juvenile_scale: f64,
    /// Seeds per unit crown area of a mature individual (m-2 yr-1)
    pub fecundity: f64,
    /// Steepness of the maturity curve around 0.75 x hmat
    pub maturity_steepness: f64,
}

impl Default for BoxcarConfig {
    fn default() -> Self {
        Self {
            n_cohorts: 30,
            size_min: 0.01,
            size_max: 10.0,
            step_size: 0.0833333,
            lai0: 1.0,
            lai_max: 2.5,
            lai_rate: 0.5,
            height_slope: 75.0,
            crown_coef: 20.0,
            form_factor: 0.5,
            coarse_root_ratio: 0.25,
            fine_root_ratio: 0.2,
            gpp_per_leaf_area: 1.0,
            leaf_respiration: 0.1,
            stem_respiration: 0.002,
            root_respiration: 0.5,
            water_use: 300.0,
            gs_max: 0.3,
            growth_rate: 0.01,
            mortality_base: 0.02,
            mortality_juvenile: 0.5,
            juvenile_scale: 0.02,
            fecundity: 0.5,
            maturity_steepness: 20.0,
        }
    }
}

impl BoxcarConfig {
    /// Recompute every derived quantity of a cohort from its size, traits and LAI
    pub fn update_physiology(&self, cohort: &mut PlantCohort) {
        let traits = cohort.traits;
        let d = cohort.size;

        let geometry = &mut cohort.geometry;
        geometry.diameter = d;
        geometry.height = traits.hmat * (1.0 - (-self.height_slope * d / traits.hmat).exp());
        geometry.crown_area = self.crown_coef * geometry.height * d;
        let leaf_area = geometry.crown_area * geometry.lai;

        let masses = &mut cohort.masses;
        masses.leaf = leaf_area * traits.lma;
        masses.stem = traits.wood_density * PI * d * d / 4.0 * geometry.height * self.form_factor;
        masses.coarse_root = self.coarse_root_ratio * masses.stem;
        masses.fine_root = self.fine_root_ratio * masses.leaf;

        let fluxes = &mut cohort.fluxes;
        fluxes.gpp = self.gpp_per_leaf_area * leaf_area;
        fluxes.rleaf = self.leaf_respiration * fluxes.gpp;
        fluxes.rstem = self.stem_respiration * masses.stem;
        fluxes.rroot = self.root_respiration * masses.fine_root;
        fluxes.npp = fluxes.gpp - fluxes.rleaf - fluxes.rstem - fluxes.rroot;
        fluxes.trans = self.water_use * fluxes.gpp;
        fluxes.gs_avg = self.gs_max * (geometry.lai / self.lai_max).min(1.0);

        let growth = self.growth(cohort);
        cohort.rates.rgr = growth / d;
        cohort.rates.mortality = self.mortality(d);
    }

    /// Diameter growth rate (m yr-1)
    fn growth(&self, cohort: &PlantCohort) -> f64 {
        let traits = &cohort.traits;
        let height = cohort.geometry.height;
        self.growth_rate * traits.hmat / (traits.hmat + height) * REFERENCE_WOOD_DENSITY
            / traits.wood_density
    }

    fn mortality(&self, size: f64) -> f64 {
        self.mortality_base + self.mortality_juvenile * (-size / self.juvenile_scale).exp()
    }

    /// Seed production per individual (yr-1)
    fn seed_rate(&self, cohort: &PlantCohort) -> f64 {
        let relative_height = cohort.geometry.height / cohort.traits.hmat;
        let maturity = 1.0 / (1.0 + (-self.maturity_steepness * (relative_height - 0.75)).exp());
        self.fecundity * cohort.geometry.crown_area * maturity
    }

    /// Log-spaced size grid from `size_min` to `size_max`
    /// Check the grid and sub-step settings
    pub fn validate(&self) -> Result<(), String> {
        if self.n_cohorts < 2 {
            return Err("n_cohorts must be at least 2".to_string());
        }
        if !self.size_min.is_finite() || !self.size_max.is_finite() {
            return Err("size_min and size_max must be finite".to_string());
        }
        if !(self.size_min > 0.0) || self.size_max <= self.size_min {
            return Err("size grid needs 0 < size_min < size_max".to_string());
        }
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            return Err("step_size must be finite and > 0".to_string());
        }
        Ok(())
    }

    fn size_grid(&self) -> Result<Vec<f64>, SolverError> {
        self.validate().map_err(SolverError::Setup)?;
        let (lo, hi) = (self.size_min.ln(), self.size_max.ln());
        let n = self.n_cohorts;
        Ok((0..n)
            .map(|i| (lo + i as f64 * (hi - lo) / (n - 1) as f64).exp())
            .collect())
    }
}

#[derive(Clone, Debug)]
struct BoxcarSpecies {
    cohorts: Vec<PlantCohort>,
    /// Class widths used by the upwind flux
    widths: Vec<f64>,
    /// Densities being integrated
    state: Vec<f64>,
    birth_flux: f64,
}

impl BoxcarSpecies {
    /// Per-class outflow rate towards the next class (yr-1)
    fn transfer_rates(&self, params: &BoxcarConfig) -> Vec<f64> {
        let last = self.cohorts.len() - 1;
        self.cohorts
            .iter()
            .zip(&self.widths)
            .enumerate()
            .map(|(i, (c, w))| if i == last { 0.0 } else { params.growth(c) / w })
            .collect()
    }

    fn newborns(&self, params: &BoxcarConfig) -> f64 {
        self.cohorts
            .iter()
            .zip(&self.state)
            .map(|(c, &u)| params.seed_rate(c) * u)
            .sum()
    }
}

/// Reference size-structured solver
#[derive(Clone, Debug)]
pub struct BoxcarSolver {
    params: BoxcarConfig,
    species: Vec<BoxcarSpecies>,
    time: f64,
}

impl BoxcarSolver {
    pub fn new(params: BoxcarConfig) -> Self {
        Self {
            params,
            species: Vec::new(),
            time: 0.0,
        }
    }

    /// Number of explicit sub-steps needed to cover `dt` stably
    fn substeps(&self, dt: f64) -> usize {
        let max_rate = self
            .species
            .iter()
            .flat_map(|s| {
                s.transfer_rates(&self.params)
                    .into_iter()
                    .zip(s.cohorts.iter().map(|c| c.rates.mortality))
                    .map(|(g, m)| g + m)
                    .collect::<Vec<_>>()
            })
            .fold(0.0, f64::max);
        let by_step = (dt / self.params.step_size).ceil();
        let by_stability = (dt * max_rate / MAX_TRANSFER_FRACTION).ceil();
        by_step.max(by_stability).max(1.0) as usize
    }

    fn substep(&mut self, h: f64) {
        let params = &self.params;
        for spp in &mut self.species {
            let rates = spp.transfer_rates(params);
            let mut du = vec![0.0; spp.state.len()];
            for i in 0..spp.state.len() {
                let inflow = if i == 0 {
                    spp.birth_flux
                } else {
                    rates[i - 1] * spp.state[i - 1]
                };
                let mortality = spp.cohorts[i].rates.mortality;
                du[i] = inflow - (rates[i] + mortality) * spp.state[i];
            }

            for (i, cohort) in spp.cohorts.iter_mut().enumerate() {
                spp.state[i] = (spp.state[i] + h * du[i]).max(0.0);
                cohort.seed_pool += h * params.seed_rate(cohort);
                let lai = cohort.geometry.lai;
                cohort.set_lai(lai + h * params.lai_rate * (params.lai_max - lai));
                params.update_physiology(cohort);
            }
        }
    }

    fn write_back(&mut self) {
        for spp in &mut self.species {
            for (cohort, &u) in spp.cohorts.iter_mut().zip(&spp.state) {
                cohort.density = u;
            }
        }
    }
}

impl Solver for BoxcarSolver {
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
        self.params.lai0
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn add_species(&mut self, name: &str, traits: &PlantTraits) -> Result<usize, SolverError> {
        if traits.hmat <= 0.0 || traits.wood_density <= 0.0 {
            return Err(SolverError::Setup(format!(
                "species {} needs positive hmat and wood density",
                name
            )));
        }
        let sizes = self.params.size_grid()?;

        let mut widths: Vec<f64> = sizes.windows(2).map(|w| w[1] - w[0]).collect();
        widths.push(widths[widths.len() - 1]);

        let cohorts = sizes
            .iter()
            .map(|&x| {
                let mut cohort = PlantCohort::new(x, 0.0, *traits);
                cohort.geometry.lai = self.params.lai0;
                self.params.update_physiology(&mut cohort);
                cohort
            })
            .collect::<Vec<_>>();

        self.species.push(BoxcarSpecies {
            state: vec![0.0; cohorts.len()],
            cohorts,
            widths,
            birth_flux: 0.0,
        });
        Ok(self.species.len() - 1)
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
        let dt = target - self.time;
        if dt == 0.0 {
            return Ok(());
        }

        let n = self.substeps(dt);
        let h = dt / n as f64;
        for i in 0..n {
            self.substep(h);
            let bad = self
                .species
                .iter()
                .any(|s| s.state.iter().any(|u| !u.is_finite()));
            if bad {
                return Err(SolverError::Integration {
                    time: self.time + (i + 1) as f64 * h,
                    message: "non-finite density".to_string(),
                });
            }
        }

        self.time = target;
        self.write_back();
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
        self.species.iter().map(|s| s.newborns(&self.params)).collect()
    }

    fn set_birth_flux(&mut self, species: usize, value: f64) {
        self.species[species].birth_flux = value;
    }

    fn set_density(&mut self, species: usize, index: usize, value: f64) {
        self.species[species].cohorts[index].density = value;
    }

    fn sync_state(&mut self) {
        let params = &self.params;
        for spp in &mut self.species {
            for (u, cohort) in spp.state.iter_mut().zip(spp.cohorts.iter_mut()) {
                *u = cohort.density;
                params.update_physiology(cohort);
            }
        }
    }
}
