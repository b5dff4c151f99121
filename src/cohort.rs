//! Cohort snapshots and the capability trait the aggregators read through.
//!
//! A cohort is a group of same-sized individuals of one species carried by
//! the solver with a density weight. The aggregation layer never needs the
//! concrete physiology type: it asks for a [`CohortField`] and gets a number.

use serde::{Deserialize, Serialize};

/// Quantities a cohort exposes to the aggregation layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CohortField {
    // Geometry
    Height,
    Lai,
    CrownArea,
    Diameter,
    // Rates
    MortalityRate,
    RelativeGrowthRate,
    // State
    SeedPool,
    // Resource fluxes
    Gpp,
    Npp,
    Transpiration,
    LeafRespiration,
    RootRespiration,
    StemRespiration,
    StomatalConductance,
    // Tissue masses
    Biomass,
    LeafMass,
    StemMass,
    CoarseRootMass,
    FineRootMass,
    // Fixed species traits
    Lma,
    WoodDensity,
    MaturationHeight,
    P50,
}

/// Read access to one cohort, plus the single edit a disturbance needs
pub trait Cohort {
    /// Size coordinate used by threshold integrals
    fn size(&self) -> f64;

    /// Density weight (individuals per unit ground area)
    fn density(&self) -> f64;

    /// Value of an arbitrary per-cohort quantity
    fn get(&self, field: CohortField) -> f64;

    /// Overwrite the cohort's leaf-area-index
    fn set_lai(&mut self, lai: f64);
}

/// Fixed per-species functional traits
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlantTraits {
    /// Leaf mass per area (kg m-2)
    pub lma: f64,
    /// Wood density (kg m-3)
    pub wood_density: f64,
    /// Maturation height (m)
    pub hmat: f64,
    /// Xylem water potential at 50% loss of conductivity (MPa)
    pub p50_xylem: f64,
}

impl Default for PlantTraits {
    fn default() -> Self {
        Self {
            lma: 0.122,
            wood_density: 690.0,
            hmat: 29.0,
            p50_xylem: -2.29,
        }
    }
}

/// Crown and stem geometry
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub height: f64,
    pub lai: f64,
    pub crown_area: f64,
    pub diameter: f64,
}

/// Demographic rates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    /// Instantaneous mortality rate (yr-1)
    pub mortality: f64,
    /// Relative growth rate (yr-1)
    pub rgr: f64,
}

/// Resource fluxes per individual (annualised)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fluxes {
    pub gpp: f64,
    pub npp: f64,
    pub trans: f64,
    pub rleaf: f64,
    pub rroot: f64,
    pub rstem: f64,
    pub gs_avg: f64,
}

/// Tissue masses per individual (kg)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TissueMasses {
    pub leaf: f64,
    pub stem: f64,
    pub coarse_root: f64,
    pub fine_root: f64,
}

impl TissueMasses {
    /// Total biomass
    pub fn total(&self) -> f64 {
        self.leaf + self.stem + self.coarse_root + self.fine_root
    }
}

/// Plain-data cohort snapshot as produced by a physiology model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantCohort {
    pub size: f64,
    pub density: f64,
    pub geometry: Geometry,
    pub rates: Rates,
    /// Accumulated seed output
    pub seed_pool: f64,
    pub fluxes: Fluxes,
    pub masses: TissueMasses,
    pub traits: PlantTraits,
}

impl PlantCohort {
    /// Create a cohort of the given size and density with zeroed physiology
    pub fn new(size: f64, density: f64, traits: PlantTraits) -> Self {
        Self {
            size,
            density,
            traits,
            ..Default::default()
        }
    }
}

impl Cohort for PlantCohort {
    fn size(&self) -> f64 {
        self.size
    }

    fn density(&self) -> f64 {
        self.density
    }

    fn get(&self, field: CohortField) -> f64 {
        match field {
            CohortField::Height => self.geometry.height,
            CohortField::Lai => self.geometry.lai,
            CohortField::CrownArea => self.geometry.crown_area,
            CohortField::Diameter => self.geometry.diameter,
            CohortField::MortalityRate => self.rates.mortality,
            CohortField::RelativeGrowthRate => self.rates.rgr,
            CohortField::SeedPool => self.seed_pool,
            CohortField::Gpp => self.fluxes.gpp,
            CohortField::Npp => self.fluxes.npp,
            CohortField::Transpiration => self.fluxes.trans,
            CohortField::LeafRespiration => self.fluxes.rleaf,
            CohortField::RootRespiration => self.fluxes.rroot,
            CohortField::StemRespiration => self.fluxes.rstem,
            CohortField::StomatalConductance => self.fluxes.gs_avg,
            CohortField::Biomass => self.masses.total(),
            CohortField::LeafMass => self.masses.leaf,
            CohortField::StemMass => self.masses.stem,
            CohortField::CoarseRootMass => self.masses.coarse_root,
            CohortField::FineRootMass => self.masses.fine_root,
            CohortField::Lma => self.traits.lma,
            CohortField::WoodDensity => self.traits.wood_density,
            CohortField::MaturationHeight => self.traits.hmat,
            CohortField::P50 => self.traits.p50_xylem,
        }
    }

    fn set_lai(&mut self, lai: f64) {
        self.geometry.lai = lai;
    }
}
