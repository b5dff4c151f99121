//! Statistics tracking for the simulation.

use crate::aggregate::{Cwm, EmergentProps};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ecosystem-level snapshot for a simulation step
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EcosystemStats {
    /// Current simulation time
    pub time: f64,
    /// Steps taken so far
    pub step: u64,
    /// Mean individual count per patch
    pub n_ind: f64,
    /// Mean biomass per patch
    pub biomass: f64,
    /// Mean basal area per patch
    pub basal_area: f64,
    /// Mean of per-species mean heights
    pub height: f64,
    /// Leaf area index
    pub lai: f64,
    /// Gross primary production
    pub gpp: f64,
    /// Net primary production
    pub npp: f64,
    /// Smoothed seed rain summed over species
    pub seed_rain: f64,
    /// Species with a nonzero individual count
    pub species_present: usize,
    /// Clears this step
    pub clears: usize,
    /// Steps per second (performance)
    pub steps_per_second: f64,
}

impl EcosystemStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats from the ecosystem aggregates
    pub fn update(&mut self, cwm: &Cwm, props: &EmergentProps, seed_rain: &[f64], clears: usize) {
        self.n_ind = cwm.n_ind;
        self.biomass = cwm.biomass;
        self.basal_area = cwm.basal_area;
        self.height = cwm.height;
        self.lai = props.lai;
        self.gpp = props.gpp;
        self.npp = props.npp;
        self.seed_rain = seed_rain.iter().sum();
        self.species_present = cwm.n_ind_vec.iter().filter(|&&n| n > 0.0).count();
        self.clears = clears;
    }

    /// Format stats as a one-line summary
    pub fn summary(&self) -> String {
        format!(
            "T:{:7.1} | N:{:8.3} | Spp:{:2} | H:{:6.2} | BA:{:.4} | LAI:{:.2} | GPP:{:.3} | Seeds:{:.3} | Clears:{}",
            self.time,
            self.n_ind,
            self.species_present,
            self.height,
            self.basal_area,
            self.lai,
            self.gpp,
            self.seed_rain,
            self.clears,
        )
    }
}

/// Historical statistics tracker
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsHistory {
    /// All recorded stats snapshots
    pub snapshots: Vec<EcosystemStats>,
    /// Recording interval in steps
    pub interval: u64,
}

impl StatsHistory {
    /// Create new history with recording interval
    pub fn new(interval: u64) -> Self {
        Self {
            snapshots: Vec::new(),
            interval,
        }
    }

    /// Record a stats snapshot
    pub fn record(&mut self, stats: EcosystemStats) {
        self.snapshots.push(stats);
    }

    /// Individual count over time
    pub fn n_ind_series(&self) -> Vec<(f64, f64)> {
        self.snapshots.iter().map(|s| (s.time, s.n_ind)).collect()
    }

    pub fn last(&self) -> Option<&EcosystemStats> {
        self.snapshots.last()
    }

    /// Save history to file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
    }

    /// Load history from file
    pub fn load(path: &str) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// One stand-replacing clear
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClearEvent {
    pub patch: usize,
    pub time: f64,
    pub next_clear: f64,
}

/// Every clear of a run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DisturbanceLog {
    pub events: Vec<ClearEvent>,
    /// Patch -> number of clears
    pub per_patch: HashMap<usize, u64>,
}

impl DisturbanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, patch: usize, time: f64, next_clear: f64) {
        self.events.push(ClearEvent {
            patch,
            time,
            next_clear,
        });
        *self.per_patch.entry(patch).or_insert(0) += 1;
    }

    /// Total clears
    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn count_for(&self, patch: usize) -> u64 {
        self.per_patch.get(&patch).copied().unwrap_or(0)
    }

    /// Mean time between a clear and the deadline it scheduled
    pub fn mean_interval(&self) -> Option<f64> {
        if self.events.is_empty() {
            return None;
        }
        let total: f64 = self.events.iter().map(|e| e.next_clear - e.time).sum();
        Some(total / self.events.len() as f64)
    }
}
