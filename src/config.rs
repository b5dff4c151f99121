//! Configuration system for canopy-mosaic runs.
//!
//! Supports YAML configuration files with sensible defaults.

use crate::cohort::PlantTraits;
use crate::solver::BoxcarConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on the number of timesteps of one run
pub const MAX_TIMESTEPS: usize = 10_000_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub disturbance: DisturbanceConfig,
    pub seed_rain: SeedRainConfig,
    /// Inline trait table, ignored when `traits_file` is set
    #[serde(default)]
    pub species: Vec<SpeciesConfig>,
    /// YAML file holding a list of species entries
    #[serde(default)]
    pub traits_file: Option<PathBuf>,
    /// Use only the first `n_species` entries of the trait table
    #[serde(default)]
    pub n_species: Option<usize>,
    #[serde(default)]
    pub cohorts: BoxcarConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Time loop and patch layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// First timestep (inclusive)
    pub start: f64,
    /// Last timestep (inclusive)
    pub end: f64,
    /// Timestep length
    pub dt: f64,
    /// Number of patches
    pub n_patches: usize,
    /// Density given to the smallest cohort of every species at start
    pub initial_density: f64,
    /// Random seed (drawn from the OS when absent)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Advance and aggregate patches on the rayon pool
    #[serde(default)]
    pub parallel: bool,
}

/// Stand-replacing disturbance regime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisturbanceConfig {
    /// Mean return interval of clears
    pub return_interval: f64,
    /// Deadline of the first clear in every patch
    pub first_clear: f64,
    /// Upper bound on the interval between clears
    pub max_interval: f64,
}

/// Seed rain smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRainConfig {
    /// Length of the moving-average window
    pub window: f64,
}

/// One row of the trait table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    #[serde(flatten)]
    pub traits: PlantTraits,
}

/// Output files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base output directory
    pub dir: PathBuf,
    /// Experiment name; outputs go to `dir/experiment`
    pub experiment: String,
    /// Emergent properties file name
    pub emergent_props: String,
    /// Community-weighted means file name
    pub cwm_avg: String,
    /// Per-species community-weighted means file name
    pub cwm_per_species: String,
    /// Write per-patch files in addition to ecosystem files
    pub patch_files: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Steps between stats logging
    pub stats_interval: u64,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            disturbance: DisturbanceConfig::default(),
            seed_rain: SeedRainConfig::default(),
            species: vec![
                SpeciesConfig {
                    name: "Tall_dense".to_string(),
                    traits: PlantTraits::default(),
                },
                SpeciesConfig {
                    name: "Short_light".to_string(),
                    traits: PlantTraits {
                        lma: 0.08,
                        wood_density: 450.0,
                        hmat: 15.0,
                        p50_xylem: -1.5,
                    },
                },
            ],
            traits_file: None,
            n_species: None,
            cohorts: BoxcarConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start: 1000.0,
            end: 1500.0,
            dt: 1.0,
            n_patches: 3,
            initial_density: 1.0,
            seed: None,
            parallel: false,
        }
    }
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            return_interval: 100.0,
            first_clear: 1050.0,
            max_interval: 1000.0,
        }
    }
}

impl Default for SeedRainConfig {
    fn default() -> Self {
        Self { window: 10.0 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            experiment: "default".to_string(),
            emergent_props: "D_PFATE.txt".to_string(),
            cwm_avg: "Y_PFATE.txt".to_string(),
            cwm_per_species: "Y_PFATE_spp.txt".to_string(),
            patch_files: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stats_interval: 50,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Directory all outputs of this run go to
    pub fn output_dir(&self) -> PathBuf {
        self.output.dir.join(&self.output.experiment)
    }

    /// Timesteps from start to end, both inclusive
    pub fn time_points(&self) -> Vec<f64> {
        let sim = &self.simulation;
        if sim.end < sim.start {
            return Vec::new();
        }
        let n = ((sim.end - sim.start) / sim.dt + 1e-9).floor() as usize;
        (0..=n).map(|i| sim.start + i as f64 * sim.dt).collect()
    }

    /// Resolve the trait table: external file if set, then truncation
    pub fn species_table(&self) -> Result<Vec<SpeciesConfig>, String> {
        let mut table = match &self.traits_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read traits file {:?}: {}", path, e))?;
                serde_yaml::from_str::<Vec<SpeciesConfig>>(&contents)
                    .map_err(|e| format!("invalid traits file {:?}: {}", path, e))?
            }
            None => self.species.clone(),
        };

        if let Some(n) = self.n_species {
            if n > table.len() {
                return Err(format!(
                    "n_species = {} but the trait table has {} entries",
                    n,
                    table.len()
                ));
            }
            table.truncate(n);
        }
        if table.is_empty() {
            return Err("at least one species is required".to_string());
        }
        Ok(table)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let sim = &self.simulation;
        if sim.n_patches == 0 {
            return Err("n_patches must be > 0".to_string());
        }
        if !(sim.dt > 0.0) || !sim.dt.is_finite() {
            return Err("dt must be finite and > 0".to_string());
        }
        if !sim.start.is_finite() || !sim.end.is_finite() {
            return Err("start and end must be finite".to_string());
        }
        if sim.end < sim.start {
            return Err("end must not precede start".to_string());
        }
        if (sim.end - sim.start) / sim.dt > MAX_TIMESTEPS as f64 {
            return Err(format!(
                "(end - start) / dt exceeds {} timesteps",
                MAX_TIMESTEPS
            ));
        }
        if sim.initial_density < 0.0 {
            return Err("initial_density must be >= 0".to_string());
        }
        if !(self.disturbance.return_interval > 0.0) {
            return Err("return_interval must be > 0".to_string());
        }
        if self.disturbance.max_interval < 0.0 {
            return Err("max_interval must be >= 0".to_string());
        }
        if self.seed_rain.window < 0.0 {
            return Err("seed rain window must be >= 0".to_string());
        }
        if self.traits_file.is_none() && self.species.is_empty() {
            return Err("species list is empty and no traits_file is set".to_string());
        }
        if self.logging.stats_interval == 0 {
            return Err("stats_interval must be > 0".to_string());
        }
        if self.logging.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("unknown log_level '{}'", self.logging.log_level));
        }
        self.cohorts.validate()?;
        Ok(())
    }
}
