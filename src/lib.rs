//! # canopy-mosaic
//!
//! Multi-patch driver for size-structured plant populations.
//!
//! ## Features
//!
//! - **Aggregation**: community-weighted means and canopy flux totals per patch
//! - **Coupled**: patches share one pooled, smoothed seed rain
//! - **Disturbance**: stochastic stand-replacing clears per patch
//! - **Parallel**: optional Rayon advance/aggregate across patches
//! - **Reproducible**: seeded per-patch random streams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use canopy_mosaic::{BoxcarSolver, Config, Ecosystem, MemorySink};
//!
//! let config = Config::default();
//! let params = config.cohorts.clone();
//! let mut eco = Ecosystem::new(config, |_| BoxcarSolver::new(params.clone())).unwrap();
//!
//! let mut sink = MemorySink::new();
//! eco.run(&mut sink).unwrap();
//!
//! println!("{}", eco.stats.summary());
//! println!("Clears: {}", eco.disturbance_log.count());
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use canopy_mosaic::Config;
//!
//! let mut config = Config::default();
//! config.simulation.n_patches = 10;
//! config.disturbance.return_interval = 50.0;
//! assert!(config.validate().is_ok());
//! ```

pub mod aggregate;
pub mod cohort;
pub mod config;
pub mod ecosystem;
pub mod error;
pub mod output;
pub mod patch;
pub mod seed_rain;
pub mod solver;
pub mod stats;

// Re-export main types
pub use aggregate::{Cwm, EmergentProps};
pub use cohort::{Cohort, CohortField, PlantCohort, PlantTraits};
pub use config::Config;
pub use ecosystem::Ecosystem;
pub use error::SimError;
pub use output::{MemorySink, OutputSink, TsvOutput};
pub use patch::{Patch, PatchPhase};
pub use seed_rain::{MovingAverager, SeedHistory};
pub use solver::{BoxcarSolver, Solver, StaticSolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run a quick benchmark with the reference solver and no output
pub fn benchmark(years: u32, n_patches: usize) -> Result<BenchmarkResult, SimError> {
    use std::time::Instant;

    let mut config = Config::default();
    config.simulation.n_patches = n_patches;
    config.simulation.end = config.simulation.start + years.saturating_sub(1) as f64;
    config.simulation.seed = Some(1);
    let params = config.cohorts.clone();

    let mut eco = Ecosystem::new(config, |_| BoxcarSolver::new(params.clone()))?;
    let mut sink = output::NullSink;

    let start = Instant::now();
    eco.run(&mut sink)?;
    let elapsed = start.elapsed();

    Ok(BenchmarkResult {
        steps: eco.steps,
        n_patches,
        elapsed_secs: elapsed.as_secs_f64(),
        steps_per_second: eco.steps as f64 / elapsed.as_secs_f64(),
        clears: eco.disturbance_log.count(),
    })
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub steps: u64,
    pub n_patches: usize,
    pub elapsed_secs: f64,
    pub steps_per_second: f64,
    pub clears: usize,
}

impl std::fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Benchmark Results ===")?;
        writeln!(f, "Steps: {}", self.steps)?;
        writeln!(f, "Patches: {}", self.n_patches)?;
        writeln!(f, "Time: {:.3}s", self.elapsed_secs)?;
        writeln!(f, "Speed: {:.1} steps/s", self.steps_per_second)?;
        writeln!(f, "Clears: {}", self.clears)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_benchmark() {
        let result = benchmark(20, 2).unwrap();

        assert_eq!(result.steps, 20);
        assert!(result.steps_per_second > 0.0);
    }
}
