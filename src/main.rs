//! canopy-mosaic - CLI Entry Point
//!
//! Multi-patch plant population simulator.

use canopy_mosaic::output::RunInfo;
use canopy_mosaic::stats::StatsHistory;
use canopy_mosaic::{benchmark, BoxcarSolver, Config, Ecosystem, TsvOutput};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "canopy-mosaic")]
#[command(version)]
#[command(about = "Multi-patch size-structured plant population simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Base output directory (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Quiet mode (minimal output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Run performance benchmark
    Benchmark {
        /// Number of simulated years
        #[arg(short, long, default_value = "100")]
        years: u32,

        /// Number of patches
        #[arg(short, long, default_value = "10")]
        patches: usize,
    },

    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Summarize a saved stats history
    Summary {
        /// stats_history.json of a finished run
        history: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output,
            seed,
            quiet,
        } => run_simulation(config, output, seed, quiet),

        Commands::Benchmark { years, patches } => {
            init_logging("info");
            run_benchmark(years, patches)
        }

        Commands::Init { output } => {
            init_logging("info");
            generate_config(output)
        }

        Commands::Summary { history } => {
            init_logging("info");
            summarize(history)
        }
    }
}

/// Initialize logging; `RUST_LOG` takes precedence over `level`
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run_simulation(
    config_path: PathBuf,
    output: Option<PathBuf>,
    seed: Option<u64>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Load or create config
    let from_file = config_path.exists();
    let mut config = if from_file {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    init_logging(&config.logging.log_level);
    if from_file {
        log::info!("Loaded config from: {:?}", config_path);
    } else {
        log::info!("Using default configuration");
    }
    if let Some(dir) = output {
        config.output.dir = dir;
    }
    if seed.is_some() {
        config.simulation.seed = seed;
    }

    let params = config.cohorts.clone();
    let mut eco = Ecosystem::new(config.clone(), |_| BoxcarSolver::new(params.clone()))?;

    let out_dir = config.output_dir();
    RunInfo::new(&config, eco.seed(), eco.species_names()).write(&out_dir, &config)?;
    let mut sink = TsvOutput::create(
        &out_dir,
        &config.output,
        eco.n_patches(),
        eco.species_count(),
    )?;

    let time_points = config.time_points();
    println!("Starting simulation");
    println!("  Patches: {}", eco.n_patches());
    println!("  Species: {}", eco.species_names().join(", "));
    println!(
        "  Years: {} ({} -> {})",
        time_points.len(),
        config.simulation.start,
        config.simulation.end
    );
    println!("  Seed: {}", eco.seed());
    println!("  Output: {:?}", out_dir);
    println!();

    let start = Instant::now();
    let stats_interval = config.logging.stats_interval as usize;

    eco.run_with_callback(&mut sink, |eco, i| {
        // Stats output
        if !quiet && i % stats_interval == 0 {
            println!("{}", eco.stats.summary());
        }
    })?;

    let elapsed = start.elapsed();
    let steps_per_sec = eco.steps as f64 / elapsed.as_secs_f64();
    eco.stats.steps_per_second = steps_per_sec;

    println!();
    println!("=== Simulation Complete ===");
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Steps: {}", eco.steps);
    println!("Speed: {:.1} steps/s", steps_per_sec);
    println!("Final state: {}", eco.stats.summary());
    println!("Clears: {}", eco.disturbance_log.count());
    for patch in &eco.patches {
        println!(
            "  Patch {}: {} clears",
            patch.id(),
            eco.disturbance_log.count_for(patch.id())
        );
    }
    if let Some(mean) = eco.disturbance_log.mean_interval() {
        println!("Mean clear interval: {:.1}", mean);
    }

    // Save stats history
    eco.stats_history.record(eco.stats.clone());
    let stats_path = out_dir.join("stats_history.json");
    eco.stats_history.save(&stats_path.to_string_lossy())?;
    println!("Stats history: {:?}", stats_path);

    eco.close()?;
    Ok(())
}

fn run_benchmark(years: u32, patches: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== canopy-mosaic Benchmark ===");
    println!("Years: {}", years);
    println!("Patches: {}", patches);
    println!();

    let result = benchmark(years, patches)?;
    println!("{}", result);

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save(&output)?;
    println!("Configuration saved to: {:?}", output);
    Ok(())
}

fn summarize(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Run Summary ===");
    println!("File: {:?}", path);
    println!();

    let history = StatsHistory::load(&path.to_string_lossy())?;
    println!("Snapshots: {} (every {} steps)", history.snapshots.len(), history.interval);

    let Some(last) = history.last() else {
        println!("No snapshots recorded");
        return Ok(());
    };
    println!("Final: {}", last.summary());

    let peak = history
        .snapshots
        .iter()
        .max_by(|a, b| a.basal_area.total_cmp(&b.basal_area));
    if let Some(peak) = peak {
        println!("Peak basal area: {:.4} at t = {}", peak.basal_area, peak.time);
    }

    let peak_n = history
        .n_ind_series()
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((time, n_ind)) = peak_n {
        println!("Peak density: {:.4} at t = {}", n_ind, time);
    }

    let total_clears: usize = history.snapshots.iter().map(|s| s.clears).sum();
    println!("Clears in recorded steps: {}", total_clears);

    Ok(())
}
