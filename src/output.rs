//! Output sinks for per-step aggregates.
//!
//! [`TsvOutput`] writes tab-separated tables for the ecosystem and,
//! optionally, for every patch. [`MemorySink`] keeps everything in memory
//! and is what the tests inspect.

use crate::aggregate::{ratio, Cwm, EmergentProps};
use crate::config::{Config, OutputConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Result, Write};
use std::path::{Path, PathBuf};

/// Carbon fraction of dry mass
const CARBON_FRACTION: f64 = 0.5;
const DAYS_PER_YEAR: f64 = 365.0;
/// Placeholder for columns that are not computed
const MISSING: i32 = -9999;

const EMERGENT_HEADER: &str = "YEAR\tDOY\tGPP\tNPP\tRAU\tCL\tCW\tCCR\tCFR\tCR\tGS\tET\tLAI";
const CWM_HEADER: &str = "YEAR\tPID\tDE\tOC\tPH\tMH\tCA\tBA\tTB\tWD\tMO\tSLA\tP50";

/// Per-cohort variables streamed to `species_<k>_<var>.txt`
pub const COHORT_VARIABLES: [&str; 8] = ["X", "u", "height", "lai", "mort", "seeds", "g", "gpp"];

/// Aggregates of one patch (or of the whole ecosystem) at one timestep
#[derive(Debug, Clone, Copy)]
pub struct StepRecord<'a> {
    /// `None` for ecosystem records
    pub patch: Option<usize>,
    pub time: f64,
    pub cwm: &'a Cwm,
    pub props: &'a EmergentProps,
    /// Smoothed seed rain per species
    pub seed_rain: &'a [f64],
}

/// Raw state of one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRow {
    pub species: usize,
    pub size: f64,
    pub density: f64,
    pub height: f64,
    pub lai: f64,
    pub mortality: f64,
    pub seed_pool: f64,
    pub rgr: f64,
    /// GPP per unit crown area
    pub gpp: f64,
}

impl CohortRow {
    fn value(&self, variable: usize) -> f64 {
        match variable {
            0 => self.size,
            1 => self.density,
            2 => self.height,
            3 => self.lai,
            4 => self.mortality,
            5 => self.seed_pool,
            6 => self.rgr,
            _ => self.gpp,
        }
    }
}

/// Destination for per-step records
pub trait OutputSink {
    /// Whether raw cohort rows should be collected for patch records
    fn wants_cohorts(&self) -> bool {
        true
    }

    fn write_patch(&mut self, record: &StepRecord<'_>, cohorts: &[CohortRow]) -> Result<()>;

    fn write_ecosystem(&mut self, record: &StepRecord<'_>) -> Result<()>;

    /// Flush everything; called once at the end of a run
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emergent properties row in output units (gC/m2/d, gC/m2, mm/d)
pub fn emergent_row(record: &StepRecord<'_>) -> String {
    let p = record.props;
    let per_day = |x: f64| x * CARBON_FRACTION / DAYS_PER_YEAR * 1000.0;
    let carbon = |x: f64| x * 1000.0 * CARBON_FRACTION;
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        record.time.trunc() as i64,
        day_of_year(record.time),
        per_day(p.gpp),
        per_day(p.npp),
        per_day(p.resp_auto),
        carbon(p.leaf_mass),
        carbon(p.stem_mass),
        carbon(p.croot_mass),
        carbon(p.froot_mass),
        carbon(p.root_mass()),
        record.cwm.gs,
        p.trans / DAYS_PER_YEAR,
        p.lai,
    )
}

/// Community-weighted means row
pub fn cwm_row(record: &StepRecord<'_>) -> String {
    let c = record.cwm;
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        record.time.trunc() as i64,
        MISSING,
        c.n_ind,
        MISSING,
        c.height,
        c.hmat,
        c.canopy_area,
        c.basal_area,
        c.biomass,
        c.wood_density,
        MISSING,
        ratio(1.0, c.lma),
        c.p50,
    )
}

/// One row per species, PID holding the species index
pub fn cwm_species_rows(record: &StepRecord<'_>) -> Vec<String> {
    let c = record.cwm;
    (0..c.species_count())
        .map(|k| {
            format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                record.time.trunc() as i64,
                k,
                c.n_ind_vec[k],
                MISSING,
                c.height_vec[k],
                c.hmat_vec[k],
                c.canopy_area_vec[k],
                c.basal_area_vec[k],
                c.biomass_vec[k],
                c.wood_density_vec[k],
                MISSING,
                ratio(1.0, c.lma_vec[k]),
                c.p50_vec[k],
            )
        })
        .collect()
}

fn day_of_year(t: f64) -> f64 {
    (t - t.trunc()) * DAYS_PER_YEAR
}

fn time_series_row(time: f64, values: &[f64]) -> String {
    let mut line = time.to_string();
    for v in values {
        line.push('\t');
        line.push_str(&v.to_string());
    }
    line
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// The five tables written for a patch and for the ecosystem
struct TableSet {
    emergent: BufWriter<File>,
    cwm_avg: BufWriter<File>,
    cwm_species: BufWriter<File>,
    seeds: BufWriter<File>,
    basal_area: BufWriter<File>,
}

impl TableSet {
    fn create(dir: &Path, names: &OutputConfig) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut tables = Self {
            emergent: create(&dir.join(&names.emergent_props))?,
            cwm_avg: create(&dir.join(&names.cwm_avg))?,
            cwm_species: create(&dir.join(&names.cwm_per_species))?,
            seeds: create(&dir.join("seeds.txt"))?,
            basal_area: create(&dir.join("basal_area.txt"))?,
        };
        writeln!(tables.emergent, "{}", EMERGENT_HEADER)?;
        writeln!(tables.cwm_avg, "{}", CWM_HEADER)?;
        writeln!(tables.cwm_species, "{}", CWM_HEADER)?;
        Ok(tables)
    }

    fn write(&mut self, record: &StepRecord<'_>) -> Result<()> {
        writeln!(self.emergent, "{}", emergent_row(record))?;
        writeln!(self.cwm_avg, "{}", cwm_row(record))?;
        for row in cwm_species_rows(record) {
            writeln!(self.cwm_species, "{}", row)?;
        }
        writeln!(self.seeds, "{}", time_series_row(record.time, record.seed_rain))?;
        writeln!(
            self.basal_area,
            "{}",
            time_series_row(record.time, &record.cwm.basal_area_vec)
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.emergent.flush()?;
        self.cwm_avg.flush()?;
        self.cwm_species.flush()?;
        self.seeds.flush()?;
        self.basal_area.flush()
    }
}

/// One file per species and cohort variable, one line per timestep
struct CohortStreams {
    /// Indexed by species, then by variable
    streams: Vec<Vec<BufWriter<File>>>,
}

impl CohortStreams {
    fn create(dir: &Path, n_species: usize) -> Result<Self> {
        let mut streams = Vec::with_capacity(n_species);
        for k in 0..n_species {
            let files = COHORT_VARIABLES
                .iter()
                .map(|var| create(&dir.join(format!("species_{}_{}.txt", k, var))))
                .collect::<Result<Vec<_>>>()?;
            streams.push(files);
        }
        Ok(Self { streams })
    }

    fn write(&mut self, time: f64, cohorts: &[CohortRow]) -> Result<()> {
        for (k, files) in self.streams.iter_mut().enumerate() {
            for (var, file) in files.iter_mut().enumerate() {
                let values: Vec<f64> = cohorts
                    .iter()
                    .filter(|c| c.species == k)
                    .map(|c| c.value(var))
                    .collect();
                writeln!(file, "{}", time_series_row(time, &values))?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for file in self.streams.iter_mut().flatten() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Tab-separated output under `dir`, with a `Patch<i>` subdirectory per patch
pub struct TsvOutput {
    ecosystem: TableSet,
    patches: Vec<(TableSet, CohortStreams)>,
}

impl TsvOutput {
    /// Create every file up front; patch files only if `names.patch_files`
    pub fn create<P: AsRef<Path>>(
        dir: P,
        names: &OutputConfig,
        n_patches: usize,
        n_species: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let ecosystem = TableSet::create(dir, names)?;

        let mut patches = Vec::new();
        if names.patch_files {
            for i in 0..n_patches {
                let patch_dir = dir.join(format!("Patch{}", i));
                let tables = TableSet::create(&patch_dir, names)?;
                let streams = CohortStreams::create(&patch_dir, n_species)?;
                patches.push((tables, streams));
            }
        }

        Ok(Self { ecosystem, patches })
    }
}

impl OutputSink for TsvOutput {
    fn wants_cohorts(&self) -> bool {
        !self.patches.is_empty()
    }

    fn write_patch(&mut self, record: &StepRecord<'_>, cohorts: &[CohortRow]) -> Result<()> {
        let Some(id) = record.patch else {
            return Ok(());
        };
        if let Some((tables, streams)) = self.patches.get_mut(id) {
            tables.write(record)?;
            streams.write(record.time, cohorts)?;
        }
        Ok(())
    }

    fn write_ecosystem(&mut self, record: &StepRecord<'_>) -> Result<()> {
        self.ecosystem.write(record)
    }

    fn finish(&mut self) -> Result<()> {
        self.ecosystem.flush()?;
        for (tables, streams) in &mut self.patches {
            tables.flush()?;
            streams.flush()?;
        }
        Ok(())
    }
}

/// An owned copy of a [`StepRecord`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStep {
    pub patch: Option<usize>,
    pub time: f64,
    pub cwm: Cwm,
    pub props: EmergentProps,
    pub seed_rain: Vec<f64>,
    pub cohorts: Vec<CohortRow>,
}

impl RecordedStep {
    fn from_record(record: &StepRecord<'_>, cohorts: &[CohortRow]) -> Self {
        Self {
            patch: record.patch,
            time: record.time,
            cwm: record.cwm.clone(),
            props: *record.props,
            seed_rain: record.seed_rain.to_vec(),
            cohorts: cohorts.to_vec(),
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<RecordedStep>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patch_records(&self, patch: usize) -> impl Iterator<Item = &RecordedStep> {
        self.records.iter().filter(move |r| r.patch == Some(patch))
    }

    pub fn ecosystem_records(&self) -> impl Iterator<Item = &RecordedStep> {
        self.records.iter().filter(|r| r.patch.is_none())
    }
}

impl OutputSink for MemorySink {
    fn write_patch(&mut self, record: &StepRecord<'_>, cohorts: &[CohortRow]) -> Result<()> {
        self.records.push(RecordedStep::from_record(record, cohorts));
        Ok(())
    }

    fn write_ecosystem(&mut self, record: &StepRecord<'_>) -> Result<()> {
        self.records.push(RecordedStep::from_record(record, &[]));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn wants_cohorts(&self) -> bool {
        false
    }

    fn write_patch(&mut self, _: &StepRecord<'_>, _: &[CohortRow]) -> Result<()> {
        Ok(())
    }

    fn write_ecosystem(&mut self, _: &StepRecord<'_>) -> Result<()> {
        Ok(())
    }
}

/// Manifest written next to the outputs of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub version: String,
    pub started: DateTime<Utc>,
    pub seed: u64,
    pub n_patches: usize,
    pub species: Vec<String>,
    pub config_file: PathBuf,
}

impl RunInfo {
    pub fn new(config: &Config, seed: u64, species: Vec<String>) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            started: Utc::now(),
            seed,
            n_patches: config.simulation.n_patches,
            species,
            config_file: PathBuf::from("config.yaml"),
        }
    }

    /// Write `run_info.json` and a copy of the config into `dir`
    pub fn write<P: AsRef<Path>>(&self, dir: P, config: &Config) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join("run_info.json"), json)?;
        let yaml = serde_yaml::to_string(config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(dir.join(&self.config_file), yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> (Cwm, EmergentProps) {
        let mut cwm = Cwm::new(2);
        cwm.n_ind = 3.0;
        cwm.lma = 0.25;
        cwm.gs = 0.1;
        cwm.n_ind_vec = vec![1.0, 2.0];
        cwm.lma_vec = vec![0.5, 0.0];
        cwm.basal_area_vec = vec![0.01, 0.02];
        let props = EmergentProps {
            gpp: 0.73,
            leaf_mass: 2.0,
            croot_mass: 1.0,
            froot_mass: 0.5,
            trans: 365.0,
            lai: 3.0,
            ..Default::default()
        };
        (cwm, props)
    }

    #[test]
    fn test_emergent_row_units() {
        let (cwm, props) = sample();
        let seeds = [0.0, 0.0];
        let record = StepRecord {
            patch: None,
            time: 1001.5,
            cwm: &cwm,
            props: &props,
            seed_rain: &seeds,
        };
        let row = emergent_row(&record);
        let cols: Vec<f64> = row.split('\t').map(|c| c.parse().unwrap()).collect();

        assert_eq!(cols.len(), 13);
        assert_eq!(cols[0], 1001.0);
        assert_eq!(cols[1], 182.5);
        assert!((cols[2] - 1.0).abs() < 1e-12);
        assert_eq!(cols[5], 1000.0);
        assert_eq!(cols[9], 750.0);
        assert_eq!(cols[10], 0.1);
        assert_eq!(cols[11], 1.0);
        assert_eq!(cols[12], 3.0);
    }

    #[test]
    fn test_cwm_rows() {
        let (cwm, props) = sample();
        let seeds = [0.0, 0.0];
        let record = StepRecord {
            patch: Some(0),
            time: 1000.0,
            cwm: &cwm,
            props: &props,
            seed_rain: &seeds,
        };

        let row = cwm_row(&record);
        assert!(row.starts_with("1000\t-9999\t3\t-9999"));
        assert!(row.contains("\t4\t"));

        let rows = cwm_species_rows(&record);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("1000\t0\t1"));
        // zero LMA gives a zero SLA rather than inf
        assert!(rows[1].contains("\t-9999\t0\t"));
    }

    #[test]
    fn test_tsv_output_files() {
        let dir = tempdir().unwrap();
        let names = OutputConfig::default();
        let (cwm, props) = sample();
        let seeds = [0.5, 0.25];

        let mut out = TsvOutput::create(dir.path(), &names, 1, 2).unwrap();
        let record = StepRecord {
            patch: Some(0),
            time: 1000.0,
            cwm: &cwm,
            props: &props,
            seed_rain: &seeds,
        };
        let rows = vec![CohortRow {
            species: 1,
            size: 0.01,
            density: 1.0,
            height: 0.75,
            lai: 1.0,
            mortality: 0.02,
            seed_pool: 0.0,
            rgr: 0.1,
            gpp: 0.5,
        }];
        out.write_patch(&record, &rows).unwrap();
        out.write_ecosystem(&StepRecord { patch: None, ..record }).unwrap();
        out.finish().unwrap();

        let eco = fs::read_to_string(dir.path().join(&names.emergent_props)).unwrap();
        assert_eq!(eco.lines().count(), 2);
        assert_eq!(eco.lines().next().unwrap(), EMERGENT_HEADER);

        let spp = fs::read_to_string(dir.path().join(&names.cwm_per_species)).unwrap();
        assert_eq!(spp.lines().count(), 3);

        let seeds = fs::read_to_string(dir.path().join("Patch0/seeds.txt")).unwrap();
        assert_eq!(seeds.trim_end(), "1000\t0.5\t0.25");

        let heights = fs::read_to_string(dir.path().join("Patch0/species_1_height.txt")).unwrap();
        assert_eq!(heights.trim_end(), "1000\t0.75");
        let empty = fs::read_to_string(dir.path().join("Patch0/species_0_height.txt")).unwrap();
        assert_eq!(empty.trim_end(), "1000");
    }

    #[test]
    fn test_no_patch_files() {
        let dir = tempdir().unwrap();
        let mut names = OutputConfig::default();
        names.patch_files = false;

        let out = TsvOutput::create(dir.path(), &names, 3, 1).unwrap();
        assert!(!out.wants_cohorts());
        assert!(!dir.path().join("Patch0").exists());
    }

    #[test]
    fn test_run_info() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let info = RunInfo::new(&config, 7, vec!["a".to_string()]);
        info.write(dir.path(), &config).unwrap();

        let json = fs::read_to_string(dir.path().join("run_info.json")).unwrap();
        let loaded: RunInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.seed, 7);
        assert!(Config::from_file(dir.path().join("config.yaml")).is_ok());
    }
}
