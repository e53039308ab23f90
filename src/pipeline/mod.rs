// Dataset build: load, merge, select first recordings, unpack, derive,
// validate, write

pub mod processing;
pub mod report;
pub mod sink;
pub mod source;

use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, instrument};

use crate::config::{delimiter_byte, ColumnConfig, Config};
use crate::error::Result;
use crate::observability::metrics;
use crate::types::UserRecord;
use processing::QualityGate;
use report::DataQualityReport;
use source::RawTable;

/// Result of a complete pipeline run
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub accounts: usize,
    pub recordings: usize,
    pub rows_written: usize,
    pub output_file: PathBuf,
    pub duration_secs: f64,
}

/// One configured dataset build. Holds everything a run needs; the
/// outlier ruleset is loaded and validated before construction.
pub struct Pipeline {
    users_path: PathBuf,
    recordings_path: PathBuf,
    input_delimiter: u8,
    output_path: PathBuf,
    output_delimiter: u8,
    columns: ColumnConfig,
    gate: QualityGate,
}

impl Pipeline {
    pub fn new(config: &Config, gate: QualityGate) -> Result<Self> {
        Ok(Self {
            users_path: config.input.users_path.clone(),
            recordings_path: config.input.recordings_path.clone(),
            input_delimiter: delimiter_byte(&config.input.delimiter)?,
            output_path: config.output.path.clone(),
            output_delimiter: delimiter_byte(&config.output.delimiter)?,
            columns: config.columns.clone(),
            gate,
        })
    }

    /// Build the table from in-memory sources without writing it.
    ///
    /// Every stage runs in order; row-scoped problems are collected in
    /// `report`, structural ones return an error.
    pub fn build(
        &self,
        accounts: &RawTable,
        recordings: &RawTable,
        report: &mut DataQualityReport,
    ) -> Result<Vec<UserRecord>> {
        let merged = processing::merge(accounts, recordings, &self.columns, report)?;
        let normalized = processing::normalize(merged, report);
        let unpacked = processing::unpack(normalized, report);
        let derived = processing::derive(unpacked);
        self.gate.apply(derived, report)
    }

    /// Run the full pipeline from the configured files to the output file.
    /// The output is only written when every stage succeeded.
    #[instrument(skip_all, fields(users = %self.users_path.display(), recordings = %self.recordings_path.display()))]
    pub fn run(&self, report: &mut DataQualityReport) -> Result<PipelineResult> {
        info!("🚀 Starting users dataset build");
        let started = Instant::now();

        let accounts = source::load_table("users", &self.users_path, self.input_delimiter)?;
        metrics::source::rows_loaded("users", accounts.len());
        let recordings = source::load_table("recordings", &self.recordings_path, self.input_delimiter)?;
        metrics::source::rows_loaded("recordings", recordings.len());

        let records = self.build(&accounts, &recordings, report)?;

        let output_file = sink::write_table(&records, &self.output_path, self.output_delimiter)?;
        metrics::pipeline::rows_written(records.len());

        let duration_secs = started.elapsed().as_secs_f64();
        metrics::pipeline::duration(duration_secs);
        info!("✅ Dataset build finished in {:.2}s", duration_secs);

        Ok(PipelineResult {
            accounts: accounts.len(),
            recordings: recordings.len(),
            rows_written: records.len(),
            output_file,
            duration_secs,
        })
    }
}
