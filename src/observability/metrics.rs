//! Run metrics for the dataset build
//!
//! Stages record through the `metrics` facade. When a recorder has been
//! installed with [`init`], the rendered Prometheus text can be written out
//! at the end of a run for a textfile collector to pick up.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::Result;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Source metrics
    SourceRowsLoaded,

    // Merge metrics
    MergeRowsMerged,
    MergeOrphansDropped,

    // Normalize metrics
    NormalizeRowsNormalized,

    // Unpack metrics
    UnpackPayloadsUnpacked,
    UnpackPayloadsMalformed,

    // Derive metrics
    DeriveInvalidDatesFlagged,

    // Quality Gate metrics
    QualityGateOutliersNulled,
    QualityGateRunsPassed,
    QualityGateRunsFailed,

    // Pipeline metrics
    PipelineRowsWritten,
    PipelineDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourceRowsLoaded => "users_dataset_source_rows_loaded_total",
            MetricName::MergeRowsMerged => "users_dataset_merge_rows_total",
            MetricName::MergeOrphansDropped => "users_dataset_merge_orphans_dropped_total",
            MetricName::NormalizeRowsNormalized => "users_dataset_normalize_rows_total",
            MetricName::UnpackPayloadsUnpacked => "users_dataset_unpack_payloads_total",
            MetricName::UnpackPayloadsMalformed => "users_dataset_unpack_payloads_malformed_total",
            MetricName::DeriveInvalidDatesFlagged => "users_dataset_derive_invalid_dates_total",
            MetricName::QualityGateOutliersNulled => "users_dataset_quality_gate_outliers_nulled_total",
            MetricName::QualityGateRunsPassed => "users_dataset_quality_gate_runs_passed_total",
            MetricName::QualityGateRunsFailed => "users_dataset_quality_gate_runs_failed_total",
            MetricName::PipelineRowsWritten => "users_dataset_pipeline_rows_written_total",
            MetricName::PipelineDuration => "users_dataset_pipeline_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first call installs.
pub fn init() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
            info!("Metrics recorder installed");
        }
        Err(e) => warn!("Metrics recorder not installed: {}", e),
    }
}

/// Current exposition text, if a recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

/// Write the exposition text to `path`. No-op without a recorder.
pub fn write_snapshot(path: &Path) -> Result<()> {
    if let Some(text) = render() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        info!("Wrote metrics snapshot to {}", path.display());
    }
    Ok(())
}

// ============================================================================
// Stage metrics
// ============================================================================

pub mod source {
    use super::MetricName;

    pub fn rows_loaded(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::SourceRowsLoaded.as_str(), "table" => table.to_string())
            .increment(rows as u64);
    }
}

pub mod merge {
    use super::MetricName;

    pub fn rows_merged(rows: usize) {
        ::metrics::counter!(MetricName::MergeRowsMerged.as_str()).increment(rows as u64);
    }

    pub fn orphans_dropped(count: usize) {
        ::metrics::counter!(MetricName::MergeOrphansDropped.as_str()).increment(count as u64);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn rows_normalized(rows: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsNormalized.as_str()).increment(rows as u64);
    }
}

pub mod unpack {
    use super::MetricName;

    pub fn payloads_unpacked(count: usize) {
        ::metrics::counter!(MetricName::UnpackPayloadsUnpacked.as_str()).increment(count as u64);
    }

    pub fn payloads_malformed(count: usize) {
        ::metrics::counter!(MetricName::UnpackPayloadsMalformed.as_str()).increment(count as u64);
    }
}

pub mod derive {
    use super::MetricName;

    pub fn invalid_dates_flagged(count: usize) {
        ::metrics::counter!(MetricName::DeriveInvalidDatesFlagged.as_str()).increment(count as u64);
    }
}

pub mod quality_gate {
    use super::MetricName;

    /// Record values nulled by one outlier rule
    pub fn outliers_nulled(column: &str, activity_type: &str, count: usize) {
        ::metrics::counter!(MetricName::QualityGateOutliersNulled.as_str(),
            "column" => column.to_string(),
            "activity_type" => activity_type.to_string()
        )
        .increment(count as u64);
    }

    pub fn run_passed() {
        ::metrics::counter!(MetricName::QualityGateRunsPassed.as_str()).increment(1);
    }

    pub fn run_failed() {
        ::metrics::counter!(MetricName::QualityGateRunsFailed.as_str()).increment(1);
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn rows_written(rows: usize) {
        ::metrics::counter!(MetricName::PipelineRowsWritten.as_str()).increment(rows as u64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::PipelineDuration.as_str()).record(secs);
    }
}
