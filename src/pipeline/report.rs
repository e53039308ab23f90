use serde::Serialize;
use std::fmt;

/// Row-scoped incident found while building the dataset. These never abort
/// a run; they are collected and surfaced at the end.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// Recording whose user id matches no account; the row was dropped
    OrphanRecording {
        line: usize,
        user_id: Option<String>,
        recording_id: Option<String>,
    },
    /// Payload that could not be parsed; its columns were left null
    MalformedPayload {
        user_id: Option<String>,
        recording_id: Option<String>,
        reason: String,
    },
    /// Timestamp cell that could not be parsed; the value was left null
    UnparseableTimestamp {
        user_id: Option<String>,
        column: String,
        value: String,
    },
    /// Metric value nulled by an outlier rule
    OutlierNulled {
        user_id: Option<String>,
        column: String,
        activity_type: String,
        value: f64,
        max_value: f64,
    },
}

/// Null count for one output column
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NullRate {
    pub column: String,
    pub null_count: usize,
    pub total: usize,
    /// Columns with zero tolerance fail the run on any null
    pub enforced: bool,
}

impl NullRate {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.null_count as f64 / self.total as f64
        }
    }
}

/// Run-scoped structural problem in the output table
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    DuplicateUserId { user_id: String, occurrences: usize },
    DuplicateRecordingId { recording_id: String, occurrences: usize },
    NullUserId { count: usize },
    NullSignupTime { count: usize },
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::DuplicateUserId { user_id, occurrences } => {
                write!(f, "user_id '{}' appears {} times", user_id, occurrences)
            }
            IntegrityViolation::DuplicateRecordingId { recording_id, occurrences } => {
                write!(f, "first_recording_id '{}' appears {} times", recording_id, occurrences)
            }
            IntegrityViolation::NullUserId { count } => {
                write!(f, "{} record(s) have no user_id", count)
            }
            IntegrityViolation::NullSignupTime { count } => {
                write!(f, "{} record(s) have no account_signup_time", count)
            }
        }
    }
}

/// Everything a run found worth telling the operator about
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataQualityReport {
    pub findings: Vec<Finding>,
    pub null_rates: Vec<NullRate>,
    pub integrity_violations: Vec<IntegrityViolation>,
}

impl DataQualityReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn orphan_count(&self) -> usize {
        self.count(|f| matches!(f, Finding::OrphanRecording { .. }))
    }

    pub fn malformed_payload_count(&self) -> usize {
        self.count(|f| matches!(f, Finding::MalformedPayload { .. }))
    }

    pub fn unparseable_timestamp_count(&self) -> usize {
        self.count(|f| matches!(f, Finding::UnparseableTimestamp { .. }))
    }

    pub fn outlier_count(&self) -> usize {
        self.count(|f| matches!(f, Finding::OutlierNulled { .. }))
    }

    fn count(&self, pred: impl Fn(&Finding) -> bool) -> usize {
        self.findings.iter().filter(|f| pred(f)).count()
    }
}

impl fmt::Display for DataQualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data quality report")?;
        writeln!(f, "   Orphan recordings dropped: {}", self.orphan_count())?;
        writeln!(f, "   Malformed payloads: {}", self.malformed_payload_count())?;
        writeln!(f, "   Unparseable timestamps: {}", self.unparseable_timestamp_count())?;
        writeln!(f, "   Outlier values nulled: {}", self.outlier_count())?;

        for finding in &self.findings {
            if let Finding::OutlierNulled { user_id, column, activity_type, value, max_value } = finding {
                writeln!(
                    f,
                    "     - {} {} for {} = {} (max {})",
                    user_id.as_deref().unwrap_or("<null>"),
                    column,
                    activity_type,
                    value,
                    max_value
                )?;
            }
        }

        if !self.null_rates.is_empty() {
            writeln!(f, "   Null rates:")?;
            for rate in &self.null_rates {
                writeln!(
                    f,
                    "     - {}: {}/{} ({:.1}%){}",
                    rate.column,
                    rate.null_count,
                    rate.total,
                    rate.ratio() * 100.0,
                    if rate.enforced { " [enforced]" } else { "" }
                )?;
            }
        }

        if !self.integrity_violations.is_empty() {
            writeln!(f, "   Integrity violations:")?;
            for violation in &self.integrity_violations {
                writeln!(f, "     - {}", violation)?;
            }
        }
        Ok(())
    }
}
