pub mod rules;

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ValidationConfig;
use crate::constants;
use crate::error::{DatasetError, Result};
use crate::observability::metrics;
use crate::pipeline::report::{DataQualityReport, Finding, IntegrityViolation, NullRate};
use crate::types::UserRecord;

pub use rules::{OutlierRule, RuleSet, RuleUnit};

/// Thresholds for the structural checks run after outlier scrubbing
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    pub null_rate_columns: Vec<String>,
    pub max_duplicate_user_ids: usize,
    pub max_null_user_ids: usize,
    pub max_null_signup_times: usize,
    pub fail_on_duplicate_recording_id: bool,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        QualityGateConfig::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for QualityGateConfig {
    fn from(v: &ValidationConfig) -> Self {
        Self {
            null_rate_columns: v.null_rate_columns.clone(),
            max_duplicate_user_ids: v.max_duplicate_user_ids,
            max_null_user_ids: v.max_null_user_ids,
            max_null_signup_times: v.max_null_signup_times,
            fail_on_duplicate_recording_id: v.fail_on_duplicate_recording_id,
        }
    }
}

/// Applies the outlier rules, then checks primary-key uniqueness and null
/// rates. Construction validates everything up front so a bad ruleset fails
/// before any row is touched.
#[derive(Debug, Clone)]
pub struct QualityGate {
    rules: RuleSet,
    config: QualityGateConfig,
}

impl QualityGate {
    pub fn new(rules: RuleSet, activity_types: &[String], config: QualityGateConfig) -> Result<Self> {
        rules.validate(activity_types)?;
        for column in &config.null_rate_columns {
            if !constants::is_output_column(column) {
                return Err(DatasetError::Config(format!(
                    "null_rate_columns references unknown column '{}'",
                    column
                )));
            }
        }
        Ok(Self { rules, config })
    }

    pub fn from_validation_config(rules: RuleSet, validation: &ValidationConfig) -> Result<Self> {
        Self::new(rules, &validation.activity_types, QualityGateConfig::from(validation))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run the full gate. Row-scoped results land in `report`; a structural
    /// violation over its threshold returns `DatasetError::Integrity`.
    #[instrument(skip_all, fields(rows = records.len(), rules = self.rules.rules.len()))]
    pub fn apply(&self, mut records: Vec<UserRecord>, report: &mut DataQualityReport) -> Result<Vec<UserRecord>> {
        info!("Running quality gate");
        let nulled = self.apply_outlier_rules(&mut records, report);
        info!("Outlier rules nulled {} values", nulled);

        report.null_rates = self.null_rates(&records);
        for rate in &report.null_rates {
            info!(
                column = %rate.column,
                nulls = rate.null_count,
                total = rate.total,
                "Null rate {:.1}%",
                rate.ratio() * 100.0
            );
        }

        let violations = self.integrity_violations(&records);
        let fatal = self.fatal_reasons(&records, &violations);
        report.integrity_violations = violations;

        if !fatal.is_empty() {
            for reason in &fatal {
                error!("Quality gate failed: {}", reason);
            }
            metrics::quality_gate::run_failed();
            return Err(DatasetError::Integrity(fatal.join("; ")));
        }

        metrics::quality_gate::run_passed();
        Ok(records)
    }

    /// Apply every rule in order. Returns how many values were nulled.
    /// Already-null values are never matched, so re-running is a no-op.
    pub fn apply_outlier_rules(&self, records: &mut [UserRecord], report: &mut DataQualityReport) -> usize {
        let mut nulled = 0;
        for rule in &self.rules.rules {
            let threshold = rule.threshold();
            let column = rule.metric.column_name();
            let mut hits = 0;

            for record in records.iter_mut() {
                if record.first_recording_activity_type.as_deref() != Some(rule.activity_type.as_str()) {
                    continue;
                }
                let user_id = record.user_id.clone();
                let slot = record.metric_mut(rule.metric);
                if let Some(value) = *slot {
                    if value > threshold {
                        *slot = None;
                        hits += 1;
                        debug!(user_id = user_id.as_deref().unwrap_or("<null>"), column, value, "Outlier nulled");
                        report.push(Finding::OutlierNulled {
                            user_id,
                            column: column.to_string(),
                            activity_type: rule.activity_type.clone(),
                            value,
                            max_value: threshold,
                        });
                    }
                }
            }

            if hits > 0 {
                warn!("Rule '{}' nulled {} value(s)", rule, hits);
            }
            metrics::quality_gate::outliers_nulled(column, &rule.activity_type, hits);
            nulled += hits;
        }
        nulled
    }

    fn null_rates(&self, records: &[UserRecord]) -> Vec<NullRate> {
        let mut columns: Vec<&str> = vec![constants::USER_ID, constants::ACCOUNT_SIGNUP_TIME];
        for c in &self.config.null_rate_columns {
            if !columns.contains(&c.as_str()) {
                columns.push(c);
            }
        }

        columns
            .into_iter()
            .map(|column| NullRate {
                column: column.to_string(),
                null_count: records
                    .iter()
                    .filter(|r| r.is_null(column).unwrap_or(false))
                    .count(),
                total: records.len(),
                enforced: column == constants::USER_ID || column == constants::ACCOUNT_SIGNUP_TIME,
            })
            .collect()
    }

    fn integrity_violations(&self, records: &[UserRecord]) -> Vec<IntegrityViolation> {
        let mut violations = Vec::new();

        for (user_id, occurrences) in duplicates(records.iter().filter_map(|r| r.user_id.as_deref())) {
            violations.push(IntegrityViolation::DuplicateUserId { user_id, occurrences });
        }
        // Rows of a duplicated account share their first recording; only a
        // recording claimed by different user ids is a repeat of its own.
        let claims: BTreeSet<(&str, Option<&str>)> = records
            .iter()
            .filter_map(|r| r.first_recording_id.as_deref().map(|id| (id, r.user_id.as_deref())))
            .collect();
        for (recording_id, occurrences) in duplicates(claims.into_iter().map(|(id, _)| id)) {
            violations.push(IntegrityViolation::DuplicateRecordingId { recording_id, occurrences });
        }

        let null_users = records.iter().filter(|r| r.user_id.is_none()).count();
        if null_users > 0 {
            violations.push(IntegrityViolation::NullUserId { count: null_users });
        }
        let null_signups = records.iter().filter(|r| r.account_signup_time.is_none()).count();
        if null_signups > 0 {
            violations.push(IntegrityViolation::NullSignupTime { count: null_signups });
        }
        violations
    }

    fn fatal_reasons(&self, records: &[UserRecord], violations: &[IntegrityViolation]) -> Vec<String> {
        let mut reasons = Vec::new();

        // Extra rows beyond the first for each duplicated id
        let extra_user_rows: usize = violations
            .iter()
            .filter_map(|v| match v {
                IntegrityViolation::DuplicateUserId { occurrences, .. } => Some(occurrences - 1),
                _ => None,
            })
            .sum();
        if extra_user_rows > self.config.max_duplicate_user_ids {
            reasons.push(format!(
                "user_id is not unique ({} duplicate row(s), max {})",
                extra_user_rows, self.config.max_duplicate_user_ids
            ));
        }

        if self.config.fail_on_duplicate_recording_id {
            let dup_recordings = violations
                .iter()
                .filter(|v| matches!(v, IntegrityViolation::DuplicateRecordingId { .. }))
                .count();
            if dup_recordings > 0 {
                reasons.push(format!("first_recording_id is not unique ({} id(s) repeated)", dup_recordings));
            }
        }

        let null_users = records.iter().filter(|r| r.user_id.is_none()).count();
        if null_users > self.config.max_null_user_ids {
            reasons.push(format!("{} record(s) have no user_id", null_users));
        }
        let null_signups = records.iter().filter(|r| r.account_signup_time.is_none()).count();
        if null_signups > self.config.max_null_signup_times {
            reasons.push(format!("{} record(s) have no account_signup_time", null_signups));
        }
        reasons
    }
}

/// Values that occur more than once, with their counts, in sorted order
fn duplicates<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(v, n)| (v.to_string(), n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::parse_timestamp;
    use crate::types::MetricField;

    fn gate() -> QualityGate {
        QualityGate::from_validation_config(RuleSet::reference(), &ValidationConfig::default()).unwrap()
    }

    fn record(user: &str, activity: &str, total_time: Option<f64>, speed: Option<f64>) -> UserRecord {
        UserRecord {
            user_id: Some(user.to_string()),
            account_signup_time: parse_timestamp("2017-01-01"),
            pro_subscription_signup_time: None,
            first_recording_id: Some(format!("rec-{}", user)),
            first_recording_time: parse_timestamp("2017-01-02"),
            first_recording_activity_type: Some(activity.to_string()),
            first_recording_calories: Some(300.0),
            first_recording_duration: Some(1000.0),
            first_recording_total_time_seconds: total_time,
            first_recording_updated_time: None,
            first_recording_moving_time_seconds: None,
            first_recording_avg_pace: None,
            first_recording_avg_speed: speed,
            first_recording_elevation_gain: None,
            first_recording_elevation_loss: None,
            invalid_first_recording_date_flag: false,
            first_recording_duration_in_hours: Some(24.0),
        }
    }

    const HOUR: f64 = 3_600.0;

    #[test]
    fn outlier_examples() {
        let mut records = vec![
            record("hike20", "Hiking", Some(20.0 * HOUR), Some(8.0)),
            record("hike17", "Hiking", Some(17.0 * HOUR), Some(3.0)),
            record("pack20", "Backpacking", Some(20.0 * HOUR), Some(8.0)),
            record("bike", "Biking", Some(20.0 * HOUR), Some(8.0)),
        ];
        let mut report = DataQualityReport::new();
        let nulled = gate().apply_outlier_rules(&mut records, &mut report);

        assert_eq!(records[0].first_recording_total_time_seconds, None);
        assert_eq!(records[0].first_recording_avg_speed, None);
        assert_eq!(records[1].first_recording_total_time_seconds, Some(17.0 * HOUR));
        assert_eq!(records[1].first_recording_avg_speed, Some(3.0));
        assert_eq!(records[2].first_recording_total_time_seconds, Some(20.0 * HOUR));
        assert_eq!(records[2].first_recording_avg_speed, Some(8.0));
        assert_eq!(records[3].first_recording_total_time_seconds, Some(20.0 * HOUR));
        assert_eq!(records[3].first_recording_avg_speed, Some(8.0));
        assert_eq!(nulled, 2);
        assert_eq!(report.outlier_count(), 2);
    }

    #[test]
    fn only_targeted_fields_change() {
        let original = record("hike20", "Hiking", Some(20.0 * HOUR), Some(8.0));
        let mut records = vec![original.clone()];
        let mut report = DataQualityReport::new();
        gate().apply_outlier_rules(&mut records, &mut report);

        let mut expected = original;
        expected.first_recording_total_time_seconds = None;
        expected.first_recording_avg_speed = None;
        assert_eq!(records[0], expected);
    }

    #[test]
    fn backpacking_over_ten_days_is_nulled() {
        let mut records = vec![record("pack", "Backpacking", Some(11.0 * 24.0 * HOUR), None)];
        let mut report = DataQualityReport::new();
        gate().apply_outlier_rules(&mut records, &mut report);
        assert_eq!(records[0].first_recording_total_time_seconds, None);
    }

    #[test]
    fn applying_twice_matches_applying_once() {
        let mut records = vec![
            record("a", "Hiking", Some(20.0 * HOUR), Some(8.0)),
            record("b", "Hiking", Some(HOUR), Some(2.0)),
            record("c", "Backpacking", Some(30.0 * 24.0 * HOUR), None),
        ];
        let g = gate();
        let mut report = DataQualityReport::new();
        g.apply_outlier_rules(&mut records, &mut report);
        let once = records.clone();

        let second = g.apply_outlier_rules(&mut records, &mut report);
        assert_eq!(second, 0);
        assert_eq!(records, once);
    }

    #[test]
    fn value_equal_to_threshold_is_kept() {
        let mut records = vec![record("a", "Hiking", Some(18.0 * HOUR), Some(6.0))];
        let mut report = DataQualityReport::new();
        gate().apply_outlier_rules(&mut records, &mut report);
        assert_eq!(records[0].first_recording_total_time_seconds, Some(18.0 * HOUR));
        assert_eq!(records[0].first_recording_avg_speed, Some(6.0));
    }

    #[test]
    fn user_without_recording_is_untouched() {
        let mut r = record("none", "Hiking", None, None);
        r.first_recording_activity_type = None;
        r.first_recording_id = None;
        let mut report = DataQualityReport::new();
        let out = gate().apply(vec![r.clone()], &mut report).unwrap();
        assert_eq!(out, vec![r]);
    }

    #[test]
    fn duplicate_user_id_is_fatal() {
        let mut dup = record("u1", "Hiking", None, None);
        dup.first_recording_id = None;
        let records = vec![record("u1", "Hiking", None, None), dup, record("u2", "Biking", None, None)];
        let mut report = DataQualityReport::new();

        let err = gate().apply(records, &mut report).unwrap_err();
        assert!(matches!(err, DatasetError::Integrity(_)));
        assert!(report.integrity_violations.contains(&IntegrityViolation::DuplicateUserId {
            user_id: "u1".to_string(),
            occurrences: 2,
        }));
    }

    #[test]
    fn duplicate_threshold_can_be_relaxed() {
        let dup = record("u1", "Hiking", None, None);
        let config = QualityGateConfig {
            max_duplicate_user_ids: 1,
            ..QualityGateConfig::default()
        };
        let g = QualityGate::new(RuleSet::reference(), &ValidationConfig::default().activity_types, config).unwrap();
        let mut report = DataQualityReport::new();

        let out = g.apply(vec![record("u1", "Hiking", None, None), dup], &mut report).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(report.integrity_violations.len(), 1);
    }

    #[test]
    fn null_user_id_is_fatal() {
        let mut r = record("x", "Hiking", None, None);
        r.user_id = None;
        let mut report = DataQualityReport::new();
        let err = gate().apply(vec![r], &mut report).unwrap_err();
        assert!(err.to_string().contains("no user_id"));
    }

    #[test]
    fn null_signup_is_fatal() {
        let mut r = record("x", "Hiking", None, None);
        r.account_signup_time = None;
        let mut report = DataQualityReport::new();
        assert!(gate().apply(vec![r], &mut report).is_err());
    }

    #[test]
    fn duplicate_first_recording_id_is_fatal_by_default() {
        let mut b = record("b", "Hiking", None, None);
        b.first_recording_id = Some("rec-a".to_string());
        let mut report = DataQualityReport::new();
        let err = gate().apply(vec![record("a", "Hiking", None, None), b], &mut report).unwrap_err();
        assert!(err.to_string().contains("first_recording_id"));
    }

    #[test]
    fn null_rates_are_reported() {
        let mut none = record("n", "Hiking", None, None);
        none.first_recording_id = None;
        none.first_recording_time = None;
        let mut report = DataQualityReport::new();
        gate()
            .apply(vec![record("a", "Hiking", Some(HOUR), Some(2.0)), none], &mut report)
            .unwrap();

        let rate = |c: &str| report.null_rates.iter().find(|r| r.column == c).cloned().unwrap();
        assert_eq!(rate(constants::USER_ID).null_count, 0);
        assert!(rate(constants::USER_ID).enforced);
        assert_eq!(rate(constants::FIRST_RECORDING_ID).null_count, 1);
        assert!(!rate(constants::FIRST_RECORDING_ID).enforced);
        assert_eq!(rate(constants::FIRST_RECORDING_TOTAL_TIME_SECONDS).null_count, 1);
    }

    #[test]
    fn unknown_null_rate_column_fails_at_startup() {
        let config = QualityGateConfig {
            null_rate_columns: vec!["favorite_color".to_string()],
            ..QualityGateConfig::default()
        };
        let err = QualityGate::new(RuleSet::reference(), &[], config).unwrap_err();
        assert!(matches!(err, DatasetError::Config(_)));
    }

    #[test]
    fn operators_can_add_rules() {
        let mut rules = RuleSet::reference();
        rules.rules.push(OutlierRule {
            metric: MetricField::Calories,
            activity_type: "Biking".to_string(),
            max_value: 250.0,
            unit: None,
            description: Some("power meter glitch".to_string()),
        });
        let g = QualityGate::from_validation_config(rules, &ValidationConfig::default()).unwrap();
        let mut records = vec![record("bike", "Biking", None, None)];
        let mut report = DataQualityReport::new();
        g.apply_outlier_rules(&mut records, &mut report);
        assert_eq!(records[0].first_recording_calories, None);
    }
}
