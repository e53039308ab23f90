use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{DatasetError, Result};
use crate::types::MetricField;

/// Unit a rule's `max_value` is expressed in. Only meaningful for metrics
/// stored in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl RuleUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            RuleUnit::Seconds => 1.0,
            RuleUnit::Minutes => 60.0,
            RuleUnit::Hours => 3_600.0,
            RuleUnit::Days => 86_400.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleUnit::Seconds => "seconds",
            RuleUnit::Minutes => "minutes",
            RuleUnit::Hours => "hours",
            RuleUnit::Days => "days",
        }
    }
}

impl fmt::Display for RuleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Null out `metric` for rows of `activity_type` whose value exceeds
/// `max_value` (scaled by `unit`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutlierRule {
    pub metric: MetricField,
    pub activity_type: String,
    pub max_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<RuleUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutlierRule {
    /// Threshold in the metric's stored unit
    pub fn threshold(&self) -> f64 {
        self.max_value * self.unit.map(|u| u.seconds()).unwrap_or(1.0)
    }
}

impl fmt::Display for OutlierRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {} > {}", self.metric.column_name(), self.activity_type, self.max_value)?;
        if let Some(unit) = self.unit {
            write!(f, " {}", unit)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    rules: Vec<OutlierRule>,
}

/// Ordered outlier rules, loaded once at run start
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub version: String,
    pub rules: Vec<OutlierRule>,
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DatasetError::Config(format!("Failed to read outlier rules '{}': {}", path.display(), e))
        })?;
        let set = Self::from_toml_str(&content)
            .map_err(|e| DatasetError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded {} outlier rules ({}) from {}", set.rules.len(), set.version, path.display());
        Ok(set)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(content)
            .map_err(|e| DatasetError::Config(format!("Invalid outlier rules: {}", e)))?;
        Ok(Self {
            version: file.version.unwrap_or_else(|| "unversioned".to_string()),
            rules: file.rules,
        })
    }

    /// The rules the dataset has always been scrubbed with.
    pub fn reference() -> Self {
        Self {
            version: "v1".to_string(),
            rules: vec![
                OutlierRule {
                    metric: MetricField::TotalTime,
                    activity_type: "Hiking".to_string(),
                    max_value: 18.0,
                    unit: Some(RuleUnit::Hours),
                    description: None,
                },
                OutlierRule {
                    metric: MetricField::TotalTime,
                    activity_type: "Backpacking".to_string(),
                    max_value: 10.0,
                    unit: Some(RuleUnit::Days),
                    description: None,
                },
                OutlierRule {
                    metric: MetricField::AvgSpeed,
                    activity_type: "Hiking".to_string(),
                    max_value: 6.0,
                    unit: None,
                    description: None,
                },
            ],
        }
    }

    /// Reject rules that could never be applied as written.
    pub fn validate(&self, activity_types: &[String]) -> Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            let at = |msg: String| DatasetError::Config(format!("outlier rule #{} ({}): {}", i + 1, rule, msg));

            if rule.activity_type.trim().is_empty() {
                return Err(at("activity_type is empty".to_string()));
            }
            if !activity_types.is_empty() && !activity_types.iter().any(|a| a == &rule.activity_type) {
                return Err(at(format!(
                    "unknown activity type '{}' (known: {})",
                    rule.activity_type,
                    activity_types.join(", ")
                )));
            }
            if !rule.max_value.is_finite() || rule.max_value < 0.0 {
                return Err(at(format!("max_value must be a non-negative number, got {}", rule.max_value)));
            }
            if rule.unit.is_some() && !rule.metric.is_time() {
                return Err(at(format!(
                    "unit is only allowed on time metrics, not {}",
                    rule.metric.column_name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec!["Hiking".to_string(), "Backpacking".to_string(), "Biking".to_string()]
    }

    #[test]
    fn parses_rules_file() {
        let set = RuleSet::from_toml_str(
            r#"
            version = "v2"

            [[rules]]
            metric = "total_time"
            activity_type = "Hiking"
            max_value = 18
            unit = "hours"

            [[rules]]
            metric = "first_recording_avg_speed"
            activity_type = "Hiking"
            max_value = 6
            "#,
        )
        .unwrap();

        assert_eq!(set.version, "v2");
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].metric, MetricField::TotalTime);
        assert_eq!(set.rules[0].threshold(), 64_800.0);
        assert_eq!(set.rules[1].metric, MetricField::AvgSpeed);
        assert_eq!(set.rules[1].threshold(), 6.0);
        set.validate(&known()).unwrap();
    }

    #[test]
    fn reference_matches_historic_thresholds() {
        let set = RuleSet::reference();
        let thresholds: Vec<f64> = set.rules.iter().map(|r| r.threshold()).collect();
        assert_eq!(thresholds, vec![64_800.0, 864_000.0, 6.0]);
        set.validate(&known()).unwrap();
    }

    #[test]
    fn unknown_metric_is_a_config_error() {
        let err = RuleSet::from_toml_str(
            r#"
            [[rules]]
            metric = "heart_rate"
            activity_type = "Hiking"
            max_value = 200
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::Config(_)));
    }

    #[test]
    fn unknown_activity_type_is_rejected() {
        let set = RuleSet::from_toml_str(
            r#"
            [[rules]]
            metric = "total_time"
            activity_type = "Paragliding"
            max_value = 1
            unit = "hours"
            "#,
        )
        .unwrap();
        let err = set.validate(&known()).unwrap_err();
        assert!(err.to_string().contains("Paragliding"));
    }

    #[test]
    fn unit_on_non_time_metric_is_rejected() {
        let mut set = RuleSet::reference();
        set.rules[2].unit = Some(RuleUnit::Hours);
        assert!(set.validate(&known()).is_err());
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let mut set = RuleSet::reference();
        set.rules[0].max_value = -1.0;
        assert!(set.validate(&known()).is_err());
    }

    #[test]
    fn rule_display_matches_rules_file_spelling() {
        let rules = RuleSet::reference().rules;
        assert_eq!(rules[0].to_string(), "first_recording_total_time_seconds for Hiking > 18 hours");
        assert_eq!(rules[1].to_string(), "first_recording_total_time_seconds for Backpacking > 10 days");
        assert_eq!(rules[2].to_string(), "first_recording_avg_speed for Hiking > 6");
    }
}
