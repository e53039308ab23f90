use serde::{Deserialize, Serialize};

use crate::time_utils::Timestamp;

/// Raw recording fields carried through the join, still as source strings
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecording {
    /// Zero-based data line in the recordings file, used to break ties
    pub line: usize,
    pub recording_id: Option<String>,
    pub recording_time: Option<String>,
    pub activity_type: Option<String>,
    pub updated_time: Option<String>,
    pub payload: Option<String>,
}

/// One (account, recording) pair produced by the left join
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    /// Zero-based data line in the users file; duplicated accounts stay distinct
    pub account_index: usize,
    pub user_id: Option<String>,
    pub signup_time: Option<String>,
    pub pro_subscription_time: Option<String>,
    pub recording: Option<RawRecording>,
}

/// The earliest recording chosen for an account, with coerced types
#[derive(Debug, Clone, PartialEq)]
pub struct FirstRecording {
    pub recording_id: Option<String>,
    pub recording_time: Option<Timestamp>,
    pub activity_type: Option<String>,
    pub updated_time: Option<Timestamp>,
    pub payload: Option<String>,
}

/// One row per account after deduplication
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub user_id: Option<String>,
    pub account_signup_time: Option<Timestamp>,
    pub pro_subscription_signup_time: Option<Timestamp>,
    pub first_recording: Option<FirstRecording>,
}

/// Typed values projected out of a recording payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadMetrics {
    pub calories: Option<f64>,
    pub duration: Option<f64>,
    pub total_time_seconds: Option<f64>,
    pub moving_time_seconds: Option<f64>,
    /// Only used to derive pace and speed; never written out
    pub total_distance: Option<f64>,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub updated_time: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedRow {
    pub row: NormalizedRow,
    pub metrics: PayloadMetrics,
}

/// Final output record, one per account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: Option<String>,
    pub account_signup_time: Option<Timestamp>,
    pub pro_subscription_signup_time: Option<Timestamp>,
    pub first_recording_id: Option<String>,
    pub first_recording_time: Option<Timestamp>,
    pub first_recording_activity_type: Option<String>,
    pub first_recording_calories: Option<f64>,
    pub first_recording_duration: Option<f64>,
    pub first_recording_total_time_seconds: Option<f64>,
    pub first_recording_updated_time: Option<Timestamp>,
    pub first_recording_moving_time_seconds: Option<f64>,
    pub first_recording_avg_pace: Option<f64>,
    pub first_recording_avg_speed: Option<f64>,
    pub first_recording_elevation_gain: Option<f64>,
    pub first_recording_elevation_loss: Option<f64>,
    pub invalid_first_recording_date_flag: bool,
    pub first_recording_duration_in_hours: Option<f64>,
}

/// The numeric output columns an outlier rule may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    #[serde(alias = "first_recording_calories")]
    Calories,
    #[serde(alias = "first_recording_duration")]
    Duration,
    #[serde(alias = "first_recording_total_time_seconds", alias = "total_time_seconds")]
    TotalTime,
    #[serde(alias = "first_recording_moving_time_seconds", alias = "moving_time_seconds")]
    MovingTime,
    #[serde(alias = "first_recording_avg_pace")]
    AvgPace,
    #[serde(alias = "first_recording_avg_speed")]
    AvgSpeed,
    #[serde(alias = "first_recording_elevation_gain")]
    ElevationGain,
    #[serde(alias = "first_recording_elevation_loss")]
    ElevationLoss,
}

impl MetricField {
    pub fn column_name(&self) -> &'static str {
        use crate::constants::*;
        match self {
            MetricField::Calories => FIRST_RECORDING_CALORIES,
            MetricField::Duration => FIRST_RECORDING_DURATION,
            MetricField::TotalTime => FIRST_RECORDING_TOTAL_TIME_SECONDS,
            MetricField::MovingTime => FIRST_RECORDING_MOVING_TIME_SECONDS,
            MetricField::AvgPace => FIRST_RECORDING_AVG_PACE,
            MetricField::AvgSpeed => FIRST_RECORDING_AVG_SPEED,
            MetricField::ElevationGain => FIRST_RECORDING_ELEVATION_GAIN,
            MetricField::ElevationLoss => FIRST_RECORDING_ELEVATION_LOSS,
        }
    }

    /// Fields measured in seconds accept a time unit on their rules
    pub fn is_time(&self) -> bool {
        matches!(self, MetricField::TotalTime | MetricField::MovingTime)
    }
}

impl UserRecord {
    pub fn metric_mut(&mut self, field: MetricField) -> &mut Option<f64> {
        match field {
            MetricField::Calories => &mut self.first_recording_calories,
            MetricField::Duration => &mut self.first_recording_duration,
            MetricField::TotalTime => &mut self.first_recording_total_time_seconds,
            MetricField::MovingTime => &mut self.first_recording_moving_time_seconds,
            MetricField::AvgPace => &mut self.first_recording_avg_pace,
            MetricField::AvgSpeed => &mut self.first_recording_avg_speed,
            MetricField::ElevationGain => &mut self.first_recording_elevation_gain,
            MetricField::ElevationLoss => &mut self.first_recording_elevation_loss,
        }
    }

    /// Whether the named output column is null in this record.
    /// Returns `None` for a name outside the output schema.
    pub fn is_null(&self, column: &str) -> Option<bool> {
        use crate::constants::*;
        let null = match column {
            USER_ID => self.user_id.is_none(),
            ACCOUNT_SIGNUP_TIME => self.account_signup_time.is_none(),
            PRO_SUBSCRIPTION_SIGNUP_TIME => self.pro_subscription_signup_time.is_none(),
            FIRST_RECORDING_ID => self.first_recording_id.is_none(),
            FIRST_RECORDING_TIME => self.first_recording_time.is_none(),
            FIRST_RECORDING_ACTIVITY_TYPE => self.first_recording_activity_type.is_none(),
            FIRST_RECORDING_CALORIES => self.first_recording_calories.is_none(),
            FIRST_RECORDING_DURATION => self.first_recording_duration.is_none(),
            FIRST_RECORDING_TOTAL_TIME_SECONDS => self.first_recording_total_time_seconds.is_none(),
            FIRST_RECORDING_UPDATED_TIME => self.first_recording_updated_time.is_none(),
            FIRST_RECORDING_MOVING_TIME_SECONDS => self.first_recording_moving_time_seconds.is_none(),
            FIRST_RECORDING_AVG_PACE => self.first_recording_avg_pace.is_none(),
            FIRST_RECORDING_AVG_SPEED => self.first_recording_avg_speed.is_none(),
            FIRST_RECORDING_ELEVATION_GAIN => self.first_recording_elevation_gain.is_none(),
            FIRST_RECORDING_ELEVATION_LOSS => self.first_recording_elevation_loss.is_none(),
            INVALID_FIRST_RECORDING_DATE_FLAG => false,
            FIRST_RECORDING_DURATION_IN_HOURS => self.first_recording_duration_in_hours.is_none(),
            _ => return None,
        };
        Some(null)
    }
}
