use tracing::{info, instrument};

use crate::observability::metrics;
use crate::time_utils::hours_between;
use crate::types::{UnpackedRow, UserRecord};

/// Compute pace, speed, the invalid-date flag and signup-to-first-recording
/// hours, producing the final record shape. Pure: no row is dropped and no
/// division ever fails; undefined results are null.
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn derive(rows: Vec<UnpackedRow>) -> Vec<UserRecord> {
    info!("Deriving recording metrics");
    let records: Vec<UserRecord> = rows.into_iter().map(derive_row).collect();

    let flagged = records.iter().filter(|r| r.invalid_first_recording_date_flag).count();
    metrics::derive::invalid_dates_flagged(flagged);
    info!("Derived {} records ({} with first recording before signup)", records.len(), flagged);
    records
}

pub fn derive_row(unpacked: UnpackedRow) -> UserRecord {
    let UnpackedRow { row, metrics } = unpacked;
    let signup = row.account_signup_time;
    let first = row.first_recording;

    let first_time = first.as_ref().and_then(|f| f.recording_time);
    let (invalid_flag, hours) = match (signup, first_time) {
        (Some(signup), Some(first_time)) => {
            (first_time < signup, Some(hours_between(&signup, &first_time)))
        }
        _ => (false, None),
    };

    let (recording_id, activity_type) = match first {
        Some(f) => (f.recording_id, f.activity_type),
        None => (None, None),
    };

    UserRecord {
        user_id: row.user_id,
        account_signup_time: signup,
        pro_subscription_signup_time: row.pro_subscription_signup_time,
        first_recording_id: recording_id,
        first_recording_time: first_time,
        first_recording_activity_type: activity_type,
        first_recording_calories: metrics.calories,
        first_recording_duration: metrics.duration,
        first_recording_total_time_seconds: metrics.total_time_seconds,
        first_recording_updated_time: metrics.updated_time,
        first_recording_moving_time_seconds: metrics.moving_time_seconds,
        first_recording_avg_pace: safe_div(metrics.duration, metrics.total_distance),
        first_recording_avg_speed: safe_div(metrics.total_distance, metrics.duration),
        first_recording_elevation_gain: metrics.elevation_gain,
        first_recording_elevation_loss: metrics.elevation_loss,
        invalid_first_recording_date_flag: invalid_flag,
        first_recording_duration_in_hours: hours,
    }
}

/// `num / den`, or `None` when either side is null, the denominator is
/// zero, or the result is not finite.
pub fn safe_div(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d).filter(|v| v.is_finite()),
        _ => None,
    }
}
