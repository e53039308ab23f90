use csv::WriterBuilder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::constants::OUTPUT_COLUMNS;
use crate::error::Result;
use crate::time_utils::{format_timestamp, Timestamp};
use crate::types::UserRecord;

/// Write the final table to `path`.
///
/// Rows go to a sibling temporary file which is renamed into place once
/// complete, so a failed write never leaves a partial table behind.
#[instrument(skip_all, fields(rows = records.len(), path = %path.display()))]
pub fn write_table(records: &[UserRecord], path: &Path, delimiter: u8) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    let result = write_to(records, &tmp_path, delimiter).and_then(|_| {
        fs::rename(&tmp_path, path)?;
        Ok(())
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result?;

    info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(path.to_path_buf())
}

/// Write the table to any writer, header first.
pub fn write_records<W: Write>(records: &[UserRecord], writer: W, delimiter: u8) -> Result<()> {
    let mut wtr = WriterBuilder::new().delimiter(delimiter).from_writer(writer);
    wtr.write_record(OUTPUT_COLUMNS)?;
    for record in records {
        wtr.write_record(to_fields(record))?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_to(records: &[UserRecord], path: &Path, delimiter: u8) -> Result<()> {
    let file = fs::File::create(path)?;
    write_records(records, file, delimiter)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn to_fields(r: &UserRecord) -> [String; 17] {
    [
        text(&r.user_id),
        time(&r.account_signup_time),
        time(&r.pro_subscription_signup_time),
        text(&r.first_recording_id),
        time(&r.first_recording_time),
        text(&r.first_recording_activity_type),
        num(r.first_recording_calories),
        num(r.first_recording_duration),
        num(r.first_recording_total_time_seconds),
        time(&r.first_recording_updated_time),
        num(r.first_recording_moving_time_seconds),
        num(r.first_recording_avg_pace),
        num(r.first_recording_avg_speed),
        num(r.first_recording_elevation_gain),
        num(r.first_recording_elevation_loss),
        r.invalid_first_recording_date_flag.to_string(),
        num(r.first_recording_duration_in_hours),
    ]
}

fn text(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn time(v: &Option<Timestamp>) -> String {
    v.as_ref().map(format_timestamp).unwrap_or_default()
}

fn num(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}
