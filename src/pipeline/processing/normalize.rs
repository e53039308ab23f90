use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::constants;
use crate::observability::metrics;
use crate::pipeline::report::{DataQualityReport, Finding};
use crate::time_utils::{parse_timestamp, Timestamp};
use crate::types::{FirstRecording, MergedRow, NormalizedRow, RawRecording};

/// Collapse merged rows to one row per account, keeping the earliest
/// recording, and coerce the raw strings into canonical types.
///
/// The earliest recording is the one with the minimum parseable
/// `recording_time`; ties go to the recording that appears first in the
/// recordings file. Output order follows the users file.
#[instrument(skip_all, fields(rows = merged.len()))]
pub fn normalize(merged: Vec<MergedRow>, report: &mut DataQualityReport) -> Vec<NormalizedRow> {
    info!("Selecting first recording per account");

    let mut groups: BTreeMap<usize, Vec<MergedRow>> = BTreeMap::new();
    for row in merged {
        groups.entry(row.account_index).or_default().push(row);
    }

    let rows: Vec<NormalizedRow> = groups
        .into_values()
        .filter_map(|group| normalize_account(group, report))
        .collect();

    metrics::normalize::rows_normalized(rows.len());
    info!("Normalized {} account rows", rows.len());
    rows
}

fn normalize_account(group: Vec<MergedRow>, report: &mut DataQualityReport) -> Option<NormalizedRow> {
    let mut group = group.into_iter();
    let head = group.next()?;
    let user_id = head.user_id.clone();

    let account_signup_time = coerce_timestamp(
        head.signup_time.as_deref(),
        constants::ACCOUNT_SIGNUP_TIME,
        &user_id,
        report,
    );
    let pro_subscription_signup_time = coerce_timestamp(
        head.pro_subscription_time.as_deref(),
        constants::PRO_SUBSCRIPTION_SIGNUP_TIME,
        &user_id,
        report,
    );

    let recordings = std::iter::once(head.recording)
        .chain(group.map(|row| row.recording))
        .flatten();

    let mut first: Option<(Option<Timestamp>, RawRecording)> = None;
    for rec in recordings {
        let time = coerce_timestamp(
            rec.recording_time.as_deref(),
            constants::FIRST_RECORDING_TIME,
            &user_id,
            report,
        );
        let replace = match &first {
            None => true,
            Some((best_time, best)) => is_earlier(time, rec.line, *best_time, best.line),
        };
        if replace {
            first = Some((time, rec));
        }
    }

    let first_recording = first.map(|(recording_time, rec)| FirstRecording {
        updated_time: coerce_timestamp(
            rec.updated_time.as_deref(),
            constants::FIRST_RECORDING_UPDATED_TIME,
            &user_id,
            report,
        ),
        recording_id: rec.recording_id,
        recording_time,
        activity_type: rec.activity_type,
        payload: rec.payload,
    });

    Some(NormalizedRow {
        user_id,
        account_signup_time,
        pro_subscription_signup_time,
        first_recording,
    })
}

/// Ordering for "first": any parsed time beats a null one, then earlier
/// time, then earlier line in the recordings file.
fn is_earlier(time: Option<Timestamp>, line: usize, best_time: Option<Timestamp>, best_line: usize) -> bool {
    match (time, best_time) {
        (Some(t), Some(b)) => t < b || (t == b && line < best_line),
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => line < best_line,
    }
}

fn coerce_timestamp(
    raw: Option<&str>,
    column: &str,
    user_id: &Option<String>,
    report: &mut DataQualityReport,
) -> Option<Timestamp> {
    let raw = raw?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        warn!(
            user_id = user_id.as_deref().unwrap_or("<null>"),
            column,
            value = raw,
            "Unparseable timestamp left null"
        );
        report.push(Finding::UnparseableTimestamp {
            user_id: user_id.clone(),
            column: column.to_string(),
            value: raw.to_string(),
        });
    }
    parsed
}
