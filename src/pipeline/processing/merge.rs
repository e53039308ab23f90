use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::config::ColumnConfig;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::report::{DataQualityReport, Finding};
use crate::pipeline::source::RawTable;
use crate::types::{MergedRow, RawRecording};

/// Left-join the recordings onto the accounts by user id.
///
/// Every account row yields at least one merged row. Recordings with no
/// matching account are dropped and reported as orphans.
#[instrument(skip_all, fields(accounts = accounts.len(), recordings = recordings.len()))]
pub fn merge(
    accounts: &RawTable,
    recordings: &RawTable,
    columns: &ColumnConfig,
    report: &mut DataQualityReport,
) -> Result<Vec<MergedRow>> {
    info!("Merging recordings onto accounts");

    let a_user = Some(accounts.column(&columns.user_id)?);
    let a_signup = Some(accounts.column(&columns.signup_time)?);
    let a_pro = accounts.optional_column(&columns.pro_subscription_time);

    // A zero-byte recordings file is an empty table, not a missing column
    let recording_column = |name: &str| -> Result<Option<usize>> {
        if recordings.has_header() {
            recordings.column(name).map(Some)
        } else {
            Ok(None)
        }
    };
    let r_user = recording_column(columns.user_id.as_str())?;
    let r_id = recording_column(columns.recording_id.as_str())?;
    let r_time = recording_column(columns.recording_time.as_str())?;
    let r_activity = recording_column(columns.activity_type.as_str())?;
    let r_payload = recording_column(columns.payload.as_str())?;
    let r_updated = recordings.optional_column(&columns.updated_time);

    let known_users: HashSet<&str> = (0..accounts.len())
        .filter_map(|i| accounts.cell(i, a_user))
        .collect();

    // Recordings grouped by user, in file order
    let mut by_user: HashMap<&str, Vec<RawRecording>> = HashMap::new();
    let mut orphans = 0usize;
    for line in 0..recordings.len() {
        let user_id = recordings.cell(line, r_user);
        let recording = RawRecording {
            line,
            recording_id: recordings.cell(line, r_id).map(str::to_string),
            recording_time: recordings.cell(line, r_time).map(str::to_string),
            activity_type: recordings.cell(line, r_activity).map(str::to_string),
            updated_time: recordings.cell(line, r_updated).map(str::to_string),
            payload: recordings.cell(line, r_payload).map(str::to_string),
        };

        match user_id {
            Some(uid) if known_users.contains(uid) => {
                by_user.entry(uid).or_default().push(recording);
            }
            _ => {
                orphans += 1;
                warn!(
                    line,
                    user_id = user_id.unwrap_or("<null>"),
                    "Dropping recording with no matching account"
                );
                report.push(Finding::OrphanRecording {
                    line,
                    user_id: user_id.map(str::to_string),
                    recording_id: recording.recording_id,
                });
            }
        }
    }

    let mut merged = Vec::with_capacity(accounts.len());
    for account_index in 0..accounts.len() {
        let user_id = accounts.cell(account_index, a_user);
        let base = MergedRow {
            account_index,
            user_id: user_id.map(str::to_string),
            signup_time: accounts.cell(account_index, a_signup).map(str::to_string),
            pro_subscription_time: accounts.cell(account_index, a_pro).map(str::to_string),
            recording: None,
        };

        match user_id.and_then(|uid| by_user.get(uid)) {
            Some(recs) => {
                for rec in recs {
                    merged.push(MergedRow {
                        recording: Some(rec.clone()),
                        ..base.clone()
                    });
                }
            }
            None => merged.push(base),
        }
    }

    metrics::merge::rows_merged(merged.len());
    metrics::merge::orphans_dropped(orphans);
    info!("Merged into {} rows ({} orphan recordings dropped)", merged.len(), orphans);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::load_table_from_reader;

    fn users(data: &str) -> RawTable {
        load_table_from_reader("users", data.as_bytes(), b'\t').unwrap()
    }

    fn recordings(data: &str) -> RawTable {
        load_table_from_reader("recordings", data.as_bytes(), b'\t').unwrap()
    }

    const USERS: &str = "Pseudo_User_ID\tsignup_date\tstart_date\n\
        u1\t2017-01-01 00:00:00\t\n\
        u2\t2017-01-02 00:00:00\t2017-02-01 00:00:00\n\
        u3\t2017-01-03 00:00:00\t\n";

    const REC_HEADER: &str = "Recording_ID\tPseudo_User_ID\tDate_Time\tActivity_Type\tRecording_Summary\n";

    #[test]
    fn left_join_keeps_accounts_without_recordings() {
        let recs = format!(
            "{}r1\tu1\t2017-01-05 10:00:00\tHiking\t{{}}\nr2\tu1\t2017-01-04 10:00:00\tHiking\t{{}}\nr3\tu2\t2017-01-06 10:00:00\tBiking\t{{}}\n",
            REC_HEADER
        );
        let mut report = DataQualityReport::new();
        let rows = merge(&users(USERS), &recordings(&recs), &ColumnConfig::default(), &mut report).unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows.iter().filter(|r| r.user_id.as_deref() == Some("u1")).count(), 2);
        let u3: Vec<_> = rows.iter().filter(|r| r.user_id.as_deref() == Some("u3")).collect();
        assert_eq!(u3.len(), 1);
        assert!(u3[0].recording.is_none());
        assert_eq!(report.orphan_count(), 0);
    }

    #[test]
    fn empty_recordings_yield_one_row_per_account() {
        let mut report = DataQualityReport::new();
        let rows = merge(&users(USERS), &recordings(REC_HEADER), &ColumnConfig::default(), &mut report).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.recording.is_none()));
    }

    #[test]
    fn orphan_recordings_are_dropped_and_reported() {
        let recs = format!(
            "{}r1\tghost\t2017-01-05 10:00:00\tHiking\t{{}}\nr2\t\t2017-01-05 10:00:00\tHiking\t{{}}\n",
            REC_HEADER
        );
        let mut report = DataQualityReport::new();
        let rows = merge(&users(USERS), &recordings(&recs), &ColumnConfig::default(), &mut report).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(report.orphan_count(), 2);
        assert_eq!(
            report.findings[0],
            Finding::OrphanRecording {
                line: 0,
                user_id: Some("ghost".to_string()),
                recording_id: Some("r1".to_string()),
            }
        );
    }

    #[test]
    fn duplicated_account_rows_stay_distinct() {
        let dup = format!("{}u1\t2017-01-01 00:00:00\t\n", USERS);
        let recs = format!("{}r1\tu1\t2017-01-05 10:00:00\tHiking\t{{}}\n", REC_HEADER);
        let mut report = DataQualityReport::new();
        let rows = merge(&users(&dup), &recordings(&recs), &ColumnConfig::default(), &mut report).unwrap();

        let indexes: Vec<usize> = rows
            .iter()
            .filter(|r| r.user_id.as_deref() == Some("u1"))
            .map(|r| r.account_index)
            .collect();
        assert_eq!(indexes, vec![0, 3]);
    }

    #[test]
    fn zero_byte_recordings_file_is_an_empty_table() {
        let mut report = DataQualityReport::new();
        let rows = merge(&users(USERS), &recordings(""), &ColumnConfig::default(), &mut report).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.recording.is_none()));
    }

    #[test]
    fn header_without_required_column_is_still_an_error() {
        let mut report = DataQualityReport::new();
        let err = merge(&users(USERS), &recordings("Recording_ID\n"), &ColumnConfig::default(), &mut report)
            .unwrap_err();
        assert!(matches!(err, crate::error::DatasetError::MissingColumn { .. }));
    }
}
