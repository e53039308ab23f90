use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::constants;
use crate::observability::metrics;
use crate::pipeline::report::{DataQualityReport, Finding};
use crate::time_utils::parse_timestamp;
use crate::types::{NormalizedRow, PayloadMetrics, UnpackedRow};

/// Parse each first recording's payload and project the known keys into
/// typed columns. A payload that cannot be parsed leaves every payload
/// column null for that row; the row is kept and the incident reported.
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn unpack(rows: Vec<NormalizedRow>, report: &mut DataQualityReport) -> Vec<UnpackedRow> {
    info!("Unpacking recording payloads");
    let mut malformed = 0usize;

    let unpacked: Vec<UnpackedRow> = rows
        .into_iter()
        .map(|row| {
            let metrics = match row.first_recording.as_ref().and_then(|f| f.payload.as_deref()) {
                None => PayloadMetrics::default(),
                Some(raw) => match parse_payload(raw) {
                    Ok(map) => project(&map, &row, report),
                    Err(reason) => {
                        malformed += 1;
                        let recording_id = row.first_recording.as_ref().and_then(|f| f.recording_id.clone());
                        warn!(
                            user_id = row.user_id.as_deref().unwrap_or("<null>"),
                            recording_id = recording_id.as_deref().unwrap_or("<null>"),
                            %reason,
                            "Malformed payload, leaving derived columns null"
                        );
                        report.push(Finding::MalformedPayload {
                            user_id: row.user_id.clone(),
                            recording_id,
                            reason,
                        });
                        PayloadMetrics::default()
                    }
                },
            };
            UnpackedRow { row, metrics }
        })
        .collect();

    metrics::unpack::payloads_unpacked(unpacked.len() - malformed);
    metrics::unpack::payloads_malformed(malformed);
    info!("Unpacked {} payloads ({} malformed)", unpacked.len() - malformed, malformed);
    unpacked
}

fn project(map: &Map<String, Value>, row: &NormalizedRow, report: &mut DataQualityReport) -> PayloadMetrics {
    let number = |key: &str| map.get(key).and_then(as_number);

    let payload_updated = match map.get(constants::PAYLOAD_UPDATED_AT) {
        Some(Value::String(s)) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                report.push(Finding::UnparseableTimestamp {
                    user_id: row.user_id.clone(),
                    column: constants::FIRST_RECORDING_UPDATED_TIME.to_string(),
                    value: s.clone(),
                });
            }
            parsed
        }
        Some(Value::Number(n)) => n.as_i64().and_then(|secs| parse_timestamp(&secs.to_string())),
        _ => None,
    };

    PayloadMetrics {
        calories: number(constants::PAYLOAD_CALORIES),
        duration: number(constants::PAYLOAD_DURATION),
        total_time_seconds: number(constants::PAYLOAD_TOTAL_TIME),
        moving_time_seconds: number(constants::PAYLOAD_MOVING_TIME),
        total_distance: number(constants::PAYLOAD_TOTAL_DISTANCE),
        elevation_gain: number(constants::PAYLOAD_ELEVATION_GAIN),
        elevation_loss: number(constants::PAYLOAD_ELEVATION_LOSS),
        updated_time: payload_updated
            .or_else(|| row.first_recording.as_ref().and_then(|f| f.updated_time)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// Parse a payload into a flat string-keyed map.
///
/// Accepts JSON objects and the Python dict literals found in the exports
/// (single-quoted strings, `None`, `True`, `False`).
pub fn parse_payload(raw: &str) -> Result<Map<String, Value>, String> {
    let trimmed = raw.trim();
    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => v,
        Err(_) => {
            let json = python_literal_to_json(trimmed)?;
            serde_json::from_str::<Value>(&json).map_err(|e| format!("invalid payload: {}", e))?
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!("payload is not a key/value mapping: {}", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Rewrite a Python literal into JSON text. Only the subset that appears in
/// flat dict payloads is supported.
fn python_literal_to_json(src: &str) -> Result<String, String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let mut s = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('r') => s.push('\r'),
                            Some(other) => s.push(other),
                            None => return Err("unterminated escape".to_string()),
                        },
                        q if q == c => {
                            closed = true;
                            break;
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
                out.push_str(&serde_json::to_string(&s).map_err(|e| e.to_string())?);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut number = String::from(c);
                while let Some(&next) = chars.peek() {
                    let exponent_sign =
                        (next == '+' || next == '-') && number.ends_with(|p: char| p == 'e' || p == 'E');
                    if next.is_ascii_digit() || next == '.' || next == 'e' || next == 'E' || exponent_sign {
                        number.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&json_number(&number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "None" | "null" | "nan" | "NaN" => out.push_str("null"),
                    "inf" | "Infinity" => {
                        // -inf has no JSON form either
                        if out.trim_end().ends_with('-') {
                            let keep = out.trim_end().len() - 1;
                            out.truncate(keep);
                        }
                        out.push_str("null");
                    }
                    "True" | "true" => out.push_str("true"),
                    "False" | "false" => out.push_str("false"),
                    other => return Err(format!("unexpected token '{}'", other)),
                }
            }
            '}' | ']' => {
                // Python allows a trailing comma before the closing bracket
                let keep = out.trim_end().len();
                out.truncate(keep);
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(c);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Python float text (`5.`, `.5`, `1.e5`) in the form JSON accepts
fn json_number(number: &str) -> String {
    let mut text = String::with_capacity(number.len() + 2);
    let mut prev: Option<char> = None;
    for ch in number.chars() {
        if ch == '.' && !prev.map_or(false, |p| p.is_ascii_digit()) {
            text.push('0');
        }
        if (ch == 'e' || ch == 'E') && prev == Some('.') {
            text.push('0');
        }
        text.push(ch);
        prev = Some(ch);
    }
    if text.ends_with('.') {
        text.push('0');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FirstRecording;

    fn row_with_payload(payload: Option<&str>) -> NormalizedRow {
        NormalizedRow {
            user_id: Some("u1".to_string()),
            account_signup_time: parse_timestamp("2017-01-01 00:00:00"),
            pro_subscription_signup_time: None,
            first_recording: Some(FirstRecording {
                recording_id: Some("r1".to_string()),
                recording_time: parse_timestamp("2017-01-02 00:00:00"),
                activity_type: Some("Hiking".to_string()),
                updated_time: None,
                payload: payload.map(str::to_string),
            }),
        }
    }

    fn unpack_one(payload: Option<&str>) -> (PayloadMetrics, DataQualityReport) {
        let mut report = DataQualityReport::new();
        let mut out = unpack(vec![row_with_payload(payload)], &mut report);
        (out.remove(0).metrics, report)
    }

    #[test]
    fn python_dict_payload_is_projected() {
        let (m, report) = unpack_one(Some(
            "{'calories': 500, 'duration': 4000.5, 'timeTotal': 3600, 'timeMoving': 3000, \
             'distanceTotal': 8000.0, 'elevationGain': 120, 'elevationLoss': 118, \
             'updatedAt': '2017-01-03 09:00:00', 'isPrivate': False, 'notes': None}",
        ));
        assert_eq!(m.calories, Some(500.0));
        assert_eq!(m.duration, Some(4000.5));
        assert_eq!(m.total_time_seconds, Some(3600.0));
        assert_eq!(m.moving_time_seconds, Some(3000.0));
        assert_eq!(m.total_distance, Some(8000.0));
        assert_eq!(m.elevation_gain, Some(120.0));
        assert_eq!(m.elevation_loss, Some(118.0));
        assert_eq!(m.updated_time, parse_timestamp("2017-01-03 09:00:00"));
        assert!(report.findings.is_empty());
    }

    #[test]
    fn json_payload_is_projected() {
        let (m, _) = unpack_one(Some(r#"{"calories": 500, "timeTotal": "3600"}"#));
        assert_eq!(m.calories, Some(500.0));
        assert_eq!(m.total_time_seconds, Some(3600.0));
    }

    #[test]
    fn missing_key_only_nulls_that_column() {
        let (m, report) = unpack_one(Some("{'timeTotal': 3600, 'distanceTotal': 5000}"));
        assert_eq!(m.calories, None);
        assert_eq!(m.total_time_seconds, Some(3600.0));
        assert_eq!(m.total_distance, Some(5000.0));
        assert!(report.findings.is_empty());
    }

    #[test]
    fn malformed_payload_nulls_everything_and_is_reported() {
        let (m, report) = unpack_one(Some("{'calories': 500, 'timeTotal': "));
        assert_eq!(m, PayloadMetrics::default());
        assert_eq!(report.malformed_payload_count(), 1);

        let (m, report) = unpack_one(Some("calories=500"));
        assert_eq!(m, PayloadMetrics::default());
        assert_eq!(report.malformed_payload_count(), 1);
    }

    #[test]
    fn non_mapping_payload_is_malformed() {
        assert!(parse_payload("[1, 2, 3]").is_err());
        assert!(parse_payload("'just a string'").is_err());
    }

    #[test]
    fn one_bad_row_does_not_affect_others() {
        let mut report = DataQualityReport::new();
        let out = unpack(
            vec![
                row_with_payload(Some("{'calories': 'lots'")),
                row_with_payload(Some("{'calories': 250}")),
                row_with_payload(None),
            ],
            &mut report,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].metrics.calories, None);
        assert_eq!(out[1].metrics.calories, Some(250.0));
        assert_eq!(out[2].metrics, PayloadMetrics::default());
        assert_eq!(report.malformed_payload_count(), 1);
    }

    #[test]
    fn updated_time_falls_back_to_column() {
        let mut row = row_with_payload(Some("{'calories': 1}"));
        if let Some(first) = row.first_recording.as_mut() {
            first.updated_time = parse_timestamp("2017-05-05 05:05:05");
        }
        let mut report = DataQualityReport::new();
        let out = unpack(vec![row], &mut report);
        assert_eq!(out[0].metrics.updated_time, parse_timestamp("2017-05-05 05:05:05"));
    }

    #[test]
    fn quoted_values_keep_inner_quotes() {
        let map = parse_payload(r#"{'name': "Bob's hike", 'calories': 10}"#).unwrap();
        assert_eq!(map.get("name"), Some(&Value::String("Bob's hike".to_string())));
    }

    #[test]
    fn exponent_floats_are_numbers() {
        let map = parse_payload("{'calories': 500, 'elevationLoss': 5e-05, 'distanceTotal': 1.5e+16}").unwrap();
        assert_eq!(map.get("elevationLoss").and_then(Value::as_f64), Some(5e-05));
        assert_eq!(map.get("distanceTotal").and_then(Value::as_f64), Some(1.5e16));

        let (m, report) = unpack_one(Some("{'calories': 500, 'elevationGain': 2E3}"));
        assert_eq!(m.calories, Some(500.0));
        assert_eq!(m.elevation_gain, Some(2000.0));
        assert!(report.findings.is_empty());
    }

    #[test]
    fn trailing_comma_is_accepted() {
        let (m, report) = unpack_one(Some("{'calories': 500, 'timeTotal': 3600,}"));
        assert_eq!(m.calories, Some(500.0));
        assert_eq!(m.total_time_seconds, Some(3600.0));
        assert!(report.findings.is_empty());

        let map = parse_payload("{'laps': [1, 2, ], 'calories': 1 , }").unwrap();
        assert_eq!(map.get("laps"), Some(&serde_json::json!([1, 2])));
    }

    #[test]
    fn negative_infinity_becomes_null() {
        let (m, report) = unpack_one(Some("{'calories': 500, 'paceAverage': -inf, 'timeTotal': inf}"));
        assert_eq!(m.calories, Some(500.0));
        assert_eq!(m.total_time_seconds, None);
        assert!(report.findings.is_empty());

        let map = parse_payload("{'paceAverage': - inf}").unwrap();
        assert_eq!(map.get("paceAverage"), Some(&Value::Null));
    }

    #[test]
    fn bare_python_floats_are_numbers() {
        let map = parse_payload("{'a': 5., 'b': .25, 'c': -3.5}").unwrap();
        assert_eq!(map.get("a").and_then(Value::as_f64), Some(5.0));
        assert_eq!(map.get("b").and_then(Value::as_f64), Some(0.25));
        assert_eq!(map.get("c").and_then(Value::as_f64), Some(-3.5));
    }
}
