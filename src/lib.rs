use std::{fs, path::Path};

use anyhow::{anyhow, bail, ensure, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub mod client;
pub mod upload;

pub use client::{AwClient, Bucket, EventStore};
pub use upload::{bucket_name, confirm, ensure_bucket, import, upload_events, ImportOptions, Outcome};

/// Columns a ManicTime export must carry. Any other columns are ignored.
pub const REQUIRED_COLUMNS: [&str; 4] = ["Start", "Duration", "Process", "Name"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One row of a ManicTime CSV export.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Record {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "Duration")]
    pub duration: String,
    /// ManicTime has no executable name, so this generic process label
    /// stands in for the app.
    #[serde(rename = "Process")]
    pub process: String,
}

/// An `aw-watcher-window` event as accepted by the ActivityWatch REST API.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub timestamp: DateTime<Utc>,
    /// Seconds.
    pub duration: u64,
    pub data: WindowData,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WindowData {
    pub app: String,
    pub title: String,
}

pub fn parse_records(path: &Path) -> Result<Vec<Record>> {
    ensure!(path.exists(), "Path doesn't exist: {:?}", path);
    debug!("Opening {:?}", path);
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let records = read_records(&bytes).with_context(|| format!("Failed to load {:?}", path))?;
    info!("Loaded {} rows from the input CSV", records.len());

    Ok(records)
}

/// Parses CSV bytes, dropping a leading byte order mark if present.
pub fn read_records(bytes: &[u8]) -> Result<Vec<Record>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers = rdr.headers().context("Failed to read CSV header")?.clone();
    let missing = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect_vec();
    if !missing.is_empty() {
        bail!(
            "Missing required columns [{}], found [{}]",
            missing.join(", "),
            headers.iter().join(", ")
        );
    }

    let records: Vec<Record> = rdr
        .deserialize()
        .collect::<Result<_, _>>()
        .context("Failed to parse CSV rows")?;
    debug!("Read {} records", records.len());

    Ok(records)
}

fn parse_naive(start: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(start, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(start, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// True for any accepted shape followed by `Z` or a `±HH:MM` offset.
fn has_offset(start: &str) -> bool {
    let zulu = start
        .strip_suffix(|c: char| c == 'Z' || c == 'z')
        .is_some_and(|rest| parse_naive(rest).is_some());

    zulu || start.parse::<DateTime<FixedOffset>>().is_ok()
        || NAIVE_FORMATS
            .iter()
            .any(|format| {
                DateTime::<FixedOffset>::parse_from_str(start, &format!("{}%:z", format)).is_ok()
            })
}

/// Parses a naive `Start` value and tags it as UTC without shifting the
/// wall clock. ManicTime exports carry no zone, so UTC is an assumption
/// that is wrong for anyone tracking in another timezone.
pub fn parse_start(start: &str) -> Result<DateTime<Utc>> {
    let start = start.trim();

    match parse_naive(start) {
        Some(naive) => Ok(naive.and_utc()),
        None if has_offset(start) => bail!(
            "Start timestamp {:?} has a timezone offset, expected a naive timestamp",
            start
        ),
        None => bail!("Invalid start timestamp {:?}", start),
    }
}

/// Converts `HH:MM:SS` into seconds. Hours may exceed 23.
pub fn parse_duration(duration: &str) -> Result<u64> {
    let parts = duration.split(':').collect_vec();
    ensure!(
        parts.len() == 3,
        "Duration {:?} must have exactly three ':'-separated parts",
        duration
    );

    let mut seconds: u64 = 0;
    for (part, factor) in parts.iter().zip([3600, 60, 1]) {
        let value: u64 = part
            .trim()
            .parse()
            .with_context(|| format!("Invalid component {:?} in duration {:?}", part, duration))?;
        seconds = value
            .checked_mul(factor)
            .and_then(|part_seconds| seconds.checked_add(part_seconds))
            .ok_or_else(|| anyhow!("Duration {:?} overflows", duration))?;
    }

    Ok(seconds)
}

pub fn to_window_event(record: &Record) -> Result<WindowEvent> {
    Ok(WindowEvent {
        timestamp: parse_start(&record.start)?,
        duration: parse_duration(&record.duration)?,
        data: WindowData {
            app: record.process.clone(),
            title: record.name.clone(),
        },
    })
}

/// Converts every record, aborting on the first malformed one.
pub fn to_window_events(records: &[Record]) -> Result<Vec<WindowEvent>> {
    let events = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            to_window_event(record).with_context(|| format!("Failed to convert row {}", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    info!("Converted all rows to aw-watcher-window events");

    Ok(events)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone, Timelike};

    use super::*;

    fn record(start: &str, duration: &str) -> Record {
        Record {
            name: "Editor".to_string(),
            start: start.to_string(),
            duration: duration.to_string(),
            process: "editor.exe".to_string(),
        }
    }

    #[test]
    fn maps_editor_row() {
        let event = to_window_event(&record("2024-01-01T10:00:00", "01:02:03")).unwrap();

        assert_eq!(
            event,
            WindowEvent {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
                duration: 3723,
                data: WindowData {
                    app: "editor.exe".to_string(),
                    title: "Editor".to_string(),
                },
            }
        );
    }

    #[test]
    fn duration_is_weighted_sum() {
        let cases: [(u64, u64, u64); 5] = [(0, 0, 0), (0, 0, 59), (1, 59, 59), (12, 30, 5), (100, 0, 1)];
        for (h, m, s) in cases {
            let text = format!("{}:{:02}:{:02}", h, m, s);
            assert_eq!(parse_duration(&text).unwrap(), h * 3600 + m * 60 + s, "{}", text);
        }
    }

    #[test]
    fn duration_needs_three_parts() {
        for bad in ["", "10", "01:02", "01:02:03:04", "::::"] {
            assert!(parse_duration(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn duration_rejects_non_numeric_components() {
        assert!(parse_duration("aa:02:03").is_err());
        assert!(parse_duration("01::03").is_err());
        assert!(parse_duration("-1:00:00").is_err());
    }

    #[test]
    fn duration_overflow_is_an_error() {
        let err = parse_duration("18446744073709551615:00:00").unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);

        let err = parse_duration("5124095576030431:00:16").unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);
    }

    #[test]
    fn naive_start_keeps_wall_clock() {
        let ts = parse_start("2023-07-15 23:45:12.5").unwrap();

        assert_eq!(ts.timezone(), Utc);
        assert_eq!((ts.year(), ts.month(), ts.day()), (2023, 7, 15));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (23, 45, 12));
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn start_accepts_short_forms() {
        assert_eq!(
            parse_start("2024-03-02T08:15").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 8, 15, 0).unwrap()
        );
        assert_eq!(
            parse_start("2024-03-02").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn start_with_offset_is_rejected() {
        for zoned in [
            "2024-01-01T10:00:00Z",
            "2024-01-01T10:00:00+01:00",
            "2024-01-01 10:00:00-05:00",
            "2024-01-01T10:00+01:00",
            "2024-01-01 10:00Z",
            "2024-01-01T10:00:00.250-03:30",
        ] {
            let err = parse_start(zoned).unwrap_err();
            assert!(err.to_string().contains("timezone offset"), "{}: {}", zoned, err);
        }
    }

    #[test]
    fn garbage_start_is_rejected() {
        let err = parse_start("yesterday").unwrap_err();
        assert!(err.to_string().contains("Invalid start timestamp"));
    }

    #[test]
    fn mapping_is_deterministic() {
        let row = record("2024-05-06T07:08:09", "00:10:00");
        assert_eq!(to_window_event(&row).unwrap(), to_window_event(&row).unwrap());
    }

    #[test]
    fn conversion_names_the_failing_row() {
        let rows = vec![
            record("2024-01-01T10:00:00", "00:00:01"),
            record("2024-01-01T10:00:00", "1:2"),
        ];
        let err = to_window_events(&rows).unwrap_err();
        assert!(format!("{:#}", err).contains("row 2"));
    }

    #[test]
    fn serializes_to_activitywatch_shape() {
        let event = to_window_event(&record("2024-01-01T10:00:00", "01:02:03")).unwrap();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "timestamp": "2024-01-01T10:00:00Z",
                "duration": 3723,
                "data": { "app": "editor.exe", "title": "Editor" },
            })
        );
    }

    #[test]
    fn header_check_runs_before_rows() {
        // The second row would fail deserialization, but the header check comes first.
        let input = b"Name,Start,Process\nEditor,2024-01-01T10:00:00\n";
        let err = read_records(input).unwrap_err();
        assert!(err.to_string().contains("Missing required columns [Duration]"), "{}", err);
    }

    #[test]
    fn bom_and_extra_columns_are_tolerated() {
        let input = b"\xEF\xBB\xBFName,Start,End,Duration,Process\nEditor,2024-01-01T10:00:00,x,01:02:03,editor.exe\n";
        let records = read_records(input).unwrap();
        assert_eq!(records, vec![record("2024-01-01T10:00:00", "01:02:03")]);
    }
}
