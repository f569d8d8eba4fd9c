/// Timestamps for benchmark artifacts.
///
/// Every result that flows through the analysis carries the modification time of the artifact it
/// was read from, and the result stores order results by that time.  Timestamps are always UTC and
/// have no subsecond component in the rendered form.

use anyhow::{bail, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub type Timestamp = DateTime<Utc>;

pub fn epoch() -> Timestamp {
    timestamp_from_systemtime(SystemTime::UNIX_EPOCH)
}

pub fn timestamp_from_systemtime(t: SystemTime) -> Timestamp {
    DateTime::<Utc>::from(t)
}

/// The modification time of the file or directory at `p`.

pub fn modtime(p: &Path) -> Result<Timestamp> {
    let meta = fs::metadata(p)?;
    Ok(timestamp_from_systemtime(meta.modified()?))
}

pub fn timestamp_from_unix(secs: i64) -> Result<Timestamp> {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(t) => Ok(t),
        None => bail!("Timestamp {secs} is out of range"),
    }
}

/// The format of every `Date` column in the reports.

pub fn format_timestamp(t: &Timestamp) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Reports are filed under a version directory named for the day they were produced.

pub fn default_report_version() -> String {
    Local::now().format("%Y%m%d").to_string()
}

#[test]
fn test_format_timestamp() {
    let t = timestamp_from_unix(1644759486).unwrap();
    assert_eq!(format_timestamp(&t), "2022-02-13 13:38:06 UTC");
    assert_eq!(format_timestamp(&epoch()), "1970-01-01 00:00:00 UTC");
}

#[test]
fn test_default_report_version() {
    let v = default_report_version();
    assert!(v.len() == 8);
    assert!(v.chars().all(|c| c.is_ascii_digit()));
}
