/// Write a report as a CSV file with a fixed header.
///
/// The header is given as the comma-separated string that will be the first line of the file; the
/// rows must have exactly as many fields as the header has columns, a mismatch is an error (it
/// would be a bug in the row formatter).  Fields that contain commas, quotes or newlines are
/// quoted.
///
/// Any missing parent directories of the output file are created.  An existing file is truncated.
/// A write error aborts the report, the file may then be incomplete.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

pub fn header_columns(header: &str) -> Vec<&str> {
    header.split(',').collect()
}

/// Returns the number of rows written, not counting the header.

pub fn write_csv<I>(path: &Path, header: &str, rows: I) -> Result<usize>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory {}", parent.display()))?;
        }
    }
    let mut writer = csv::WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Cannot create {}", path.display()))?;

    let columns = header_columns(header);
    writer
        .write_record(&columns)
        .with_context(|| format!("Cannot write header to {}", path.display()))?;

    let mut n = 0;
    for row in rows {
        if row.len() != columns.len() {
            bail!(
                "Row {} for {} has {} fields, expected {}",
                n + 1,
                path.display(),
                row.len(),
                columns.len()
            );
        }
        writer
            .write_record(&row)
            .with_context(|| format!("Cannot write row {} to {}", n + 1, path.display()))?;
        n += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Cannot flush {}", path.display()))?;
    log::debug!("Wrote {n} rows to {}", path.display());
    Ok(n)
}

#[test]
fn test_write_csv() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("results/aws/cpu.csv");
    let header = "Cloud,Date,MachineType";
    let rows = vec![
        vec!["aws".to_string(), "2022-02-13 13:38:06 UTC".to_string(), "c5.2xlarge".to_string()],
        vec!["aws".to_string(), "2022-02-14 00:00:00 UTC".to_string(), "m5.large".to_string()],
    ];
    assert!(write_csv(&path, header, rows).unwrap() == 2);
    let text = fs::read_to_string(&path).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert_eq!(lines[0], header);
    assert!(lines.len() == 3);
    for l in &lines[1..] {
        assert!(l.split(',').count() == 3);
    }

    // Truncates an existing file
    assert!(write_csv(&path, header, vec![]).unwrap() == 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), "Cloud,Date,MachineType\n");
}

#[test]
fn test_write_csv_field_count() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("x.csv");
    let rows = vec![vec!["a".to_string()]];
    assert!(write_csv(&path, "A,B", rows).is_err());
}

#[test]
fn test_write_csv_quoting() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("x.csv");
    let rows = vec![vec!["a,b".to_string(), "c".to_string()]];
    write_csv(&path, "A,B", rows).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "A,B\n\"a,b\",c\n");
}
