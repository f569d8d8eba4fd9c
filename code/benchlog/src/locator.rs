/// Find completed benchmark runs in a log tree.
///
/// The remote benchmark scripts leave one *run directory* per execution below the machine type's
/// log directory, named for the benchmark and suffixed by a timestamp, eg
///
///    <logdir>/c5-2xlarge/fio-results.20220110.07:33:17/
///
/// When a script completes (whether or not the benchmark passed) it writes an empty `success`
/// file into the run directory.  Only run directories with that marker are eligible for analysis.
/// A directory without it is still running, or the run died, and it is skipped silently.
///
/// The time of a run is the modification time of its marker file.

use anyhow::{bail, Context, Result};
use glob::{glob, Pattern};
use itertools::Itertools;
use rustutils::{modtime, Timestamp};
use std::path::{Path, PathBuf};

pub const SUCCESS_MARKER: &str = "success";

/// Where one completed run's artifacts live, and when it completed.

#[derive(Debug, Clone, PartialEq)]
pub struct RunLocation {
    pub cloud: String,
    pub group: String,
    pub machine_type: String,
    pub dir: PathBuf,
    pub modtime: Timestamp,
}

/// Machine type names like "c5.2xlarge" are stored as "c5-2xlarge" in the log tree.

pub fn format_machine_type(machine_type: &str) -> String {
    machine_type.replace('.', "-")
}

/// Return the run directories below `<log_dir>/<machine type>` whose names match `run_pattern`
/// (a glob pattern for one path component, eg "fio-results.*") and which contain the success
/// marker, paired with the marker's modification time.  The result is sorted by path.
///
/// A malformed pattern, a directory that can't be read, or a marker that can't be stat'ed is an
/// error.  A machine type directory that does not exist yields the empty list.

pub fn find_successful_runs(
    log_dir: &Path,
    machine_type: &str,
    run_pattern: &str,
) -> Result<Vec<(PathBuf, Timestamp)>> {
    let machine_dir = log_dir.join(format_machine_type(machine_type));
    let markers = find_files(&machine_dir, &format!("{run_pattern}/{SUCCESS_MARKER}"))?;
    let mut runs = vec![];
    for marker in markers {
        let t = modtime(&marker).with_context(|| format!("Cannot stat {}", marker.display()))?;
        if let Some(dir) = marker.parent() {
            runs.push((dir.to_path_buf(), t));
        }
    }
    Ok(runs)
}

/// Like find_successful_runs, but attach the provenance of the runs.

pub fn locate_runs(
    log_dir: &Path,
    cloud: &str,
    group: &str,
    machine_type: &str,
    run_pattern: &str,
) -> Result<Vec<RunLocation>> {
    Ok(find_successful_runs(log_dir, machine_type, run_pattern)?
        .into_iter()
        .map(|(dir, modtime)| RunLocation {
            cloud: cloud.to_string(),
            group: group.to_string(),
            machine_type: machine_type.to_string(),
            dir,
            modtime,
        })
        .collect())
}

/// Glob for `pattern` relative to `dir`.  Metacharacters in `dir` are taken literally.  The
/// result is sorted by path.

pub fn find_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let dir_str = if let Some(s) = dir.to_str() {
        s
    } else {
        bail!("Directory name {} is not UTF-8", dir.display());
    };
    let full = format!("{}/{}", Pattern::escape(dir_str), pattern);
    let mut found = vec![];
    for entry in glob(&full).with_context(|| format!("Bad glob pattern {full}"))? {
        found.push(entry.with_context(|| format!("Cannot glob {full}"))?);
    }
    Ok(found.into_iter().sorted().collect())
}

#[cfg(test)]
use std::fs;

#[test]
fn test_format_machine_type() {
    assert_eq!(format_machine_type("c5.2xlarge"), "c5-2xlarge");
    assert_eq!(format_machine_type("n2-standard-8"), "n2-standard-8");
}

#[test]
fn test_find_successful_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let mdir = tmp.path().join("c5-2xlarge");
    for d in ["fio-results.1", "fio-results.2", "fio-results.3", "coremark-results.1"] {
        fs::create_dir_all(mdir.join(d)).unwrap();
    }
    fs::write(mdir.join("fio-results.1/success"), "").unwrap();
    // fio-results.2 is still running
    fs::write(mdir.join("fio-results.2/fio-results.json"), "{}").unwrap();
    fs::write(mdir.join("fio-results.3/success"), "").unwrap();
    fs::write(mdir.join("coremark-results.1/success"), "").unwrap();

    let runs = find_successful_runs(tmp.path(), "c5.2xlarge", "fio-results.*").unwrap();
    let dirs = runs.iter().map(|(d, _)| d.clone()).collect::<Vec<PathBuf>>();
    assert_eq!(dirs, vec![mdir.join("fio-results.1"), mdir.join("fio-results.3")]);

    let locs = locate_runs(tmp.path(), "aws", "ebs-gp3", "c5.2xlarge", "coremark-results.*").unwrap();
    assert!(locs.len() == 1);
    assert!(locs[0].cloud == "aws" && locs[0].group == "ebs-gp3");
    assert!(locs[0].dir == mdir.join("coremark-results.1"));

    // Nonexistent machine type directory
    assert!(find_successful_runs(tmp.path(), "m5.large", "fio-results.*").unwrap().is_empty());
}

#[test]
fn test_find_files_errors() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(find_files(tmp.path(), "fio-results.[/success").is_err());
}

#[test]
fn test_find_files_literal_dir() {
    // Directory names from the run timestamps contain ':', and could contain glob metacharacters.
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("tpcc-results.[1]");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("tpcc-results-10.txt"), "").unwrap();
    let found = find_files(&dir, "tpcc-results-*.txt").unwrap();
    assert_eq!(found, vec![dir.join("tpcc-results-10.txt")]);
}
