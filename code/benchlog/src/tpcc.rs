/// Transactional workload benchmark: TPC-C, as run by the cockroach workload driver.
///
/// A run directory is named for the run parameters, the warehouses per vCPU and the run id follow
/// the timestamp:
///
///    tpcc-results.20220213.13:38:06-125-3/
///
/// It holds the workload output `tpcc-results-<warehouses>.txt`.  When the driver decides a run
/// failed it renames the output to `tpcc-results-<warehouses>.bak` (and retries); failed runs are
/// only reported on request.  All the result files of a run directory that have the same
/// warehouse count are trials of the same run.
///
/// The first line of the output gives the number of connections, two per warehouse:
///
///    Initializing 2000 connections...
///
/// and the last line is the summary, following this header:
///
///    _elapsed_______tpmC____efc__avg(ms)__p50(ms)__p90(ms)__p95(ms)__p99(ms)_pMax(ms)
///      900.0s    12405.3  96.5%    180.8    167.8    369.1    419.4    570.4   1677.7

use crate::analyzer::{for_each_machine, AnalyzerState, BenchmarkKind, ResultsAnalyzer};
use crate::csvout::write_csv;
use crate::layout::{AnalysisConfig, ReportLayout};
use crate::locator::{find_files, locate_runs, RunLocation};
use crate::regexes::cached_regex;
use crate::store::Timestamped;

use anyhow::{bail, Context, Result};
use regex::Regex;
use rustutils::{format_timestamp, CloudDetails, Timestamp};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const TPCC_CSV_HEADER: &str =
    "Cloud,Group,Date,MachineType,Warehouses,warehousePerVCPU,Pass,TpmC,Efc,Avg,P50,P90,P95,P99,PMax";

const RUN_PATTERN: &str = "tpcc-results.*";

static RUN_KEY_RE: OnceLock<Regex> = OnceLock::new();
const RUN_KEY_PATTERN: &str = r"tpcc-results\..*?-(\d+)-(\d+)/tpcc-results-(\d+).+";

/// Pass thresholds: efficiency in percent, p95 latency in ms.
pub const PASS_MIN_EFFICIENCY: f64 = 85.0;
pub const PASS_MAX_P95_MS: f64 = 10000.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TpccRun {
    pub tpmc: f64,
    pub efc: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub pmax: f64,
    pub warehouses: i64,
}

impl TpccRun {
    pub fn pass(&self) -> bool {
        self.efc > PASS_MIN_EFFICIENCY && self.p95 < PASS_MAX_P95_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TpccRunKey {
    pub vcpu: String,
    pub run_id: String,
    pub warehouses: String,
}

/// The run key of a result file, from its last two path components.

pub fn run_key_from_path(p: &Path) -> Result<TpccRunKey> {
    let dir = p
        .parent()
        .and_then(|d| d.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file = p
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = format!("{dir}/{file}");
    match cached_regex(&RUN_KEY_RE, RUN_KEY_PATTERN)?.captures(&name) {
        Some(c) => Ok(TpccRunKey {
            vcpu: c[1].to_string(),
            run_id: c[2].to_string(),
            warehouses: c[3].to_string(),
        }),
        None => bail!("Cannot find the number of warehouses from file name {name}"),
    }
}

fn parse_field(text: &str, name: &str) -> Result<f64> {
    text.parse::<f64>()
        .with_context(|| format!("Error parsing {name} {:?}", text))
}

pub fn parse_tpcc_text(text: &str) -> Result<TpccRun> {
    let first = text.lines().next().unwrap_or("");
    let connections = match first.split_whitespace().nth(1) {
        Some(s) => s
            .parse::<i64>()
            .with_context(|| format!("Error parsing connection count in {:?}", first))?,
        None => bail!("Expected 'Initializing <N> connections' on first line, found {:?}", first),
    };

    let last = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    let f = last.split_whitespace().collect::<Vec<&str>>();
    if f.len() != 9 {
        bail!(
            "Unexpected number of fields on summary line: expected 9, found {}: {:?}",
            f.len(),
            last.trim()
        );
    }
    Ok(TpccRun {
        tpmc: parse_field(f[1], "tpmC")?,
        efc: parse_field(f[2].trim_end_matches('%'), "efc")?,
        avg: parse_field(f[3], "avg")?,
        p50: parse_field(f[4], "p50")?,
        p90: parse_field(f[5], "p90")?,
        p95: parse_field(f[6], "p95")?,
        p99: parse_field(f[7], "p99")?,
        pmax: parse_field(f[8], "pMax")?,
        warehouses: connections / 2,
    })
}

pub fn parse_tpcc_run(p: &Path) -> Result<TpccRun> {
    let text = fs::read_to_string(p).with_context(|| format!("Cannot read {}", p.display()))?;
    parse_tpcc_text(&text).with_context(|| format!("In tpcc results {}", p.display()))
}

#[derive(Debug, Clone)]
pub struct TpccResult {
    pub runs: Vec<TpccRun>,
    pub modtime: Timestamp,
    pub machine: String,
    pub group: String,
    pub warehouses: String,
    pub warehouse_per_vcpu: String,
}

impl Timestamped for TpccResult {
    fn modtime(&self) -> Timestamp {
        self.modtime
    }
}

impl TpccResult {
    fn csv_rows(&self, cloud: &str) -> Vec<Vec<String>> {
        self.runs
            .iter()
            .map(|run| {
                vec![
                    cloud.to_string(),
                    self.group.clone(),
                    format_timestamp(&self.modtime),
                    self.machine.clone(),
                    self.warehouses.clone(),
                    self.warehouse_per_vcpu.clone(),
                    format!("{}", run.pass()),
                    format!("{:.6}", run.tpmc),
                    format!("{:.6}", run.efc),
                    format!("{:.6}", run.avg),
                    format!("{:.6}", run.p50),
                    format!("{:.6}", run.p90),
                    format!("{:.6}", run.p95),
                    format!("{:.6}", run.p99),
                    format!("{:.6}", run.pmax),
                ]
            })
            .collect()
    }
}

/// (group, machine type, warehouses, run id)
pub type TpccStoreKey = (String, String, String, String);

/// The result files of `run`, grouped by run key.  Files whose names don't carry a run key are
/// skipped with a warning.

pub fn group_result_files(
    run: &RunLocation,
    include_fail: bool,
) -> Result<BTreeMap<TpccRunKey, Vec<PathBuf>>> {
    let mut files = find_files(&run.dir, "tpcc-results-*.txt")?;
    if include_fail {
        files.extend(find_files(&run.dir, "tpcc-results-*.bak")?);
    }
    let mut groups = BTreeMap::<TpccRunKey, Vec<PathBuf>>::new();
    for f in files {
        match run_key_from_path(&f) {
            Ok(key) => groups.entry(key).or_default().push(f),
            Err(e) => log::warn!(
                "Skipping tpcc results {}, parse error for this run: {e:#}",
                f.display()
            ),
        }
    }
    Ok(groups)
}

pub struct TpccAnalyzer {
    state: AnalyzerState<TpccStoreKey, TpccResult>,
    layout: ReportLayout,
    include_fail: bool,
}

impl TpccAnalyzer {
    pub fn new(provider: &str, config: &AnalysisConfig) -> TpccAnalyzer {
        TpccAnalyzer {
            state: AnalyzerState::new(BenchmarkKind::Tpcc, provider),
            layout: config.layout.clone(),
            include_fail: config.include_tpcc_fail,
        }
    }

    fn analyze_tpcc(&mut self, cloud: &CloudDetails, machine_type: &str) -> Result<()> {
        let log_dir = self.layout.log_dir(cloud);
        let runs = locate_runs(&log_dir, &cloud.cloud, &cloud.group, machine_type, RUN_PATTERN)?;
        let include_fail = self.include_fail;
        let store = self.state.store_mut();
        for run in runs {
            log::info!("Analyzing {}", run.dir.display());
            for (run_key, files) in group_result_files(&run, include_fail)? {
                let key = (
                    cloud.group.clone(),
                    machine_type.to_string(),
                    run_key.warehouses.clone(),
                    run_key.run_id.clone(),
                );
                if store.is_stale(&key, run.modtime) {
                    log::info!(
                        "Skipping TPC-C throughput log {} (already analyzed newer)",
                        run.dir.display()
                    );
                    continue;
                }
                let mut trials = vec![];
                for f in &files {
                    let trial = parse_tpcc_run(f)?;
                    if trial.warehouses.to_string() != run_key.warehouses {
                        log::debug!(
                            "{}: {} warehouses initialized, {} in file name",
                            f.display(),
                            trial.warehouses,
                            run_key.warehouses
                        );
                    }
                    trials.push(trial);
                }
                store.upsert(
                    key,
                    TpccResult {
                        runs: trials,
                        modtime: run.modtime,
                        machine: machine_type.to_string(),
                        group: cloud.group.clone(),
                        warehouses: run_key.warehouses,
                        warehouse_per_vcpu: run_key.vcpu,
                    },
                );
            }
        }
        Ok(())
    }
}

impl ResultsAnalyzer for TpccAnalyzer {
    fn kind(&self) -> BenchmarkKind {
        BenchmarkKind::Tpcc
    }

    fn analyze(&mut self, cloud: &CloudDetails) -> Result<()> {
        self.state.begin(cloud)?;
        for_each_machine(cloud, |details, machine_type| {
            self.analyze_tpcc(details, machine_type)
        })
    }

    fn close(&mut self) -> Result<()> {
        let store = self.state.finish()?;
        let path = self
            .layout
            .results_file(BenchmarkKind::Tpcc.csv_file_name(), &self.state.provider);
        let provider = &self.state.provider;
        write_csv(
            &path,
            TPCC_CSV_HEADER,
            store.all().flat_map(|(_, r)| r.csv_rows(provider)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
const FIXTURE_DIR: &str = "../tests/benchlog/tpcc/tpcc-results.20220213.133806-125-3";

#[test]
fn test_pass() {
    let run = |efc, p95| TpccRun {
        efc,
        p95,
        ..Default::default()
    };
    assert!(run(86.0, 9999.0).pass());
    assert!(!run(85.0, 9999.0).pass());
    assert!(!run(90.0, 10000.0).pass());
}

#[test]
fn test_run_key_from_path() {
    let key = run_key_from_path(Path::new(
        "logs/c5-2xlarge/tpcc-results.20220213.13:38:06-125-3/tpcc-results-1000.txt",
    ))
    .unwrap();
    assert_eq!(
        key,
        TpccRunKey {
            vcpu: "125".to_string(),
            run_id: "3".to_string(),
            warehouses: "1000".to_string(),
        }
    );
    let bak = run_key_from_path(Path::new(
        "tpcc-results.20220213.13:38:06-125-3/tpcc-results-1000.bak",
    ))
    .unwrap();
    assert!(bak == key);

    let err = run_key_from_path(Path::new("tpcc-results.20220213/tpcc-results-1000.txt"));
    assert!(err.unwrap_err().to_string().contains("tpcc-results-1000.txt"));
}

#[test]
fn test_parse_tpcc_run() {
    let run = parse_tpcc_run(&Path::new(FIXTURE_DIR).join("tpcc-results-1000.txt")).unwrap();
    assert!(run.warehouses == 1000);
    assert!(run.tpmc == 12405.3);
    assert!(run.efc == 96.5);
    assert!(run.p95 == 419.4);
    assert!(run.pmax == 1677.7);
    assert!(run.pass());

    let failed = parse_tpcc_run(&Path::new(FIXTURE_DIR).join("tpcc-results-1000.bak")).unwrap();
    assert!(failed.efc == 60.2);
    assert!(!failed.pass());
}

#[test]
fn test_parse_tpcc_errors() {
    assert!(parse_tpcc_text("").is_err());
    assert!(parse_tpcc_text("Initializing many connections\n").is_err());
    let short = "Initializing 2000 connections...\n  900.0s    12405.3  96.5%    180.8\n";
    let err = parse_tpcc_text(short).unwrap_err();
    assert!(err.to_string().contains("expected 9, found 4"));
    let bad = "Initializing 2000 connections...\n  900.0s    12405.3  lots    180.8    167.8    369.1    419.4    570.4   1677.7\n";
    assert!(parse_tpcc_text(bad).is_err());
}

#[test]
fn test_group_result_files() {
    let run = RunLocation {
        cloud: "aws".to_string(),
        group: "ebs-gp3".to_string(),
        machine_type: "c5.2xlarge".to_string(),
        dir: PathBuf::from(FIXTURE_DIR),
        modtime: rustutils::epoch(),
    };
    let groups = group_result_files(&run, false).unwrap();
    assert!(groups.len() == 1);
    assert!(groups.values().next().unwrap().len() == 1);

    let groups = group_result_files(&run, true).unwrap();
    assert!(groups.len() == 1);
    let files = groups.values().next().unwrap();
    assert!(files.len() == 2);
    assert!(files[0].extension().unwrap() == "txt");
    assert!(files[1].extension().unwrap() == "bak");
}

#[test]
fn test_group_result_files_bad_run_name() {
    // No run parameters in the directory name: the run is skipped, not an error
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("tpcc-results.20220213");
    fs::create_dir_all(&dir).unwrap();
    fs::copy(
        Path::new(FIXTURE_DIR).join("tpcc-results-1000.txt"),
        dir.join("tpcc-results-1000.txt"),
    )
    .unwrap();
    let run = RunLocation {
        cloud: "aws".to_string(),
        group: "ebs-gp3".to_string(),
        machine_type: "c5.2xlarge".to_string(),
        dir,
        modtime: rustutils::epoch(),
    };
    assert!(group_result_files(&run, true).unwrap().is_empty());
}

#[test]
fn test_reanalyze_unchanged_tree() {
    use crate::dispatch::fixtures;

    let tmp = tempfile::tempdir().unwrap();
    let layout = ReportLayout::new(tmp.path(), "v");
    let aws = fixtures::cloud("aws", "ebs-gp3", &["c5.2xlarge"]);
    fixtures::install_run(
        FIXTURE_DIR,
        &layout
            .log_dir(&aws)
            .join("c5-2xlarge/tpcc-results.20220213.133806-125-3"),
        1000,
    );
    let mut config = AnalysisConfig::new(layout.clone());
    config.include_tpcc_fail = true;
    let key = (
        "ebs-gp3".to_string(),
        "c5.2xlarge".to_string(),
        "1000".to_string(),
        "3".to_string(),
    );

    let mut a = TpccAnalyzer::new("aws", &config);
    a.analyze(&aws).unwrap();
    let store = a.state.store().unwrap();
    assert!(store.len() == 1);
    let first = store.get(&key).unwrap().modtime;
    assert!(store.get(&key).unwrap().runs.len() == 2);

    // Same analyzer, same store, nothing new on disk
    a.analyze(&aws).unwrap();
    let store = a.state.store().unwrap();
    assert!(store.len() == 1);
    let r = store.get(&key).unwrap();
    assert!(r.modtime == first);
    assert!(r.runs.len() == 2);

    a.close().unwrap();
    let text = fs::read_to_string(layout.results_file("tpcc.csv", "aws")).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 3);
    assert!(lines[1] != lines[2]);
}

#[test]
fn test_tpcc_csv_rows() {
    let ok = parse_tpcc_run(&Path::new(FIXTURE_DIR).join("tpcc-results-1000.txt")).unwrap();
    let failed = parse_tpcc_run(&Path::new(FIXTURE_DIR).join("tpcc-results-1000.bak")).unwrap();
    let r = TpccResult {
        runs: vec![ok, failed],
        modtime: rustutils::timestamp_from_unix(1644759486).unwrap(),
        machine: "c5.2xlarge".to_string(),
        group: "ebs-gp3".to_string(),
        warehouses: "1000".to_string(),
        warehouse_per_vcpu: "125".to_string(),
    };
    let rows = r.csv_rows("aws");
    assert!(rows.len() == 2);
    assert_eq!(
        rows[0][0..8],
        ["aws", "ebs-gp3", "2022-02-13 13:38:06 UTC", "c5.2xlarge", "1000", "125", "true", "12405.300000"]
    );
    assert_eq!(rows[1][6], "false");
    assert!(rows[1].len() == TPCC_CSV_HEADER.split(',').count());
}
