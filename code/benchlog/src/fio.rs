/// Disk I/O benchmark: fio.
///
/// A fio run directory holds `fio-results.json`, the report written by `fio --output-format=json`.
/// Only the parts of the report that go into the CSV are decoded; everything else is ignored, and
/// missing fields take zero / empty defaults (in particular the completion latency percentile map
/// can lack entries, or be absent, when there were no operations in that direction).
///
/// Latencies are in nanoseconds, runtimes in milliseconds.

use crate::analyzer::{for_each_machine, AnalyzerState, BenchmarkKind, ResultsAnalyzer};
use crate::csvout::write_csv;
use crate::layout::{AnalysisConfig, ReportLayout};
use crate::locator::{locate_runs, RunLocation};
use crate::store::Timestamped;

use anyhow::{Context, Result};
use rustutils::{format_timestamp, timestamp_from_unix, CloudDetails, Timestamp};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

pub const FIO_CSV_HEADER: &str = "Cloud,Group,Machine,Date,Job,BS,IoDepth,\
RdIOPs,RdIOP/s,RdBytes,RdBW(KiB/s),RdlMin,RdlMax,RdlMean,RdlStd,Rd90,Rd95,Rd99,Rd99.9,Rd99.99,\
WrIOPs,WrIOP/s,WrBytes,WrBW(KiB/s),WrlMin,WrlMax,WrlMean,WrlStd,Wr90,Wr95,Wr99,Wr99.9,Wr99.99,\
LatDepth,LatTarget,LatTargetPct,LatWindow";

const RUN_PATTERN: &str = "fio-results.*";
const REPORT_FILE: &str = "fio-results.json";

/// The completion latency percentiles we report, as fio labels them.
pub const CLAT_PERCENTILES: [&str; 5] = ["90.000000", "95.000000", "99.000000", "99.900000", "99.990000"];

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Lat {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Clat {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    #[serde(rename = "percentile")]
    pub percentiles: HashMap<String, i64>,
}

impl Clat {
    pub fn percentile(&self, label: &str) -> i64 {
        self.percentiles.get(label).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct IoStats {
    pub total_ios: i64,
    pub io_bytes: i64,
    #[serde(rename = "runtime")]
    pub runtime_ms: i64,
    #[serde(rename = "lat_ns")]
    pub lat: Lat,
    #[serde(rename = "clat_ns")]
    pub clat: Clat,
}

impl IoStats {
    // Per second over the runtime, 0 if there's nothing to divide.
    fn rate(&self, v: i64) -> f64 {
        if v > 0 && self.runtime_ms > 0 {
            v as f64 / (self.runtime_ms as f64 / 1000.0)
        } else {
            0.0
        }
    }

    pub fn iops(&self) -> f64 {
        self.rate(self.total_ios)
    }

    pub fn bandwidth_kib(&self) -> f64 {
        self.rate(self.io_bytes) / 1024.0
    }

    fn csv_fields(&self, fields: &mut Vec<String>) {
        fields.push(format!("{}", self.total_ios));
        fields.push(format!("{:.3}", self.iops()));
        fields.push(format!("{}", self.io_bytes));
        fields.push(format!("{:.6}", self.bandwidth_kib()));
        fields.push(format!("{:.6}", self.lat.min));
        fields.push(format!("{:.6}", self.lat.max));
        fields.push(format!("{:.6}", self.lat.mean));
        fields.push(format!("{:.6}", self.lat.stddev));
        for pct in CLAT_PERCENTILES {
            fields.push(format!("{}", self.clat.percentile(pct)));
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FioJob {
    #[serde(rename = "jobname")]
    pub name: String,
    #[serde(rename = "job options")]
    pub opts: HashMap<String, String>,
    pub read: IoStats,
    pub write: IoStats,
    pub latency_depth: f64,
    #[serde(rename = "latency_target")]
    pub latency_target_us: i64,
    #[serde(rename = "latency_percentile")]
    pub latency_target_pct: f64,
    #[serde(rename = "latency_window")]
    pub latency_window_us: i64,
}

impl FioJob {
    pub fn block_size(&self) -> &str {
        self.opts.get("bs").map(|s| s.as_str()).unwrap_or("")
    }

    pub fn iodepth(&self) -> &str {
        self.opts.get("iodepth").map(|s| s.as_str()).unwrap_or("1")
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FioReport {
    pub timestamp: i64,
    pub jobs: Vec<FioJob>,
}

#[derive(Debug, Clone)]
pub struct FioResult {
    pub machine_type: String,
    pub group: String,
    pub date: Timestamp,
    pub jobs: Vec<FioJob>,
    pub modtime: Timestamp,
}

impl Timestamped for FioResult {
    fn modtime(&self) -> Timestamp {
        self.modtime
    }
}

impl FioResult {
    fn csv_rows(&self, cloud: &str) -> Vec<Vec<String>> {
        let mut rows = vec![];
        for j in &self.jobs {
            let mut fields = vec![
                cloud.to_string(),
                self.group.clone(),
                self.machine_type.clone(),
                format_timestamp(&self.date),
                j.name.clone(),
                j.block_size().to_string(),
                j.iodepth().to_string(),
            ];
            j.read.csv_fields(&mut fields);
            j.write.csv_fields(&mut fields);
            fields.push(format!("{:.2}", j.latency_depth));
            fields.push(format!("{}", j.latency_target_us));
            fields.push(format!("{:.2}", j.latency_target_pct));
            fields.push(format!("{}", j.latency_window_us));
            rows.push(fields);
        }
        rows
    }
}

pub fn parse_fio_report(text: &str) -> Result<FioReport> {
    Ok(serde_json::from_str::<FioReport>(text)?)
}

pub fn parse_fio_run(run: &RunLocation) -> Result<FioResult> {
    let path = run.dir.join(REPORT_FILE);
    let text = fs::read_to_string(&path).with_context(|| format!("Cannot read {}", path.display()))?;
    let report = parse_fio_report(&text)
        .with_context(|| format!("Error unmarshalling {}", path.display()))?;
    log::debug!("{}: {} jobs", path.display(), report.jobs.len());
    Ok(FioResult {
        machine_type: run.machine_type.clone(),
        group: run.group.clone(),
        date: timestamp_from_unix(report.timestamp)
            .with_context(|| format!("Field 'timestamp' in {}", path.display()))?,
        jobs: report.jobs,
        modtime: run.modtime,
    })
}

pub struct FioAnalyzer {
    state: AnalyzerState<(String, String), FioResult>,
    layout: ReportLayout,
}

impl FioAnalyzer {
    pub fn new(provider: &str, config: &AnalysisConfig) -> FioAnalyzer {
        FioAnalyzer {
            state: AnalyzerState::new(BenchmarkKind::Fio, provider),
            layout: config.layout.clone(),
        }
    }

    fn analyze_fio(&mut self, cloud: &CloudDetails, machine_type: &str) -> Result<()> {
        let log_dir = self.layout.log_dir(cloud);
        let runs = locate_runs(&log_dir, &cloud.cloud, &cloud.group, machine_type, RUN_PATTERN)?;
        let store = self.state.store_mut();
        for run in runs {
            log::info!("Analyzing {}", run.dir.display());
            let key = (machine_type.to_string(), cloud.group.clone());
            if store.is_stale(&key, run.modtime) {
                log::info!("Skipping fio log {} (already analyzed newer)", run.dir.display());
                continue;
            }
            store.upsert(key, parse_fio_run(&run)?);
        }
        Ok(())
    }
}

impl ResultsAnalyzer for FioAnalyzer {
    fn kind(&self) -> BenchmarkKind {
        BenchmarkKind::Fio
    }

    fn analyze(&mut self, cloud: &CloudDetails) -> Result<()> {
        self.state.begin(cloud)?;
        for_each_machine(cloud, |details, machine_type| {
            self.analyze_fio(details, machine_type)
        })
    }

    fn close(&mut self) -> Result<()> {
        let store = self.state.finish()?;
        let path = self
            .layout
            .results_file(BenchmarkKind::Fio.csv_file_name(), &self.state.provider);
        let provider = &self.state.provider;
        write_csv(
            &path,
            FIO_CSV_HEADER,
            store.all().flat_map(|(_, r)| r.csv_rows(provider)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
fn test_result() -> FioResult {
    let text = fs::read_to_string("../tests/benchlog/fio/fio-results.json").unwrap();
    let report = parse_fio_report(&text).unwrap();
    FioResult {
        machine_type: "c5.2xlarge".to_string(),
        group: "ebs-gp3".to_string(),
        date: timestamp_from_unix(report.timestamp).unwrap(),
        jobs: report.jobs,
        modtime: rustutils::epoch(),
    }
}

#[test]
fn test_parse_fio_report() {
    let r = test_result();
    assert!(r.jobs.len() == 2);
    let j = &r.jobs[0];
    assert!(j.name == "read_8k");
    assert!(j.block_size() == "8k");
    assert!(j.iodepth() == "64");
    assert!(j.read.total_ios == 1200000);
    assert!(j.read.runtime_ms == 60000);
    assert!((j.read.iops() - 20000.0).abs() < 1e-9);
    assert!((j.read.bandwidth_kib() - 160000.0).abs() < 1e-9);
    assert!(j.read.clat.percentile("99.990000") == 4620288);
    // Missing percentile defaults to zero
    assert!(j.read.clat.percentile("99.900000") == 0);

    // Write side had no operations: no percentiles, zero runtime
    assert!(j.write.total_ios == 0);
    assert!(j.write.iops() == 0.0);
    assert!(j.write.bandwidth_kib() == 0.0);
    assert!(j.write.clat.percentile("90.000000") == 0);

    // No iodepth option
    assert!(r.jobs[1].iodepth() == "1");
}

#[test]
fn test_rates_with_zero_runtime() {
    let s = IoStats {
        total_ios: 5000,
        io_bytes: 5000 * 4096,
        runtime_ms: 0,
        ..Default::default()
    };
    assert!(s.iops() == 0.0);
    assert!(s.bandwidth_kib() == 0.0);
    assert!(!s.iops().is_nan());
}

#[test]
fn test_fio_csv_rows() {
    let r = test_result();
    let rows = r.csv_rows("aws");
    let ncols = FIO_CSV_HEADER.split(',').count();
    assert!(ncols == 37);
    assert!(rows.len() == 2);
    for row in &rows {
        assert!(row.len() == ncols);
    }
    let row = &rows[0];
    assert_eq!(row[0..7], ["aws", "ebs-gp3", "c5.2xlarge", "2022-01-10 07:33:17 UTC", "read_8k", "8k", "64"]);
    assert_eq!(row[7], "1200000");
    assert_eq!(row[8], "20000.000");
    assert_eq!(row[10], "160000.000000");
    assert_eq!(row[15], "3555328");
    assert_eq!(row[18], "0");
    assert_eq!(row[21], "0.000");
    assert_eq!(row[33], "64.00");
    assert_eq!(row[35], "100.00");
}

#[test]
fn test_parse_fio_errors() {
    assert!(parse_fio_report("{\"jobs\": 5}").is_err());
    assert!(parse_fio_report("not json").is_err());
    assert!(parse_fio_report("{}").unwrap().jobs.is_empty());
}
