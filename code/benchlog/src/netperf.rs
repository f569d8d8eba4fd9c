/// Network benchmark: netperf, between two nodes in the same availability zone or between two
/// regions.
///
/// A run directory (`intra-az-netperf-results.*` or `cross-region-netperf-results.*`) holds the
/// free-text log of the driver script, named `<mode>-netperf-results.log`, and the throughput time
/// series plot `netperf_draw_plot_overall.svg`.  The plot is produced last, so a run without it is
/// broken even if it has the success marker.
///
/// The log has two parts.  First the latency test, a netperf TCP_RR run whose output ends with a
/// line of seven figures, directly followed by the banner that starts the throughput test:
///
///    44           56.27        62           98           3249         14.58        17752.067
///    ********** start multistream_netperf.sh 2022-01-10 07:35:12 ************
///
/// The figures are min, mean, p90, p99, max and stddev of the latency in microseconds, and the
/// transaction rate.  The banner carries the start time of the throughput test.  Then comes the
/// multistream throughput test, which is summarized as
///
///    NUMBER_OF_STREAM=16 DURATION=60
///    ...
///    Minimum throughput: 4621.41 Mbits/s
///    Average throughput: 4811.02 Mbits/s
///    Maximum throughput: 4992.53 Mbits/s
///
/// All figures are reported as found in the log (after checking that they are numbers).

use crate::analyzer::{for_each_machine, AnalyzerState, BenchmarkKind, ResultsAnalyzer};
use crate::csvout::write_csv;
use crate::layout::{AnalysisConfig, ReportLayout};
use crate::locator::{find_files, locate_runs, RunLocation};
use crate::regexes::cached_regex;
use crate::store::Timestamped;

use anyhow::{bail, Context, Result};
use regex::Regex;
use rustutils::{CloudDetails, Timestamp};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const NET_CSV_HEADER: &str = "testMode,Cloud,DateTime(Zulu),MachineType,DiskType,ClientRegion,ServerRegion,\
MinThrpt,MeanThrpt,MaxThrpt,ThrptUnit,ExpectedThrpt,#Streams,\
RecvBufferSize(bytes),SendBufferSize(bytes),ThrptTestDuration(seconds),LatTestDuration(seconds),\
minLat(microseconds),meanLat(microseconds),p90Lat(microseconds),p99Lat(microseconds),maxLat(microseconds),\
LastStdDev,TxnRate,ThrptTimeSeriesPlotPath";

pub const PLOT_FILE: &str = "netperf_draw_plot_overall.svg";

const LOG_PATTERN: &str = "*-netperf-result*";

// Fixed by the driver script.
const LATENCY_TEST_DURATION: &str = "60";
const BUFFER_SIZE: &str = "32000000";

// The expected throughput is filled in by hand in the spreadsheet.
const EXPECTED_THROUGHPUT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    IntraAz,
    CrossRegion,
}

impl TestMode {
    pub fn name(&self) -> &'static str {
        match self {
            TestMode::IntraAz => "intra-az",
            TestMode::CrossRegion => "cross-region",
        }
    }

    pub fn kind(&self) -> BenchmarkKind {
        match self {
            TestMode::IntraAz => BenchmarkKind::IntraAzNet,
            TestMode::CrossRegion => BenchmarkKind::CrossRegionNet,
        }
    }

    fn run_pattern(&self) -> String {
        format!("{}-netperf-results.*", self.name())
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The regions the cross-region tests run between (the client runs in the first).  The intra-az
/// tests run in the client region.

pub fn regions_for(provider: &str) -> (&'static str, &'static str) {
    match provider {
        "azure" => ("eastus", "westus2"),
        "aws" => ("us-east-1", "us-west-2"),
        "gce" => ("us-east4", "us-west1"),
        _ => ("", ""),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    pub min: String,
    pub mean: String,
    pub p90: String,
    pub p99: String,
    pub max: String,
    pub stddev: String,
    pub txn_rate: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThroughputStats {
    pub streams: String,
    pub duration: String,
    pub min: String,
    pub mean: String,
    pub max: String,
    pub unit: String,
}

#[derive(Debug, Clone)]
pub struct NetworkResult {
    pub test_mode: TestMode,
    pub machine_type: String,
    pub disk_type: String,
    pub client_region: String,
    pub server_region: String,
    pub date_time: String,
    pub latency: LatencyStats,
    pub throughput: ThroughputStats,
    pub plot_path: PathBuf,
    pub modtime: Timestamp,
}

impl Timestamped for NetworkResult {
    fn modtime(&self) -> Timestamp {
        self.modtime
    }
}

impl NetworkResult {
    fn csv_row(&self, cloud: &str) -> Vec<String> {
        let t = &self.throughput;
        let l = &self.latency;
        vec![
            self.test_mode.name().to_string(),
            cloud.to_string(),
            self.date_time.clone(),
            self.machine_type.clone(),
            self.disk_type.clone(),
            self.client_region.clone(),
            self.server_region.clone(),
            t.min.clone(),
            t.mean.clone(),
            t.max.clone(),
            t.unit.clone(),
            EXPECTED_THROUGHPUT.to_string(),
            t.streams.clone(),
            BUFFER_SIZE.to_string(),
            BUFFER_SIZE.to_string(),
            t.duration.clone(),
            LATENCY_TEST_DURATION.to_string(),
            l.min.clone(),
            l.mean.clone(),
            l.p90.clone(),
            l.p99.clone(),
            l.max.clone(),
            l.stddev.clone(),
            l.txn_rate.clone(),
            self.plot_path.to_string_lossy().to_string(),
        ]
    }
}

static LATENCY_RE: OnceLock<Regex> = OnceLock::new();
static THROUGHPUT_RE: OnceLock<Regex> = OnceLock::new();
static START_TIME_RE: OnceLock<Regex> = OnceLock::new();

const LATENCY_PATTERN: &str = r"(.+)\s\*{10} start multistream_netperf.sh";
const THROUGHPUT_PATTERN: &str = r"NUMBER_OF_STREAM=(.+)[\s]+DURATION=(.+)[\S\s]+Minimum throughput:\s(.+)[\s]+Average throughput:\s(.+)[\s]+Maximum throughput:\s(.+)[\s]+";
const START_TIME_PATTERN: &str = r"start multistream_netperf.sh (.+)\*{12}";

fn number(text: &str, field: &str) -> Result<String> {
    let t = text.trim();
    if t.parse::<f64>().is_err() {
        bail!("Field {field} is not a number: {:?}", t);
    }
    Ok(t.to_string())
}

pub fn parse_netperf_latency(content: &str) -> Result<LatencyStats> {
    let line = match cached_regex(&LATENCY_RE, LATENCY_PATTERN)?.captures(content) {
        Some(c) => c[1].to_string(),
        None => bail!("Can't find target line to get latency"),
    };
    let f = line.split_whitespace().collect::<Vec<&str>>();
    if f.len() < 7 {
        bail!("Length of the latency result is less than 7: {:?}", line);
    }
    Ok(LatencyStats {
        min: number(f[0], "minLat")?,
        mean: number(f[1], "meanLat")?,
        p90: number(f[2], "p90Lat")?,
        p99: number(f[3], "p99Lat")?,
        max: number(f[4], "maxLat")?,
        stddev: number(f[5], "LastStdDev")?,
        txn_rate: number(f[6], "TxnRate")?,
    })
}

pub fn parse_netperf_throughput(content: &str) -> Result<ThroughputStats> {
    let c = match cached_regex(&THROUGHPUT_RE, THROUGHPUT_PATTERN)?.captures(content) {
        Some(c) => c,
        None => bail!("Can't find target line to get throughput"),
    };
    let captured = (1..c.len())
        .filter_map(|i| c.get(i).map(|m| m.as_str().trim()))
        .collect::<Vec<&str>>();
    if captured.len() < 5 {
        bail!("Length of throughput result is less than 5: {:?}", captured);
    }
    let min_parts = captured[2].split(' ').collect::<Vec<&str>>();
    if min_parts.len() < 2 {
        bail!("No unit for the minimum throughput: {:?}", captured[2]);
    }
    let first = |s: &str| s.split(' ').next().unwrap_or("").to_string();
    Ok(ThroughputStats {
        streams: number(captured[0], "#Streams")?,
        duration: number(captured[1], "ThrptTestDuration")?,
        min: number(min_parts[0], "MinThrpt")?,
        mean: number(&first(captured[3]), "MeanThrpt")?,
        max: number(&first(captured[4]), "MaxThrpt")?,
        unit: min_parts[1].to_string(),
    })
}

pub fn parse_start_time(content: &str) -> Result<String> {
    match cached_regex(&START_TIME_RE, START_TIME_PATTERN)?.captures(content) {
        Some(c) => Ok(c[1].trim().to_string()),
        None => bail!("Can't find target line to get the time"),
    }
}

/// Parse the text of a netperf log.  The error names the part of the log that's broken; the
/// caller adds the file name.

pub fn parse_netperf_text(content: &str) -> Result<(LatencyStats, ThroughputStats, String)> {
    let latency = parse_netperf_latency(content)?;
    let throughput = parse_netperf_throughput(content)?;
    let start = parse_start_time(content)?;
    Ok((latency, throughput, start))
}

pub fn parse_netperf_log(path: &Path) -> Result<(LatencyStats, ThroughputStats, String)> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Cannot open {}", path.display()))?;
    parse_netperf_text(&content).with_context(|| format!("In netperf log {}", path.display()))
}

pub fn parse_netperf_run(
    run: &RunLocation,
    test_mode: TestMode,
    layout: &ReportLayout,
) -> Result<NetworkResult> {
    let logs = find_files(&run.dir, LOG_PATTERN)?;
    if logs.len() != 1 {
        bail!(
            "Unexpected number of netperf runs found in {}: expected 1, found {}",
            run.dir.display(),
            logs.len()
        );
    }
    let plot = run.dir.join(PLOT_FILE);
    if !plot.is_file() {
        bail!("SVG path for the time series {} doesn't exist", plot.display());
    }
    let (latency, throughput, date_time) = parse_netperf_log(&logs[0])?;
    let (client_region, server_region) = regions_for(&run.cloud);
    Ok(NetworkResult {
        test_mode,
        machine_type: run.machine_type.clone(),
        disk_type: run.group.clone(),
        client_region: client_region.to_string(),
        server_region: server_region.to_string(),
        date_time,
        latency,
        throughput,
        plot_path: layout.report_relative(&plot),
        modtime: run.modtime,
    })
}

pub struct NetAnalyzer {
    test_mode: TestMode,
    state: AnalyzerState<(String, String), NetworkResult>,
    layout: ReportLayout,
}

impl NetAnalyzer {
    pub fn new(provider: &str, test_mode: TestMode, config: &AnalysisConfig) -> NetAnalyzer {
        NetAnalyzer {
            test_mode,
            state: AnalyzerState::new(test_mode.kind(), provider),
            layout: config.layout.clone(),
        }
    }

    fn analyze_network(&mut self, cloud: &CloudDetails, machine_type: &str) -> Result<()> {
        let log_dir = self.layout.log_dir(cloud);
        let pattern = self.test_mode.run_pattern();
        let runs = locate_runs(&log_dir, &cloud.cloud, &cloud.group, machine_type, &pattern)?;
        let test_mode = self.test_mode;
        let layout = &self.layout;
        let store = self.state.store_mut();
        for run in runs {
            log::info!("Analyzing {}", run.dir.display());
            let key = (machine_type.to_string(), cloud.group.clone());
            if store.is_stale(&key, run.modtime) {
                log::info!(
                    "Skipping {test_mode} network log {} (already analyzed newer)",
                    run.dir.display()
                );
                continue;
            }
            store.upsert(key, parse_netperf_run(&run, test_mode, layout)?);
        }
        Ok(())
    }
}

impl ResultsAnalyzer for NetAnalyzer {
    fn kind(&self) -> BenchmarkKind {
        self.test_mode.kind()
    }

    fn analyze(&mut self, cloud: &CloudDetails) -> Result<()> {
        self.state.begin(cloud)?;
        for_each_machine(cloud, |details, machine_type| {
            self.analyze_network(details, machine_type)
        })
    }

    fn close(&mut self) -> Result<()> {
        let store = self.state.finish()?;
        let path = self
            .layout
            .results_file(self.test_mode.kind().csv_file_name(), &self.state.provider);
        let provider = &self.state.provider;
        write_csv(&path, NET_CSV_HEADER, store.all().map(|(_, r)| r.csv_row(provider)))
            .with_context(|| format!("{} net", self.test_mode))?;
        Ok(())
    }
}

#[test]
fn test_parse_netperf_log() {
    let dir = Path::new("../tests/benchlog/netperf/intra-az-netperf-results.20220110");
    let (latency, throughput, start) =
        parse_netperf_log(&dir.join("intra-az-netperf-results.log")).unwrap();
    assert_eq!(
        latency,
        LatencyStats {
            min: "44".to_string(),
            mean: "56.27".to_string(),
            p90: "62".to_string(),
            p99: "98".to_string(),
            max: "3249".to_string(),
            stddev: "14.58".to_string(),
            txn_rate: "17752.067".to_string(),
        }
    );
    assert_eq!(
        throughput,
        ThroughputStats {
            streams: "16".to_string(),
            duration: "60".to_string(),
            min: "4621.41".to_string(),
            mean: "4811.02".to_string(),
            max: "4992.53".to_string(),
            unit: "Mbits/s".to_string(),
        }
    );
    assert_eq!(start, "2022-01-10 07:35:12");
}

#[test]
fn test_netperf_missing_marker() {
    let path = Path::new("../tests/benchlog/netperf/no-marker.log");
    let r = parse_netperf_log(path);
    assert!(r.is_err());
    let msg = format!("{:#}", r.unwrap_err());
    assert!(msg.contains("no-marker.log"));
    assert!(msg.contains("latency"));
}

#[test]
fn test_netperf_short_latency_line() {
    let text = "44 56.27 62\n********** start multistream_netperf.sh 2022-01-10 ************\n";
    let err = parse_netperf_latency(text).unwrap_err();
    assert!(err.to_string().contains("less than 7"));
    assert!(parse_netperf_latency("a b c d e f g\n********** start multistream_netperf.sh x").is_err());
}

#[test]
fn test_netperf_throughput_errors() {
    let no_unit = "NUMBER_OF_STREAM=16 DURATION=60\n\
                   Minimum throughput: 4621.41\n\
                   Average throughput: 4811.02 Mbits/s\n\
                   Maximum throughput: 4992.53 Mbits/s\n";
    assert!(parse_netperf_throughput(no_unit).is_err());
    assert!(parse_netperf_throughput("NUMBER_OF_STREAM=16 DURATION=60\n").is_err());
}

#[test]
fn test_parse_netperf_run() {
    let layout = ReportLayout::new("../tests/benchlog", "netperf");
    let dir = PathBuf::from("../tests/benchlog/netperf/intra-az-netperf-results.20220110");
    let run = RunLocation {
        cloud: "gce".to_string(),
        group: "pd-ssd".to_string(),
        machine_type: "n2-standard-8".to_string(),
        dir,
        modtime: rustutils::epoch(),
    };
    let r = parse_netperf_run(&run, TestMode::IntraAz, &layout).unwrap();
    assert!(r.client_region == "us-east4" && r.server_region == "us-west1");
    assert_eq!(
        r.plot_path,
        PathBuf::from("intra-az-netperf-results.20220110/netperf_draw_plot_overall.svg")
    );
    let row = r.csv_row("gce");
    assert!(row.len() == NET_CSV_HEADER.split(',').count());
    assert_eq!(row[0], "intra-az");
    assert_eq!(row[11], "unknown");
    assert_eq!(row[12], "16");
    assert_eq!(row[16], "60");
    assert_eq!(row[23], "17752.067");

    // Without the plot the run is broken
    let run = RunLocation {
        dir: PathBuf::from("../tests/benchlog/netperf/cross-region-netperf-results.noplot"),
        ..run
    };
    let err = parse_netperf_run(&run, TestMode::CrossRegion, &layout).unwrap_err();
    assert!(err.to_string().contains(PLOT_FILE));
}
