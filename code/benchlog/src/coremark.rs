/// CPU benchmark: coremark.
///
/// A coremark run directory holds one log per coremark process, `single-N.log` for the
/// single-threaded runs and `multi-N.log` for the multi-threaded runs.  The last line of each log
/// is the summary, `/`-separated:
///
///    CoreMark 1.0 : 24301.336574 / GCC9.3.0 -O2 -DPERFORMANCE_RUN=1  -lrt / Heap
///    CoreMark 1.0 : 96437.209688 / GCC9.3.0 -O2 -DMULTITHREAD=4 ... -lrt / Heap / 4:Fork
///
/// The iterations/sec figure follows the first colon of the first segment.  The fourth segment, if
/// present, starts with the number of cores that were used; it defaults to 1.
///
/// The score for a set of logs is the mean of the iterations/sec figures.  All the logs in a set
/// must report the same number of cores.

use crate::analyzer::{for_each_machine, AnalyzerState, BenchmarkKind, ResultsAnalyzer};
use crate::csvout::write_csv;
use crate::layout::{AnalysisConfig, ReportLayout};
use crate::locator::{find_files, locate_runs, RunLocation};
use crate::store::Timestamped;

use anyhow::{bail, Context, Result};
use rustutils::{format_timestamp, CloudDetails, Timestamp};
use std::fs;
use std::path::{Path, PathBuf};

pub const CPU_CSV_HEADER: &str = "Cloud,Date,MachineType,Cores,Single,Multi,Multi/vCPU";

const RUN_PATTERN: &str = "coremark-results.*";

#[derive(Debug, Clone, PartialEq)]
pub struct CpuResult {
    pub machine_type: String,
    pub group: String,
    pub cores: u64,
    pub single: f64,
    pub multi: f64,
    pub modtime: Timestamp,
}

impl Timestamped for CpuResult {
    fn modtime(&self) -> Timestamp {
        self.modtime
    }
}

impl CpuResult {
    pub fn multi_per_vcpu(&self) -> f64 {
        self.multi / self.cores as f64
    }

    fn csv_row(&self, cloud: &str) -> Vec<String> {
        vec![
            cloud.to_string(),
            format_timestamp(&self.modtime),
            self.machine_type.clone(),
            format!("{}", self.cores),
            format!("{:.6}", self.single),
            format!("{:.6}", self.multi),
            format!("{:.6}", self.multi_per_vcpu()),
        ]
    }
}

/// Parse a coremark summary line into (cores, iterations/sec).

pub fn parse_coremark_line(line: &str) -> Result<(u64, f64)> {
    let segments = line.split('/').collect::<Vec<&str>>();
    let iters_text = match segments[0].split(':').nth(1) {
        Some(s) => s.trim(),
        None => bail!("Expected 'CoreMark <version> : <iterations>' in {:?}", line.trim()),
    };
    let iters = iters_text
        .parse::<f64>()
        .with_context(|| format!("Error parsing iterations {:?}", iters_text))?;
    let cores = if let Some(seg) = segments.get(3) {
        let cores_text = seg.split(':').next().unwrap_or("").trim();
        let n = cores_text
            .parse::<u64>()
            .with_context(|| format!("Error parsing core count {:?}", cores_text))?;
        if n == 0 {
            bail!("Core count must be positive in {:?}", line.trim());
        }
        n
    } else {
        1
    };
    Ok((cores, iters))
}

pub fn parse_coremark_log(p: &Path) -> Result<(u64, f64)> {
    let text = fs::read_to_string(p).with_context(|| format!("Cannot read {}", p.display()))?;
    let last = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    parse_coremark_line(last).with_context(|| format!("In coremark log {}", p.display()))
}

/// The core count and mean iterations/sec across `logs`.

pub fn parse_coremark_population(logs: &[PathBuf]) -> Result<(u64, f64)> {
    if logs.is_empty() {
        bail!("No coremark logs to parse");
    }
    let mut cores: Option<u64> = None;
    let mut total_iters = 0.0;
    for log in logs {
        let (nc, iters) = parse_coremark_log(log)?;
        match cores {
            None => cores = Some(nc),
            Some(c) if c != nc => bail!(
                "Expected same number of cores ({c}), found {nc} in {}",
                log.display()
            ),
            Some(_) => {}
        }
        total_iters += iters;
    }
    Ok((cores.unwrap_or(1), total_iters / logs.len() as f64))
}

pub fn parse_coremark_run(run: &RunLocation) -> Result<CpuResult> {
    let singles = find_files(&run.dir, "single-*.log")?;
    let (_, single) = parse_coremark_population(&singles)
        .with_context(|| format!("Single-thread logs in {}", run.dir.display()))?;
    let multis = find_files(&run.dir, "multi-*.log")?;
    let (cores, multi) = parse_coremark_population(&multis)
        .with_context(|| format!("Multi-thread logs in {}", run.dir.display()))?;
    Ok(CpuResult {
        machine_type: run.machine_type.clone(),
        group: run.group.clone(),
        cores,
        single,
        multi,
        modtime: run.modtime,
    })
}

pub struct CoremarkAnalyzer {
    state: AnalyzerState<(String, String), CpuResult>,
    layout: ReportLayout,
}

impl CoremarkAnalyzer {
    pub fn new(provider: &str, config: &AnalysisConfig) -> CoremarkAnalyzer {
        CoremarkAnalyzer {
            state: AnalyzerState::new(BenchmarkKind::Cpu, provider),
            layout: config.layout.clone(),
        }
    }

    fn analyze_cpu(&mut self, cloud: &CloudDetails, machine_type: &str) -> Result<()> {
        let log_dir = self.layout.log_dir(cloud);
        let runs = locate_runs(&log_dir, &cloud.cloud, &cloud.group, machine_type, RUN_PATTERN)?;
        let store = self.state.store_mut();
        for run in runs {
            log::info!("Analyzing {}", run.dir.display());
            let key = (machine_type.to_string(), cloud.group.clone());
            if store.is_stale(&key, run.modtime) {
                log::info!(
                    "Skipping coremark log {} (already analyzed newer)",
                    run.dir.display()
                );
                continue;
            }
            store.upsert(key, parse_coremark_run(&run)?);
        }
        Ok(())
    }
}

impl ResultsAnalyzer for CoremarkAnalyzer {
    fn kind(&self) -> BenchmarkKind {
        BenchmarkKind::Cpu
    }

    fn analyze(&mut self, cloud: &CloudDetails) -> Result<()> {
        self.state.begin(cloud)?;
        for_each_machine(cloud, |details, machine_type| {
            self.analyze_cpu(details, machine_type)
        })
    }

    fn close(&mut self) -> Result<()> {
        let store = self.state.finish()?;
        let path = self
            .layout
            .results_file(BenchmarkKind::Cpu.csv_file_name(), &self.state.provider);
        let provider = &self.state.provider;
        write_csv(&path, CPU_CSV_HEADER, store.all().map(|(_, r)| r.csv_row(provider)))?;
        Ok(())
    }
}

#[test]
fn test_parse_coremark_line() {
    let (cores, iters) =
        parse_coremark_line("CoreMark 1.0 : 24301.336574 / GCC9.3.0 -O2 -DPERFORMANCE_RUN=1  -lrt / Heap")
            .unwrap();
    assert!(cores == 1);
    assert!(iters == 24301.336574);

    let (cores, iters) = parse_coremark_line(
        "CoreMark 1.0 : 96437.209688 / GCC9.3.0 -O2 -DMULTITHREAD=4 -DUSE_FORK -DPERFORMANCE_RUN=1  -lrt / Heap / 4:Fork\n",
    )
    .unwrap();
    assert!(cores == 4);
    assert!(iters == 96437.209688);

    assert!(parse_coremark_line("Correct operation validated.").is_err());
    assert!(parse_coremark_line("CoreMark 1.0 : fast / GCC / Heap").is_err());
    assert!(parse_coremark_line("CoreMark 1.0 : 1.0 / GCC / Heap / many:Fork").is_err());
    assert!(parse_coremark_line("CoreMark 1.0 : 1.0 / GCC / Heap / 0:Fork").is_err());
}

#[test]
fn test_parse_coremark_zero_cores() {
    // A zero core count can't slip past the consistency check in either position
    let tmp = tempfile::tempdir().unwrap();
    let zero = tmp.path().join("multi-0.log");
    let four = tmp.path().join("multi-1.log");
    fs::write(&zero, "CoreMark 1.0 : 100.0 / GCC9.3.0 -O2 / Heap / 0:Fork\n").unwrap();
    fs::write(&four, "CoreMark 1.0 : 100.0 / GCC9.3.0 -O2 / Heap / 4:Fork\n").unwrap();

    let err = parse_coremark_population(&[zero.clone(), four.clone()]).unwrap_err();
    assert!(format!("{:#}", err).contains("multi-0.log"));
    assert!(parse_coremark_population(&[four.clone(), zero.clone()]).is_err());
    assert!(parse_coremark_population(&[zero]).is_err());
    assert!(parse_coremark_population(&[four]).unwrap() == (4, 100.0));
}

#[test]
fn test_parse_coremark_population() {
    let dir = Path::new("../tests/benchlog/coremark/good");
    let singles = find_files(dir, "single-*.log").unwrap();
    assert!(singles.len() == 2);
    let (cores, single) = parse_coremark_population(&singles).unwrap();
    assert!(cores == 1);
    assert!((single - 24500.0).abs() < 1e-9);

    let multis = find_files(dir, "multi-*.log").unwrap();
    let (cores, multi) = parse_coremark_population(&multis).unwrap();
    assert!(cores == 4);
    assert!((multi - 97000.0).abs() < 1e-9);

    assert!(parse_coremark_population(&[]).is_err());
}

#[test]
fn test_parse_coremark_core_mismatch() {
    let dir = Path::new("../tests/benchlog/coremark/mismatch");
    let multis = find_files(dir, "multi-*.log").unwrap();
    let err = parse_coremark_population(&multis).unwrap_err();
    assert!(err.to_string().contains("Expected same number of cores"));
    assert!(err.to_string().contains("multi-1.log"));
}

#[test]
fn test_cpu_csv_row() {
    let r = CpuResult {
        machine_type: "c5.2xlarge".to_string(),
        group: "ebs-gp3".to_string(),
        cores: 4,
        single: 24500.0,
        multi: 97000.0,
        modtime: rustutils::timestamp_from_unix(1644759486).unwrap(),
    };
    assert_eq!(
        r.csv_row("aws"),
        vec![
            "aws",
            "2022-02-13 13:38:06 UTC",
            "c5.2xlarge",
            "4",
            "24500.000000",
            "97000.000000",
            "24250.000000"
        ]
    );
}
