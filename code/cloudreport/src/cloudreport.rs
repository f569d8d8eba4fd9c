/// `cloudreport` -- Analyze the benchmark logs of a cloud report
///
/// Run with --help for brief help.
///
/// The logs must already have been fetched from the benchmark machines into the report tree,
///
///   <output-dir>/<report-version>/<cloud>/<group>/logs/<machine-type>/<run dir>/...
///
/// and the reports are written to
///
///   <output-dir>/<report-version>/results/<cloud>/<kind>.csv
///
/// Every report of the selected kinds is rewritten from scratch on every run, for every provider
/// named in the cloud configurations.
///
/// Logging goes to stderr at level "info", or "debug" with --verbose; RUST_LOG overrides this as
/// usual.

use anyhow::{bail, Result};
use benchlog::{analyze_results, AnalysisConfig, BenchmarkKind, ReportLayout};
use clap::{Args, Parser, Subcommand};
use std::process;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Analyze the benchmark logs and write the CSV reports
    Analyze(AnalyzeCmdArgs),
}

#[derive(Args, Debug)]
pub struct AnalyzeCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Also report TPC-C runs that the driver marked as failed
    #[arg(long, default_value_t = false)]
    include_tpcc_fail: bool,

    /// Analyze only this benchmark kind, one of cpu, fio, intra-az, cross-region, tpcc
    /// (repeatable) [default: all]
    #[arg(long, value_parser = parse_kind)]
    kind: Vec<BenchmarkKind>,

    /// Print debugging information to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Cloud configuration file, a JSON array of cloud details (repeatable)
    #[arg(long, short = 'd', required = true)]
    cloud_details: Vec<String>,

    /// Report version, the directory below the output directory [default: today, as YYYYMMDD]
    #[arg(long, short = 'r', value_parser = parse_report_version)]
    report_version: Option<String>,

    /// Root directory of the report tree
    #[arg(long, short = 'o', default_value = "./report-data")]
    output_dir: String,
}

// As for the other arg parsers, the error need not include the string, clap adds it.

fn parse_kind(s: &str) -> Result<BenchmarkKind> {
    BenchmarkKind::from_str(s)
}

fn parse_report_version(s: &str) -> Result<String> {
    if s.is_empty() || s == "." || s == ".." || s.contains('/') {
        bail!("Report version must be a plain directory name")
    }
    Ok(s.to_string())
}

fn main() {
    match cloudreport() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn cloudreport() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            // Syntax: space-separated keyword(value) components, the keyword "cloudreport"
            // always first.
            println!("cloudreport version({})", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Analyze(ref analyze_args) => {
            init_logging(analyze_args.verbose);
            analyze(analyze_args)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn analysis_config(args: &AnalyzeCmdArgs) -> AnalysisConfig {
    let report_version = args
        .source_args
        .report_version
        .clone()
        .unwrap_or_else(rustutils::default_report_version);
    let layout = ReportLayout::new(&args.source_args.output_dir, &report_version);
    let mut config = AnalysisConfig::new(layout);
    config.include_tpcc_fail = args.include_tpcc_fail;
    if !args.kind.is_empty() {
        config.kinds = vec![];
        for k in &args.kind {
            if !config.kinds.contains(k) {
                config.kinds.push(*k);
            }
        }
    }
    config
}

fn analyze(args: &AnalyzeCmdArgs) -> Result<()> {
    let clouds = rustutils::read_all_cloud_details(&args.source_args.cloud_details)?;
    if clouds.is_empty() {
        log::warn!(
            "No cloud configurations in {}",
            args.source_args.cloud_details.join(", ")
        );
    }
    let config = analysis_config(args);
    log::info!(
        "Analyzing {} cloud configurations in {}",
        clouds.len(),
        config.layout.version_dir().display()
    );
    analyze_results(&config, &clouds)
}

#[test]
fn test_parse_args() {
    let cli = Cli::try_parse_from([
        "cloudreport",
        "analyze",
        "-d",
        "aws.json",
        "-d",
        "gce.json",
        "-r",
        "20220213",
        "--kind",
        "tpcc",
        "--kind",
        "cpu",
        "--kind",
        "tpcc",
        "--include-tpcc-fail",
    ])
    .unwrap();
    let args = match cli.command {
        Commands::Analyze(a) => a,
        _ => panic!("Expected analyze"),
    };
    assert_eq!(args.source_args.cloud_details, vec!["aws.json", "gce.json"]);
    assert!(args.source_args.output_dir == "./report-data");
    let config = analysis_config(&args);
    assert!(config.include_tpcc_fail);
    assert_eq!(config.kinds, vec![BenchmarkKind::Tpcc, BenchmarkKind::Cpu]);
    assert_eq!(
        config.layout.version_dir(),
        std::path::PathBuf::from("./report-data/20220213")
    );
}

#[test]
fn test_parse_args_errors() {
    // -d is required
    assert!(Cli::try_parse_from(["cloudreport", "analyze"]).is_err());
    assert!(Cli::try_parse_from(["cloudreport", "analyze", "-d", "x.json", "--kind", "iperf"]).is_err());
    assert!(Cli::try_parse_from(["cloudreport", "analyze", "-d", "x.json", "-r", "a/b"]).is_err());

    let cli = Cli::try_parse_from(["cloudreport", "analyze", "-d", "x.json"]).unwrap();
    if let Commands::Analyze(args) = cli.command {
        let config = analysis_config(&args);
        assert!(config.kinds == BenchmarkKind::ALL.to_vec());
        assert!(!config.include_tpcc_fail);
    } else {
        panic!("Expected analyze");
    }
}

#[test]
fn test_analyze_command() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = Cli::try_parse_from([
        "cloudreport",
        "analyze",
        "-d",
        "../tests/rustutils/cloud-details.json",
        "-o",
        tmp.path().to_str().unwrap(),
        "-r",
        "v1",
        "--kind",
        "cpu",
    ])
    .unwrap();
    if let Commands::Analyze(args) = cli.command {
        analyze(&args).unwrap();
    }
    for provider in ["aws", "gce"] {
        let p = tmp.path().join("v1/results").join(provider).join("cpu.csv");
        assert_eq!(
            std::fs::read_to_string(p).unwrap(),
            format!("{}\n", benchlog::CPU_CSV_HEADER)
        );
    }
    assert!(!tmp.path().join("v1/results/aws/fio.csv").exists());
}
