// Locate, parse and report the logs of cloud benchmark runs.
//
// The logs have been fetched from the benchmark machines into a report tree (see layout.rs).  For
// each benchmark kind and cloud provider the analysis finds the completed runs, parses their
// artifacts, keeps the newest result per key, and writes one CSV report.

mod analyzer;
mod coremark;
mod csvout;
mod dispatch;
mod fio;
mod layout;
mod locator;
mod netperf;
mod regexes;
mod store;
mod tpcc;

// The benchmark kinds, and the interface to the analyzer for each.

pub use analyzer::new_analyzer;
pub use analyzer::BenchmarkKind;
pub use analyzer::ResultsAnalyzer;

// Run every selected analyzer over every cloud configuration, and write the reports.

pub use dispatch::analyze_results;
pub use dispatch::AnalyzerFactory;
pub use dispatch::PerCloudAnalyzer;

// Where things are in the report tree, and the options for an analysis pass.

pub use layout::AnalysisConfig;
pub use layout::ReportLayout;

// Find the run directories that are marked as complete.

pub use locator::find_successful_runs;
pub use locator::format_machine_type;
pub use locator::locate_runs;
pub use locator::RunLocation;

// The newest-wins result store.

pub use store::ResultStore;
pub use store::Timestamped;

// Write a CSV report.

pub use csvout::write_csv;

// The parsers, one per benchmark.

pub use coremark::parse_coremark_population;
pub use coremark::parse_coremark_run;
pub use coremark::CpuResult;
pub use fio::parse_fio_report;
pub use fio::parse_fio_run;
pub use fio::FioReport;
pub use fio::FioResult;
pub use netperf::parse_netperf_log;
pub use netperf::parse_netperf_run;
pub use netperf::NetworkResult;
pub use netperf::TestMode;
pub use tpcc::parse_tpcc_run;
pub use tpcc::run_key_from_path;
pub use tpcc::TpccResult;
pub use tpcc::TpccRun;
pub use tpcc::TpccRunKey;

// The report headers.

pub use coremark::CPU_CSV_HEADER;
pub use fio::FIO_CSV_HEADER;
pub use netperf::NET_CSV_HEADER;
pub use tpcc::TPCC_CSV_HEADER;
