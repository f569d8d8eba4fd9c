/// The on-disk layout of a cloud report.
///
///   <output_dir>/<report_version>/<cloud>/<group>/logs/<machine-type>/<run dir>/...
///   <output_dir>/<report_version>/results/<cloud>/<kind>.csv
///
/// The logs are fetched from the benchmark machines by other tools; this library only reads them.

use crate::BenchmarkKind;

use rustutils::CloudDetails;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ReportLayout {
    pub output_dir: PathBuf,
    pub report_version: String,
}

impl ReportLayout {
    pub fn new(output_dir: impl Into<PathBuf>, report_version: &str) -> ReportLayout {
        ReportLayout {
            output_dir: output_dir.into(),
            report_version: report_version.to_string(),
        }
    }

    pub fn version_dir(&self) -> PathBuf {
        self.output_dir.join(&self.report_version)
    }

    pub fn base_path(&self, cloud: &CloudDetails) -> PathBuf {
        self.version_dir().join(&cloud.cloud).join(&cloud.group)
    }

    pub fn log_dir(&self, cloud: &CloudDetails) -> PathBuf {
        self.base_path(cloud).join("logs")
    }

    /// The directory is not created here, the CSV writer does that when it opens the file.
    pub fn results_file(&self, name: &str, provider: &str) -> PathBuf {
        self.version_dir().join("results").join(provider).join(name)
    }

    /// `p` relative to the version directory, or `p` itself if it is somewhere else.
    pub fn report_relative(&self, p: &Path) -> PathBuf {
        match p.strip_prefix(self.version_dir()) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => p.to_path_buf(),
        }
    }
}

/// Everything that controls an analysis pass.

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub layout: ReportLayout,

    /// Also report transactional-workload runs that the driver script moved aside as failed
    /// (the `.bak` result files).
    pub include_tpcc_fail: bool,

    /// The benchmark kinds to analyze, in order.
    pub kinds: Vec<BenchmarkKind>,
}

impl AnalysisConfig {
    pub fn new(layout: ReportLayout) -> AnalysisConfig {
        AnalysisConfig {
            layout,
            include_tpcc_fail: false,
            kinds: BenchmarkKind::ALL.to_vec(),
        }
    }
}

#[test]
fn test_layout() {
    let layout = ReportLayout::new("./report-data", "20220109");
    let cloud = CloudDetails {
        cloud: "aws".to_string(),
        group: "ebs-gp3".to_string(),
        ..Default::default()
    };
    assert_eq!(
        layout.log_dir(&cloud),
        PathBuf::from("./report-data/20220109/aws/ebs-gp3/logs")
    );
    assert_eq!(
        layout.base_path(&cloud),
        PathBuf::from("./report-data/20220109/aws/ebs-gp3")
    );
    assert_eq!(
        layout.results_file("fio.csv", "aws"),
        PathBuf::from("./report-data/20220109/results/aws/fio.csv")
    );
    let svg = layout
        .log_dir(&cloud)
        .join("c5-2xlarge/intra-az-netperf-results.x/netperf_draw_plot_overall.svg");
    assert_eq!(
        layout.report_relative(&svg),
        PathBuf::from("aws/ebs-gp3/logs/c5-2xlarge/intra-az-netperf-results.x/netperf_draw_plot_overall.svg")
    );
    assert_eq!(layout.report_relative(Path::new("/elsewhere/x.svg")), PathBuf::from("/elsewhere/x.svg"));
}
