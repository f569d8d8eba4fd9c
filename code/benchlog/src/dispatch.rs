/// Route cloud configurations to analyzers, and drive a complete analysis pass.
///
/// A PerCloudAnalyzer handles one benchmark kind for all providers.  It creates the analyzer for
/// a provider the first time it sees a configuration for that provider, and thereafter sends all
/// configurations for the provider to the same analyzer, so there is one store and one report per
/// (kind, provider).

use crate::analyzer::{new_analyzer, BenchmarkKind, ResultsAnalyzer};
use crate::layout::AnalysisConfig;

use anyhow::{Context, Result};
use rustutils::CloudDetails;
use std::collections::BTreeMap;

pub type AnalyzerFactory = Box<dyn Fn(&str) -> Box<dyn ResultsAnalyzer>>;

pub struct PerCloudAnalyzer {
    kind: BenchmarkKind,
    factory: AnalyzerFactory,
    analyzers: BTreeMap<String, Box<dyn ResultsAnalyzer>>,
}

impl PerCloudAnalyzer {
    pub fn new(kind: BenchmarkKind, factory: AnalyzerFactory) -> PerCloudAnalyzer {
        PerCloudAnalyzer {
            kind,
            factory,
            analyzers: BTreeMap::new(),
        }
    }

    /// The dispatcher for the standard analyzer of `kind`.
    pub fn for_kind(kind: BenchmarkKind, config: &AnalysisConfig) -> PerCloudAnalyzer {
        let config = config.clone();
        PerCloudAnalyzer::new(
            kind,
            Box::new(move |provider: &str| new_analyzer(kind, provider, &config)),
        )
    }

    pub fn get_or_create(&mut self, provider: &str) -> &mut Box<dyn ResultsAnalyzer> {
        let kind = self.kind;
        let factory = &self.factory;
        self.analyzers
            .entry(provider.to_string())
            .or_insert_with(|| {
                log::debug!("Creating {kind} analyzer for {provider}");
                factory(provider)
            })
    }

    /// Close every analyzer, even if some fail.  Returns the first error.
    pub fn close_all(&mut self) -> Result<()> {
        let kind = self.kind;
        let mut first = Ok(());
        for (provider, analyzer) in self.analyzers.iter_mut() {
            let r = analyzer
                .close()
                .with_context(|| format!("Closing {kind} analyzer for {provider}"));
            if let Err(e) = r {
                if first.is_ok() {
                    first = Err(e);
                } else {
                    log::error!("{:#}", e);
                }
            }
        }
        first
    }
}

impl ResultsAnalyzer for PerCloudAnalyzer {
    fn kind(&self) -> BenchmarkKind {
        self.kind
    }

    fn analyze(&mut self, cloud: &CloudDetails) -> Result<()> {
        self.get_or_create(&cloud.cloud).analyze(cloud)
    }

    fn close(&mut self) -> Result<()> {
        self.close_all()
    }
}

fn analyze_clouds(dispatchers: &mut [PerCloudAnalyzer], clouds: &[CloudDetails]) -> Result<()> {
    for cloud in clouds {
        for d in dispatchers.iter_mut() {
            let kind = d.kind();
            d.analyze(cloud)
                .with_context(|| format!("{kind} analysis of {}/{}", cloud.cloud, cloud.group))?;
        }
    }
    Ok(())
}

/// Analyze the logs of every configuration in `clouds` for every kind in `config.kinds`, and
/// write the reports.
///
/// Analysis stops at the first error, but every report that has been started is still written.
/// An analysis error is returned in preference to a report error.

pub fn analyze_results(config: &AnalysisConfig, clouds: &[CloudDetails]) -> Result<()> {
    let mut dispatchers = config
        .kinds
        .iter()
        .map(|kind| PerCloudAnalyzer::for_kind(*kind, config))
        .collect::<Vec<PerCloudAnalyzer>>();

    let analyzed = analyze_clouds(&mut dispatchers, clouds);

    let mut closed = Ok(());
    for d in dispatchers.iter_mut() {
        if let Err(e) = d.close_all() {
            if closed.is_ok() {
                closed = Err(e);
            } else {
                log::error!("{:#}", e);
            }
        }
    }

    if let Err(e) = analyzed {
        if let Err(close_err) = closed {
            log::error!("{:#}", close_err);
        }
        return Err(e);
    }
    closed
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rustutils::CloudDetails;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    pub fn cloud(provider: &str, group: &str, machines: &[&str]) -> CloudDetails {
        let mut c = CloudDetails {
            cloud: provider.to_string(),
            group: group.to_string(),
            ..Default::default()
        };
        for m in machines {
            c.machine_types.insert(m.to_string(), Default::default());
        }
        c
    }

    // Copy the files of fixture directory `from` into `to` and mark the run complete at `secs`.
    pub fn install_run(from: &str, to: &Path, secs: u64) {
        fs::create_dir_all(to).unwrap();
        for entry in fs::read_dir(from).unwrap() {
            let p = entry.unwrap().path();
            if p.is_file() {
                fs::copy(&p, to.join(p.file_name().unwrap())).unwrap();
            }
        }
        let marker = to.join("success");
        fs::write(&marker, "").unwrap();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        fs::File::options()
            .write(true)
            .open(&marker)
            .unwrap()
            .set_modified(t)
            .unwrap();
    }
}

#[cfg(test)]
use crate::layout::ReportLayout;

#[cfg(test)]
fn read_report(path: &std::path::Path) -> Vec<Vec<String>> {
    let text = std::fs::read_to_string(path).unwrap();
    text.lines()
        .map(|l| l.split(',').map(|s| s.to_string()).collect())
        .collect()
}

#[test]
fn test_analyze_results() {
    use crate::coremark::CPU_CSV_HEADER;
    use crate::fio::FIO_CSV_HEADER;
    use crate::tpcc::TPCC_CSV_HEADER;

    let tmp = tempfile::tempdir().unwrap();
    let layout = ReportLayout::new(tmp.path(), "20220213");
    let aws = fixtures::cloud("aws", "ebs-gp3", &["c5.2xlarge", "m5.4xlarge"]);
    let mdir = layout.log_dir(&aws).join("c5-2xlarge");
    fixtures::install_run("../tests/benchlog/coremark/good", &mdir.join("coremark-results.1"), 1000);
    fixtures::install_run("../tests/benchlog/fio", &mdir.join("fio-results.1"), 1000);
    fixtures::install_run(
        "../tests/benchlog/tpcc/tpcc-results.20220213.133806-125-3",
        &mdir.join("tpcc-results.20220213.133806-125-3"),
        1000,
    );

    let mut config = AnalysisConfig::new(layout.clone());
    config.kinds = vec![BenchmarkKind::Cpu, BenchmarkKind::Fio, BenchmarkKind::Tpcc];
    analyze_results(&config, &[aws.clone()]).unwrap();

    let cpu_path = layout.results_file("cpu.csv", "aws");
    let cpu = read_report(&cpu_path);
    assert!(cpu.len() == 2);
    assert_eq!(cpu[0].join(","), CPU_CSV_HEADER);
    assert_eq!(cpu[1][0..4], ["aws", "1970-01-01 00:16:40 UTC", "c5.2xlarge", "4"]);

    let fio = read_report(&layout.results_file("fio.csv", "aws"));
    assert!(fio.len() == 3);
    let ncols = FIO_CSV_HEADER.split(',').count();
    assert!(fio.iter().all(|row| row.len() == ncols));

    let tpcc = read_report(&layout.results_file("tpcc.csv", "aws"));
    assert!(tpcc.len() == 2);
    assert!(tpcc[1].len() == TPCC_CSV_HEADER.split(',').count());

    // Running again over the same tree gives the same reports
    let before = std::fs::read_to_string(&cpu_path).unwrap();
    analyze_results(&config, &[aws.clone()]).unwrap();
    assert_eq!(std::fs::read_to_string(&cpu_path).unwrap(), before);

    // Failed tpcc runs on request
    config.include_tpcc_fail = true;
    analyze_results(&config, &[aws]).unwrap();
    let tpcc = read_report(&layout.results_file("tpcc.csv", "aws"));
    assert!(tpcc.len() == 3);
    assert!(tpcc[1][6] == "true" && tpcc[2][6] == "false");
}

#[test]
fn test_newest_run_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = ReportLayout::new(tmp.path(), "v");
    let aws = fixtures::cloud("aws", "ebs-gp3", &["c5.2xlarge"]);
    let mdir = layout.log_dir(&aws).join("c5-2xlarge");
    // The run that sorts first is the newest
    fixtures::install_run("../tests/benchlog/coremark/good", &mdir.join("coremark-results.a"), 2000);
    fixtures::install_run("../tests/benchlog/coremark/mismatch", &mdir.join("coremark-results.b"), 1000);

    let mut config = AnalysisConfig::new(layout.clone());
    config.kinds = vec![BenchmarkKind::Cpu];
    analyze_results(&config, &[aws]).unwrap();
    let cpu = read_report(&layout.results_file("cpu.csv", "aws"));
    assert!(cpu.len() == 2);
    assert_eq!(cpu[1][1], "1970-01-01 00:33:20 UTC");
}

#[test]
fn test_analysis_error_still_writes_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = ReportLayout::new(tmp.path(), "v");
    let aws = fixtures::cloud("aws", "ebs-gp3", &["c5.2xlarge"]);
    let gce = fixtures::cloud("gce", "pd-ssd", &["n2-standard-8"]);
    fixtures::install_run(
        "../tests/benchlog/coremark/mismatch",
        &layout.log_dir(&gce).join("n2-standard-8/coremark-results.1"),
        1000,
    );

    let mut config = AnalysisConfig::new(layout.clone());
    config.kinds = vec![BenchmarkKind::Cpu, BenchmarkKind::Fio];
    let err = analyze_results(&config, &[aws, gce]).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("cpu analysis of gce/pd-ssd"));
    assert!(msg.contains("n2-standard-8"));

    // aws was complete before the failure, gce was started
    assert!(layout.results_file("cpu.csv", "aws").exists());
    assert!(layout.results_file("fio.csv", "aws").exists());
    assert!(layout.results_file("cpu.csv", "gce").exists());
    // fio never saw gce
    assert!(!layout.results_file("fio.csv", "gce").exists());
}

#[test]
fn test_reanalyze_through_dispatcher() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = ReportLayout::new(tmp.path(), "v");
    let aws = fixtures::cloud("aws", "ebs-gp3", &["c5.2xlarge"]);
    let mdir = layout.log_dir(&aws).join("c5-2xlarge");
    fixtures::install_run("../tests/benchlog/coremark/good", &mdir.join("coremark-results.1"), 1000);
    fixtures::install_run("../tests/benchlog/fio", &mdir.join("fio-results.1"), 1000);
    let config = AnalysisConfig::new(layout.clone());

    for kind in [BenchmarkKind::Cpu, BenchmarkKind::Fio] {
        let mut d = PerCloudAnalyzer::for_kind(kind, &config);
        d.analyze(&aws).unwrap();
        d.analyze(&aws).unwrap();
        d.close().unwrap();
    }
    // One row per stored result, no duplicates from the second pass
    assert!(read_report(&layout.results_file("cpu.csv", "aws")).len() == 2);
    assert!(read_report(&layout.results_file("fio.csv", "aws")).len() == 3);
}

#[cfg(test)]
mod fake {
    use crate::analyzer::{BenchmarkKind, ResultsAnalyzer};
    use anyhow::{bail, Result};
    use rustutils::CloudDetails;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub type Log = Rc<RefCell<Vec<String>>>;

    pub struct FakeAnalyzer {
        pub provider: String,
        pub log: Log,
        pub fail_close: bool,
    }

    impl ResultsAnalyzer for FakeAnalyzer {
        fn kind(&self) -> BenchmarkKind {
            BenchmarkKind::Cpu
        }

        fn analyze(&mut self, cloud: &CloudDetails) -> Result<()> {
            self.log.borrow_mut().push(format!("analyze {} {}", self.provider, cloud.group));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.log.borrow_mut().push(format!("close {}", self.provider));
            if self.fail_close {
                bail!("cannot close {}", self.provider)
            }
            Ok(())
        }
    }
}

#[test]
fn test_one_analyzer_per_provider() {
    let log = fake::Log::default();
    let created = log.clone();
    let mut d = PerCloudAnalyzer::new(
        BenchmarkKind::Cpu,
        Box::new(move |provider: &str| -> Box<dyn ResultsAnalyzer> {
            created.borrow_mut().push(format!("create {provider}"));
            Box::new(fake::FakeAnalyzer {
                provider: provider.to_string(),
                log: created.clone(),
                fail_close: provider != "gce",
            })
        }),
    );
    d.analyze(&fixtures::cloud("aws", "ebs-gp3", &[])).unwrap();
    d.analyze(&fixtures::cloud("gce", "pd-ssd", &[])).unwrap();
    d.analyze(&fixtures::cloud("aws", "ebs-io2", &[])).unwrap();
    d.analyze(&fixtures::cloud("azure", "premium", &[])).unwrap();

    // Everything is closed, the first failure is reported
    let err = d.close().unwrap_err();
    assert!(format!("{:#}", err).contains("cannot close aws"));
    assert_eq!(
        *log.borrow(),
        vec![
            "create aws",
            "analyze aws ebs-gp3",
            "create gce",
            "analyze gce pd-ssd",
            "analyze aws ebs-io2",
            "create azure",
            "analyze azure premium",
            "close aws",
            "close azure",
            "close gce",
        ]
    );
}
