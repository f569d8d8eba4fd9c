/// The analyzers turn the logs for one cloud provider into one report per benchmark kind.
///
/// An analyzer is bound to a provider when it is created.  It is then fed the cloud
/// configurations for that provider one at a time (there may be several, eg one per disk type),
/// and for each it analyzes every machine type, accumulating results in its store.  Finally it is
/// closed, which writes the report.  The life cycle is
///
///   uninitialized --analyze--> active --close--> closed
///
/// and a closed analyzer can't be used again.

use crate::layout::AnalysisConfig;
use crate::store::{ResultStore, Timestamped};
use crate::{coremark, fio, netperf, tpcc};

use anyhow::{bail, Context, Result};
use rustutils::CloudDetails;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BenchmarkKind {
    Cpu,
    Fio,
    IntraAzNet,
    CrossRegionNet,
    Tpcc,
}

impl BenchmarkKind {
    pub const ALL: [BenchmarkKind; 5] = [
        BenchmarkKind::Cpu,
        BenchmarkKind::IntraAzNet,
        BenchmarkKind::CrossRegionNet,
        BenchmarkKind::Fio,
        BenchmarkKind::Tpcc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BenchmarkKind::Cpu => "cpu",
            BenchmarkKind::Fio => "fio",
            BenchmarkKind::IntraAzNet => "intra-az",
            BenchmarkKind::CrossRegionNet => "cross-region",
            BenchmarkKind::Tpcc => "tpcc",
        }
    }

    pub fn csv_file_name(&self) -> &'static str {
        match self {
            BenchmarkKind::Cpu => "cpu.csv",
            BenchmarkKind::Fio => "fio.csv",
            BenchmarkKind::IntraAzNet => "intra-az-net.csv",
            BenchmarkKind::CrossRegionNet => "cross-region-net.csv",
            BenchmarkKind::Tpcc => "tpcc.csv",
        }
    }
}

impl fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BenchmarkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<BenchmarkKind> {
        for k in BenchmarkKind::ALL {
            if k.name() == s {
                return Ok(k);
            }
        }
        bail!("Unknown benchmark kind '{s}'")
    }
}

pub trait ResultsAnalyzer {
    fn kind(&self) -> BenchmarkKind;

    /// Analyze every machine type of `cloud`, stopping at the first error.
    fn analyze(&mut self, cloud: &CloudDetails) -> Result<()>;

    /// Write the report.  The analyzer can't be used after this.
    fn close(&mut self) -> Result<()>;
}

/// Create the analyzer of the given kind for the given provider.

pub fn new_analyzer(
    kind: BenchmarkKind,
    provider: &str,
    config: &AnalysisConfig,
) -> Box<dyn ResultsAnalyzer> {
    match kind {
        BenchmarkKind::Cpu => Box::new(coremark::CoremarkAnalyzer::new(provider, config)),
        BenchmarkKind::Fio => Box::new(fio::FioAnalyzer::new(provider, config)),
        BenchmarkKind::IntraAzNet => Box::new(netperf::NetAnalyzer::new(
            provider,
            netperf::TestMode::IntraAz,
            config,
        )),
        BenchmarkKind::CrossRegionNet => Box::new(netperf::NetAnalyzer::new(
            provider,
            netperf::TestMode::CrossRegion,
            config,
        )),
        BenchmarkKind::Tpcc => Box::new(tpcc::TpccAnalyzer::new(provider, config)),
    }
}

/// The provider binding and life cycle shared by all the analyzers.  The store is allocated on
/// the first analyze().

pub struct AnalyzerState<K, R> {
    pub kind: BenchmarkKind,
    pub provider: String,
    store: Option<ResultStore<K, R>>,
    closed: bool,
}

impl<K: Ord + fmt::Debug, R: Timestamped> AnalyzerState<K, R> {
    pub fn new(kind: BenchmarkKind, provider: &str) -> AnalyzerState<K, R> {
        AnalyzerState {
            kind,
            provider: provider.to_string(),
            store: None,
            closed: false,
        }
    }

    /// Check that `cloud` can be analyzed by this analyzer and return the store.
    pub fn begin(&mut self, cloud: &CloudDetails) -> Result<&mut ResultStore<K, R>> {
        if self.is_closed() {
            bail!("The {} analyzer for {} is already closed", self.kind, self.provider);
        }
        if cloud.cloud != self.provider {
            bail!(
                "Expected {} cloud, got {} ({} analyzer)",
                self.provider,
                cloud.cloud,
                self.kind
            );
        }
        Ok(self.store.get_or_insert_with(ResultStore::new))
    }

    pub fn store(&self) -> Option<&ResultStore<K, R>> {
        self.store.as_ref()
    }

    /// The store, for use after begin() has succeeded.
    pub fn store_mut(&mut self) -> &mut ResultStore<K, R> {
        self.store.get_or_insert_with(ResultStore::new)
    }

    /// Move to the closed state and return the store for the report.  An analyzer that never saw
    /// any configuration produces an empty store.
    pub fn finish(&mut self) -> Result<ResultStore<K, R>> {
        if self.is_closed() {
            bail!("The {} analyzer for {} is already closed", self.kind, self.provider);
        }
        self.closed = true;
        Ok(self.store.take().unwrap_or_default())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Apply `f` to every machine type of `cloud` in order, stopping at the first failure.  The
/// remaining machine types are not attempted: a failure usually means misconfiguration, and we
/// want to surface that rather than produce a partial report.

pub fn for_each_machine<F>(cloud: &CloudDetails, mut f: F) -> Result<()>
where
    F: FnMut(&CloudDetails, &str) -> Result<()>,
{
    for machine_type in cloud.machine_type_names() {
        f(cloud, machine_type).with_context(|| {
            format!("{}/{} machine type {machine_type}", cloud.cloud, cloud.group)
        })?;
    }
    Ok(())
}

#[cfg(test)]
fn test_cloud(provider: &str, machines: &[&str]) -> CloudDetails {
    let mut c = CloudDetails {
        cloud: provider.to_string(),
        group: "g".to_string(),
        ..Default::default()
    };
    for m in machines {
        c.machine_types.insert(m.to_string(), Default::default());
    }
    c
}

#[test]
fn test_kind_names() {
    for k in BenchmarkKind::ALL {
        assert!(BenchmarkKind::from_str(k.name()).unwrap() == k);
    }
    assert!(BenchmarkKind::from_str("iperf").is_err());
    assert!(BenchmarkKind::CrossRegionNet.csv_file_name() == "cross-region-net.csv");
}

#[test]
fn test_for_each_machine_fails_fast() {
    let cloud = test_cloud("aws", &["a", "b", "c"]);
    let mut seen = vec![];
    let r = for_each_machine(&cloud, |_, m| {
        seen.push(m.to_string());
        if m == "b" {
            bail!("broken")
        }
        Ok(())
    });
    assert!(r.is_err());
    assert!(format!("{:#}", r.unwrap_err()).contains("machine type b"));
    assert_eq!(seen, vec!["a", "b"]);
}

#[test]
fn test_state_machine() {
    struct R;
    impl Timestamped for R {
        fn modtime(&self) -> rustutils::Timestamp {
            rustutils::epoch()
        }
    }
    let mut st = AnalyzerState::<String, R>::new(BenchmarkKind::Cpu, "aws");
    assert!(st.store().is_none());
    assert!(st.begin(&test_cloud("gce", &[])).is_err());
    assert!(st.store().is_none());
    st.begin(&test_cloud("aws", &[])).unwrap().upsert("k".to_string(), R);
    assert!(st.store().unwrap().len() == 1);
    assert!(st.finish().unwrap().len() == 1);
    assert!(st.is_closed());
    assert!(st.begin(&test_cloud("aws", &[])).is_err());
    assert!(st.finish().is_err());
}
