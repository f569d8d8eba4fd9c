/// A ResultStore holds the latest parsed result for each key.
///
/// The analysis is run repeatedly over a log tree that grows as new runs are fetched, and several
/// runs can map to the same key (say, a benchmark that was re-run on the same machine type).  The
/// store keeps the newest: an incoming result replaces the stored one only if its timestamp is
/// strictly newer.  Because of the strictness, re-analyzing an unchanged tree leaves the store
/// unchanged.
///
/// There is no removal.  Iteration is in key order, which makes the reports stable from run to
/// run.
///
/// The store is not synchronized; it is owned by one analyzer and updated from one thread.

use rustutils::Timestamp;
use std::collections::btree_map::{self, BTreeMap};

/// A result that knows the modification time of the artifact it was parsed from.

pub trait Timestamped {
    fn modtime(&self) -> Timestamp;
}

pub struct ResultStore<K, R> {
    results: BTreeMap<K, R>,
}

impl<K: Ord + std::fmt::Debug, R: Timestamped> ResultStore<K, R> {
    pub fn new() -> ResultStore<K, R> {
        ResultStore {
            results: BTreeMap::new(),
        }
    }

    /// True if a result for `key` at time `t` would be discarded by upsert().  This allows the
    /// analyzers to avoid parsing artifacts they already have.
    pub fn is_stale(&self, key: &K, t: Timestamp) -> bool {
        match self.get(key) {
            Some(r) => r.modtime() >= t,
            None => false,
        }
    }

    /// Insert `result` if it's the first for `key` or newer than the one we have, otherwise drop
    /// it.  Returns true if the result was stored.
    pub fn upsert(&mut self, key: K, result: R) -> bool {
        match self.results.entry(key) {
            btree_map::Entry::Vacant(e) => {
                e.insert(result);
                true
            }
            btree_map::Entry::Occupied(mut e) => {
                if result.modtime() > e.get().modtime() {
                    e.insert(result);
                    true
                } else {
                    log::info!(
                        "Skipping result for {:?} from {} (already analyzed newer)",
                        e.key(),
                        result.modtime()
                    );
                    false
                }
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&R> {
        self.results.get(key)
    }

    pub fn all(&self) -> impl Iterator<Item = (&K, &R)> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<K: Ord + std::fmt::Debug, R: Timestamped> Default for ResultStore<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[derive(Debug, PartialEq)]
struct TestResult {
    t: Timestamp,
    tag: &'static str,
}

#[cfg(test)]
impl Timestamped for TestResult {
    fn modtime(&self) -> Timestamp {
        self.t
    }
}

#[cfg(test)]
fn at(secs: i64, tag: &'static str) -> TestResult {
    TestResult {
        t: rustutils::timestamp_from_unix(secs).unwrap(),
        tag,
    }
}

#[test]
fn test_newest_wins() {
    let mut store = ResultStore::<String, TestResult>::new();
    assert!(store.upsert("m".to_string(), at(100, "R1")));
    assert!(store.upsert("m".to_string(), at(200, "R2")));
    assert!(!store.upsert("m".to_string(), at(150, "R3")));
    assert!(store.len() == 1);
    assert!(store.get(&"m".to_string()).unwrap().tag == "R2");
}

#[test]
fn test_equal_time_is_stale() {
    let mut store = ResultStore::<String, TestResult>::new();
    assert!(store.upsert("m".to_string(), at(100, "R1")));
    assert!(!store.upsert("m".to_string(), at(100, "again")));
    assert!(store.get(&"m".to_string()).unwrap().tag == "R1");
    assert!(store.is_stale(&"m".to_string(), rustutils::timestamp_from_unix(100).unwrap()));
    assert!(!store.is_stale(&"m".to_string(), rustutils::timestamp_from_unix(101).unwrap()));
    assert!(!store.is_stale(&"n".to_string(), rustutils::timestamp_from_unix(1).unwrap()));
}

#[test]
fn test_keys_are_independent_and_ordered() {
    let mut store = ResultStore::<(String, String), TestResult>::new();
    store.upsert(("m5".to_string(), "gp3".to_string()), at(100, "a"));
    store.upsert(("c5".to_string(), "gp3".to_string()), at(50, "b"));
    store.upsert(("c5".to_string(), "io2".to_string()), at(10, "c"));
    let tags = store.all().map(|(_, r)| r.tag).collect::<Vec<&str>>();
    assert_eq!(tags, vec!["b", "c", "a"]);
}
