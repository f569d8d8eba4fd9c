/// Compile-once regular expressions for the log parsers.

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

/// The regex in `cell`, compiling `pattern` into it on first use.

pub fn cached_regex<'a>(cell: &'a OnceLock<Regex>, pattern: &str) -> Result<&'a Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern).with_context(|| format!("Bad regular expression {pattern}"))?;
    Ok(cell.get_or_init(|| re))
}

#[test]
fn test_cached_regex() {
    static RE: OnceLock<Regex> = OnceLock::new();
    let a = cached_regex(&RE, r"^(\d+)$").unwrap();
    assert!(a.is_match("123"));
    // The cell keeps the first compilation
    let b = cached_regex(&RE, r"^x$").unwrap();
    assert!(b.is_match("456"));

    static BAD: OnceLock<Regex> = OnceLock::new();
    assert!(cached_regex(&BAD, r"(").is_err());
    assert!(BAD.get().is_none());
}
