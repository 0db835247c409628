//! Case tables loaded from disk, for targets whose command set differs from
//! the built-in tables.
//!
//! ```yaml
//! cases:
//!   - command: touch aaa
//!     expect: Created file
//!   - command: ./hello_world
//!     expect: Hello World from C on elinOS!
//!     timeout_secs: 60
//!   - command: sync
//! ```
//!
//! JSON with the same shape is accepted too, since YAML is a superset of it.

use super::TestCase;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseFile {
    cases: Vec<CaseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseEntry {
    command: String,
    #[serde(default)]
    expect: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl From<CaseEntry> for TestCase {
    fn from(entry: CaseEntry) -> Self {
        TestCase {
            command: entry.command,
            expected: entry.expect,
            timeout: entry.timeout_secs.map(Duration::from_secs),
        }
    }
}

pub(super) fn parse_cases(text: &str) -> Result<Vec<TestCase>> {
    let file: CaseFile = serde_yaml::from_str(text).context("invalid case file")?;
    Ok(file.cases.into_iter().map(TestCase::from).collect())
}

/// Read a case table from `path`. Validation against the marker happens in the caller.
pub fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read case file {}", path.display()))?;
    parse_cases(&text).with_context(|| format!("in {}", path.display()))
}
