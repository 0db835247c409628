//! Console progress lines and the optional JSON report.

use crate::driver::CommandResult;
use crate::suite::SuiteSummary;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

const RULE_WIDTH: usize = 50;
/// Captured output is echoed to the console up to this many characters.
const OUTPUT_PREVIEW_CHARS: usize = 2000;

pub fn suite_banner(out: &mut dyn Write, mode: &str) -> Result<()> {
    writeln!(out, "[i] Running elinOS test suite ({mode})")?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    Ok(())
}

pub fn case_header(out: &mut dyn Write, index: usize, total: usize, command: &str) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "[{index}/{total}] Test: {command}")?;
    Ok(())
}

pub fn sending(out: &mut dyn Write, command: &str) -> Result<()> {
    writeln!(out, "[i] Sending command: {command}")?;
    Ok(())
}

pub fn case_outcome(
    out: &mut dyn Write,
    result: &CommandResult,
    expected: Option<&str>,
) -> Result<()> {
    if result.timed_out {
        writeln!(
            out,
            "[x] Timeout waiting for command '{}' to complete",
            result.command
        )?;
    } else if result.session_ended {
        writeln!(out, "[x] Console session ended unexpectedly")?;
    } else {
        writeln!(out, "[i] Output: {}", preview(result.output.trim()))?;
        if let (false, Some(expected)) = (result.matched, expected) {
            writeln!(out, "[x] Expected '{expected}' not found in output")?;
        }
    }
    if result.matched {
        writeln!(out, "[o] PASS")?;
    } else {
        writeln!(out, "[x] FAIL")?;
    }
    Ok(())
}

pub fn summary(out: &mut dyn Write, summary: &SuiteSummary) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "[i] Test Results:")?;
    writeln!(out, "   Passed: {}", summary.passed)?;
    writeln!(out, "   Failed: {}", summary.failed)?;
    match summary.success_rate() {
        Some(rate) => writeln!(out, "   Success Rate: {rate:.1}%")?,
        None => writeln!(out, "   Success Rate: n/a (no cases ran)")?,
    }
    Ok(())
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(OUTPUT_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Machine-readable run record written by `--report-json`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub mode: &'a str,
    pub passed: usize,
    pub failed: usize,
    pub success_rate: Option<f64>,
    pub success: bool,
    pub results: &'a [CommandResult],
}

impl<'a> RunReport<'a> {
    pub fn new(mode: &'a str, summary: &'a SuiteSummary) -> Self {
        Self {
            mode,
            passed: summary.passed,
            failed: summary.failed,
            success_rate: summary.success_rate(),
            success: summary.all_passed(),
            results: &summary.results,
        }
    }
}

pub fn write_json_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to encode report")?;
    fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))
}
