use super::{default_term, HarnessConfig};
use crate::suite::SuiteMode;
use clap::Parser;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn parse(args: &[&str]) -> HarnessConfig {
    let mut argv = vec!["elinos-harness"];
    argv.extend_from_slice(args);
    HarnessConfig::parse_from(argv)
}

fn unique_case_file(body: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = env::temp_dir().join(format!(
        "elinos_harness_cases_{}_{nanos}.yaml",
        std::process::id()
    ));
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn defaults_match_documented_values() {
    let cfg = parse(&[]);
    assert_eq!(cfg.timeout_secs, 30);
    assert_eq!(cfg.boot_timeout_secs, 60);
    assert_eq!(cfg.marker, "elinOS>");
    assert_eq!(cfg.shutdown_command, "shutdown");
    assert_eq!(cfg.shutdown_grace_secs, 10);
    assert_eq!(cfg.settle_ms, 1000);
    assert_eq!(cfg.mode, SuiteMode::Full);
    assert!(!cfg.strip_ansi);
    assert!(cfg.report_json.is_none());
}

#[test]
fn accepts_defaults() {
    let mut cfg = parse(&["--launch", "make run"]);
    assert!(cfg.validate().is_ok());
    assert!(cfg.workdir.is_absolute());
}

#[test]
fn rejects_timeouts_out_of_bounds() {
    let mut cfg = parse(&["--timeout", "0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--timeout", "3601"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--boot-timeout", "0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--shutdown-grace", "301"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--settle-ms", "60001"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_timeout_bounds() {
    let mut cfg = parse(&[
        "--launch",
        "make run",
        "--timeout",
        "1",
        "--boot-timeout",
        "3600",
        "--settle-ms",
        "0",
    ]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.command_timeout(), Duration::from_secs(1));
    assert_eq!(cfg.boot_timeout(), Duration::from_secs(3600));
    assert_eq!(cfg.settle_delay(), Duration::ZERO);
}

#[test]
fn rejects_empty_or_multiline_marker() {
    let mut cfg = parse(&["--launch", "make run", "--marker", ""]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--launch", "make run", "--marker", "a\nb"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--launch", "make run", "--shutdown-command", "halt\r"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_unparseable_launch_command() {
    let mut cfg = parse(&["--launch", "qemu 'unterminated"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--launch", "   "]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_missing_workdir() {
    let mut cfg = parse(&[
        "--launch",
        "make run",
        "--workdir",
        "/definitely/not/a/real/elinos/dir",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn ad_hoc_command_requires_verify_mode() {
    let mut cfg = parse(&["--launch", "make run", "--command", "version"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&[
        "--launch",
        "make run",
        "--mode",
        "verify",
        "--command",
        "version",
        "--expect",
        "elinOS",
    ]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn report_json_is_rejected_for_ad_hoc_command() {
    let mut cfg = parse(&[
        "--launch",
        "make run",
        "--mode",
        "verify",
        "--command",
        "version",
        "--report-json",
        "report.json",
    ]);
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("--report-json"));

    let mut cfg = parse(&["--launch", "make run", "--mode", "verify", "--report-json", "report.json"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn expect_requires_command() {
    let mut cfg = parse(&["--launch", "make run", "--mode", "verify", "--expect", "x"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn session_options_carry_cli_values() {
    let mut cfg = parse(&[
        "--launch",
        "qemu-system-riscv64 -machine virt -nographic",
        "--marker",
        "$ ",
        "--shutdown-command",
        "poweroff",
        "--shutdown-grace",
        "3",
        "--boot-timeout",
        "5",
        "--term",
        "vt100",
    ]);
    cfg.validate().unwrap();
    let options = cfg.session_options().unwrap();
    assert_eq!(options.program, "qemu-system-riscv64");
    assert_eq!(options.args, vec!["-machine", "virt", "-nographic"]);
    assert_eq!(options.marker, "$ ");
    assert_eq!(options.term, "vt100");
    assert_eq!(options.boot_timeout, Duration::from_secs(5));
    assert_eq!(options.shutdown.command, "poweroff");
    assert_eq!(options.shutdown.grace, Duration::from_secs(3));
    assert_eq!(options.working_dir, cfg.workdir);
}

#[test]
fn load_suite_uses_mode_table() {
    let cfg = parse(&["--mode", "quick"]);
    let cases = cfg.load_suite().unwrap();
    assert_eq!(cases, SuiteMode::Quick.cases());
    assert_eq!(cfg.suite_label(), "quick");
}

#[test]
fn load_suite_prefers_case_file() {
    let path = unique_case_file("cases:\n  - command: sync\n    expect: synced\n");
    let cfg = parse(&["--cases", path.to_str().unwrap()]);
    let cases = cfg.load_suite().unwrap();
    fs::remove_file(&path).ok();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].command, "sync");
    assert_eq!(cfg.suite_label(), "custom");
}

#[test]
fn load_suite_rejects_marker_as_expectation() {
    let path = unique_case_file("cases:\n  - command: ls\n    expect: \"elinOS>\"\n");
    let cfg = parse(&["--cases", path.to_str().unwrap()]);
    let result = cfg.load_suite();
    fs::remove_file(&path).ok();
    assert!(result.is_err());
}

#[test]
fn default_term_prefers_env() {
    static TERM_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = TERM_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
    let original = env::var("TERM").ok();
    env::set_var("TERM", "vt100");
    assert_eq!(default_term(), "vt100");
    env::remove_var("TERM");
    assert_eq!(default_term(), "xterm-256color");
    if let Some(value) = original {
        env::set_var("TERM", value);
    } else {
        env::remove_var("TERM");
    }
}
