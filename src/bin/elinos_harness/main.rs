//! elinOS console harness entrypoint.
//!
//! Boots the target once, runs the selected case table over its serial console
//! and exits 0 only when every case passed. The console session is always shut
//! down before the process exits, including on interrupt and boot failure.

use anyhow::Result;
use elinos_harness::config::HarnessConfig;
use elinos_harness::driver::CommandDriver;
use elinos_harness::report::{self, RunReport};
use elinos_harness::session::{BootFailure, ConsoleSession};
use elinos_harness::signals::{install_interrupt_handlers, CancelToken};
use elinos_harness::suite::{Interrupted, SuiteMode, SuiteRunner, TestCase};
use elinos_harness::telemetry::init_tracing;
use elinos_harness::{init_logging, log_debug, log_file_path};
use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match HarnessConfig::parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[x] Invalid configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);
    init_tracing(&config);
    log_debug("=== elinOS harness started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            if err.is::<Interrupted>() {
                println!("\n[x] Test interrupted by user");
            } else {
                eprintln!("[x] {err:#}");
            }
            log_debug(&format!("run failed: {err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(config: &HarnessConfig) -> Result<bool> {
    install_interrupt_handlers()?;
    let cancel = CancelToken::from_signals();
    // Reject a bad case file before paying for a boot.
    let cases = config.load_suite()?;
    let options = config.session_options()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "[i] Starting elinOS: {}", config.launch)?;
    out.flush()?;
    let mut session = match ConsoleSession::spawn(&options, cancel.clone()) {
        Ok(session) => session,
        Err(BootFailure::Interrupted) => return Err(Interrupted.into()),
        Err(failure) => {
            writeln!(out, "[x] {failure}")?;
            tracing::error!(error = %failure, "boot failed");
            return Ok(false);
        }
    };
    writeln!(out, "[o] elinOS booted successfully")?;

    let runner = SuiteRunner::new(
        CommandDriver::new(config.strip_ansi),
        config.command_timeout(),
        config.settle_delay(),
        cancel,
    );

    let outcome = match (&config.command, config.mode) {
        (Some(command), SuiteMode::Verify) => runner.run_single(
            &mut session,
            command,
            config.expect.as_deref(),
            config.command_timeout(),
            &mut out,
        ),
        _ => run_suite(config, &runner, &mut session, &cases, &mut out),
    };

    writeln!(out, "[i] Shutting down elinOS...")?;
    out.flush()?;
    session.cleanup();
    drop(session);
    outcome
}

fn run_suite(
    config: &HarnessConfig,
    runner: &SuiteRunner,
    session: &mut ConsoleSession,
    cases: &[TestCase],
    out: &mut dyn Write,
) -> Result<bool> {
    let label = config.suite_label();
    report::suite_banner(out, label)?;
    let summary = runner.run_all(session, cases, out)?;
    report::summary(out, &summary)?;
    tracing::info!(
        suite = label,
        passed = summary.passed,
        failed = summary.failed,
        "test suite finished"
    );
    if let Some(path) = &config.report_json {
        report::write_json_report(path, &RunReport::new(label, &summary))?;
        writeln!(out, "[i] Report written to {}", path.display())?;
    }
    Ok(summary.all_passed())
}
