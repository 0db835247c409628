//! Built-in case tables for the elinOS console. Expected strings must match the
//! kernel's shell output byte for byte.

use super::TestCase;
use clap::ValueEnum;

/// Which built-in table to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SuiteMode {
    /// Every filesystem, program and system command check.
    Full,
    /// A short smoke run.
    Quick,
    /// One verification command.
    Verify,
}

impl SuiteMode {
    pub fn label(self) -> &'static str {
        match self {
            SuiteMode::Full => "full",
            SuiteMode::Quick => "quick",
            SuiteMode::Verify => "verify",
        }
    }

    pub fn cases(self) -> Vec<TestCase> {
        match self {
            SuiteMode::Full => full_suite(),
            SuiteMode::Quick => quick_suite(),
            SuiteMode::Verify => vec![verification_case()],
        }
    }
}

/// Order matters: later filesystem checks depend on files created earlier.
pub fn full_suite() -> Vec<TestCase> {
    vec![
        // Filesystem
        TestCase::expecting("ls", "Total files:"),
        TestCase::expecting("touch aaa", "Created file"),
        TestCase::expecting("ls", "FILE  aaa"),
        TestCase::expecting("rm aaa", "Removed file"),
        TestCase::expecting("touch ccc", "Created file"),
        TestCase::expecting("mkdir aaa", "Created directory"),
        TestCase::expecting("ls", "DIR   aaa"),
        TestCase::expecting("rmdir aaa", "Removed directory"),
        TestCase::expecting("rm ccc", "Removed file"),
        TestCase::expecting("cat test.txt", "This is a test file for the elinOS filesystem"),
        // ELF execution
        TestCase::expecting("./hello_world", "Hello World from C on elinOS!"),
        // System information
        TestCase::expecting("help", "Program Execution"),
        TestCase::expecting("memory", "Memory Regions"),
        TestCase::expecting("version", "elinOS"),
        TestCase::expecting("mmap", "Total mapped"),
        // Graphics
        TestCase::expecting("graphics", "Total pixels:"),
        TestCase::expecting("gfxtest", "ALL TESTS PASSED!"),
    ]
}

pub fn quick_suite() -> Vec<TestCase> {
    vec![
        TestCase::expecting("version", "elinOS"),
        TestCase::expecting("help", "Program Execution"),
        TestCase::expecting("touch x", "Created file"),
        TestCase::expecting("ls", "FILE  x"),
        TestCase::expecting("rm x", "Removed file"),
    ]
}

pub fn verification_case() -> TestCase {
    TestCase::expecting("version", "elinOS")
}
