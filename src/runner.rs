// src/runner.rs

//! Runs test files and suite directories in order against one context.

use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::base_request::Transport;
use crate::context::Context;
use crate::loader::{self, LoadError};
use crate::report;
use crate::script::Sandbox;
use crate::test_case::{Outcome, TestCase, TestResult};

/// Aggregate counters. `tests` counts executed tests only, so
/// `tests == passed + failed`; skipped tests are tallied separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub network_time_ms: u64,
    pub test_time_ms: u64,
}

impl RunStats {
    pub fn record(&mut self, result: &TestResult) {
        match result.outcome() {
            Outcome::Skipped => {
                self.skipped += 1;
                return;
            }
            Outcome::Passed => self.passed += 1,
            Outcome::Failed | Outcome::Unreachable => self.failed += 1,
        }
        self.tests += 1;
        self.bytes += result.bytes;
        self.network_time_ms += result.network_time_ms;
        self.test_time_ms += result.test_time_ms;
    }

    pub fn absorb(&mut self, other: &RunStats) {
        self.tests += other.tests;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
        self.network_time_ms += other.network_time_ms;
        self.test_time_ms += other.test_time_ms;
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Outcome of one file or suite directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathReport {
    pub path: PathBuf,
    pub stats: RunStats,
    pub results: Vec<TestResult>,
    /// A failing `stopOnFail` test cut the run short.
    pub stopped: bool,
}

impl PathReport {
    fn new(path: &Path) -> Self {
        PathReport {
            path: path.to_path_buf(),
            stats: RunStats::default(),
            results: Vec::new(),
            stopped: false,
        }
    }
}

pub struct Runner<T> {
    transport: T,
    sandbox: Sandbox,
    stats: RunStats,
    results: Vec<TestResult>,
}

impl<T: Transport> Runner<T> {
    pub fn new(transport: T) -> Self {
        Runner {
            transport,
            sandbox: Sandbox::new(),
            stats: RunStats::default(),
            results: Vec::new(),
        }
    }

    /// Totals over everything run so far.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn run_path(&mut self, ctx: &mut Context, path: &Path) -> Result<PathReport, LoadError> {
        if path.is_dir() {
            self.run_suite(ctx, path).await
        } else {
            self.run_file(ctx, path).await
        }
    }

    pub async fn run_file(&mut self, ctx: &mut Context, path: &Path) -> Result<PathReport, LoadError> {
        let cases = loader::load(path)?;
        let mut report = PathReport::new(path);
        self.run_cases(ctx, cases, &mut report).await;
        if report.stopped {
            log::info!(target: "apicheck", "   ~~~ Test has: stopOnFail=true; further tests stopped");
        }
        self.absorb(&report);
        Ok(report)
    }

    /// Runs every `*-test*`/`*test-*` file directly inside `dir`, in name
    /// order. A `stopOnFail` failure ends the whole suite.
    pub async fn run_suite(&mut self, ctx: &mut Context, dir: &Path) -> Result<PathReport, LoadError> {
        log::info!(target: "apicheck", "[Suite] {}", dir.display());
        let mut report = PathReport::new(dir);
        for file in suite_files(dir)? {
            log::info!(target: "apicheck", "[Suite] file {}", file.display());
            let cases = match loader::load(&file) {
                Ok(cases) => cases,
                Err(err) => {
                    self.absorb(&report);
                    return Err(err);
                }
            };
            self.run_cases(ctx, cases, &mut report).await;
            if report.stopped {
                log::info!(
                    target: "apicheck",
                    "   ~~~ Test has: stopOnFail=true; further tests stopped in suite"
                );
                break;
            }
        }
        log::info!(target: "apicheck", "[Suite] Complete {}", dir.display());
        self.absorb(&report);
        Ok(report)
    }

    async fn run_cases(&mut self, ctx: &mut Context, cases: Vec<TestCase>, report: &mut PathReport) {
        for mut case in cases {
            log::info!(target: "apicheck", "{}", report::banner_start(case.name()));
            case.execute(ctx, &self.transport, &self.sandbox).await;
            let result = case.result();

            let log_file = match (&ctx.log_dir, result.is_failure()) {
                (Some(dir), true) => {
                    match report::write_failure_log(dir, result, case.exchange(), &ctx.env) {
                        Ok(path) => Some(path),
                        Err(err) => {
                            log::error!(target: "apicheck", "cannot write failure log: {err}");
                            None
                        }
                    }
                }
                _ => None,
            };
            let banner = report::banner_result(result, log_file.as_deref());
            if result.is_failure() {
                log::error!(target: "apicheck", "{banner}");
            } else {
                log::info!(target: "apicheck", "{banner}");
            }

            report.stats.record(result);
            report.results.push(result.clone());
            if result.is_failure() && case.stops_on_fail() {
                report.stopped = true;
                break;
            }
        }
    }

    fn absorb(&mut self, report: &PathReport) {
        self.stats.absorb(&report.stats);
        self.results.extend(report.results.iter().cloned());
    }
}

/// Suite members, sorted lexicographically by file name.
pub fn suite_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| LoadError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file() && (name.contains("-test") || name.contains("test-")) {
            files.push(entry.into_path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skipped_tests_stay_out_of_the_total() {
        let mut stats = RunStats::default();
        stats.record(&TestResult {
            passed: true,
            ran: true,
            bytes: 10,
            ..Default::default()
        });
        stats.record(&TestResult {
            ran: true,
            errors: vec!["x".into()],
            ..Default::default()
        });
        stats.record(&TestResult {
            skipped: true,
            ..Default::default()
        });
        stats.record(&TestResult {
            transport_error: Some("refused".into()),
            ..Default::default()
        });
        assert_eq!(stats.tests, 3);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.tests, stats.passed + stats.failed);
        assert_eq!(stats.bytes, 10);
        assert!(!stats.all_passed());
    }

    #[test]
    fn suite_files_are_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b-test.json", "a-test.json", "test-c.yaml", "notes.json", "mytest.json"] {
            fs::write(dir.path().join(name), "[]").unwrap();
        }
        fs::create_dir(dir.path().join("z-test.d")).unwrap();
        let names: Vec<String> = suite_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a-test.json", "b-test.json", "test-c.yaml"]);
    }
}
