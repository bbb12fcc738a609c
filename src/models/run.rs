//! Run result models
//!
//! Defines run outcomes and per-batch summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DbId, TestCase};

/// Outcome of running one test case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
    /// Killed after exceeding the per-test timeout
    Abort,
    /// The interpreter could not be started
    Error,
}

impl RunStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            RunStatus::Pass => "✓",
            RunStatus::Fail => "✗",
            RunStatus::Abort => "⧖",
            RunStatus::Error => "!",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pass => "PASS",
            RunStatus::Fail => "FAIL",
            RunStatus::Abort => "ABORT",
            RunStatus::Error => "ERROR",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Pass)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single test execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub test_case: TestCase,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(test_case: TestCase, status: RunStatus, duration_ms: u64) -> Self {
        Self {
            test_case,
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            started_at: Utc::now(),
        }
    }

    pub fn error(test_case: TestCase, message: impl Into<String>) -> Self {
        Self::new(test_case, RunStatus::Error, 0).with_output(String::new(), message.into())
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn test_id(&self) -> Option<DbId> {
        self.test_case.id()
    }
}

impl fmt::Display for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.test_case,
            self.duration_ms
        )?;
        if let Some(code) = self.exit_code {
            if !self.status.is_success() {
                write!(f, " - exit {code}")?;
            }
        }
        Ok(())
    }
}

/// Summary of one batch (or one local run)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub label: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub results: Vec<RunRecord>,
}

impl RunSummary {
    pub fn new(label: impl Into<String>, results: Vec<RunRecord>) -> Self {
        let count = |status: RunStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            label: label.into(),
            total: results.len(),
            passed: count(RunStatus::Pass),
            failed: count(RunStatus::Fail),
            aborted: count(RunStatus::Abort),
            errors: count(RunStatus::Error),
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
        }
    }

    /// Fold several batch summaries into one
    pub fn merge(label: impl Into<String>, summaries: Vec<RunSummary>) -> Self {
        let results = summaries.into_iter().flat_map(|s| s.results).collect();
        Self::new(label, results)
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.passed == self.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.label)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Abort: {} | Error: {}",
            self.total, self.passed, self.failed, self.aborted, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
