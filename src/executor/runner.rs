//! Sequential test execution
//!
//! Runs test cases one at a time through the interpreter.

use chrono::Utc;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::RunContext;
use crate::models::{Batch, Interpreter, RunRecord, RunStatus, RunSummary, TestCase};
use crate::registry::RegistryError;
use crate::utils::Timer;

/// Run one test case. Never fails: problems end up in the record's status.
pub async fn execute(
    interpreter: &Interpreter,
    test_case: &TestCase,
    limit: Option<Duration>,
) -> RunRecord {
    let (program, args) = interpreter.command_for(test_case.locator());
    let started_at = Utc::now();
    let timer = Timer::start(test_case.locator());

    debug!("Running {} {}", program, args.join(" "));

    let child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return RunRecord::error(test_case.clone(), format!("failed to start {program}: {e}"))
                .with_started_at(started_at);
        }
    };

    let output = match limit {
        // Dropping the wait future kills the child
        Some(limit) => match timeout(limit, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_) => {
                warn!("{} timed out after {:?}", test_case, limit);
                return RunRecord::new(test_case.clone(), RunStatus::Abort, timer.elapsed_ms())
                    .with_started_at(started_at);
            }
        },
        None => child.wait_with_output().await,
    };

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            return RunRecord::error(test_case.clone(), format!("failed to wait for {program}: {e}"))
                .with_started_at(started_at);
        }
    };

    let status = match output.status.code() {
        Some(0) => RunStatus::Pass,
        Some(_) => RunStatus::Fail,
        // Terminated by a signal
        None => RunStatus::Abort,
    };

    let duration_ms = timer.stop().as_millis() as u64;
    RunRecord::new(test_case.clone(), status, duration_ms)
        .with_exit_code(output.status.code())
        .with_output(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
        .with_started_at(started_at)
}

/// Runs a batch one test case at a time
pub struct TestRunner {
    context: RunContext,
}

impl TestRunner {
    pub fn new(context: RunContext) -> Self {
        Self { context }
    }

    pub async fn run_test(&self, test_case: &TestCase) -> RunRecord {
        execute(&self.context.interpreter, test_case, self.context.timeout).await
    }

    /// Run every test case of the batch in order, stopping early on interrupt
    pub async fn run_batch(&self, batch: &Batch) -> Result<RunSummary, RegistryError> {
        info!("Running batch {} ({} tests)", batch.index, batch.len());

        let timer = Timer::start(format!("batch {}", batch.index));
        let mut results = Vec::with_capacity(batch.len());

        for test_case in &batch.test_cases {
            if self.context.interrupt.is_set() {
                warn!("Interrupted, skipping remaining tests of batch {}", batch.index);
                break;
            }

            let record = self.run_test(test_case).await;
            debug!("  {}", record);
            self.context.record(batch, &record).await?;
            results.push(record);
        }

        let summary = RunSummary::new(format!("Batch {}", batch.index), results);
        info!(
            "Batch {} completed in {}ms - Pass: {}/{} ({:.1}%)",
            batch.index,
            timer.elapsed_ms(),
            summary.passed,
            summary.total,
            summary.pass_rate()
        );

        Ok(summary)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::test_support::{script, shell};
    use crate::models::{Interpreter, InterpreterKind};
    use crate::registry::{MemoryRegistry, Registry};
    use crate::utils::InterruptFlag;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_exit_status_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let pass = script(dir.path(), "pass.js", "echo ok\nexit 0\n");
        let fail = script(dir.path(), "fail.js", "echo bad >&2\nexit 3\n");

        let record = execute(&shell(), &pass, None).await;
        assert_eq!(record.status, RunStatus::Pass);
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(record.stdout, "ok\n");

        let record = execute(&shell(), &fail, None).await;
        assert_eq!(record.status, RunStatus::Fail);
        assert_eq!(record.exit_code, Some(3));
        assert_eq!(record.stderr, "bad\n");
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let slow = script(dir.path(), "slow.js", "sleep 5\n");

        let record = execute(&shell(), &slow, Some(Duration::from_millis(100))).await;
        assert_eq!(record.status, RunStatus::Abort);
        assert!(record.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_error() {
        let interp = Interpreter::new(InterpreterKind::Node)
            .with_path(Some("/nonexistent/interpreter".to_string()));
        let record = execute(&interp, &TestCase::new("a.js"), None).await;
        assert_eq!(record.status, RunStatus::Error);
        assert!(record.stderr.contains("failed to start"));
    }

    #[tokio::test]
    async fn test_batch_runs_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let mut batch = Batch::new(
            0,
            vec![
                script(dir.path(), "a.js", "exit 0\n"),
                script(dir.path(), "b.js", "exit 1\n"),
            ],
        );
        batch.id = Some(42);

        let registry_dyn: Arc<dyn Registry> = registry.clone();
        let runner = TestRunner::new(RunContext::new(shell()).with_registry(Some(registry_dyn)));
        let summary = runner.run_batch(&batch).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);

        let runs = registry.runs();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|(batch_id, _)| *batch_id == 42));
    }

    #[tokio::test]
    async fn test_interrupt_stops_batch() {
        let dir = tempfile::tempdir().unwrap();
        let batch = Batch::new(0, vec![script(dir.path(), "a.js", "exit 0\n")]);
        let interrupt = InterruptFlag::new();
        interrupt.set();

        let runner = TestRunner::new(RunContext::new(shell()).with_interrupt(interrupt));
        let summary = runner.run_batch(&batch).await.unwrap();
        assert_eq!(summary.total, 0);
    }
}
