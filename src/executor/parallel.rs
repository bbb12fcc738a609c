//! Parallel test execution
//!
//! Runs the test cases of a batch concurrently, bounded by a semaphore.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::runner::execute;
use super::RunContext;
use crate::models::{Batch, RunSummary};
use crate::registry::RegistryError;
use crate::utils::Timer;

/// Parallel test executor
pub struct ParallelExecutor {
    context: RunContext,
    max_concurrent: usize,
}

impl ParallelExecutor {
    pub fn new(context: RunContext, max_concurrent: usize) -> Self {
        Self {
            context,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run the batch with at most `max_concurrent` interpreters at once.
    /// Results keep batch order.
    pub async fn run_batch(&self, batch: &Batch) -> Result<RunSummary, RegistryError> {
        info!(
            "Running batch {} ({} tests, max {} concurrent)",
            batch.index,
            batch.len(),
            self.max_concurrent
        );

        let timer = Timer::start(format!("batch {}", batch.index));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(batch.len());

        for test_case in batch.test_cases.iter().cloned() {
            let semaphore = semaphore.clone();
            let interpreter = self.context.interpreter.clone();
            let limit = self.context.timeout;
            let interrupt = self.context.interrupt.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if interrupt.is_set() {
                    return None;
                }

                debug!("Starting parallel execution of {}", test_case);
                Some(execute(&interpreter, &test_case, limit).await)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(Some(record)) => {
                    debug!("  {}", record);
                    self.context.record(batch, &record).await?;
                    results.push(record);
                }
                Ok(None) => {}
                Err(e) => error!("Test task failed: {}", e),
            }
        }

        let summary = RunSummary::new(format!("Batch {}", batch.index), results);
        info!(
            "Parallel execution completed in {}ms - Pass: {}/{} ({:.1}%)",
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
    use crate::models::RunStatus;
    use crate::utils::InterruptFlag;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_results_keep_batch_order() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![
            script(dir.path(), "slow.js", "sleep 0.3\nexit 0\n"),
            script(dir.path(), "fast.js", "exit 2\n"),
            script(dir.path(), "mid.js", "sleep 0.1\nexit 0\n"),
        ];
        let batch = Batch::new(0, cases.clone());

        let executor = ParallelExecutor::new(RunContext::new(shell()), 3);
        let summary = executor.run_batch(&batch).await.unwrap();

        let order: Vec<_> = summary.results.iter().map(|r| r.test_case.clone()).collect();
        assert_eq!(order, cases);
        assert_eq!(summary.results[1].status, RunStatus::Fail);
        assert_eq!(summary.passed, 2);
    }

    #[tokio::test]
    async fn test_runs_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let cases = (0..4)
            .map(|i| script(dir.path(), &format!("t{i}.js"), "sleep 0.3\n"))
            .collect();
        let batch = Batch::new(0, cases);

        let start = Instant::now();
        let executor = ParallelExecutor::new(
            RunContext::new(shell()).with_timeout(Some(Duration::from_secs(10))),
            4,
        );
        let summary = executor.run_batch(&batch).await.unwrap();

        assert_eq!(summary.passed, 4);
        assert!(start.elapsed() < Duration::from_millis(1_100));
    }

    #[tokio::test]
    async fn test_interrupt_skips_pending() {
        let dir = tempfile::tempdir().unwrap();
        let batch = Batch::new(0, vec![script(dir.path(), "a.js", "exit 0\n")]);
        let interrupt = InterruptFlag::new();
        interrupt.set();

        let executor =
            ParallelExecutor::new(RunContext::new(shell()).with_interrupt(interrupt), 2);
        assert_eq!(executor.run_batch(&batch).await.unwrap().total, 0);
    }

    #[test]
    fn test_concurrency_at_least_one() {
        let executor = ParallelExecutor::new(RunContext::new(shell()), 0);
        assert_eq!(executor.max_concurrent, 1);
    }
}
