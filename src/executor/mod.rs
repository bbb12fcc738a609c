//! Test execution engine
//!
//! Runs the test cases of a batch through an interpreter, either one after
//! another or with bounded concurrency, and records each run in the registry
//! when one is configured.

mod parallel;
mod runner;

use clap::ValueEnum;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Batch, Interpreter, RunRecord, RunSummary};
use crate::registry::{Registry, RegistryError};
use crate::utils::InterruptFlag;

pub use parallel::ParallelExecutor;
pub use runner::TestRunner;

/// Executor selected with `-x`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExecutorKind {
    #[default]
    Sequential,
    Parallel,
    /// Submit batches to HTCondor
    Condor,
}

impl ExecutorKind {
    /// Strategy for running tests on this machine, `None` for cluster dispatch
    pub fn local(&self) -> Option<LocalStrategy> {
        match self {
            ExecutorKind::Sequential => Some(LocalStrategy::Sequential),
            ExecutorKind::Parallel => Some(LocalStrategy::Parallel),
            ExecutorKind::Condor => None,
        }
    }
}

/// Executor used inside a batch, including on cluster workers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LocalStrategy {
    #[default]
    Sequential,
    Parallel,
}

impl LocalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalStrategy::Sequential => "sequential",
            LocalStrategy::Parallel => "parallel",
        }
    }
}

/// Everything an executor needs besides the test cases
#[derive(Clone)]
pub struct RunContext {
    pub interpreter: Interpreter,
    /// Per-test limit, `None` to wait indefinitely
    pub timeout: Option<Duration>,
    pub registry: Option<Arc<dyn Registry>>,
    pub interrupt: InterruptFlag,
}

impl RunContext {
    pub fn new(interpreter: Interpreter) -> Self {
        Self {
            interpreter,
            timeout: None,
            registry: None,
            interrupt: InterruptFlag::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_registry(mut self, registry: Option<Arc<dyn Registry>>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Store a run against the batch it belongs to
    async fn record(&self, batch: &Batch, run: &RunRecord) -> Result<(), RegistryError> {
        if let (Some(registry), Some(batch_id)) = (&self.registry, batch.id) {
            registry.record_run(batch_id, run).await?;
        }
        Ok(())
    }
}

/// A local execution strategy bound to its context
pub enum LocalExecutor {
    Sequential(TestRunner),
    Parallel(ParallelExecutor),
}

impl LocalExecutor {
    pub fn new(strategy: LocalStrategy, context: RunContext, concurrency: usize) -> Self {
        match strategy {
            LocalStrategy::Sequential => LocalExecutor::Sequential(TestRunner::new(context)),
            LocalStrategy::Parallel => {
                LocalExecutor::Parallel(ParallelExecutor::new(context, concurrency))
            }
        }
    }

    pub async fn run_batch(&self, batch: &Batch) -> Result<RunSummary, RegistryError> {
        match self {
            LocalExecutor::Sequential(runner) => runner.run_batch(batch).await,
            LocalExecutor::Parallel(executor) => executor.run_batch(batch).await,
        }
    }
}
