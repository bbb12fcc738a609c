//! Data models for test runs
//!
//! This module contains the job, batch, test case and run structures shared by
//! the dispatcher, the registry and the executors.

mod interpreter;
mod job;
mod run;

pub use interpreter::{Interpreter, InterpreterKind, JsRefOptions};
pub use job::{Batch, BatchRef, ClusterId, DbId, Job, ModelError, TestCase};
pub use run::{RunRecord, RunStatus, RunSummary};
