//! Work registry
//!
//! The database shared between the submitting process and every remote array
//! task. It is the only channel between them: the dispatcher writes jobs,
//! batches and test cases before submission, remote tasks read back their own
//! batch and append run results.

mod config;
#[cfg(test)]
mod memory;
mod sql;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DbId, Job, ModelError, RunRecord, TestCase};

pub use config::{DbConfig, DbKind};
#[cfg(test)]
pub use memory::MemoryRegistry;
pub use sql::SqlRegistry;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} has not been persisted yet")]
    NotPersisted(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("invalid database configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read database config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A batch as read back by a remote array task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedBatch {
    pub batch_id: DbId,
    /// Members in the order they were partitioned
    pub test_cases: Vec<TestCase>,
}

/// Narrow interface onto the shared store
#[async_trait]
pub trait Registry: Send + Sync {
    /// Insert test cases, returning their identities in input order
    async fn insert_test_cases(&self, locators: &[String]) -> Result<Vec<DbId>, RegistryError>;

    /// Persist a job with its batches and memberships as one transaction.
    /// Assigns the job and batch identities on `job`.
    async fn create_job_with_batches(&self, job: &mut Job) -> Result<DbId, RegistryError>;

    /// Read the members of one batch. `None` while the batch is not visible.
    async fn load_batch(
        &self,
        job_id: DbId,
        batch_index: u32,
    ) -> Result<Option<LoadedBatch>, RegistryError>;

    /// Persist scheduler details attached after submission
    async fn update_job(&self, job: &Job) -> Result<(), RegistryError>;

    /// Record which array-task process and host picked up a batch
    async fn mark_batch_started(
        &self,
        batch_id: DbId,
        process: u32,
        host: &str,
    ) -> Result<(), RegistryError>;

    /// Append one run result to a batch
    async fn record_run(&self, batch_id: DbId, run: &RunRecord) -> Result<DbId, RegistryError>;

    /// Release connections
    async fn close(&self);
}

/// Test case identities per batch, in job order
pub(crate) fn member_ids(job: &Job) -> Result<Vec<Vec<DbId>>, RegistryError> {
    job.batches
        .iter()
        .map(|batch| {
            batch
                .test_cases
                .iter()
                .map(|tc| {
                    tc.id()
                        .ok_or_else(|| RegistryError::NotPersisted(format!("test case {tc}")))
                })
                .collect()
        })
        .collect()
}
