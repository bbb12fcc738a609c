//! Dispatch coordination
//!
//! Takes a collected test list through registration, partitioning,
//! persistence, argument encoding and submission, in that order. Nothing is
//! retried and nothing waits for the remote tasks: once the scheduler has the
//! job, results only ever arrive through the registry.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::codec::ArgumentCodec;
use super::condor::{CondorBackend, Submission, SubmissionError};
use super::partition::partition_or_single;
use super::secret::{Redaction, SecretChannel, SecretError};
use crate::config::RunOptions;
use crate::models::{ClusterId, DbId, Job, TestCase};
use crate::registry::{Registry, RegistryError};
use crate::utils::InterruptFlag;

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a dispatch ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted {
        job_id: DbId,
        cluster: ClusterId,
        host: String,
        batches: usize,
    },
    /// Registry rows exist but the scheduler did not accept the job
    SubmissionFailed { job_id: DbId },
    /// Submit description written instead of submitted
    DryRun { job_id: DbId, path: PathBuf },
    NothingToDo,
    Interrupted,
}

/// Insert test cases and attach their registry identities
pub async fn register_test_cases(
    registry: &dyn Registry,
    locators: Vec<String>,
) -> Result<Vec<TestCase>, RegistryError> {
    let ids = registry.insert_test_cases(&locators).await?;
    let mut test_cases = Vec::with_capacity(locators.len());
    for (locator, id) in locators.into_iter().zip(ids) {
        let mut tc = TestCase::new(locator);
        tc.assign_id(id)?;
        test_cases.push(tc);
    }
    debug!("Registered {} test cases", test_cases.len());
    Ok(test_cases)
}

/// Drives one submission of a job to the cluster
pub struct DispatchCoordinator<S: SecretChannel> {
    registry: Arc<dyn Registry>,
    backend: CondorBackend,
    codec: ArgumentCodec,
    secret: S,
    interrupt: InterruptFlag,
}

impl<S: SecretChannel> DispatchCoordinator<S> {
    /// Remote tasks can only find their work through a registry, so one is
    /// required up front.
    pub fn new(
        registry: Option<Arc<dyn Registry>>,
        backend: CondorBackend,
        codec: ArgumentCodec,
        secret: S,
    ) -> Result<Self, DispatchError> {
        let registry = registry.ok_or_else(|| {
            DispatchError::Configuration(
                "cluster dispatch needs a database, pass --db sqlite or --db postgres".to_string(),
            )
        })?;

        Ok(Self {
            registry,
            backend,
            codec,
            secret,
            interrupt: InterruptFlag::new(),
        })
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub async fn dispatch(
        &mut self,
        mut job: Job,
        locators: Vec<String>,
        options: &RunOptions,
    ) -> Result<DispatchOutcome, DispatchError> {
        // Collect
        if locators.is_empty() {
            info!("No test cases found, nothing to submit");
            return Ok(DispatchOutcome::NothingToDo);
        }
        if self.interrupt.is_set() {
            return Ok(DispatchOutcome::Interrupted);
        }

        // Register
        let test_cases = register_test_cases(self.registry.as_ref(), locators).await?;
        if self.interrupt.is_set() {
            return Ok(DispatchOutcome::Interrupted);
        }

        // Partition
        job.batches = partition_or_single(test_cases, job.batch_size);

        // Persist
        let job_id = self.registry.create_job_with_batches(&mut job).await?;
        info!(
            "Created job {} with {} batches of {} test cases",
            job_id,
            job.batch_count(),
            job.test_count()
        );
        if self.interrupt.is_set() {
            return Ok(DispatchOutcome::Interrupted);
        }

        // Encode
        let (arguments, redaction) =
            self.codec
                .encode_for_job(options, &mut self.secret, job_id)?;
        if let Redaction::Staged(path) = &redaction {
            debug!("Remote tasks read the database config from {}", path.display());
        }
        if self.interrupt.is_set() {
            return Ok(DispatchOutcome::Interrupted);
        }

        // Submit
        let outcome = match self.backend.submit(&job, &arguments).await? {
            Submission::Submitted { cluster, host } => {
                job.cluster = Some(cluster);
                job.scheduler_host = Some(host.clone());
                self.registry.update_job(&job).await?;
                self.backend.write_jobinfo(job_id, cluster).await?;

                DispatchOutcome::Submitted {
                    job_id,
                    cluster,
                    host,
                    batches: job.batch_count(),
                }
            }
            Submission::Failed { host, .. } => {
                job.scheduler_host = Some(host);
                self.registry.update_job(&job).await?;
                warn!("Submission of job {} failed, registry rows kept", job_id);
                DispatchOutcome::SubmissionFailed { job_id }
            }
            Submission::Written { path } => DispatchOutcome::DryRun { job_id, path },
        };

        // Report
        if let DispatchOutcome::Submitted {
            cluster,
            host,
            batches,
            ..
        } = &outcome
        {
            info!(
                "Submitted {} batches as cluster {} on {}. Test job id: {}",
                batches, cluster, host, job_id
            );
        }

        Ok(outcome)
    }

    /// Release the registry
    pub async fn finish(self) {
        self.registry.close().await;
    }
}
