//! Remote batch loading
//!
//! Runs inside each array task. The task knows only its job id and its
//! process index; everything else comes out of the registry.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::{Batch, BatchRef};
use crate::registry::{Registry, RegistryError};

/// Errors while locating a batch
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("batch {0} not found in registry")]
    BatchNotFound(BatchRef),

    #[error("batch {batch} still not visible after {attempts} attempts")]
    Timeout { batch: BatchRef, attempts: u32 },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Retry policy for batches that are not yet visible
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchWait {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BatchWait {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl BatchWait {
    /// Backoff before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Base delay plus up to half of it again at random
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = base.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

/// Reads one batch of a job back from the registry
pub struct BatchLoader {
    registry: Arc<dyn Registry>,
    wait: Option<BatchWait>,
}

impl BatchLoader {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            wait: None,
        }
    }

    /// Retry while the batch is not visible
    pub fn with_wait(mut self, wait: BatchWait) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Test cases of exactly the referenced batch, in partition order
    pub async fn load(&self, batch_ref: BatchRef) -> Result<Batch, CoordinationError> {
        let Some(wait) = &self.wait else {
            return self
                .try_load(batch_ref)
                .await?
                .ok_or(CoordinationError::BatchNotFound(batch_ref));
        };

        let attempts = wait.max_attempts.max(1);
        for attempt in 0..attempts {
            if let Some(batch) = self.try_load(batch_ref).await? {
                if attempt > 0 {
                    info!("Batch {} visible after {} attempts", batch_ref, attempt + 1);
                }
                return Ok(batch);
            }

            if attempt + 1 < attempts {
                let delay = wait.delay(attempt);
                debug!(
                    "Batch {} not visible yet, retrying in {:?} ({}/{})",
                    batch_ref,
                    delay,
                    attempt + 1,
                    attempts
                );
                sleep(delay).await;
            }
        }

        warn!("Gave up waiting for batch {}", batch_ref);
        Err(CoordinationError::Timeout {
            batch: batch_ref,
            attempts,
        })
    }

    /// Load the batch and record the process and host that picked it up
    pub async fn load_and_mark(
        &self,
        batch_ref: BatchRef,
        host: &str,
    ) -> Result<Batch, CoordinationError> {
        let mut batch = self.load(batch_ref).await?;

        if let Some(batch_id) = batch.id {
            self.registry
                .mark_batch_started(batch_id, batch_ref.batch_index, host)
                .await?;
        }
        batch.process = Some(batch_ref.batch_index);

        info!(
            "Loaded batch {} with {} test cases on {}",
            batch_ref,
            batch.len(),
            host
        );
        Ok(batch)
    }

    async fn try_load(&self, batch_ref: BatchRef) -> Result<Option<Batch>, CoordinationError> {
        let loaded = self
            .registry
            .load_batch(batch_ref.job_id, batch_ref.batch_index)
            .await?;

        Ok(loaded.map(|loaded| {
            let mut batch = Batch::new(batch_ref.batch_index, loaded.test_cases);
            batch.id = Some(loaded.batch_id);
            batch
        }))
    }
}
