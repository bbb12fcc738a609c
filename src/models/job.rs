//! Job, batch and test case models
//!
//! These mirror the rows the registry stores. Identities are assigned by the
//! registry, never invented locally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use thiserror::Error;

use super::Interpreter;

/// Registry-assigned row identity
pub type DbId = i64;

/// Model invariant violations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    #[error("test case {locator} already has identity {existing}")]
    IdentityAlreadyAssigned { locator: String, existing: DbId },

    #[error("invalid batch reference '{0}', expected <job_id>,<batch_index>")]
    InvalidBatchRef(String),

    #[error("invalid cluster id '{0}'")]
    InvalidClusterId(String),
}

/// One unit of work: a test file to run through the interpreter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    locator: String,
    id: Option<DbId>,
}

impl TestCase {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            id: None,
        }
    }

    /// A test case read back from the registry
    pub fn persisted(id: DbId, locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            id: Some(id),
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn id(&self) -> Option<DbId> {
        self.id
    }

    /// Record the registry identity. Refuses a second assignment.
    pub fn assign_id(&mut self, id: DbId) -> Result<(), ModelError> {
        match self.id {
            Some(existing) => Err(ModelError::IdentityAlreadyAssigned {
                locator: self.locator.clone(),
                existing,
            }),
            None => {
                self.id = Some(id);
                Ok(())
            }
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator)
    }
}

/// A contiguous slice of a job's test cases, run by one array task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// 0-based index, doubles as the scheduler's array-task index
    pub index: u32,
    pub id: Option<DbId>,
    /// Array-task process index, only known once the batch runs remotely
    pub process: Option<u32>,
    pub test_cases: Vec<TestCase>,
}

impl Batch {
    pub fn new(index: u32, test_cases: Vec<TestCase>) -> Self {
        Self {
            index,
            id: None,
            process: None,
            test_cases,
        }
    }

    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }
}

/// Cluster identifier handed out by the scheduler on submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClusterId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(ClusterId)
            .map_err(|_| ModelError::InvalidClusterId(s.to_string()))
    }
}

/// One end-to-end test run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub title: String,
    pub note: String,
    pub interpreter: Interpreter,
    pub tests_version: Option<String>,
    /// `None` puts every test case in a single batch
    pub batch_size: Option<NonZeroUsize>,
    pub id: Option<DbId>,
    pub batches: Vec<Batch>,
    pub cluster: Option<ClusterId>,
    pub scheduler_host: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user: String,
}

impl Job {
    pub fn new(title: impl Into<String>, note: impl Into<String>, interpreter: Interpreter) -> Self {
        Self {
            title: title.into(),
            note: note.into(),
            interpreter,
            tests_version: None,
            batch_size: None,
            id: None,
            batches: Vec::new(),
            cluster: None,
            scheduler_host: None,
            created_at: Utc::now(),
            user: current_user(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<NonZeroUsize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_tests_version(mut self, version: Option<String>) -> Self {
        self.tests_version = version;
        self
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn test_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// The `<job_id>,<batch_index>` token a remote invocation uses to find its work
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRef {
    pub job_id: DbId,
    pub batch_index: u32,
}

impl BatchRef {
    pub fn new(job_id: DbId, batch_index: u32) -> Self {
        Self {
            job_id,
            batch_index,
        }
    }
}

impl fmt::Display for BatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.job_id, self.batch_index)
    }
}

impl FromStr for BatchRef {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidBatchRef(s.to_string());
        let (job, index) = s.split_once(',').ok_or_else(invalid)?;
        let job_id = job.trim().parse().map_err(|_| invalid())?;
        let batch_index = index.trim().parse().map_err(|_| invalid())?;
        Ok(Self {
            job_id,
            batch_index,
        })
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterpreterKind;

    #[test]
    fn test_identity_assigned_once() {
        let mut tc = TestCase::new("tests/a.js");
        assert!(tc.id().is_none());
        tc.assign_id(7).unwrap();
        assert_eq!(tc.id(), Some(7));

        let err = tc.assign_id(8).unwrap_err();
        assert_eq!(
            err,
            ModelError::IdentityAlreadyAssigned {
                locator: "tests/a.js".to_string(),
                existing: 7
            }
        );
        assert_eq!(tc.id(), Some(7));
    }

    #[test]
    fn test_batch_ref_parsing() {
        let r: BatchRef = "42,3".parse().unwrap();
        assert_eq!(r, BatchRef::new(42, 3));
        assert_eq!(r.to_string(), "42,3");

        assert!("42".parse::<BatchRef>().is_err());
        assert!("x,1".parse::<BatchRef>().is_err());
        assert!("1,-1".parse::<BatchRef>().is_err());
    }

    #[test]
    fn test_cluster_id_parsing() {
        assert_eq!("4821".parse::<ClusterId>().unwrap(), ClusterId(4821));
        assert!("".parse::<ClusterId>().is_err());
    }

    #[test]
    fn test_job_counts() {
        let mut job = Job::new("t", "", Interpreter::new(InterpreterKind::Node));
        job.batches.push(Batch::new(0, vec![TestCase::new("a"), TestCase::new("b")]));
        job.batches.push(Batch::new(1, vec![TestCase::new("c")]));

        assert_eq!(job.batch_count(), 2);
        assert_eq!(job.test_count(), 3);
        assert_eq!(job.batches[1].len(), 1);
    }
}
