//! In-memory registry for tests
//!
//! Honours the same contract as the SQL registry and can hold batches back
//! from readers to simulate commit-visibility lag.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{member_ids, LoadedBatch, Registry, RegistryError};
use crate::models::{DbId, Job, RunRecord, TestCase};

#[derive(Clone, Copy, Debug)]
enum Visibility {
    Immediate,
    /// Number of `load_batch` calls that still see nothing
    AfterLoads(usize),
    Never,
}

#[derive(Debug, Default)]
struct BatchRow {
    id: DbId,
    members: Vec<DbId>,
    process: Option<u32>,
    host: Option<String>,
}

#[derive(Debug)]
struct State {
    next_id: DbId,
    test_cases: BTreeMap<DbId, String>,
    jobs: BTreeMap<DbId, Job>,
    batches: BTreeMap<(DbId, u32), BatchRow>,
    runs: Vec<(DbId, RunRecord)>,
    visibility: Visibility,
    loads: usize,
    closed: bool,
}

impl State {
    fn next(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                test_cases: BTreeMap::new(),
                jobs: BTreeMap::new(),
                batches: BTreeMap::new(),
                runs: Vec::new(),
                visibility: Visibility::Immediate,
                loads: 0,
                closed: false,
            }),
        }
    }

    /// Batches become readable only after `loads` empty reads
    pub fn visible_after(self, loads: usize) -> Self {
        self.state.lock().unwrap().visibility = Visibility::AfterLoads(loads);
        self
    }

    /// Batches are never readable
    pub fn never_visible(self) -> Self {
        self.state.lock().unwrap().visibility = Visibility::Never;
        self
    }

    pub fn load_calls(&self) -> usize {
        self.state.lock().unwrap().loads
    }

    pub fn job(&self, id: DbId) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn test_case_count(&self) -> usize {
        self.state.lock().unwrap().test_cases.len()
    }

    pub fn runs(&self) -> Vec<(DbId, RunRecord)> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn batch_started(&self, job_id: DbId, index: u32) -> Option<(u32, String)> {
        let state = self.state.lock().unwrap();
        let row = state.batches.get(&(job_id, index))?;
        Some((row.process?, row.host.clone()?))
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn insert_test_cases(&self, locators: &[String]) -> Result<Vec<DbId>, RegistryError> {
        let mut state = self.state.lock().unwrap();
        Ok(locators
            .iter()
            .map(|locator| {
                let id = state.next();
                state.test_cases.insert(id, locator.clone());
                id
            })
            .collect())
    }

    async fn create_job_with_batches(&self, job: &mut Job) -> Result<DbId, RegistryError> {
        let members = member_ids(job)?;
        let mut state = self.state.lock().unwrap();

        for id in members.iter().flatten() {
            if !state.test_cases.contains_key(id) {
                return Err(RegistryError::NotPersisted(format!("test case #{id}")));
            }
        }

        let job_id = state.next();
        job.id = Some(job_id);
        for (batch, ids) in job.batches.iter_mut().zip(members) {
            let batch_id = state.next();
            batch.id = Some(batch_id);
            state.batches.insert(
                (job_id, batch.index),
                BatchRow {
                    id: batch_id,
                    members: ids,
                    ..Default::default()
                },
            );
        }
        state.jobs.insert(job_id, job.clone());
        Ok(job_id)
    }

    async fn load_batch(
        &self,
        job_id: DbId,
        batch_index: u32,
    ) -> Result<Option<LoadedBatch>, RegistryError> {
        let mut state = self.state.lock().unwrap();
        state.loads += 1;

        match state.visibility {
            Visibility::Immediate => {}
            Visibility::Never => return Ok(None),
            Visibility::AfterLoads(0) => state.visibility = Visibility::Immediate,
            Visibility::AfterLoads(n) => {
                state.visibility = Visibility::AfterLoads(n - 1);
                return Ok(None);
            }
        }

        let Some(row) = state.batches.get(&(job_id, batch_index)) else {
            return Ok(None);
        };
        let test_cases = row
            .members
            .iter()
            .map(|id| TestCase::persisted(*id, state.test_cases[id].as_str()))
            .collect();

        Ok(Some(LoadedBatch {
            batch_id: row.id,
            test_cases,
        }))
    }

    async fn update_job(&self, job: &Job) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap();
        let id = job
            .id
            .ok_or_else(|| RegistryError::NotPersisted(format!("job '{}'", job.title)))?;
        match state.jobs.get_mut(&id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(RegistryError::NotPersisted(format!("job #{id}"))),
        }
    }

    async fn mark_batch_started(
        &self,
        batch_id: DbId,
        process: u32,
        host: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .batches
            .values_mut()
            .find(|row| row.id == batch_id)
            .ok_or_else(|| RegistryError::NotPersisted(format!("batch #{batch_id}")))?;
        row.process = Some(process);
        row.host = Some(host.to_string());
        Ok(())
    }

    async fn record_run(&self, batch_id: DbId, run: &RunRecord) -> Result<DbId, RegistryError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next();
        state.runs.push((batch_id, run.clone()));
        Ok(id)
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}
