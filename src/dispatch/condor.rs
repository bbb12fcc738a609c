//! HTCondor submission backend
//!
//! Builds the submit description for a job's batches, hands it to
//! `condor_submit` and records where the job went.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::secret::SECRET_ENV_VAR;
use super::template::LogTemplate;
use crate::models::{ClusterId, DbId, Job};

pub const DEFAULT_REQUIREMENTS: &str = "OpSysMajorVer == 16";
pub const DEFAULT_ACCOUNTING_GROUP: &str = "jscert";
pub const DEFAULT_JOBINFO_FILE: &str = "condor.jobinfo";
pub const DEFAULT_CMD_FILE: &str = "condor.cmd";

pub const SUBMIT_PROGRAM: &str = "condor_submit";

/// `<cluster>.<task> - <cluster>.<task>` as printed by `condor_submit -terse`
static TERSE_RESPONSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.\d+ - \d+\.\d+").expect("valid regex"));

/// Submission errors
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("scheduler binary '{0}' not found, is HTCondor installed and on PATH?")]
    SchedulerUnavailable(String),

    #[error("failed to run scheduler: {0}")]
    Spawn(#[source] io::Error),

    #[error("job has no registry identity, persist it before submitting")]
    NotPersisted,

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Wrap the encoded argument string for the `arguments` line
pub fn quote_arguments(arguments: &str) -> String {
    format!("\"{}\"", arguments.replace('"', "\"\""))
}

/// HTCondor submit description for one job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitDescription {
    pub requirements: String,
    pub executable: String,
    /// Encoded argument string, unquoted
    pub arguments: String,
    pub accounting_group: String,
    pub log: Option<LogTemplate>,
    pub output: Option<LogTemplate>,
    pub error: Option<LogTemplate>,
    pub queue: usize,
}

impl SubmitDescription {
    pub fn new(executable: impl Into<String>, arguments: impl Into<String>, queue: usize) -> Self {
        Self {
            requirements: DEFAULT_REQUIREMENTS.to_string(),
            executable: executable.into(),
            arguments: arguments.into(),
            accounting_group: DEFAULT_ACCOUNTING_GROUP.to_string(),
            log: None,
            output: None,
            error: None,
            queue,
        }
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = requirements.into();
        self
    }

    pub fn with_accounting_group(mut self, group: impl Into<String>) -> Self {
        self.accounting_group = group.into();
        self
    }

    /// Scheduler event log for the whole cluster
    pub fn with_job_log(mut self, job_id: DbId) -> Self {
        self.log = Some(LogTemplate::job_log(job_id));
        self
    }

    /// Per-task stdout and stderr
    pub fn with_task_logs(mut self, job_id: DbId) -> Self {
        self.output = Some(LogTemplate::task_log(job_id, "out"));
        self.error = Some(LogTemplate::task_log(job_id, "err"));
        self
    }
}

impl fmt::Display for SubmitDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "universe = vanilla")?;
        writeln!(f, "requirements = {}", self.requirements)?;
        writeln!(f, "executable = {}", self.executable)?;
        writeln!(f, "arguments = {}", quote_arguments(&self.arguments))?;
        writeln!(f, "accounting_group = {}", self.accounting_group)?;
        // Tasks need PATH and friends to find the interpreter
        writeln!(f, "getenv = True")?;
        if let Some(log) = &self.log {
            writeln!(f, "log = {}", log.render())?;
        }
        if let Some(output) = &self.output {
            writeln!(f, "output = {}", output.render())?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "error = {}", error.render())?;
        }
        writeln!(f, "queue {}", self.queue)
    }
}

/// Something that accepts submit descriptions
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a description and return the scheduler's raw response
    async fn submit(&self, description: &str) -> Result<String, SubmissionError>;

    /// Host the scheduler runs on
    fn host(&self) -> String;
}

/// `condor_submit -terse -` on the local machine
#[derive(Clone, Debug)]
pub struct CondorSubmit {
    program: String,
    host: String,
    /// Removed from the submit process environment
    hidden_vars: Vec<String>,
}

impl CondorSubmit {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            program: SUBMIT_PROGRAM.to_string(),
            host: host.into(),
            hidden_vars: vec![SECRET_ENV_VAR.to_string()],
        }
    }

    /// Also keep `var` away from the scheduler, and from every task through
    /// `getenv = True`
    pub fn hiding(mut self, var: impl Into<String>) -> Self {
        let var = var.into();
        if !self.hidden_vars.contains(&var) {
            self.hidden_vars.push(var);
        }
        self
    }

    /// Use a different submit binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Scheduler for CondorSubmit {
    async fn submit(&self, description: &str) -> Result<String, SubmissionError> {
        debug!("Running {} -terse -", self.program);

        let mut command = Command::new(&self.program);
        command
            .args(["-terse", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // getenv = True would copy these into every task
        for var in &self.hidden_vars {
            command.env_remove(var);
        }

        let mut child = command
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => SubmissionError::SchedulerUnavailable(self.program.clone()),
                _ => SubmissionError::Spawn(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(description.as_bytes())
                .await
                .map_err(SubmissionError::Spawn)?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(SubmissionError::Spawn)?;

        if !output.status.success() {
            warn!("{} exited with {}", self.program, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn host(&self) -> String {
        self.host.clone()
    }
}

/// Cluster id from a terse response such as `4821.0 - 4821.3`
pub fn parse_cluster_id(response: &str) -> Option<ClusterId> {
    TERSE_RESPONSE_RE
        .captures(response)
        .and_then(|c| c[1].parse().ok())
}

/// Submission settings, usually from the config file plus CLI overrides
#[derive(Clone, Debug)]
pub struct CondorSettings {
    pub requirements: String,
    pub accounting_group: String,
    pub executable: PathBuf,
    pub log_job: bool,
    pub log_all: bool,
    /// Directory `condor.jobinfo` and `condor.cmd` are written to
    pub output_dir: PathBuf,
    pub jobinfo_file: String,
    pub cmd_file: String,
    pub dry_run: bool,
}

impl Default for CondorSettings {
    fn default() -> Self {
        Self {
            requirements: DEFAULT_REQUIREMENTS.to_string(),
            accounting_group: DEFAULT_ACCOUNTING_GROUP.to_string(),
            executable: PathBuf::from("runtests"),
            log_job: false,
            log_all: false,
            output_dir: PathBuf::from("."),
            jobinfo_file: DEFAULT_JOBINFO_FILE.to_string(),
            cmd_file: DEFAULT_CMD_FILE.to_string(),
            dry_run: false,
        }
    }
}

/// How a submission attempt ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Submitted { cluster: ClusterId, host: String },
    /// The response carried no cluster id
    Failed { host: String, response: String },
    /// Description written to disk instead of submitted
    Written { path: PathBuf },
}

/// Submits jobs through a scheduler and writes the job information file
pub struct CondorBackend {
    scheduler: Arc<dyn Scheduler>,
    settings: CondorSettings,
}

impl CondorBackend {
    pub fn new(scheduler: Arc<dyn Scheduler>, settings: CondorSettings) -> Self {
        Self {
            scheduler,
            settings,
        }
    }

    /// Submit description for a persisted job
    pub fn describe(&self, job: &Job, arguments: &str) -> Result<SubmitDescription, SubmissionError> {
        let job_id = job.id.ok_or(SubmissionError::NotPersisted)?;

        let mut description = SubmitDescription::new(
            self.settings.executable.to_string_lossy(),
            arguments,
            job.batch_count(),
        )
        .with_requirements(&self.settings.requirements)
        .with_accounting_group(&self.settings.accounting_group);

        if self.settings.log_job {
            description = description.with_job_log(job_id);
        }
        if self.settings.log_all {
            description = description.with_task_logs(job_id);
        }

        Ok(description)
    }

    pub async fn submit(&self, job: &Job, arguments: &str) -> Result<Submission, SubmissionError> {
        let description = self.describe(job, arguments)?;
        let text = description.to_string();

        if self.settings.dry_run {
            let path = self.settings.output_dir.join(&self.settings.cmd_file);
            write_file(&path, &text).await?;
            info!("Wrote submit description to {}", path.display());
            return Ok(Submission::Written { path });
        }

        info!("Submitting {} batches to HTCondor", description.queue);
        let response = self.scheduler.submit(&text).await?;
        let host = self.scheduler.host();

        match parse_cluster_id(&response) {
            Some(cluster) => Ok(Submission::Submitted { cluster, host }),
            None => {
                warn!("Unrecognised scheduler response: {}", response.trim());
                Ok(Submission::Failed { host, response })
            }
        }
    }

    /// Shell-sourceable record of a submitted job
    pub fn jobinfo(&self, job_id: DbId, cluster: ClusterId) -> String {
        let mut info = format!(
            "export RUNTESTS_JOB_ID={job_id}\nexport RUNTESTS_CONDOR_ID={cluster}\n"
        );
        if self.settings.log_job {
            let log = LogTemplate::job_log(job_id).resolve(cluster, None);
            info.push_str(&format!("export RUNTESTS_CONDOR_LOG={log}\n"));
        }
        info
    }

    pub async fn write_jobinfo(&self, job_id: DbId, cluster: ClusterId) -> Result<PathBuf, SubmissionError> {
        let path = self.settings.output_dir.join(&self.settings.jobinfo_file);
        write_file(&path, &self.jobinfo(job_id, cluster)).await?;
        debug!("Wrote job information to {}", path.display());
        Ok(path)
    }
}

async fn write_file(path: &Path, content: &str) -> Result<(), SubmissionError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| SubmissionError::Write {
            path: path.to_path_buf(),
            source,
        })
}
