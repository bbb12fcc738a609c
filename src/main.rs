//! runtests - JavaScript conformance test harness
//!
//! Runs a suite of test files through an interpreter, either on this machine
//! or as an HTCondor array job coordinated through a shared database.
//!
//! ## Usage
//!
//! ```bash
//! # Run a directory of tests, four at a time
//! runtests -x parallel tests/
//!
//! # Record results in SQLite
//! runtests --db sqlite --dbpath results.db --db-init
//! runtests --db sqlite --dbpath results.db tests/
//!
//! # Submit to the cluster in batches of 20, each task running in parallel
//! RUNTESTS_DB="host=db user=ci password=..." \
//!     runtests -x condor -X parallel --db postgres --batch-size 20 tests/
//! ```
//!
//! Cluster tasks re-enter this binary with `--batch JOB_ID,PROCESS`.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod cli;
mod config;
mod dispatch;
mod executor;
mod models;
mod output;
mod registry;
mod suite;
mod utils;

use cli::Args;
use config::{AppConfig, EnvConfig, RunOptions};
use dispatch::{
    partition_or_single, register_test_cases, ArgumentCodec, BatchLoader, CondorBackend,
    CondorSettings, CondorSubmit, CoordinationError, DispatchCoordinator, DispatchError,
    DispatchOutcome, EnvSecret,
};
use executor::{LocalExecutor, LocalStrategy, RunContext};
use models::{Batch, BatchRef, Job, RunSummary, TestCase};
use output::ResultFormatter;
use registry::{DbConfig, Registry, RegistryError, SqlRegistry};
use suite::TestSuite;
use utils::logger::{init_logger, LogLevel};
use utils::{hostname, install_ctrl_c_handler, InterruptFlag};

const EXIT_OK: u8 = 0;
const EXIT_TESTS_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_CONFIG: u8 = 3;
const EXIT_COORDINATION: u8 = 4;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run() -> Result<u8> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let debug_file = args
        .batch
        .filter(|batch| env.debug_batch(batch))
        .map(|batch| PathBuf::from(format!("../{batch}.err")));
    init_logger(LogLevel::from_verbosity(args.verbose), debug_file.as_deref())?;
    if env.has_any() {
        debug!("Environment: {:?}", env);
    }

    if let Err(message) = args.validate() {
        error!("{}", message);
        return Ok(EXIT_CONFIG);
    }

    let config = match AppConfig::resolve(args.config.as_deref(), &env) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return Ok(EXIT_CONFIG);
        }
    };

    let interrupt = InterruptFlag::new();
    install_ctrl_c_handler(interrupt.clone());

    let options = args.run_options();

    let registry = match open_registry(&options, &env).await {
        Ok(registry) => registry,
        Err(RegistryError::InvalidConfig(message)) => {
            error!("invalid database configuration: {}", message);
            return Ok(EXIT_CONFIG);
        }
        Err(e) => return Err(e).context("Failed to open the database"),
    };

    if let Some((sql, _)) = &registry {
        if options.db_init {
            sql.init_schema().await?;
            info!("Database tables created");
            sql.close().await;
            return Ok(EXIT_OK);
        }
    }
    let registry = registry.map(|(_, shared)| shared);

    if let Some(batch_ref) = args.batch {
        return run_remote_batch(&args, &config, &options, registry, batch_ref, interrupt).await;
    }

    let locators = match TestSuite::new()
        .with_excludes(&options.exclude)
        .collect(&args.paths)
    {
        Ok(locators) => locators,
        Err(e) => {
            error!("{}", e);
            return Ok(EXIT_CONFIG);
        }
    };

    match args.executor.local() {
        Some(strategy) => {
            run_locally(&args, &options, strategy, registry, locators, interrupt).await
        }
        None => dispatch_to_cluster(&args, &config, &options, registry, locators, interrupt).await,
    }
}

/// Connect when `--db` is given. The concrete handle is kept for `--db-init`.
async fn open_registry(
    options: &RunOptions,
    env: &EnvConfig,
) -> Result<Option<(Arc<SqlRegistry>, Arc<dyn Registry>)>, RegistryError> {
    let Some(kind) = options.db else {
        return Ok(None);
    };

    let db_config = DbConfig::resolve(
        kind,
        &options.dbpath,
        env.db.as_deref(),
        &options.db_pg_schema,
    )?;
    let sql = Arc::new(SqlRegistry::connect(&db_config).await?);
    let shared: Arc<dyn Registry> = sql.clone();
    Ok(Some((sql, shared)))
}

/// Body of one HTCondor array task
async fn run_remote_batch(
    args: &Args,
    config: &AppConfig,
    options: &RunOptions,
    registry: Option<Arc<dyn Registry>>,
    batch_ref: BatchRef,
    interrupt: InterruptFlag,
) -> Result<u8> {
    // Guaranteed by Args::validate
    let Some(registry) = registry else {
        error!("--batch needs --db");
        return Ok(EXIT_CONFIG);
    };

    let loader = BatchLoader::new(registry.clone()).with_wait(config.batch_wait.clone());
    let batch = match loader.load_and_mark(batch_ref, &hostname()).await {
        Ok(batch) => batch,
        Err(e @ (CoordinationError::Timeout { .. } | CoordinationError::BatchNotFound(_))) => {
            error!("{}", e);
            registry.close().await;
            return Ok(EXIT_COORDINATION);
        }
        Err(CoordinationError::Registry(e)) => {
            registry.close().await;
            return Err(e).context("Failed to load batch");
        }
    };

    let strategy = args.executor.local().unwrap_or_default();
    let context = RunContext::new(options.interpreter())
        .with_timeout(options.test_timeout())
        .with_registry(Some(registry.clone()))
        .with_interrupt(interrupt.clone());
    let executor = LocalExecutor::new(strategy, context, options.concurrency);

    let result = executor.run_batch(&batch).await;
    registry.close().await;
    let summary = result.context("Failed to record results")?;

    let label = format!("Batch {batch_ref}");
    Ok(report(args, RunSummary::merge(label, vec![summary]), &interrupt))
}

/// Run every batch on this machine, one after another
async fn run_locally(
    args: &Args,
    options: &RunOptions,
    strategy: LocalStrategy,
    registry: Option<Arc<dyn Registry>>,
    locators: Vec<String>,
    interrupt: InterruptFlag,
) -> Result<u8> {
    if locators.is_empty() {
        warn!("No test cases found");
        return Ok(EXIT_OK);
    }

    let batches = match &registry {
        Some(registry) => {
            let test_cases = register_test_cases(registry.as_ref(), locators).await?;
            let mut job = Job::new(&options.title, &options.note, options.interpreter())
                .with_batch_size(options.batch_size)
                .with_tests_version(options.tests_version.clone());
            job.batches = partition_or_single(test_cases, job.batch_size);
            let job_id = registry.create_job_with_batches(&mut job).await?;
            info!("Recording results as test job {}", job_id);
            job.batches
        }
        None => {
            let test_cases = locators.into_iter().map(TestCase::new).collect();
            partition_or_single(test_cases, options.batch_size)
        }
    };

    let context = RunContext::new(options.interpreter())
        .with_timeout(options.test_timeout())
        .with_registry(registry.clone())
        .with_interrupt(interrupt.clone());
    let executor = LocalExecutor::new(strategy, context, options.concurrency);

    let summaries = run_batches(&executor, &batches, &interrupt).await;
    if let Some(registry) = &registry {
        registry.close().await;
    }
    let summaries = summaries.context("Failed to record results")?;

    let label = if options.title.is_empty() {
        "Tests".to_string()
    } else {
        options.title.clone()
    };
    Ok(report(args, RunSummary::merge(label, summaries), &interrupt))
}

async fn run_batches(
    executor: &LocalExecutor,
    batches: &[Batch],
    interrupt: &InterruptFlag,
) -> Result<Vec<RunSummary>, RegistryError> {
    let mut summaries = Vec::with_capacity(batches.len());
    for batch in batches {
        if interrupt.is_set() {
            break;
        }
        summaries.push(executor.run_batch(batch).await?);
    }
    Ok(summaries)
}

/// Submit the collected tests as one array job
async fn dispatch_to_cluster(
    args: &Args,
    config: &AppConfig,
    options: &RunOptions,
    registry: Option<Arc<dyn Registry>>,
    locators: Vec<String>,
    interrupt: InterruptFlag,
) -> Result<u8> {
    let condor = &config.condor;
    let settings = CondorSettings {
        requirements: args
            .condor_req
            .clone()
            .unwrap_or_else(|| condor.requirements.clone()),
        accounting_group: condor.accounting_group.clone(),
        executable: std::env::current_exe().context("Cannot locate the runtests binary")?,
        log_job: args.condor_log,
        log_all: args.condor_log_all,
        output_dir: std::env::current_dir()?,
        jobinfo_file: condor.jobinfo_file.clone(),
        cmd_file: condor.cmd_file.clone(),
        dry_run: args.condor_dry_run,
    };
    let secret = EnvSecret::default();
    let scheduler = CondorSubmit::new(hostname())
        .with_program(condor.submit_program.clone())
        .hiding(secret.var());
    let backend = CondorBackend::new(Arc::new(scheduler), settings);
    let codec = ArgumentCodec::new(args.condor_exec, condor.secret_file.clone());

    let coordinator = DispatchCoordinator::new(registry, backend, codec, secret);
    let mut coordinator = match coordinator {
        Ok(coordinator) => coordinator.with_interrupt(interrupt),
        Err(e) => {
            error!("{}", e);
            return Ok(EXIT_CONFIG);
        }
    };

    let job = Job::new(&options.title, &options.note, options.interpreter())
        .with_batch_size(options.batch_size.or(Some(condor.batch_size)))
        .with_tests_version(options.tests_version.clone());

    let result = coordinator.dispatch(job, locators, options).await;
    coordinator.finish().await;

    let code = match result {
        Ok(DispatchOutcome::Submitted { job_id, cluster, .. }) => {
            println!("Submitted test job {job_id} as cluster {cluster}");
            EXIT_OK
        }
        Ok(DispatchOutcome::DryRun { job_id, path }) => {
            println!(
                "Submit description for test job {} written to {}",
                job_id,
                path.display()
            );
            EXIT_OK
        }
        Ok(DispatchOutcome::NothingToDo) => EXIT_OK,
        Ok(DispatchOutcome::SubmissionFailed { job_id }) => {
            error!("HTCondor did not accept test job {}", job_id);
            EXIT_FATAL
        }
        Ok(DispatchOutcome::Interrupted) => EXIT_INTERRUPTED,
        Err(DispatchError::Configuration(message)) => {
            error!("{}", message);
            EXIT_CONFIG
        }
        Err(e) => {
            error!("{}", e);
            EXIT_FATAL
        }
    };
    Ok(code)
}

/// Print the summary and pick the exit code
fn report(args: &Args, summary: RunSummary, interrupt: &InterruptFlag) -> u8 {
    let formatter = ResultFormatter::new(args.format)
        .with_color(io::stdout().is_terminal())
        .show_passed(args.verbose >= 1);
    println!("{}", formatter.format_summary(&summary));

    if interrupt.is_set() {
        EXIT_INTERRUPTED
    } else if summary.is_all_passed() {
        EXIT_OK
    } else {
        EXIT_TESTS_FAILED
    }
}
