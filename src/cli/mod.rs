//! CLI argument parsing
//!
//! Defines command-line interface using clap. The same binary is used on the
//! submitting machine and, with `--batch`, inside every HTCondor array task.

use clap::{ArgAction, Parser};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::config::{RunOptions, DEFAULT_PG_SCHEMA, DEFAULT_TIMEOUT_SECS};
use crate::executor::{ExecutorKind, LocalStrategy};
use crate::models::{BatchRef, InterpreterKind};
use crate::output::OutputFormat;
use crate::registry::DbKind;

/// Run JavaScript conformance tests locally or on an HTCondor cluster
#[derive(Parser, Debug)]
#[command(name = "runtests")]
#[command(version)]
#[command(about = "Run JavaScript conformance tests locally or on an HTCondor cluster")]
#[command(long_about = None)]
pub struct Args {
    /// Test files or directories of tests
    pub paths: Vec<PathBuf>,

    /// Run one batch of a registered job (used by cluster tasks)
    #[arg(long, value_name = "JOB_ID,BATCH_INDEX")]
    pub batch: Option<BatchRef>,

    /// Per-test timeout in seconds, 0 for none
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Skip this test file (repeatable)
    #[arg(long, value_name = "FILE")]
    pub exclude: Vec<PathBuf>,

    /// More output, give twice for debug logging
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// How to run the tests
    #[arg(short = 'x', long, value_enum, default_value_t)]
    pub executor: ExecutorKind,

    /// Test cases per batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<NonZeroUsize>,

    /// Tests run at once by the parallel executor
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Title recorded with the job
    #[arg(long, default_value = "")]
    pub title: String,

    /// Free-form note recorded with the job
    #[arg(long, default_value = "")]
    pub note: String,

    // Interpreter
    /// Interpreter to run tests with
    #[arg(long, value_enum, default_value_t)]
    pub interp: InterpreterKind,

    /// Interpreter binary, defaults per interpreter
    #[arg(long, default_value = "")]
    pub interp_path: String,

    /// Parser passed to JSRef
    #[arg(long, default_value = "")]
    pub parser: String,

    /// Interpreter version recorded with the job
    #[arg(long, default_value = "")]
    pub interp_version: String,

    /// Test suite version recorded with the job
    #[arg(long)]
    pub tests_version: Option<String>,

    /// JSRef: disable parasite rules
    #[arg(long)]
    pub no_parasite: bool,

    /// JSRef: simplified semantics
    #[arg(long)]
    pub simp: bool,

    /// JSRef: print statistics
    #[arg(long)]
    pub stats: bool,

    /// JSRef: run the bytecode interpreter
    #[arg(long)]
    pub byte: bool,

    // Database
    /// Record results in a database
    #[arg(long, value_enum)]
    pub db: Option<DbKind>,

    /// SQLite file, or Postgres config file
    #[arg(long, default_value = "")]
    pub dbpath: String,

    /// Create the database tables and exit
    #[arg(long)]
    pub db_init: bool,

    /// Postgres schema
    #[arg(long, default_value = DEFAULT_PG_SCHEMA)]
    pub db_pg_schema: String,

    // HTCondor
    /// ClassAd requirements for cluster machines
    #[arg(long, value_name = "REQS")]
    pub condor_req: Option<String>,

    /// Executor each cluster task runs its batch with
    #[arg(short = 'X', long, value_enum, default_value_t)]
    pub condor_exec: LocalStrategy,

    /// Keep a scheduler log for the job
    #[arg(long)]
    pub condor_log: bool,

    /// Keep stdout and stderr of every cluster task
    #[arg(long)]
    pub condor_log_all: bool,

    /// Write the submit description to a file instead of submitting
    #[arg(long)]
    pub condor_dry_run: bool,

    /// Configuration file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Summary output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

impl Args {
    /// Typed options of this invocation
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            db: self.db,
            dbpath: self.dbpath.clone(),
            db_pg_schema: self.db_pg_schema.clone(),
            db_init: self.db_init,
            interp: self.interp,
            interp_path: self.interp_path.clone(),
            interp_version: self.interp_version.clone(),
            tests_version: self.tests_version.clone(),
            parser: self.parser.clone(),
            no_parasite: self.no_parasite,
            simp: self.simp,
            stats: self.stats,
            byte: self.byte,
            verbose: self.verbose,
            timeout: self.timeout,
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            exclude: self.exclude.clone(),
            title: self.title.clone(),
            note: self.note.clone(),
        }
    }

    /// Reject combinations that cannot work, before anything is touched
    pub fn validate(&self) -> Result<(), String> {
        if self.batch.is_some() && self.executor == ExecutorKind::Condor {
            return Err("--batch runs on a cluster worker and cannot submit again".to_string());
        }
        if self.batch.is_none() && !self.db_init && self.paths.is_empty() {
            return Err("no test paths given".to_string());
        }
        if self.batch.is_some() && self.db.is_none() {
            return Err("--batch needs --db to find its test cases".to_string());
        }
        if self.db_init && self.db.is_none() {
            return Err("--db-init needs --db".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ArgumentCodec;

    /// Split an argument string the way HTCondor does for quoted arguments
    fn condor_split(arguments: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = arguments.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' if in_quotes && chars.peek() == Some(&'\'') => {
                    chars.next();
                    current.push('\'');
                }
                '\'' => in_quotes = !in_quotes,
                ' ' if !in_quotes => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }

    #[test]
    fn test_defaults_match_run_options() {
        let args = Args::try_parse_from(["runtests", "tests/"]).unwrap();
        assert_eq!(args.run_options(), RunOptions::default());
        assert_eq!(args.executor, ExecutorKind::Sequential);
        assert_eq!(args.condor_exec, LocalStrategy::Sequential);
    }

    #[test]
    fn test_verbose_counts() {
        let args = Args::try_parse_from(["runtests", "-vv", "t.js"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_batch_reference() {
        let args =
            Args::try_parse_from(["runtests", "--db", "sqlite", "--batch", "12,3"]).unwrap();
        assert_eq!(args.batch, Some(BatchRef::new(12, 3)));
        assert!(args.validate().is_ok());

        assert!(Args::try_parse_from(["runtests", "--batch", "12"]).is_err());
    }

    #[test]
    fn test_validation() {
        let args = Args::try_parse_from(["runtests"]).unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["runtests", "--db-init", "--db", "sqlite"]).unwrap();
        assert!(args.validate().is_ok());

        let args = Args::try_parse_from(["runtests", "-x", "condor", "--batch", "1,0", "--db", "sqlite"])
            .unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["runtests", "--batch", "1,0"]).unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["runtests", "--db-init"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_encoded_arguments_parse_back() {
        let original = Args::try_parse_from([
            "runtests",
            "-x",
            "condor",
            "--db",
            "postgres",
            "--dbpath",
            "/home/o'brien/.pgconfig.tmp",
            "--interp-path",
            "/opt/jsref run_js",
            "--tests-version",
            "es5",
            "--stats",
            "--no-parasite",
            "-vv",
            "--timeout",
            "60",
            "--title",
            "nightly",
            "--batch-size",
            "8",
            "tests/",
        ])
        .unwrap();
        let options = original.run_options();

        let codec = ArgumentCodec::new(LocalStrategy::Parallel, ".pgconfig.tmp");
        let mut encoded = codec.encode(&options);
        encoded.extend(codec.batch_scope(31));
        let remote_line = encoded.join(" ").replace("$(Process)", "2");

        let mut argv = vec!["runtests".to_string()];
        argv.extend(condor_split(&remote_line));
        let remote = Args::try_parse_from(argv).unwrap();

        assert_eq!(remote.batch, Some(BatchRef::new(31, 2)));
        assert_eq!(remote.executor, ExecutorKind::Parallel);
        assert!(remote.validate().is_ok());

        let remote_options = remote.run_options();
        assert_eq!(remote_options.db, options.db);
        assert_eq!(remote_options.dbpath, options.dbpath);
        assert_eq!(remote_options.interp_path, options.interp_path);
        assert_eq!(remote_options.tests_version, options.tests_version);
        assert_eq!(remote_options.verbose, 2);
        assert_eq!(remote_options.timeout, 60);
        assert!(remote_options.stats && remote_options.no_parasite);
        // Not propagated
        assert!(remote_options.title.is_empty());
        assert!(remote_options.batch_size.is_none());
    }
}
