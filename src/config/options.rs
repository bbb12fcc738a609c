//! Typed invocation options
//!
//! Everything a run was started with, as captured from the command line. The
//! remote argument string is a projection of this struct, see
//! `dispatch::codec`.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::models::{Interpreter, InterpreterKind, JsRefOptions};
use crate::registry::DbKind;

pub const DEFAULT_TIMEOUT_SECS: u64 = 540;
pub const DEFAULT_PG_SCHEMA: &str = "jsil";

/// Options of one invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    // Registry
    pub db: Option<DbKind>,
    pub dbpath: String,
    pub db_pg_schema: String,
    pub db_init: bool,

    // Interpreter
    pub interp: InterpreterKind,
    pub interp_path: String,
    pub interp_version: String,
    pub tests_version: Option<String>,
    pub parser: String,
    pub no_parasite: bool,
    pub simp: bool,
    pub stats: bool,
    pub byte: bool,

    // Execution
    pub verbose: u8,
    pub timeout: u64,
    pub batch_size: Option<NonZeroUsize>,
    pub concurrency: usize,
    pub exclude: Vec<PathBuf>,

    // Job metadata
    pub title: String,
    pub note: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            db: None,
            dbpath: String::new(),
            db_pg_schema: DEFAULT_PG_SCHEMA.to_string(),
            db_init: false,
            interp: InterpreterKind::JsRef,
            interp_path: String::new(),
            interp_version: String::new(),
            tests_version: None,
            parser: String::new(),
            no_parasite: false,
            simp: false,
            stats: false,
            byte: false,
            verbose: 0,
            timeout: DEFAULT_TIMEOUT_SECS,
            batch_size: None,
            concurrency: 4,
            exclude: Vec::new(),
            title: String::new(),
            note: String::new(),
        }
    }
}

impl RunOptions {
    /// Interpreter descriptor for the job
    pub fn interpreter(&self) -> Interpreter {
        Interpreter::new(self.interp)
            .with_path(Some(self.interp_path.clone()))
            .with_version(Some(self.interp_version.clone()))
            .with_jsref(JsRefOptions {
                parser: Some(self.parser.clone()).filter(|p| !p.is_empty()),
                no_parasite: self.no_parasite,
                simp: self.simp,
                stats: self.stats,
                byte: self.byte,
            })
    }

    /// Per-test timeout, `None` when disabled with 0
    pub fn test_timeout(&self) -> Option<std::time::Duration> {
        (self.timeout > 0).then(|| std::time::Duration::from_secs(self.timeout))
    }
}
