//! Remote argument encoding
//!
//! Projects the local `RunOptions` through a closed allow-list into the
//! argument string every array task is started with. Options outside the
//! list never reach the scheduler.

use std::path::PathBuf;

use super::secret::{discard_secret, redact_secret, Redaction, SecretChannel, SecretError};
use super::template::Placeholder;
use crate::config::RunOptions;
use crate::executor::LocalStrategy;
use crate::models::DbId;
use crate::registry::DbKind;

/// Options allowed to cross into a remote invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropagatedOption {
    Db,
    DbPath,
    DbPgSchema,
    Interp,
    InterpPath,
    InterpVersion,
    TestsVersion,
    Parser,
    NoParasite,
    Simp,
    Stats,
    Byte,
    Verbose,
    Timeout,
}

/// Value of one option, for default comparison and rendering
#[derive(Clone, Debug, PartialEq, Eq)]
enum OptionValue {
    Switch(bool),
    Count(u8),
    Text(Option<String>),
}

impl PropagatedOption {
    pub const ALL: [PropagatedOption; 14] = [
        PropagatedOption::Db,
        PropagatedOption::DbPath,
        PropagatedOption::DbPgSchema,
        PropagatedOption::Interp,
        PropagatedOption::InterpPath,
        PropagatedOption::InterpVersion,
        PropagatedOption::TestsVersion,
        PropagatedOption::Parser,
        PropagatedOption::NoParasite,
        PropagatedOption::Simp,
        PropagatedOption::Stats,
        PropagatedOption::Byte,
        PropagatedOption::Verbose,
        PropagatedOption::Timeout,
    ];

    /// Long flag as accepted by the command line
    pub fn flag(&self) -> &'static str {
        match self {
            PropagatedOption::Db => "--db",
            PropagatedOption::DbPath => "--dbpath",
            PropagatedOption::DbPgSchema => "--db-pg-schema",
            PropagatedOption::Interp => "--interp",
            PropagatedOption::InterpPath => "--interp-path",
            PropagatedOption::InterpVersion => "--interp-version",
            PropagatedOption::TestsVersion => "--tests-version",
            PropagatedOption::Parser => "--parser",
            PropagatedOption::NoParasite => "--no-parasite",
            PropagatedOption::Simp => "--simp",
            PropagatedOption::Stats => "--stats",
            PropagatedOption::Byte => "--byte",
            PropagatedOption::Verbose => "--verbose",
            PropagatedOption::Timeout => "--timeout",
        }
    }

    fn value(&self, options: &RunOptions) -> OptionValue {
        use OptionValue::{Count, Switch, Text};

        match self {
            PropagatedOption::Db => Text(options.db.map(|db| db.as_str().to_string())),
            PropagatedOption::DbPath => Text(Some(options.dbpath.clone())),
            PropagatedOption::DbPgSchema => Text(Some(options.db_pg_schema.clone())),
            PropagatedOption::Interp => Text(Some(options.interp.as_str().to_string())),
            PropagatedOption::InterpPath => Text(Some(options.interp_path.clone())),
            PropagatedOption::InterpVersion => Text(Some(options.interp_version.clone())),
            PropagatedOption::TestsVersion => Text(options.tests_version.clone()),
            PropagatedOption::Parser => Text(Some(options.parser.clone())),
            PropagatedOption::NoParasite => Switch(options.no_parasite),
            PropagatedOption::Simp => Switch(options.simp),
            PropagatedOption::Stats => Switch(options.stats),
            PropagatedOption::Byte => Switch(options.byte),
            PropagatedOption::Verbose => Count(options.verbose),
            PropagatedOption::Timeout => Text(Some(options.timeout.to_string())),
        }
    }
}

/// Quote a value for the arguments line of a submit description
pub fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the argument string for remote array tasks
#[derive(Clone, Debug)]
pub struct ArgumentCodec {
    defaults: RunOptions,
    sub_executor: LocalStrategy,
    secret_dir: Option<PathBuf>,
    secret_file: String,
}

impl ArgumentCodec {
    pub fn new(sub_executor: LocalStrategy, secret_file: impl Into<String>) -> Self {
        Self {
            defaults: RunOptions::default(),
            sub_executor,
            secret_dir: std::env::current_dir().ok(),
            secret_file: secret_file.into(),
        }
    }

    /// Directory the secret file is written to
    pub fn with_secret_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.secret_dir = dir;
        self
    }

    /// Allow-listed options that differ from their defaults
    pub fn encode(&self, options: &RunOptions) -> Vec<String> {
        let mut tokens = Vec::new();

        for option in PropagatedOption::ALL {
            let value = option.value(options);
            if value == option.value(&self.defaults) {
                continue;
            }

            match value {
                OptionValue::Switch(true) => tokens.push(option.flag().to_string()),
                OptionValue::Switch(false) => {}
                OptionValue::Count(n) => {
                    tokens.extend((0..n).map(|_| option.flag().to_string()));
                }
                OptionValue::Text(Some(text)) => {
                    tokens.push(option.flag().to_string());
                    tokens.push(quote_value(&text));
                }
                OptionValue::Text(None) => {}
            }
        }

        tokens
    }

    /// Executor selection and batch reference for a job's array tasks
    pub fn batch_scope(&self, job_id: DbId) -> Vec<String> {
        vec![
            "-x".to_string(),
            self.sub_executor.as_str().to_string(),
            "--batch".to_string(),
            format!("{job_id},{}", Placeholder::Process),
        ]
    }

    /// Stage any ambient secret, then encode options and batch scope.
    /// Only a Postgres config is staged; for other backends the secret is
    /// dropped and the db path left as given.
    pub fn encode_for_job(
        &self,
        options: &RunOptions,
        secret: &mut impl SecretChannel,
        job_id: DbId,
    ) -> Result<(String, Redaction), SecretError> {
        let mut options = options.clone();
        let redaction = match options.db {
            Some(DbKind::Postgres) => redact_secret(
                secret,
                &mut options.dbpath,
                self.secret_dir.as_deref(),
                &self.secret_file,
            )?,
            _ => discard_secret(secret),
        };

        let mut tokens = self.encode(&options);
        tokens.extend(self.batch_scope(job_id));
        Ok((tokens.join(" "), redaction))
    }
}
