//! Configuration module
//!
//! Settings that rarely change between runs live in a config file; the
//! options of one invocation live in `RunOptions`.

mod env;
mod file;
mod options;

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

use crate::dispatch::condor::{
    DEFAULT_ACCOUNTING_GROUP, DEFAULT_CMD_FILE, DEFAULT_JOBINFO_FILE, DEFAULT_REQUIREMENTS,
    SUBMIT_PROGRAM,
};
use crate::dispatch::BatchWait;

pub use env::EnvConfig;
#[cfg(test)]
pub use env::EnvBuilder;
pub use options::{RunOptions, DEFAULT_PG_SCHEMA, DEFAULT_TIMEOUT_SECS};

/// Application configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTCondor submission defaults
    pub condor: CondorConfig,

    /// How long remote tasks wait for their batch to become visible
    pub batch_wait: BatchWait,
}

/// HTCondor defaults
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondorConfig {
    /// ClassAd expression machines must satisfy
    pub requirements: String,

    pub accounting_group: String,

    /// Test cases per array task unless `--batch-size` is given
    pub batch_size: NonZeroUsize,

    pub jobinfo_file: String,

    /// Written instead of submitting with `--condor-dry-run`
    pub cmd_file: String,

    /// Owner-only file the database secret is moved to
    pub secret_file: String,

    /// `condor_submit` binary
    pub submit_program: String,
}

impl Default for CondorConfig {
    fn default() -> Self {
        Self {
            requirements: DEFAULT_REQUIREMENTS.to_string(),
            accounting_group: DEFAULT_ACCOUNTING_GROUP.to_string(),
            batch_size: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            jobinfo_file: DEFAULT_JOBINFO_FILE.to_string(),
            cmd_file: DEFAULT_CMD_FILE.to_string(),
            secret_file: ".pgconfig.tmp".to_string(),
            submit_program: SUBMIT_PROGRAM.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.condor.requirements, "OpSysMajorVer == 16");
        assert_eq!(config.condor.accounting_group, "jscert");
        assert_eq!(config.condor.batch_size.get(), 4);
        assert_eq!(config.condor.secret_file, ".pgconfig.tmp");
        assert_eq!(config.condor.submit_program, "condor_submit");
        assert_eq!(config.batch_wait, BatchWait::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "condor:\n  batch_size: 16\nbatch_wait:\n  max_attempts: 3\n",
        )
        .unwrap();
        assert_eq!(config.condor.batch_size.get(), 16);
        assert_eq!(config.condor.accounting_group, "jscert");
        assert_eq!(config.batch_wait.max_attempts, 3);
        assert_eq!(config.batch_wait.initial_delay_ms, 500);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result: Result<AppConfig, _> = serde_yaml::from_str("condor:\n  batch_size: 0\n");
        assert!(result.is_err());
    }
}
