//! Environment variable configuration
//!
//! Variables the harness reads besides its command line.

use std::env;

use crate::models::BatchRef;

/// Environment variable prefix
const ENV_PREFIX: &str = "RUNTESTS";

/// Configuration from environment variables
#[derive(Clone, Default)]
pub struct EnvConfig {
    /// Postgres connection config from RUNTESTS_DB
    pub db: Option<String>,
    /// Config file from RUNTESTS_CONFIG
    pub config_file: Option<String>,
    /// Batch index to write a debug log for, from RUNTESTS_BATCH_DEBUG
    pub batch_debug: Option<String>,
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("db", &self.db.as_ref().map(|_| "<redacted>"))
            .field("config_file", &self.config_file)
            .field("batch_debug", &self.batch_debug)
            .finish()
    }
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            db: get_env("DB"),
            config_file: get_env("CONFIG"),
            batch_debug: get_env("BATCH_DEBUG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.db.is_some() || self.config_file.is_some() || self.batch_debug.is_some()
    }

    /// Whether the remote task running `batch` should keep a debug log
    pub fn debug_batch(&self, batch: &BatchRef) -> bool {
        self.batch_debug
            .as_deref()
            .map(|index| index.trim() == batch.batch_index.to_string())
            .unwrap_or(false)
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set an arbitrary variable
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_CONFIG"), path.into()));
        self
    }

    pub fn batch_debug(mut self, index: u32) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_BATCH_DEBUG"), index.to_string()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}
