//! Database secret staging
//!
//! Submit descriptions are readable by everyone on the cluster, and with
//! `getenv = True` the scheduler copies our environment into each task. A
//! credential held in `RUNTESTS_DB` is therefore moved into an owner-only
//! file and referenced by path before anything is handed to the scheduler.

use std::env;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable holding the Postgres connection config
pub const SECRET_ENV_VAR: &str = "RUNTESTS_DB";

/// Secret staging errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("no destination for the database secret: {0}")]
    NoDestination(String),

    #[error("failed to stage database secret at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where an ambient secret can be read from and removed
pub trait SecretChannel {
    fn read(&self) -> Option<String>;
    fn clear(&mut self);
}

/// Secret taken from a process environment variable at startup.
///
/// The variable itself is left alone; child processes that must not see it
/// remove it from their own environment.
#[derive(Clone)]
pub struct EnvSecret {
    var: String,
    value: Option<String>,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        let var = var.into();
        let value = env::var(&var).ok();
        Self { var, value }
    }

    /// Variable the secret was read from
    pub fn var(&self) -> &str {
        &self.var
    }
}

impl fmt::Debug for EnvSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSecret")
            .field("var", &self.var)
            .field("present", &self.value.is_some())
            .finish()
    }
}

impl Default for EnvSecret {
    fn default() -> Self {
        Self::new(SECRET_ENV_VAR)
    }
}

impl SecretChannel for EnvSecret {
    fn read(&self) -> Option<String> {
        self.value.clone()
    }

    fn clear(&mut self) {
        self.value = None;
    }
}

/// What happened to the ambient secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Redaction {
    /// Nothing in the channel
    NotPresent,
    /// A db path was already given; the channel was only emptied
    Cleared,
    /// Written to this file, which is now the db path
    Staged(PathBuf),
}

/// Empty the channel without staging anything
pub fn discard_secret(channel: &mut impl SecretChannel) -> Redaction {
    if channel.read().is_none() {
        return Redaction::NotPresent;
    }
    channel.clear();
    debug!("Dropped ambient database secret");
    Redaction::Cleared
}

/// Move the ambient secret into `dir/file_name` (mode 0600) unless a db path
/// is already set, and empty the channel either way.
pub fn redact_secret(
    channel: &mut impl SecretChannel,
    dbpath: &mut String,
    dir: Option<&Path>,
    file_name: &str,
) -> Result<Redaction, SecretError> {
    let Some(secret) = channel.read() else {
        return Ok(Redaction::NotPresent);
    };

    if !dbpath.is_empty() {
        channel.clear();
        debug!("Database path already set, dropped ambient secret");
        return Ok(Redaction::Cleared);
    }

    let dir = dir.ok_or_else(|| {
        SecretError::NoDestination("working directory is unavailable".to_string())
    })?;
    let path = dir.join(file_name);
    let path_str = path
        .to_str()
        .ok_or_else(|| SecretError::NoDestination(format!("{} is not UTF-8", path.display())))?
        .to_string();

    write_private(&path, &secret).map_err(|source| SecretError::Write {
        path: path.clone(),
        source,
    })?;

    *dbpath = path_str;
    channel.clear();

    info!("Moved database secret to {}", path.display());
    Ok(Redaction::Staged(path))
}

fn write_private(path: &Path, content: &str) -> io::Result<()> {
    let mut file = create_private(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation; tighten a file left by an earlier run
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::EnvBuilder;

    /// Secret channel that does not touch the process environment
    #[derive(Default)]
    pub(crate) struct StaticSecret(pub Option<String>);

    impl SecretChannel for StaticSecret {
        fn read(&self) -> Option<String> {
            self.0.clone()
        }

        fn clear(&mut self) {
            self.0 = None;
        }
    }

    #[test]
    fn test_env_secret_read_once_and_cleared() {
        let _guard = EnvBuilder::new()
            .var("RUNTESTS_TEST_SECRET", "host=db password=hunter2")
            .apply_scoped();

        let dir = tempfile::tempdir().unwrap();
        let mut channel = EnvSecret::new("RUNTESTS_TEST_SECRET");
        assert_eq!(channel.var(), "RUNTESTS_TEST_SECRET");
        assert!(!format!("{channel:?}").contains("hunter2"));

        let mut dbpath = String::new();
        let r = redact_secret(&mut channel, &mut dbpath, Some(dir.path()), ".pg").unwrap();
        assert_eq!(r, Redaction::Staged(dir.path().join(".pg")));
        assert!(channel.read().is_none());
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".pg")).unwrap(),
            "host=db password=hunter2"
        );
    }

    #[test]
    fn test_env_secret_absent() {
        let mut channel = EnvSecret::new("RUNTESTS_TEST_SECRET_UNSET");
        assert!(channel.read().is_none());
        assert_eq!(discard_secret(&mut channel), Redaction::NotPresent);
    }

    #[test]
    fn test_discard_clears_without_file() {
        let mut channel = StaticSecret(Some("secret".to_string()));
        assert_eq!(discard_secret(&mut channel), Redaction::Cleared);
        assert!(channel.read().is_none());
    }

    #[test]
    fn test_nothing_to_redact() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = StaticSecret(None);
        let mut dbpath = String::new();

        let r = redact_secret(&mut channel, &mut dbpath, Some(dir.path()), ".pg").unwrap();
        assert_eq!(r, Redaction::NotPresent);
        assert!(dbpath.is_empty());
        assert!(!dir.path().join(".pg").exists());
    }

    #[test]
    fn test_secret_staged_to_private_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = StaticSecret(Some("postgres://u:hunter2@h/d".to_string()));
        let mut dbpath = String::new();

        let r = redact_secret(&mut channel, &mut dbpath, Some(dir.path()), ".pg").unwrap();
        let expected = dir.path().join(".pg");
        assert_eq!(r, Redaction::Staged(expected.clone()));
        assert_eq!(dbpath, expected.to_str().unwrap());
        assert!(channel.read().is_none());
        assert_eq!(
            std::fs::read_to_string(&expected).unwrap(),
            "postgres://u:hunter2@h/d"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&expected).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_file_permissions_tightened() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".pg");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut channel = StaticSecret(Some("new".to_string()));
        let mut dbpath = String::new();
        redact_secret(&mut channel, &mut dbpath, Some(dir.path()), ".pg").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_existing_dbpath_only_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = StaticSecret(Some("secret".to_string()));
        let mut dbpath = "/etc/runtests/pgconfig".to_string();

        let r = redact_secret(&mut channel, &mut dbpath, Some(dir.path()), ".pg").unwrap();
        assert_eq!(r, Redaction::Cleared);
        assert_eq!(dbpath, "/etc/runtests/pgconfig");
        assert!(channel.read().is_none());
        assert!(!dir.path().join(".pg").exists());
    }

    #[test]
    fn test_no_destination_fails_and_keeps_secret() {
        let mut channel = StaticSecret(Some("secret".to_string()));
        let mut dbpath = String::new();

        let err = redact_secret(&mut channel, &mut dbpath, None, ".pg").unwrap_err();
        assert!(matches!(err, SecretError::NoDestination(_)));
        assert!(dbpath.is_empty());
    }

    #[test]
    fn test_unwritable_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let mut channel = StaticSecret(Some("secret".to_string()));
        let mut dbpath = String::new();

        let err = redact_secret(&mut channel, &mut dbpath, Some(&missing), ".pg").unwrap_err();
        assert!(matches!(err, SecretError::Write { .. }));
        assert!(dbpath.is_empty());
    }
}
