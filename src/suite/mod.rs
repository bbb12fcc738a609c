//! Test discovery
//!
//! Expands the paths given on the command line into the ordered list of test
//! files to run.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const TEST_EXTENSION: &str = "js";

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("test path {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Collects `.js` test files below a set of paths
#[derive(Clone, Debug, Default)]
pub struct TestSuite {
    excluded: HashSet<PathBuf>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip these files. Paths that do not exist are ignored.
    pub fn with_excludes(mut self, excludes: &[PathBuf]) -> Self {
        for path in excludes {
            match fs::canonicalize(path) {
                Ok(canonical) => {
                    self.excluded.insert(canonical);
                }
                Err(e) => warn!("Ignoring exclude {}: {}", path.display(), e),
            }
        }
        self
    }

    /// Test file locators under `paths`, each directory in sorted order
    pub fn collect(&self, paths: &[PathBuf]) -> Result<Vec<String>, DiscoveryError> {
        let mut found = Vec::new();

        for path in paths {
            let metadata = fs::metadata(path).map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => DiscoveryError::NotFound(path.clone()),
                _ => DiscoveryError::Read {
                    path: path.clone(),
                    source,
                },
            })?;

            if metadata.is_dir() {
                self.walk(path, &mut found)?;
            } else if !self.is_excluded(path) {
                // Files named explicitly are taken whatever their extension
                found.push(path.to_string_lossy().into_owned());
            }
        }

        debug!("Discovered {} test files", found.len());
        Ok(found)
    }

    fn walk(&self, dir: &Path, found: &mut Vec<String>) -> Result<(), DiscoveryError> {
        let read_err = |source| DiscoveryError::Read {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let file_type = entry.file_type().map_err(read_err)?;
            if file_type.is_symlink() {
                // Linked files count, linked directories and dangling links do not
                match fs::metadata(entry.path()) {
                    Ok(target) if target.is_file() => entries.push((entry.path(), false)),
                    _ => {}
                }
                continue;
            }
            entries.push((entry.path(), file_type.is_dir()));
        }
        entries.sort();

        for (path, is_dir) in entries {
            if is_dir {
                self.walk(&path, found)?;
            } else if is_test_file(&path) && !self.is_excluded(&path) {
                found.push(path.to_string_lossy().into_owned());
            }
        }

        Ok(())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        fs::canonicalize(path)
            .map(|canonical| self.excluded.contains(&canonical))
            .unwrap_or(false)
    }
}

fn is_test_file(path: &Path) -> bool {
    path.extension().map(|e| e == TEST_EXTENSION).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_walks_directories_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b/2.js"));
        touch(&root.join("b/1.js"));
        touch(&root.join("a.js"));
        touch(&root.join("README.md"));

        let found = TestSuite::new().collect(&[root.to_path_buf()]).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| Path::new(p).strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.js", "b/1.js", "b/2.js"]);
    }

    #[test]
    fn test_excludes_are_canonicalised() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("sub/skip.js"));
        touch(&root.join("sub/keep.js"));

        let exclude = root.join("sub/../sub/skip.js");
        let found = TestSuite::new()
            .with_excludes(&[exclude])
            .collect(&[root.to_path_buf()])
            .unwrap();

        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("keep.js"));
    }

    #[test]
    fn test_explicit_file_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("single.test");
        touch(&file);

        let found = TestSuite::new().collect(&[file.clone()]).unwrap();
        assert_eq!(found, vec![file.to_string_lossy().into_owned()]);
    }

    #[test]
    fn test_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TestSuite::new()
            .collect(&[dir.path().join("nope")])
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_symlinks_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("real/a.js"));
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let found = TestSuite::new().collect(&[root.to_path_buf()]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("real"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_symlinks_collected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("shared/a.js"));
        std::fs::create_dir_all(root.join("suite")).unwrap();
        std::os::unix::fs::symlink(root.join("shared/a.js"), root.join("suite/linked.js")).unwrap();
        std::os::unix::fs::symlink(root.join("missing.js"), root.join("suite/dangling.js")).unwrap();

        let found = TestSuite::new().collect(&[root.join("suite")]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("linked.js"));
    }
}
