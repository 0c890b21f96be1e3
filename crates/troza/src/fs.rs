//! File system collaborator
//!
//! The graph builder reads module sources and the orchestrator writes artifacts through
//! [`FileSystem`], so builds can be driven against an in-memory tree in tests.

#[cfg(test)]
use std::path::PathBuf;
use std::{fs, path::Path};

use crate::error::{BuildError, BuildResult};

pub trait FileSystem {
    /// Read a module's source text
    fn read_source(&self, path: &Path) -> BuildResult<String>;

    /// Write an output artifact, creating parent directories as needed
    fn write_artifact(&self, path: &Path, content: &str) -> BuildResult<()>;

    /// Remove an artifact written earlier in the same build
    fn remove_artifact(&self, path: &Path) -> BuildResult<()>;
}

/// The real file system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_source(&self, path: &Path) -> BuildResult<String> {
        fs::read_to_string(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_artifact(&self, path: &Path, content: &str) -> BuildResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| BuildError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, content).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn remove_artifact(&self, path: &Path) -> BuildResult<()> {
        fs::remove_file(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// In-memory file system for testing
///
/// Reads fall through to disk so module sources can live in a temp dir while writes are
/// captured.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    pub written: std::sync::Arc<std::sync::Mutex<indexmap::IndexMap<PathBuf, String>>>,
    /// Writes to this path fail
    fail_on: Option<PathBuf>,
}

#[cfg(test)]
impl MemoryFileSystem {
    pub fn failing_on(path: impl Into<PathBuf>) -> Self {
        Self {
            fail_on: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn written_paths(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap().keys().cloned().collect()
    }

    pub fn content(&self, path: &Path) -> Option<String> {
        self.written.lock().unwrap().get(path).cloned()
    }
}

#[cfg(test)]
impl FileSystem for MemoryFileSystem {
    fn read_source(&self, path: &Path) -> BuildResult<String> {
        OsFileSystem.read_source(path)
    }

    fn write_artifact(&self, path: &Path, content: &str) -> BuildResult<()> {
        if self.fail_on.as_deref() == Some(path) {
            return Err(BuildError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.written
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn remove_artifact(&self, path: &Path) -> BuildResult<()> {
        self.written.lock().unwrap().shift_remove(path);
        Ok(())
    }
}
