//! Error taxonomy for a single build
//!
//! Library components return [`BuildError`] so callers can match on the failure kind.
//! The orchestrator and the CLI wrap these in `anyhow` with extra context.

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Result type alias for build operations
pub type BuildResult<T> = Result<T, BuildError>;

/// An import specifier that could not be resolved to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedImport {
    /// The module containing the import
    pub module: PathBuf,
    /// The specifier as written (e.g. `models.user` or `..helpers`)
    pub specifier: String,
    /// 1-based line of the import statement
    pub line: usize,
}

impl fmt::Display for UnresolvedImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot resolve import '{}' in {}:{}",
            self.specifier,
            self.module.display(),
            self.line
        )
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    /// The program entry point does not exist or is not a readable file
    #[error("entry point not found: {path}")]
    EntryNotFound { path: PathBuf },

    /// All unresolved imports collected during graph traversal
    #[error("{} unresolved import(s):\n{}", .0.len(), format_unresolved(.0))]
    UnresolvedImports(Vec<UnresolvedImport>),

    /// A chunk rule names an entry point that is not part of the graph
    #[error("entry point {path} of chunk '{rule}' not found")]
    ChunkEntryNotFound { rule: String, path: PathBuf },

    /// A dynamic load names a chunk that is not configured
    #[error("{module} loads unknown chunk '{chunk}'")]
    UnknownChunkReference { module: PathBuf, chunk: String },

    /// A dynamic load whose chunk name is computed at runtime
    #[error("{module}:{line}: chunk name passed to the loader must be a string literal")]
    DynamicLoadTargetNotStatic { module: PathBuf, line: usize },

    /// Two chunk rules (or a rule and the default chunk) share a name
    #[error("duplicate chunk name '{name}'")]
    DuplicateChunkName { name: String },

    /// A chunk rule with an empty name
    #[error("chunk rule #{index} has an empty name")]
    EmptyChunkName { index: usize },

    /// A chunk name that cannot be used as a file name in the output directory
    #[error(
        "invalid chunk name '{name}': only ASCII letters, digits, '_' and '-' are allowed"
    )]
    InvalidChunkName { name: String },

    /// An include pattern that is not a valid regex
    #[error("invalid include pattern '{pattern}' in chunk '{rule}': {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A module whose source is not valid Python
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The manifest could not be rendered as JSON
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Reading a source file or writing an artifact failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_unresolved(imports: &[UnresolvedImport]) -> String {
    imports
        .iter()
        .map(|import| format!("  - {import}"))
        .collect::<Vec<_>>()
        .join("\n")
}
