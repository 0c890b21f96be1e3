//! Build configuration
//!
//! Configuration is layered, lowest precedence first:
//! 1. built-in defaults
//! 2. user config (`<config dir>/troza/troza.toml`)
//! 3. project config (`./troza.toml`)
//! 4. an explicit `--config` file
//! 5. `TROZA_*` environment variables
//!
//! CLI flags are applied on top by the binary.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use indexmap::IndexSet;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::dirs;

pub const CONFIG_FILE_NAME: &str = "troza.toml";

/// One user-declared chunk
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ChunkRule {
    pub name: String,
    /// Modules whose import closure belongs to this chunk
    #[serde(default, alias = "entry_points")]
    pub entry_points: Vec<PathBuf>,
    /// Regexes matched against each module's absolute path
    #[serde(default)]
    pub includes: Vec<String>,
}

impl ChunkRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_points: Vec::new(),
            includes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_entry_point(mut self, path: impl Into<PathBuf>) -> Self {
        self.entry_points.push(path.into());
        self
    }

    #[must_use]
    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }
}

/// What happens when more than one rule claims the same module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The earliest-declared rule owns the module
    #[default]
    FirstMatch,
    /// Every matching rule gets a copy of the module
    Duplicate,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first-match" => Ok(Self::FirstMatch),
            "duplicate" => Ok(Self::Duplicate),
            other => Err(anyhow!(
                "unknown duplicate policy '{other}' (expected 'first-match' or 'duplicate')"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Extra module search roots, searched after the entry directory and PYTHONPATH
    pub src: Vec<PathBuf>,
    /// Top-level packages that are never bundled and never reported as unresolved
    pub known_third_party: IndexSet<String>,
    /// Name of the implicit chunk holding every unclaimed module
    pub default_chunk: String,
    /// Name of the runtime function that loads a chunk by name
    pub loader_function: String,
    /// File name of the manifest written next to the chunks
    pub manifest_name: String,
    /// Report unresolved imports as warnings instead of failing the build
    pub allow_unresolved: bool,
    /// Append a content hash to chunk file names
    pub content_hash: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// Derive chunks from the directory layout when no rules are declared
    pub auto_chunks: bool,
    pub auto_chunk_min_size: usize,
    /// Also group modules whose imports or importers overlap by more than this Jaccard index
    pub auto_chunk_similarity: Option<f64>,
    pub chunks: Vec<ChunkRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src: Vec::new(),
            known_third_party: IndexSet::new(),
            default_chunk: "main".to_string(),
            loader_function: "load_chunk".to_string(),
            manifest_name: "manifest.json".to_string(),
            allow_unresolved: false,
            content_hash: false,
            duplicate_policy: DuplicatePolicy::FirstMatch,
            auto_chunks: false,
            auto_chunk_min_size: 2,
            auto_chunk_similarity: None,
            chunks: Vec::new(),
        }
    }
}

/// A configuration layer; unset keys leave the lower layer untouched
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialConfig {
    src: Option<Vec<PathBuf>>,
    known_third_party: Option<Vec<String>>,
    default_chunk: Option<String>,
    loader_function: Option<String>,
    manifest_name: Option<String>,
    allow_unresolved: Option<bool>,
    content_hash: Option<bool>,
    duplicate_policy: Option<DuplicatePolicy>,
    auto_chunks: Option<bool>,
    auto_chunk_min_size: Option<usize>,
    auto_chunk_similarity: Option<f64>,
    chunks: Option<Vec<ChunkRule>>,
}

impl PartialConfig {
    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut partial = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // Relative search roots are relative to the file that declares them
        if let (Some(src), Some(base)) = (partial.src.as_mut(), path.parent()) {
            for dir in src.iter_mut() {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }

        Ok(partial)
    }

    fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read `TROZA_*` variables through `lookup`
    fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse_bool = |key: &str| -> Result<Option<bool>> {
            lookup(key)
                .map(|value| match value.to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Ok(true),
                    "0" | "false" | "no" | "off" => Ok(false),
                    _ => Err(anyhow!("{key} must be a boolean, got '{value}'")),
                })
                .transpose()
        };

        let separator = if cfg!(windows) { ';' } else { ':' };

        Ok(Self {
            src: lookup("TROZA_SRC").map(|value| {
                value
                    .split(separator)
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect()
            }),
            known_third_party: lookup("TROZA_KNOWN_THIRD_PARTY").map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(ToString::to_string)
                    .collect()
            }),
            default_chunk: lookup("TROZA_DEFAULT_CHUNK"),
            loader_function: lookup("TROZA_LOADER_FUNCTION"),
            manifest_name: lookup("TROZA_MANIFEST_NAME"),
            allow_unresolved: parse_bool("TROZA_ALLOW_UNRESOLVED")?,
            content_hash: parse_bool("TROZA_CONTENT_HASH")?,
            duplicate_policy: lookup("TROZA_DUPLICATE_POLICY")
                .map(|value| value.parse())
                .transpose()?,
            auto_chunks: parse_bool("TROZA_AUTO_CHUNKS")?,
            auto_chunk_min_size: lookup("TROZA_AUTO_CHUNK_MIN_SIZE")
                .map(|value| {
                    value.parse().with_context(|| {
                        format!("TROZA_AUTO_CHUNK_MIN_SIZE is not a number: {value}")
                    })
                })
                .transpose()?,
            auto_chunk_similarity: lookup("TROZA_AUTO_CHUNK_SIMILARITY")
                .map(|value| {
                    value.parse().with_context(|| {
                        format!("TROZA_AUTO_CHUNK_SIMILARITY is not a number: {value}")
                    })
                })
                .transpose()?,
            chunks: None,
        })
    }

    fn apply_to(self, config: &mut Config) {
        if let Some(src) = self.src {
            config.src = src;
        }
        if let Some(known) = self.known_third_party {
            config.known_third_party = known.into_iter().collect();
        }
        if let Some(name) = self.default_chunk {
            config.default_chunk = name;
        }
        if let Some(name) = self.loader_function {
            config.loader_function = name;
        }
        if let Some(name) = self.manifest_name {
            config.manifest_name = name;
        }
        if let Some(flag) = self.allow_unresolved {
            config.allow_unresolved = flag;
        }
        if let Some(flag) = self.content_hash {
            config.content_hash = flag;
        }
        if let Some(policy) = self.duplicate_policy {
            config.duplicate_policy = policy;
        }
        if let Some(flag) = self.auto_chunks {
            config.auto_chunks = flag;
        }
        if let Some(size) = self.auto_chunk_min_size {
            config.auto_chunk_min_size = size;
        }
        if let Some(threshold) = self.auto_chunk_similarity {
            config.auto_chunk_similarity = Some(threshold);
        }
        if let Some(chunks) = self.chunks {
            config.chunks = chunks;
        }
    }
}

impl Config {
    /// Load the layered configuration, optionally with an explicit config file
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_dir) = dirs::user_config_dir() {
            let user_file = user_dir.join(CONFIG_FILE_NAME);
            if user_file.is_file() {
                debug!("Loading user config from {}", user_file.display());
                PartialConfig::from_file(&user_file)?.apply_to(&mut config);
            }
        }

        let project_file = PathBuf::from(CONFIG_FILE_NAME);
        if project_file.is_file() {
            debug!("Loading project config from {}", project_file.display());
            PartialConfig::from_file(&project_file)?.apply_to(&mut config);
        }

        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            PartialConfig::from_file(path)?.apply_to(&mut config);
        }

        PartialConfig::from_env_with(|key| std::env::var(key).ok())?.apply_to(&mut config);

        Ok(config)
    }

    /// Parse a single TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config = Self::default();
        PartialConfig::from_toml_str(content)?.apply_to(&mut config);
        Ok(config)
    }
}
