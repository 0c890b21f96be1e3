//! Compiled chunk rules
//!
//! [`RuleSet::compile`] performs every structural check on the configured rules before any
//! module is read: names, include patterns and entry-point files.

use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::{
    config::ChunkRule,
    error::{BuildError, BuildResult},
};

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    /// Canonical entry-point paths
    pub entry_points: Vec<PathBuf>,
    pub includes: Vec<Regex>,
}

impl CompiledRule {
    /// The first include pattern found anywhere in `normalized_path`
    pub fn matching_include(&self, normalized_path: &str) -> Option<&Regex> {
        self.includes
            .iter()
            .find(|pattern| pattern.is_match(normalized_path))
    }
}

/// The ordered rules of one build plus the name of the default chunk
#[derive(Debug, Clone)]
pub struct RuleSet {
    default_chunk: String,
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Validate and compile `rules`. Relative entry points are resolved against `base_dir`.
    pub fn compile(rules: &[ChunkRule], default_chunk: &str, base_dir: &Path) -> BuildResult<Self> {
        validate_chunk_name(default_chunk)?;
        let mut names = FxHashSet::from_iter([default_chunk]);
        let mut compiled = Vec::with_capacity(rules.len());

        for (index, rule) in rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(BuildError::EmptyChunkName { index });
            }
            validate_chunk_name(&rule.name)?;
            if !names.insert(rule.name.as_str()) {
                return Err(BuildError::DuplicateChunkName {
                    name: rule.name.clone(),
                });
            }

            let includes = rule
                .includes
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| BuildError::InvalidPattern {
                        rule: rule.name.clone(),
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect::<BuildResult<Vec<_>>>()?;

            let entry_points = rule
                .entry_points
                .iter()
                .map(|entry| {
                    let path = if entry.is_relative() {
                        base_dir.join(entry)
                    } else {
                        entry.clone()
                    };
                    path.canonicalize()
                        .ok()
                        .filter(|canonical| canonical.is_file())
                        .ok_or_else(|| BuildError::ChunkEntryNotFound {
                            rule: rule.name.clone(),
                            path,
                        })
                })
                .collect::<BuildResult<Vec<_>>>()?;

            debug!(
                "Chunk rule '{}': {} entry point(s), {} include pattern(s)",
                rule.name,
                entry_points.len(),
                includes.len()
            );

            compiled.push(CompiledRule {
                name: rule.name.clone(),
                entry_points,
                includes,
            });
        }

        Ok(Self {
            default_chunk: default_chunk.to_string(),
            rules: compiled,
        })
    }

    pub fn default_chunk(&self) -> &str {
        &self.default_chunk
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `name` is the default chunk or a configured rule
    pub fn contains(&self, name: &str) -> bool {
        name == self.default_chunk || self.rules.iter().any(|rule| rule.name == name)
    }

    /// Every chunk name, default chunk first
    pub fn chunk_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.default_chunk.as_str())
            .chain(self.rules.iter().map(|rule| rule.name.as_str()))
    }

    /// Swap in entry points that need not exist on disk
    #[cfg(test)]
    pub(crate) fn replace_entry_points(&mut self, entry_points: Vec<Vec<PathBuf>>) {
        for (rule, entries) in self.rules.iter_mut().zip(entry_points) {
            rule.entry_points = entries;
        }
    }

    /// Entry points of every rule, in declaration order
    pub fn entry_points(&self) -> Vec<PathBuf> {
        self.rules
            .iter()
            .flat_map(|rule| rule.entry_points.iter().cloned())
            .collect()
    }
}

/// Whether `c` may appear in a chunk name
pub fn is_chunk_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Chunk names become file names in the output directory, so separators and dots are out
fn validate_chunk_name(name: &str) -> BuildResult<()> {
    if name.is_empty() || !name.chars().all(is_chunk_name_char) {
        return Err(BuildError::InvalidChunkName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_compile_resolves_entry_points() -> BuildResult<()> {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("features")).unwrap();
        fs::write(temp_dir.path().join("features/feature1.py"), "").unwrap();

        let rules = vec![
            ChunkRule::new("features")
                .with_entry_point("features/feature1.py")
                .with_include(r".*features.*\.py"),
        ];
        let rule_set = RuleSet::compile(&rules, "main", temp_dir.path())?;

        assert_eq!(
            rule_set.entry_points(),
            vec![temp_dir.path().join("features/feature1.py").canonicalize().unwrap()]
        );
        assert!(rule_set.contains("main"));
        assert!(rule_set.contains("features"));
        assert!(!rule_set.contains("ghost"));
        assert_eq!(rule_set.chunk_names().collect::<Vec<_>>(), vec!["main", "features"]);
        let rule = &rule_set.rules()[0];
        assert!(rule.matching_include("/src/features/feature1.py").is_some());
        assert!(rule.matching_include("/src/models/user.py").is_none());
        Ok(())
    }

    #[test]
    fn test_structural_errors() {
        let dir = Path::new(".");

        let empty = RuleSet::compile(&[ChunkRule::new(" ")], "main", dir).unwrap_err();
        assert!(matches!(empty, BuildError::EmptyChunkName { index: 0 }));

        let duplicate =
            RuleSet::compile(&[ChunkRule::new("a"), ChunkRule::new("a")], "main", dir).unwrap_err();
        assert!(matches!(duplicate, BuildError::DuplicateChunkName { ref name } if name == "a"));

        let shadows_default = RuleSet::compile(&[ChunkRule::new("main")], "main", dir).unwrap_err();
        assert!(matches!(shadows_default, BuildError::DuplicateChunkName { .. }));

        let bad_regex =
            RuleSet::compile(&[ChunkRule::new("a").with_include("(")], "main", dir).unwrap_err();
        assert!(matches!(bad_regex, BuildError::InvalidPattern { ref rule, .. } if rule == "a"));

        let missing_entry = RuleSet::compile(
            &[ChunkRule::new("a").with_entry_point("no/such/file.py")],
            "main",
            dir,
        )
        .unwrap_err();
        assert!(matches!(missing_entry, BuildError::ChunkEntryNotFound { ref rule, .. } if rule == "a"));
    }

    #[test]
    fn test_chunk_names_must_be_file_safe() {
        let dir = Path::new(".");

        for name in ["../../escaped", "a/b", "a\\b", "..", "v1.2", "bad name", "café"] {
            let err = RuleSet::compile(&[ChunkRule::new(name)], "main", dir).unwrap_err();
            assert!(
                matches!(err, BuildError::InvalidChunkName { name: ref invalid } if invalid == name),
                "{name} was accepted"
            );
        }

        let bad_default = RuleSet::compile(&[], "../main", dir).unwrap_err();
        assert!(matches!(bad_default, BuildError::InvalidChunkName { .. }));

        let rules = [ChunkRule::new("admin-v2"), ChunkRule::new("Reports_2024")];
        assert!(RuleSet::compile(&rules, "main", dir).is_ok());
    }
}
