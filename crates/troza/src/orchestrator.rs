//! One build, end to end
//!
//! Configuration problems surface before any module is read, and nothing is written until
//! every chunk and the manifest have been rendered.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    chunking::{Assignment, AutoChunkOptions, RuleSet, assign, auto_chunk_rules},
    config::Config,
    emitter::{ChunkEmitter, EmittedChunk},
    error::{BuildError, BuildResult},
    fs::{FileSystem, OsFileSystem},
    graph_builder::GraphBuilder,
    manifest::{Manifest, ManifestOptions, build_manifest},
    module_graph::ModuleGraph,
    resolver::ModuleResolver,
};

/// Everything a build produces, rendered but not yet written
#[derive(Debug)]
pub struct BuildPlan {
    pub graph: ModuleGraph,
    pub rules: RuleSet,
    pub assignment: Assignment,
    pub manifest: Manifest,
    pub manifest_json: String,
    pub chunks: Vec<EmittedChunk>,
    /// Time spent planning, and writing when the plan comes from a build
    pub elapsed: Duration,
}

impl BuildPlan {
    /// File sizes per chunk, in manifest order
    pub fn summary(&self) -> BuildSummary {
        let chunks: Vec<ChunkSummary> = self
            .chunks
            .iter()
            .map(|chunk| ChunkSummary {
                name: chunk.name.clone(),
                file: chunk.file.clone(),
                modules: self
                    .manifest
                    .chunk(&chunk.name)
                    .map_or(0, |entry| entry.modules.len()),
                bytes: chunk.content.len(),
            })
            .collect();

        BuildSummary {
            total_bytes: chunks.iter().map(|chunk| chunk.bytes).sum::<usize>()
                + self.manifest_json.len(),
            chunks,
            manifest_bytes: self.manifest_json.len(),
            elapsed: self.elapsed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub name: String,
    pub file: String,
    pub modules: usize,
    pub bytes: usize,
}

/// Post-build report, one line per chunk followed by the totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub chunks: Vec<ChunkSummary>,
    pub manifest_bytes: usize,
    /// Chunks plus manifest
    pub total_bytes: usize,
    pub elapsed: Duration,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .chunks
            .iter()
            .map(|chunk| chunk.file.len())
            .max()
            .unwrap_or(0);
        for chunk in &self.chunks {
            writeln!(
                f,
                "  {:<width$}  {:>10}  {} module(s)",
                chunk.file,
                format_size(chunk.bytes),
                chunk.modules,
            )?;
        }
        write!(
            f,
            "Total: {} in {} chunk(s) and the manifest, built in {:.2?}",
            format_size(self.total_bytes),
            self.chunks.len(),
            self.elapsed
        )
    }
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

#[derive(Debug)]
pub struct BuildOrchestrator {
    config: Config,
    pythonpath_override: Option<String>,
    virtualenv_override: Option<String>,
}

impl BuildOrchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pythonpath_override: None,
            virtualenv_override: None,
        }
    }

    /// Use `pythonpath` instead of the `PYTHONPATH` environment variable
    #[must_use]
    pub fn with_pythonpath(mut self, pythonpath: impl Into<String>) -> Self {
        self.pythonpath_override = Some(pythonpath.into());
        self
    }

    /// Use `virtualenv` instead of the `VIRTUAL_ENV` environment variable
    #[must_use]
    pub fn with_virtualenv(mut self, virtualenv: impl Into<String>) -> Self {
        self.virtualenv_override = Some(virtualenv.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build `entry` into `output_dir` on the real file system
    pub fn build(&self, entry: &Path, output_dir: &Path) -> Result<BuildPlan> {
        self.build_with(entry, output_dir, &OsFileSystem)
    }

    pub fn build_with<F: FileSystem>(
        &self,
        entry: &Path,
        output_dir: &Path,
        fs: &F,
    ) -> Result<BuildPlan> {
        let start = Instant::now();
        let mut plan = self.plan(entry, fs)?;
        self.write(&plan, output_dir, fs)?;
        plan.elapsed = start.elapsed();
        Ok(plan)
    }

    /// Run every phase of the build in memory
    pub fn plan<F: FileSystem>(&self, entry: &Path, fs: &F) -> Result<BuildPlan> {
        let start = Instant::now();
        let entry_path = entry
            .canonicalize()
            .ok()
            .filter(|path| path.is_file())
            .ok_or_else(|| BuildError::EntryNotFound {
                path: entry.to_path_buf(),
            })?;
        let base_dir = entry_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        info!("Validating {} chunk rule(s)", self.config.chunks.len());
        let declared = RuleSet::compile(&self.config.chunks, &self.config.default_chunk, &base_dir)
            .context("Invalid chunk configuration")?;

        let resolver = ModuleResolver::new_with_overrides(
            &self.config,
            self.pythonpath_override.as_deref(),
            self.virtualenv_override.as_deref(),
        );
        let graph = GraphBuilder::with_resolver(&self.config, fs, resolver)
            .build_graph_with_roots(&entry_path, &declared.entry_points())
            .with_context(|| format!("Failed to build module graph for {}", entry.display()))?;

        for cycle in graph.cycles() {
            let names: Vec<&str> = cycle
                .iter()
                .map(|id| graph.module(*id).name.as_str())
                .collect();
            info!("Import cycle: {}", names.join(" -> "));
        }

        let rules = if self.config.auto_chunks && declared.is_empty() {
            let auto_rules = auto_chunk_rules(
                &graph,
                &AutoChunkOptions {
                    entry_dir: &base_dir,
                    min_size: self.config.auto_chunk_min_size,
                    similarity: self.config.auto_chunk_similarity,
                    default_chunk: &self.config.default_chunk,
                },
            );
            info!("Derived {} chunk rule(s) from the directory layout", auto_rules.len());
            RuleSet::compile(&auto_rules, &self.config.default_chunk, &base_dir)
                .context("Invalid automatic chunk rules")?
        } else {
            declared
        };

        info!("Assigning {} modules to chunks", graph.len());
        let assignment = assign(&graph, &rules, self.config.duplicate_policy)?;

        let manifest = build_manifest(
            &graph,
            &assignment,
            &rules,
            ManifestOptions {
                base_dir: &base_dir,
                content_hash: self.config.content_hash,
            },
        )?;
        let manifest_json = manifest.to_json()?;

        let emitter = ChunkEmitter::new(
            &graph,
            &base_dir,
            &self.config.loader_function,
            &self.config.manifest_name,
        );
        let chunks = assignment
            .chunks
            .iter()
            .filter_map(|(name, members)| {
                manifest
                    .chunk(name)
                    .map(|entry| emitter.render(name, members, entry))
            })
            .collect();

        Ok(BuildPlan {
            graph,
            rules,
            assignment,
            manifest,
            manifest_json,
            chunks,
            elapsed: start.elapsed(),
        })
    }

    /// Write a rendered build. If any write fails, the artifacts already written are removed.
    pub fn write<F: FileSystem>(&self, plan: &BuildPlan, output_dir: &Path, fs: &F) -> Result<()> {
        let mut written = Vec::with_capacity(plan.chunks.len() + 1);

        if let Err(err) = self.write_all(plan, output_dir, fs, &mut written) {
            for path in written.iter().rev() {
                if let Err(cleanup) = fs.remove_artifact(path) {
                    warn!("Failed to remove partial output {}: {cleanup}", path.display());
                }
            }
            return Err(err.into());
        }

        info!(
            "Wrote {} chunk(s) and {} to {}",
            plan.chunks.len(),
            self.config.manifest_name,
            output_dir.display()
        );
        Ok(())
    }

    fn write_all<F: FileSystem>(
        &self,
        plan: &BuildPlan,
        output_dir: &Path,
        fs: &F,
        written: &mut Vec<PathBuf>,
    ) -> BuildResult<()> {
        for chunk in &plan.chunks {
            let path = output_dir.join(&chunk.file);
            debug!("Writing chunk '{}' to {}", chunk.name, path.display());
            fs.write_artifact(&path, &chunk.content)?;
            written.push(path);
        }

        let manifest_path = output_dir.join(&self.config.manifest_name);
        fs.write_artifact(&manifest_path, &plan.manifest_json)?;
        written.push(manifest_path);
        Ok(())
    }
}
