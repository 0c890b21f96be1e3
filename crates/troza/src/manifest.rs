//! Build manifest
//!
//! The manifest tells the runtime loader which file holds each chunk, which modules it
//! carries, which chunks it loads on demand and which chunks must be loaded before it.
//! All maps are sorted so that identical builds serialize to identical bytes.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use log::debug;
use rustc_hash::FxHashSet;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    chunking::{Assignment, RuleSet},
    error::{BuildError, BuildResult},
    module_graph::{ModuleGraph, ModuleId},
    util::relative_path,
    visitors::DynamicLoadTarget,
};

/// Manifest schema version
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkEntry {
    /// Output file name
    pub file: String,
    /// Member module paths in execution order
    pub modules: Vec<String>,
    /// Chunks this chunk loads at runtime via the loader function
    pub depends_on: Vec<String>,
    /// Chunks owning modules this chunk imports statically
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub version: u32,
    /// Chunk holding the program entry
    pub entry_chunk: String,
    pub chunks: BTreeMap<String, ChunkEntry>,
    /// Module path to the chunk(s) holding it
    pub module_to_chunk: BTreeMap<String, Vec<String>>,
    /// Logical `<chunk>.py` name to output file name
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ManifestOptions<'a> {
    /// Module paths are written relative to this directory
    pub base_dir: &'a Path,
    /// Append a short content hash to chunk file names
    pub content_hash: bool,
}

impl Manifest {
    pub fn chunk(&self, name: &str) -> Option<&ChunkEntry> {
        self.chunks.get(name)
    }

    /// Pretty-printed JSON with a trailing newline
    pub fn to_json(&self) -> BuildResult<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

pub fn build_manifest(
    graph: &ModuleGraph,
    assignment: &Assignment,
    rules: &RuleSet,
    options: ManifestOptions<'_>,
) -> BuildResult<Manifest> {
    let load_targets = validate_dynamic_loads(graph, rules)?;
    let display = |id: ModuleId| relative_path(&graph.module(id).path, options.base_dir);

    let mut chunks = BTreeMap::new();
    let mut files = BTreeMap::new();
    let mut module_to_chunk: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (name, members) in &assignment.chunks {
        let member_set: FxHashSet<ModuleId> = members.iter().copied().collect();

        let depends_on: BTreeSet<&str> = members
            .iter()
            .flat_map(|id| load_targets[id.as_u32() as usize].iter().map(String::as_str))
            .filter(|target| *target != name.as_str())
            .collect();

        let imports: BTreeSet<&str> = members
            .iter()
            .flat_map(|id| graph.dependencies(*id))
            .filter(|dep| !member_set.contains(dep))
            .filter_map(|dep| assignment.primary_chunk(dep))
            .filter(|chunk| *chunk != name.as_str())
            .collect();

        let modules: Vec<String> = members.iter().map(|id| display(*id)).collect();
        for module in &modules {
            module_to_chunk
                .entry(module.clone())
                .or_default()
                .push(name.clone());
        }

        let file = chunk_file_name(graph, name, members, options);
        debug!(
            "Chunk '{name}' -> {file}: {} module(s), depends on {depends_on:?}, imports {imports:?}",
            modules.len()
        );

        files.insert(format!("{name}.py"), file.clone());
        chunks.insert(
            name.clone(),
            ChunkEntry {
                file,
                modules,
                depends_on: depends_on.into_iter().map(ToString::to_string).collect(),
                imports: imports.into_iter().map(ToString::to_string).collect(),
            },
        );
    }

    let entry_chunk = graph
        .entry()
        .and_then(|entry| assignment.primary_chunk(entry))
        .unwrap_or(rules.default_chunk())
        .to_string();

    Ok(Manifest {
        version: MANIFEST_VERSION,
        entry_chunk,
        chunks,
        module_to_chunk,
        files,
    })
}

/// Check every loader call and collect the literal targets of each module, indexed by id
fn validate_dynamic_loads(graph: &ModuleGraph, rules: &RuleSet) -> BuildResult<Vec<Vec<String>>> {
    graph
        .modules()
        .map(|module| {
            module
                .dynamic_loads
                .iter()
                .map(|load| match &load.target {
                    DynamicLoadTarget::Literal(chunk) if rules.contains(chunk) => Ok(chunk.clone()),
                    DynamicLoadTarget::Literal(chunk) => Err(BuildError::UnknownChunkReference {
                        module: module.path.clone(),
                        chunk: chunk.clone(),
                    }),
                    DynamicLoadTarget::Computed => Err(BuildError::DynamicLoadTargetNotStatic {
                        module: module.path.clone(),
                        line: load.line,
                    }),
                })
                .collect()
        })
        .collect()
}

fn chunk_file_name(
    graph: &ModuleGraph,
    name: &str,
    members: &[ModuleId],
    options: ManifestOptions<'_>,
) -> String {
    if !options.content_hash {
        return format!("{name}.py");
    }

    let mut hasher = Sha256::new();
    for id in members {
        let module = graph.module(*id);
        hasher.update(relative_path(&module.path, options.base_dir).as_bytes());
        hasher.update([0]);
        hasher.update(module.source.as_bytes());
        hasher.update([0]);
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{name}.{}.py", &digest[..8])
}
