//! Chunk rules derived from the project itself, for projects that declare none
//!
//! Modules are grouped by directory first. When a similarity threshold is set, the modules
//! left over are grouped by how much their imports and importers overlap.

use std::path::Path;

use indexmap::IndexMap;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use super::rules::is_chunk_name_char;
use crate::{
    config::ChunkRule,
    module_graph::{ModuleGraph, ModuleId},
    util::{normalize_path, relative_path},
};

#[derive(Debug, Clone, Copy)]
pub struct AutoChunkOptions<'a> {
    /// Directory of the program entry; only directories below it form chunks
    pub entry_dir: &'a Path,
    /// Smallest group that becomes a chunk
    pub min_size: usize,
    /// Jaccard index a module must exceed to join a dependency group
    pub similarity: Option<f64>,
    /// Never handed out to an automatic chunk
    pub default_chunk: &'a str,
}

/// Directory rules ordered by directory path, followed by dependency-similarity rules when
/// `options.similarity` is set
pub fn auto_chunk_rules(graph: &ModuleGraph, options: &AutoChunkOptions<'_>) -> Vec<ChunkRule> {
    let mut names = ChunkNames::reserving(options.default_chunk);
    let (mut rules, covered) = directory_rules(graph, options, &mut names);

    if let Some(threshold) = options.similarity {
        let candidates: Vec<ModuleId> = graph
            .modules()
            .map(|module| module.id)
            .filter(|id| Some(*id) != graph.entry() && !covered.contains(id))
            .collect();
        rules.extend(similarity_rules(
            graph,
            candidates,
            threshold,
            options.min_size,
            &mut names,
        ));
    }

    rules
}

/// One rule per directory below the entry's directory holding at least `min_size` modules,
/// plus the modules those rules cover
fn directory_rules(
    graph: &ModuleGraph,
    options: &AutoChunkOptions<'_>,
    names: &mut ChunkNames,
) -> (Vec<ChunkRule>, FxHashSet<ModuleId>) {
    let entry_dir = options.entry_dir;
    let mut groups: IndexMap<String, Vec<ModuleId>> = IndexMap::new();

    for module in graph.modules() {
        let Some(parent) = module.path.parent() else {
            continue;
        };
        if parent == entry_dir || !parent.starts_with(entry_dir) {
            continue;
        }
        groups
            .entry(relative_path(parent, entry_dir))
            .or_default()
            .push(module.id);
    }

    groups.sort_keys();
    let base = regex::escape(&normalize_path(entry_dir));
    let mut covered = FxHashSet::default();

    let rules = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= options.min_size.max(1))
        .map(|(dir, members)| {
            let name = names.claim(&dir);
            debug!("Auto chunk '{name}' for {dir}/ ({} modules)", members.len());
            covered.extend(members);
            ChunkRule::new(name).with_include(format!("^{base}/{}/[^/]+\\.py$", regex::escape(&dir)))
        })
        .collect();

    (rules, covered)
}

/// Greedy grouping in module id order: each remaining module seeds a group and pulls in every
/// later module whose dependencies or dependents overlap the seed's by more than `threshold`
fn similarity_rules(
    graph: &ModuleGraph,
    mut remaining: Vec<ModuleId>,
    threshold: f64,
    min_size: usize,
    names: &mut ChunkNames,
) -> Vec<ChunkRule> {
    let neighbors = |id: ModuleId| -> (FxHashSet<ModuleId>, FxHashSet<ModuleId>) {
        (
            graph.dependencies(id).into_iter().collect(),
            graph.dependents(id).into_iter().collect(),
        )
    };
    let sets: FxHashMap<ModuleId, _> = remaining.iter().map(|id| (*id, neighbors(*id))).collect();

    let mut rules = Vec::new();
    let mut group_index = 0;
    remaining.sort_unstable();
    remaining.reverse();

    while let Some(seed) = remaining.pop() {
        let (seed_deps, seed_dependents) = &sets[&seed];
        let mut group = vec![seed];
        remaining.retain(|other| {
            let (deps, dependents) = &sets[other];
            let similar = jaccard(seed_deps, deps) > threshold
                || jaccard(seed_dependents, dependents) > threshold;
            if similar {
                group.push(*other);
            }
            !similar
        });

        if group.len() < min_size.max(1) {
            continue;
        }

        group_index += 1;
        group.sort_unstable();
        let name = names.claim(&format!("deps_{group_index}"));
        let alternatives: Vec<String> = group
            .iter()
            .map(|id| regex::escape(&normalize_path(&graph.module(*id).path)))
            .collect();
        debug!("Auto chunk '{name}' for {} modules with shared dependencies", group.len());
        rules.push(ChunkRule::new(name).with_include(format!("^(?:{})$", alternatives.join("|"))));
    }

    rules
}

/// Size of the intersection over size of the union; 0 when both sets are empty
fn jaccard(a: &FxHashSet<ModuleId>, b: &FxHashSet<ModuleId>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Hands out file-safe chunk names, suffixing `_2`, `_3`, ... on collision
#[derive(Debug)]
struct ChunkNames {
    used: FxHashSet<String>,
}

impl ChunkNames {
    fn reserving(name: &str) -> Self {
        Self {
            used: FxHashSet::from_iter([name.to_string()]),
        }
    }

    fn claim(&mut self, raw: &str) -> String {
        let base: String = raw
            .chars()
            .map(|c| if is_chunk_name_char(c) { c } else { '_' })
            .collect();

        let mut name = base.clone();
        let mut suffix = 2;
        while !self.used.insert(name.clone()) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        name
    }
}
