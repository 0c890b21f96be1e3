//! Chunk assignment
//!
//! Assignment runs in two phases. Every rule first collects candidates independently:
//! modules reachable from its entry points (minus those the program entry needs eagerly) and
//! modules whose path matches one of its include patterns. A single ordered reduction then
//! picks owners according to the [`DuplicatePolicy`]. Modules no rule claims fall into the
//! default chunk.

use indexmap::IndexMap;
use log::{debug, warn};
use rustc_hash::FxHashSet;

use super::rules::{CompiledRule, RuleSet};
use crate::{
    config::DuplicatePolicy,
    error::{BuildError, BuildResult},
    module_graph::{ModuleGraph, ModuleId},
    util::normalize_path,
};

/// Why a module was placed in a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    /// Reachable from one of the rule's entry points
    EntryReachable { entry: ModuleId },
    /// The module path matched an include pattern
    Pattern { pattern: String },
    /// No rule claimed the module
    Default,
}

/// The result of assigning every module of a graph to chunks
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    /// Chunks of each module (in chunk declaration order) with the reason for each
    pub module_chunks: IndexMap<ModuleId, IndexMap<String, MatchReason>>,
    /// Members of each chunk in dependency order, default chunk first
    pub chunks: IndexMap<String, Vec<ModuleId>>,
}

impl Assignment {
    /// Names of the chunks containing `id`
    pub fn chunks_of(&self, id: ModuleId) -> impl Iterator<Item = &str> {
        self.module_chunks
            .get(&id)
            .into_iter()
            .flat_map(|chunks| chunks.keys().map(String::as_str))
    }

    /// Where `id` lives when only one copy may be chosen
    pub fn primary_chunk(&self, id: ModuleId) -> Option<&str> {
        self.chunks_of(id).next()
    }

    pub fn reason(&self, id: ModuleId, chunk: &str) -> Option<&MatchReason> {
        self.module_chunks.get(&id)?.get(chunk)
    }

    pub fn members(&self, chunk: &str) -> &[ModuleId] {
        self.chunks.get(chunk).map_or(&[], Vec::as_slice)
    }
}

/// Assign every module in `graph` to one or more chunks
pub fn assign(
    graph: &ModuleGraph,
    rules: &RuleSet,
    policy: DuplicatePolicy,
) -> BuildResult<Assignment> {
    let rule_entries = resolve_rule_entries(graph, rules)?;
    let main_entry = graph.entry();

    // Candidate collection: one independent pass per rule
    let candidates: Vec<IndexMap<ModuleId, MatchReason>> = rules
        .rules()
        .iter()
        .zip(&rule_entries)
        .map(|(rule, entries)| collect_candidates(graph, rule, entries, main_entry))
        .collect();

    // Reduction: one ordered pass over modules
    let mut module_chunks: IndexMap<ModuleId, IndexMap<String, MatchReason>> = IndexMap::new();
    for module in graph.modules() {
        let id = module.id;
        let mut claims = rules
            .rules()
            .iter()
            .zip(&candidates)
            .filter_map(|(rule, candidates)| {
                candidates
                    .get(&id)
                    .map(|reason| (rule.name.clone(), reason.clone()))
            });

        // The program entry always starts the default chunk
        let owners: IndexMap<String, MatchReason> = if Some(id) == main_entry {
            IndexMap::new()
        } else {
            match policy {
                DuplicatePolicy::FirstMatch => claims.next().into_iter().collect(),
                DuplicatePolicy::Duplicate => claims.collect(),
            }
        };

        let owners = if owners.is_empty() {
            IndexMap::from([(rules.default_chunk().to_string(), MatchReason::Default)])
        } else {
            owners
        };

        for (chunk, reason) in &owners {
            debug!("Assigned {} to chunk '{chunk}' ({reason:?})", module.name);
        }
        module_chunks.insert(id, owners);
    }

    let order = graph.dependency_order();
    let mut chunks: IndexMap<String, Vec<ModuleId>> = rules
        .chunk_names()
        .map(|name| (name.to_string(), Vec::new()))
        .collect();
    for id in order {
        for chunk in module_chunks[&id].keys() {
            if let Some(members) = chunks.get_mut(chunk) {
                members.push(id);
            }
        }
    }

    for (name, members) in &chunks {
        if members.is_empty() {
            warn!("Chunk '{name}' matched no modules");
        }
    }

    Ok(Assignment {
        module_chunks,
        chunks,
    })
}

/// Map every rule's entry points to graph nodes
fn resolve_rule_entries(graph: &ModuleGraph, rules: &RuleSet) -> BuildResult<Vec<Vec<ModuleId>>> {
    rules
        .rules()
        .iter()
        .map(|rule| {
            rule.entry_points
                .iter()
                .map(|path| {
                    graph
                        .module_id_for_path(path)
                        .ok_or_else(|| BuildError::ChunkEntryNotFound {
                            rule: rule.name.clone(),
                            path: path.clone(),
                        })
                })
                .collect()
        })
        .collect()
}

fn collect_candidates(
    graph: &ModuleGraph,
    rule: &CompiledRule,
    entries: &[ModuleId],
    main_entry: Option<ModuleId>,
) -> IndexMap<ModuleId, MatchReason> {
    let mut candidates = IndexMap::new();

    if !entries.is_empty() {
        // Modules the program entry reaches without going through this rule's entry points
        // are loaded eagerly and cannot move into a lazily loaded chunk
        let blocked: FxHashSet<ModuleId> = entries.iter().copied().collect();
        let eager = main_entry
            .map(|main| graph.reachable_from(&[main], &blocked))
            .unwrap_or_default();

        let no_block = FxHashSet::default();
        for &entry in entries {
            let mut closure: Vec<ModuleId> = graph
                .reachable_from(&[entry], &no_block)
                .into_iter()
                .filter(|id| !eager.contains(id))
                .collect();
            closure.sort_unstable();
            for id in closure {
                candidates
                    .entry(id)
                    .or_insert(MatchReason::EntryReachable { entry });
            }
        }
    }

    if !rule.includes.is_empty() {
        for module in graph.modules() {
            if candidates.contains_key(&module.id) {
                continue;
            }
            if let Some(pattern) = rule.matching_include(&normalize_path(&module.path)) {
                candidates.insert(
                    module.id,
                    MatchReason::Pattern {
                        pattern: pattern.as_str().to_string(),
                    },
                );
            }
        }
    }

    candidates.sort_keys();
    candidates
}
