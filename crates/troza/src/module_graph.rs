//! Module dependency graph
//!
//! Modules live in an arena indexed by [`ModuleId`]; edges are stored in a petgraph
//! `DiGraph` pointing from the importing module to the module it imports. Node indices and
//! module ids coincide because modules are only ever appended.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
    fmt,
    path::{Path, PathBuf},
};

use petgraph::{
    Direction,
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::visitors::{DiscoveredImport, DynamicLoad};

/// Unique identifier for a module, assigned in discovery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value of the ModuleId
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn node(self) -> NodeIndex {
        NodeIndex::new(self.index())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discovered module. Immutable once added to the graph.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// Dotted module name (`__main__` for the program entry)
    pub name: String,
    /// Canonical absolute path
    pub path: PathBuf,
    pub source: String,
    /// Imports as written, in source order
    pub imports: Vec<DiscoveredImport>,
    /// Chunk loader calls, in source order
    pub dynamic_loads: Vec<DynamicLoad>,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    path_to_id: FxHashMap<PathBuf, ModuleId>,
    graph: DiGraph<ModuleId, ()>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, returning the existing id if the path is already known
    pub fn add_module(
        &mut self,
        name: String,
        path: PathBuf,
        source: String,
        imports: Vec<DiscoveredImport>,
        dynamic_loads: Vec<DynamicLoad>,
    ) -> ModuleId {
        if let Some(&existing) = self.path_to_id.get(&path) {
            return existing;
        }

        let id = ModuleId::new(self.modules.len() as u32);
        let node = self.graph.add_node(id);
        debug_assert_eq!(node, id.node());

        self.path_to_id.insert(path.clone(), id);
        self.modules.push(Module {
            id,
            name,
            path,
            source,
            imports,
            dynamic_loads,
        });
        id
    }

    /// Record that `from` imports `to`. Returns false if the edge already existed.
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) -> bool {
        if self.graph.contains_edge(from.node(), to.node()) {
            return false;
        }
        self.graph.add_edge(from.node(), to.node(), ());
        true
    }

    /// The program entry, always the first module added
    pub fn entry(&self) -> Option<ModuleId> {
        self.modules.first().map(|module| module.id)
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    /// All modules in discovery order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_id_for_path(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    /// Direct dependencies of a module, in discovery order
    pub fn dependencies(&self, id: ModuleId) -> Vec<ModuleId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Modules that import `id` directly, in discovery order
    pub fn dependents(&self, id: ModuleId) -> Vec<ModuleId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: ModuleId, direction: Direction) -> Vec<ModuleId> {
        let mut neighbors: Vec<ModuleId> = self
            .graph
            .neighbors_directed(id.node(), direction)
            .map(|idx| self.graph[idx])
            .collect();
        neighbors.sort_unstable();
        neighbors
    }

    /// Every edge as a (dependent, dependency) pair, sorted
    pub fn edges(&self) -> Vec<(ModuleId, ModuleId)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_endpoints(edge))
            .map(|(from, to)| (self.graph[from], self.graph[to]))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Transitive closure of `roots` over dependency edges, never entering `blocked`
    pub fn reachable_from(
        &self,
        roots: &[ModuleId],
        blocked: &FxHashSet<ModuleId>,
    ) -> FxHashSet<ModuleId> {
        let mut visited = FxHashSet::default();
        let mut queue: VecDeque<ModuleId> = roots
            .iter()
            .copied()
            .filter(|root| !blocked.contains(root))
            .collect();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            for dep in self.graph.neighbors_directed(id.node(), Direction::Outgoing) {
                let dep = self.graph[dep];
                if !visited.contains(&dep) && !blocked.contains(&dep) {
                    queue.push_back(dep);
                }
            }
        }

        visited
    }

    /// All modules ordered so that dependencies precede their dependents.
    ///
    /// Members of a cycle are kept together in discovery order; independent modules are
    /// ordered by the smallest discovery id they contain.
    pub fn dependency_order(&self) -> Vec<ModuleId> {
        let components = tarjan_scc(&self.graph);

        let mut component_of = vec![0usize; self.modules.len()];
        let mut members: Vec<Vec<ModuleId>> = Vec::with_capacity(components.len());
        for (index, component) in components.iter().enumerate() {
            let mut ids: Vec<ModuleId> = component.iter().map(|idx| self.graph[*idx]).collect();
            ids.sort_unstable();
            for id in &ids {
                component_of[id.index()] = index;
            }
            members.push(ids);
        }

        // Kahn's algorithm over the condensation, smallest discovery id first
        let mut pending = vec![0usize; members.len()];
        let mut dependents: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); members.len()];
        for (from, to) in self.edges() {
            let (from_c, to_c) = (component_of[from.index()], component_of[to.index()]);
            if from_c != to_c && dependents[to_c].insert(from_c) {
                pending[from_c] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<(ModuleId, usize)>> = members
            .iter()
            .enumerate()
            .filter(|(index, _)| pending[*index] == 0)
            .filter_map(|(index, ids)| ids.first().map(|first| Reverse((*first, index))))
            .collect();

        let mut order = Vec::with_capacity(self.modules.len());
        while let Some(Reverse((_, index))) = ready.pop() {
            order.extend_from_slice(&members[index]);
            for &dependent in &dependents[index] {
                pending[dependent] -= 1;
                if pending[dependent] == 0
                    && let Some(first) = members[dependent].first()
                {
                    ready.push(Reverse((*first, dependent)));
                }
            }
        }

        order
    }

    /// Import cycles (strongly connected components with more than one module)
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut ids: Vec<ModuleId> =
                    component.into_iter().map(|idx| self.graph[idx]).collect();
                ids.sort_unstable();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }
}
