//! The bidirectional dependency graph between declarations and
//! definitions, built from a [`ParsedDependencies`] view.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::ControlFlow;

use crate::error::BuildError;
use crate::parsed_deps::ParsedDependencies;
use crate::string_pool::StringId;

/// Whether a node stands for a unit's declaration or its definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Declaration,
    Definition,
}

/// A packed `{kind: 1 bit, path_id: 63 bits}` node identifier.
///
/// `path_id == 0` is reserved for the synthetic main-package node, which
/// has no corresponding entry in any string pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

const KIND_BIT: u64 = 1 << 63;

impl NodeId {
    fn pack(kind: NodeKind, path_id_raw: u32) -> Self {
        let kind_bit = match kind {
            NodeKind::Declaration => 0,
            NodeKind::Definition => KIND_BIT,
        };
        Self(kind_bit | path_id_raw as u64)
    }

    pub fn for_unit(path_id: StringId, kind: NodeKind) -> Self {
        Self::pack(kind, path_id.get())
    }

    fn main_package() -> Self {
        Self::pack(NodeKind::Definition, 0)
    }

    pub fn kind(self) -> NodeKind {
        if self.0 & KIND_BIT != 0 {
            NodeKind::Definition
        } else {
            NodeKind::Declaration
        }
    }

    /// The raw string-pool path id this node refers to, or `None` for the
    /// synthetic main package.
    pub fn path_id_raw(self) -> Option<u32> {
        let raw = (self.0 & !KIND_BIT) as u32;
        if raw == 0 && self == Self::main_package() {
            None
        } else {
            Some(raw)
        }
    }

    pub fn is_main_package(self) -> bool {
        self == Self::main_package()
    }
}

/// The bidirectional dependency graph: forward edges ("depends on") and
/// their reverse ("is a dependency of").
#[derive(Debug, Default)]
pub struct DependencyGraph {
    deps: HashMap<NodeId, Vec<NodeId>>,
    dependents: HashMap<NodeId, Vec<NodeId>>,
    all_nodes: HashSet<NodeId>,
}

impl DependencyGraph {
    /// Build the graph from a parsed-dependencies view and the main
    /// unit's path id.
    ///
    /// Returns [`BuildError::GraphInvalid`] if `parsed` is non-empty but
    /// has no manifest for `main_file_id`, or if the resulting non-empty
    /// graph has no roots (spec §4.4 invariant 4).
    pub fn build(parsed: &ParsedDependencies, main_file_id: StringId) -> Result<Self, BuildError> {
        if !parsed.is_empty() && parsed.get(main_file_id).is_none() {
            return Err(BuildError::GraphInvalid);
        }

        let mut g = DependencyGraph::default();

        for unit in parsed.units() {
            let decl = NodeId::for_unit(unit.manifest.package_file_path_id, NodeKind::Declaration);
            let def = NodeId::for_unit(unit.manifest.package_file_path_id, NodeKind::Definition);
            g.add_node(decl);
            g.add_node(def);
            g.add_edge(def, decl);
        }

        for unit in parsed.units() {
            let decl = NodeId::for_unit(unit.manifest.package_file_path_id, NodeKind::Declaration);
            let def = NodeId::for_unit(unit.manifest.package_file_path_id, NodeKind::Definition);

            for &dep in &unit.manifest.declaration_dependencies {
                g.add_edge(decl, NodeId::for_unit(dep, NodeKind::Declaration));
            }
            for &dep in &unit.manifest.definition_dependencies {
                g.add_edge(def, NodeId::for_unit(dep, NodeKind::Declaration));
            }
        }

        if !g.all_nodes.is_empty() && g.roots().next().is_none() {
            return Err(BuildError::GraphInvalid);
        }

        let main_package = NodeId::main_package();
        g.add_node(main_package);
        for terminal in g.declaration_terminals().collect::<Vec<_>>() {
            g.add_edge(main_package, terminal);
        }

        Ok(g)
    }

    fn add_node(&mut self, node: NodeId) {
        self.all_nodes.insert(node);
        self.deps.entry(node).or_default();
        self.dependents.entry(node).or_default();
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_node(from);
        self.add_node(to);
        let out = self.deps.entry(from).or_default();
        if !out.contains(&to) {
            out.push(to);
        }
        let back = self.dependents.entry(to).or_default();
        if !back.contains(&from) {
            back.push(from);
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.all_nodes.iter().copied()
    }

    pub fn dependencies_of(&self, node: NodeId) -> &[NodeId] {
        self.deps.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn dependents_of(&self, node: NodeId) -> &[NodeId] {
        self.dependents.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Nodes with no outgoing dependency edges.
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.all_nodes.iter().copied().filter(|n| self.dependencies_of(*n).is_empty())
    }

    /// Declaration-kind nodes with no dependent *declaration* node (a
    /// dependent Definition node, e.g. the unit's own, doesn't disqualify
    /// a node from being a terminal).
    pub fn declaration_terminals(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.all_nodes.iter().copied().filter(|n| {
            n.kind() == NodeKind::Declaration
                && self.dependents_of(*n).iter().all(|d| d.kind() != NodeKind::Declaration)
        })
    }

    /// Breadth-first from the roots, never revisiting a node. Follows
    /// dependent edges (the direction that propagates from leaves
    /// outward), matching the solver's traversal direction.
    pub fn bfs_from_roots_skip_visited(&self) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<NodeId> = self.roots().collect();
        for r in &queue {
            visited.insert(*r);
        }

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in self.dependents_of(node) {
                if visited.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        order
    }

    /// Breadth-first from the roots, following dependent edges, allowing
    /// a node to be revisited every time a predecessor's state changes.
    /// The solver uses this to propagate distance maps (spec §4.5):
    /// `visit(from, to)` merges `from`'s contribution into `to` and
    /// returns `ControlFlow::Continue(changed)`, which decides whether
    /// `to` needs to be re-propagated to its own dependents.
    ///
    /// `visit` can also return `ControlFlow::Break(())` to abort the
    /// *entire* walk immediately -- the queue is abandoned without
    /// visiting any further edges. Mirrors the original `bsfWalk`'s
    /// `if (!OnNode(Node)) return false;`, which stops the whole search
    /// the instant a single node reports failure rather than merely
    /// skipping that node. Returns `true` if the walk was aborted this
    /// way, `false` if it ran to completion.
    pub fn bfs_from_roots_allow_revisits(
        &self,
        mut visit: impl FnMut(NodeId, NodeId) -> ControlFlow<(), bool>,
    ) -> bool {
        let mut queue: VecDeque<NodeId> = self.roots().collect();

        while let Some(node) = queue.pop_front() {
            for &dependent in self.dependents_of(node) {
                match visit(node, dependent) {
                    ControlFlow::Break(()) => return true,
                    ControlFlow::Continue(true) => queue.push_back(dependent),
                    ControlFlow::Continue(false) => {}
                }
            }
        }

        false
    }

    /// Depth-first job expansion: obtain-or-create a task handle for
    /// `node`, after recursively obtaining task handles for all of its
    /// dependencies. `make_task` receives the node and its already-built
    /// dependency handles, and must return this node's handle; it is
    /// called at most once per node regardless of how many dependents
    /// reach it.
    pub fn expand_jobs<T: Clone>(
        &self,
        start_nodes: impl IntoIterator<Item = NodeId>,
        mut make_task: impl FnMut(NodeId, &[T]) -> T,
    ) -> HashMap<NodeId, T> {
        let mut memo: HashMap<NodeId, T> = HashMap::new();
        for node in start_nodes {
            self.expand_one(node, &mut memo, &mut make_task);
        }
        memo
    }

    fn expand_one<T: Clone>(
        &self,
        node: NodeId,
        memo: &mut HashMap<NodeId, T>,
        make_task: &mut impl FnMut(NodeId, &[T]) -> T,
    ) -> T {
        if let Some(existing) = memo.get(&node) {
            return existing.clone();
        }

        let dep_handles: Vec<T> =
            self.dependencies_of(node).to_vec().into_iter().map(|d| self.expand_one(d, memo, make_task)).collect();

        let handle = make_task(node, &dep_handles);
        memo.insert(node, handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::manifest::DependencyManifest;
    use crate::string_pool::StringPool;
    use crate::unit::UnitId;

    fn three_unit_chain() -> (ParsedDependencies, StringId) {
        // A depends on B (declaration), B depends on C (declaration).
        let mut parsed = ParsedDependencies::new();

        let mut local_c = StringPool::new();
        let c_id = local_c.add("P1/C");
        let manifest_c = DependencyManifest::new(c_id, true, false);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/C.cppl")), manifest_c, &local_c);

        let mut local_b = StringPool::new();
        let b_id = local_b.add("P1/B");
        let b_dep_c = local_b.add("P1/C");
        let mut manifest_b = DependencyManifest::new(b_id, true, false);
        manifest_b.declaration_dependencies.insert(b_dep_c);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/B.cppl")), manifest_b, &local_b);

        let mut local_a = StringPool::new();
        let a_id = local_a.add("P1/A");
        let a_dep_b = local_a.add("P1/B");
        let mut manifest_a = DependencyManifest::new(a_id, true, false);
        manifest_a.declaration_dependencies.insert(a_dep_b);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/A.cppl")), manifest_a, &local_a);

        let main_id = parsed.pool().find("P1/A").unwrap();
        (parsed, main_id)
    }

    #[test]
    fn chain_has_single_root_and_single_terminal() {
        let (parsed, main_id) = three_unit_chain();
        let graph = DependencyGraph::build(&parsed, main_id).unwrap();

        let c_path = parsed.pool().find("P1/C").unwrap();
        let c_decl = NodeId::for_unit(c_path, NodeKind::Declaration);
        let roots: Vec<_> = graph.roots().collect();
        assert_eq!(roots, vec![c_decl]);

        let a_path = parsed.pool().find("P1/A").unwrap();
        let a_decl = NodeId::for_unit(a_path, NodeKind::Declaration);
        let terminals: Vec<_> = graph.declaration_terminals().collect();
        assert_eq!(terminals, vec![a_decl]);
    }

    #[test]
    fn main_package_connects_to_every_terminal() {
        let (parsed, main_id) = three_unit_chain();
        let graph = DependencyGraph::build(&parsed, main_id).unwrap();
        let main_package = NodeId::main_package();
        let terminals: Vec<_> = graph.declaration_terminals().collect();
        assert_eq!(graph.dependencies_of(main_package), terminals.as_slice());
    }

    #[test]
    fn empty_graph_is_valid() {
        let parsed = ParsedDependencies::new();
        let mut pool = StringPool::new();
        let id = pool.add("P1/Main");
        let graph = DependencyGraph::build(&parsed, id).unwrap();
        assert_eq!(graph.nodes().count(), 1); // just the synthetic main package
    }

    #[test]
    fn job_expansion_dedupes_shared_dependency() {
        let (parsed, main_id) = three_unit_chain();
        let graph = DependencyGraph::build(&parsed, main_id).unwrap();
        let mut calls = 0u32;
        let c_path = parsed.pool().find("P1/C").unwrap();
        let c_decl = NodeId::for_unit(c_path, NodeKind::Declaration);
        let a_path = parsed.pool().find("P1/A").unwrap();
        let a_decl = NodeId::for_unit(a_path, NodeKind::Declaration);

        let handles = graph.expand_jobs([a_decl, c_decl], |_node, _deps: &[u32]| {
            calls += 1;
            calls
        });

        assert_eq!(handles.len(), 3); // A, B, C declarations, each built once
        assert!(calls <= 3);
    }
}
