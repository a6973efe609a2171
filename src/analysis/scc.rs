//! Strongly connected components of a dependence graph.
//!
//! An [`Scc`] is a local view over a set of graph nodes: the internal
//! nodes it owns, the external neighbours it touches, and every edge
//! incident to an internal node, each materialized exactly once.

use super::dependence::{DependenceGraph, EdgeId, NodeId};
use crate::ir::InstId;
use crate::utils::errors::DependenceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Execution classification of an SCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SccType {
    /// Iterations must observe the original order
    #[default]
    Sequential,
    /// No dependence cycle: iterations may run in any order
    Independent,
}

/// A strongly connected component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scc {
    entry: NodeId,
    internal: BTreeMap<InstId, NodeId>,
    external: BTreeMap<InstId, NodeId>,
    edges: Vec<EdgeId>,
    scc_type: SccType,
}

impl Scc {
    /// Build the local view of `nodes`.
    ///
    /// Outgoing edges of every internal node are copied; incoming edges
    /// are copied only when their source is not internal, since those
    /// were already copied as outgoing edges. With `connect_to_external`
    /// the far endpoints outside the SCC are recorded as external nodes.
    pub fn new(graph: &DependenceGraph, nodes: &[NodeId], connect_to_external: bool) -> Result<Self, DependenceError> {
        let entry = *nodes.first().ok_or(DependenceError::EmptyComponent)?;

        let mut internal = BTreeMap::new();
        for &n in nodes {
            internal.insert(graph.op_of(n)?, n);
        }
        let members: BTreeSet<NodeId> = internal.values().copied().collect();

        let mut external = BTreeMap::new();
        let mut edges = Vec::new();
        for &n in &members {
            for (id, dep) in graph.get_outgoing(n) {
                if !members.contains(&dep.target) {
                    if !connect_to_external {
                        continue;
                    }
                    external.insert(graph.op_of(dep.target)?, dep.target);
                }
                edges.push(id);
            }
            for (id, dep) in graph.get_incoming(n) {
                if members.contains(&dep.source) {
                    continue;
                }
                if !connect_to_external {
                    continue;
                }
                external.insert(graph.op_of(dep.source)?, dep.source);
                edges.push(id);
            }
        }
        edges.sort();

        Ok(Self { entry, internal, external, edges, scc_type: SccType::default() })
    }

    /// Representative node.
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn is_internal(&self, node: NodeId) -> bool {
        self.internal.values().any(|&n| n == node)
    }

    pub fn contains_op(&self, op: InstId) -> bool {
        self.internal.contains_key(&op)
    }

    /// Internal nodes, ordered by operation.
    pub fn internal_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.internal.values().copied()
    }

    /// Operations owned by this SCC.
    pub fn ops(&self) -> impl Iterator<Item = InstId> + '_ {
        self.internal.keys().copied()
    }

    pub fn external_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.external.values().copied()
    }

    pub fn num_internal_nodes(&self) -> usize {
        self.internal.len()
    }

    /// Edges touching at least one internal node.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn scc_type(&self) -> SccType {
        self.scc_type
    }

    pub fn set_type(&mut self, scc_type: SccType) {
        self.scc_type = scc_type;
    }

    /// Check for a dependence cycle among the internal nodes.
    pub fn has_cycle(&self, graph: &DependenceGraph, ignore_control: bool) -> bool {
        let members: BTreeSet<NodeId> = self.internal_nodes().collect();
        graph.has_cycle_within(|n| members.contains(&n), ignore_control)
    }

    /// Recompute the classification, e.g. after a privatization removed
    /// the memory dependence that closed a cycle.
    pub fn revalidate_type(&mut self, graph: &DependenceGraph, ignore_control: bool) -> SccType {
        self.scc_type = if self.has_cycle(graph, ignore_control) {
            SccType::Sequential
        } else {
            SccType::Independent
        };
        self.scc_type
    }

    /// Human-readable dump listing nodes and up to `max_edges` edges.
    pub fn describe(&self, graph: &DependenceGraph, max_edges: usize) -> String {
        SccDescription { scc: self, graph, max_edges }.to_string()
    }

    /// Absorb another SCC's internal nodes. External nodes and edges are
    /// rebuilt by the caller.
    pub(crate) fn absorb(&mut self, other: Scc) {
        self.internal.extend(other.internal);
    }

    pub(crate) fn rebuild_boundary(&mut self, graph: &DependenceGraph) -> Result<(), DependenceError> {
        let nodes: Vec<NodeId> = self.internal_nodes().collect();
        let rebuilt = Scc::new(graph, &nodes, true)?;
        self.external = rebuilt.external;
        self.edges = rebuilt.edges;
        Ok(())
    }
}

/// Display adapter behind [`Scc::describe`].
pub struct SccDescription<'a> {
    pub scc: &'a Scc,
    pub graph: &'a DependenceGraph,
    pub max_edges: usize,
}

impl fmt::Display for SccDescription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scc = self.scc;
        writeln!(f, "SCC ({:?}, entry {})", scc.scc_type, scc.entry)?;
        writeln!(f, "  Internal nodes: {}", scc.internal.len())?;
        for (op, n) in &scc.internal {
            writeln!(f, "    {} {}", n, op)?;
        }
        writeln!(f, "  External nodes: {}", scc.external.len())?;
        for (op, n) in &scc.external {
            writeln!(f, "    {} {}", n, op)?;
        }
        writeln!(f, "  Edges: {}", scc.edges.len())?;
        for id in scc.edges.iter().take(self.max_edges) {
            match self.graph.edge(*id) {
                Ok(dep) => writeln!(f, "    {}", dep.description())?,
                Err(_) => writeln!(f, "    {} (removed)", id)?,
            }
        }
        if scc.edges.len() > self.max_edges {
            writeln!(f, "    ... {} more", scc.edges.len() - self.max_edges)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dependence::{Dependence, Hazard};

    /// n0 <-> n1 cycle, n2 -> n0, n1 -> n3
    fn cyclic_graph() -> (DependenceGraph, Vec<NodeId>) {
        let mut g = DependenceGraph::new();
        let n: Vec<NodeId> = (0..4).map(|i| g.add_node(InstId(i))).collect();
        g.add_edge(Dependence::data(n[0], n[1])).unwrap();
        g.add_edge(Dependence::memory(n[1], n[0], Hazard::Flow).loop_carried()).unwrap();
        g.add_edge(Dependence::data(n[2], n[0])).unwrap();
        g.add_edge(Dependence::control(n[1], n[3])).unwrap();
        (g, n)
    }

    #[test]
    fn test_edges_copied_once() {
        let (g, n) = cyclic_graph();
        let scc = Scc::new(&g, &[n[0], n[1]], true).unwrap();
        assert_eq!(scc.num_internal_nodes(), 2);
        assert_eq!(scc.edges().len(), 4);
        let external: Vec<NodeId> = scc.external_nodes().collect();
        assert_eq!(external, vec![n[2], n[3]]);
        assert!(scc.is_internal(n[0]));
        assert!(!scc.is_internal(n[2]));
    }

    #[test]
    fn test_without_external_connections() {
        let (g, n) = cyclic_graph();
        let scc = Scc::new(&g, &[n[0], n[1]], false).unwrap();
        assert_eq!(scc.edges().len(), 2);
        assert_eq!(scc.external_nodes().count(), 0);
    }

    #[test]
    fn test_empty_component_rejected() {
        let (g, _) = cyclic_graph();
        assert_eq!(Scc::new(&g, &[], true), Err(DependenceError::EmptyComponent));
    }

    #[test]
    fn test_revalidate_after_privatization() {
        let (mut g, n) = cyclic_graph();
        let mut scc = Scc::new(&g, &[n[0], n[1]], true).unwrap();
        assert_eq!(scc.scc_type(), SccType::Sequential);
        assert!(scc.has_cycle(&g, false));

        let carried = scc
            .edges()
            .iter()
            .copied()
            .find(|&e| g.edge(e).unwrap().is_loop_carried)
            .unwrap();
        g.remove_edge(carried).unwrap();
        assert_eq!(scc.revalidate_type(&g, false), SccType::Independent);
    }

    #[test]
    fn test_describe_caps_edges() {
        let (g, n) = cyclic_graph();
        let scc = Scc::new(&g, &[n[0], n[1]], true).unwrap();
        let text = scc.describe(&g, 1);
        assert!(text.contains("Internal nodes: 2"));
        assert!(text.contains("... 3 more"));
    }

    #[test]
    fn test_describe_marks_removed_edges() {
        let (mut g, n) = cyclic_graph();
        let scc = Scc::new(&g, &[n[0], n[1]], true).unwrap();
        let first = scc.edges()[0];
        g.remove_edge(first).unwrap();
        let text = scc.describe(&g, 4);
        assert!(text.contains(&format!("{} (removed)", first)));
        assert!(text.contains("Edges: 4"));
    }
}
