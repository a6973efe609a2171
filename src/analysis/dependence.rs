//! Dependence graphs over the operations of a loop body.
//!
//! This module provides:
//! - An arena of nodes (one per operation) addressed by [`NodeId`]
//! - Dependence edges labelled control/data/mixed, memory/register,
//!   RAW/WAR/WAW and loop-carried, addressed by [`EdgeId`]
//! - Tarjan's strongly-connected-component decomposition
//! - Cycle detection restricted to a node subset, optionally ignoring
//!   control dependences
//!
//! The dependences themselves come from an alias/control analysis; this
//! module only records them.

use crate::ir::InstId;
use crate::utils::errors::DependenceError;
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Handle of a node in a [`DependenceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Handle of an edge in a [`DependenceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Kind of dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependenceKind {
    /// The target executes only if the source branches a certain way
    Control,
    /// The target reads what the source produced, through a register or memory
    Data,
    /// Both control and data
    Mixed,
}

impl DependenceKind {
    /// Check if the dependence has a control component.
    pub fn is_control(&self) -> bool {
        matches!(self, DependenceKind::Control | DependenceKind::Mixed)
    }

    /// Check if the dependence has a data component.
    pub fn is_data(&self) -> bool {
        matches!(self, DependenceKind::Data | DependenceKind::Mixed)
    }

    /// Get short name for the dependence kind.
    pub fn short_name(&self) -> &'static str {
        match self {
            DependenceKind::Control => "CTRL",
            DependenceKind::Data => "DATA",
            DependenceKind::Mixed => "MIXED",
        }
    }
}

/// Hazard carried by a data dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hazard {
    /// Read-after-write (true/flow dependence)
    Flow,
    /// Write-after-read (anti dependence)
    Anti,
    /// Write-after-write (output dependence)
    Output,
}

impl Hazard {
    pub fn short_name(&self) -> &'static str {
        match self {
            Hazard::Flow => "RAW",
            Hazard::Anti => "WAR",
            Hazard::Output => "WAW",
        }
    }
}

/// A dependence between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependence {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: DependenceKind,
    /// Data flows through memory rather than a register
    pub is_memory: bool,
    /// RAW/WAR/WAW for data dependences
    pub hazard: Option<Hazard>,
    /// The dependence crosses loop iterations
    pub is_loop_carried: bool,
}

impl Dependence {
    /// Register data dependence within one iteration.
    pub fn data(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            kind: DependenceKind::Data,
            is_memory: false,
            hazard: Some(Hazard::Flow),
            is_loop_carried: false,
        }
    }

    /// Memory data dependence with the given hazard.
    pub fn memory(source: NodeId, target: NodeId, hazard: Hazard) -> Self {
        Self { is_memory: true, hazard: Some(hazard), ..Self::data(source, target) }
    }

    /// Control dependence within one iteration.
    pub fn control(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            kind: DependenceKind::Control,
            is_memory: false,
            hazard: None,
            is_loop_carried: false,
        }
    }

    pub fn loop_carried(mut self) -> Self {
        self.is_loop_carried = true;
        self
    }

    pub fn is_control_dependence(&self) -> bool {
        self.kind == DependenceKind::Control
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        let mut s = format!("{} -> {} [{}", self.source, self.target, self.kind.short_name());
        if self.kind.is_data() {
            s.push_str(if self.is_memory { " mem" } else { " reg" });
            if let Some(h) = self.hazard {
                s.push(' ');
                s.push_str(h.short_name());
            }
        }
        if self.is_loop_carried {
            s.push_str(" carried");
        }
        s.push(']');
        s
    }
}

/// A dependence reported by an external analysis, named by operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDependence {
    pub source: InstId,
    pub target: InstId,
    pub kind: DependenceKind,
    #[serde(default)]
    pub is_memory: bool,
    #[serde(default)]
    pub hazard: Option<Hazard>,
    #[serde(default)]
    pub is_loop_carried: bool,
}

/// A graph node: one loop operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub op: InstId,
}

/// A dependence graph.
#[derive(Debug, Clone, Default)]
pub struct DependenceGraph {
    nodes: Vec<Node>,
    op_to_node: HashMap<InstId, NodeId>,
    /// `None` marks a removed edge; handles are never reused
    edges: Vec<Option<Dependence>>,
    successors: Vec<Vec<EdgeId>>,
    predecessors: Vec<Vec<EdgeId>>,
    forced: Vec<(NodeId, NodeId)>,
}

impl DependenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph with one node per operation in `ops`, copying every
    /// dependence whose endpoints are both in scope.
    pub fn from_loop(ops: &[InstId], deps: &[OpDependence]) -> Self {
        let mut graph = Self::new();
        for &op in ops {
            graph.add_node(op);
        }
        let mut skipped = 0usize;
        for dep in deps {
            match (graph.node_of(dep.source), graph.node_of(dep.target)) {
                (Some(source), Some(target)) => {
                    graph.push_edge(Dependence {
                        source,
                        target,
                        kind: dep.kind,
                        is_memory: dep.is_memory,
                        hazard: dep.hazard,
                        is_loop_carried: dep.is_loop_carried,
                    });
                }
                _ => skipped += 1,
            }
        }
        trace!(
            "built dependence graph: {} nodes, {} edges, {} out-of-scope edges skipped",
            graph.num_nodes(),
            graph.num_edges(),
            skipped
        );
        graph
    }

    /// Return the node of `op`, creating it if needed.
    pub fn add_node(&mut self, op: InstId) -> NodeId {
        if let Some(&id) = self.op_to_node.get(&op) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { op });
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        self.op_to_node.insert(op, id);
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, DependenceError> {
        self.nodes.get(id.index()).ok_or(DependenceError::UnknownNode(id))
    }

    pub fn node_of(&self, op: InstId) -> Option<NodeId> {
        self.op_to_node.get(&op).copied()
    }

    /// Operation wrapped by `id`.
    pub fn op_of(&self, id: NodeId) -> Result<InstId, DependenceError> {
        Ok(self.node(id)?.op)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live (not removed) edges.
    pub fn num_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    fn push_edge(&mut self, dep: Dependence) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.successors[dep.source.index()].push(id);
        self.predecessors[dep.target.index()].push(id);
        self.edges.push(Some(dep));
        id
    }

    /// Add a dependence between existing nodes.
    pub fn add_edge(&mut self, dep: Dependence) -> Result<EdgeId, DependenceError> {
        self.node(dep.source)?;
        self.node(dep.target)?;
        Ok(self.push_edge(dep))
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Dependence, DependenceError> {
        self.edges
            .get(id.index())
            .and_then(|e| e.as_ref())
            .ok_or(DependenceError::UnknownEdge(id))
    }

    /// Remove a dependence, e.g. after privatizing the memory it went through.
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Dependence, DependenceError> {
        let dep = self
            .edges
            .get_mut(id.index())
            .and_then(|e| e.take())
            .ok_or(DependenceError::UnknownEdge(id))?;
        self.successors[dep.source.index()].retain(|&e| e != id);
        self.predecessors[dep.target.index()].retain(|&e| e != id);
        Ok(dep)
    }

    /// All live edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Dependence)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|d| (EdgeId(i as u32), d)))
    }

    pub fn get_outgoing(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &Dependence)> {
        self.adjacent(&self.successors, node)
    }

    pub fn get_incoming(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &Dependence)> {
        self.adjacent(&self.predecessors, node)
    }

    fn adjacent<'a>(
        &'a self,
        lists: &'a [Vec<EdgeId>],
        node: NodeId,
    ) -> impl Iterator<Item = (EdgeId, &'a Dependence)> + 'a {
        lists
            .get(node.index())
            .into_iter()
            .flatten()
            .filter_map(move |&id| self.edges[id.index()].as_ref().map(|d| (id, d)))
    }

    pub fn has_dependence(&self, from: NodeId, to: NodeId) -> bool {
        self.get_outgoing(from).any(|(_, d)| d.target == to)
    }

    /// Get all dependences of a specific kind.
    pub fn dependences_of_kind(&self, kind: DependenceKind) -> Vec<&Dependence> {
        self.edges().map(|(_, d)| d).filter(|d| d.kind == kind).collect()
    }

    /// Get all loop-carried dependences.
    pub fn loop_carried_dependences(&self) -> Vec<&Dependence> {
        self.edges().map(|(_, d)| d).filter(|d| d.is_loop_carried).collect()
    }

    /// Force two nodes into the same SCC regardless of their edges.
    pub fn force_together(&mut self, a: NodeId, b: NodeId) -> Result<(), DependenceError> {
        self.node(a)?;
        self.node(b)?;
        if a != b {
            self.forced.push((a, b));
        }
        Ok(())
    }

    pub fn forced_pairs(&self) -> &[(NodeId, NodeId)] {
        &self.forced
    }

    /// Check if there's a cycle anywhere in the graph.
    pub fn has_cycle(&self, ignore_control: bool) -> bool {
        self.has_cycle_within(|_| true, ignore_control)
    }

    /// Depth-first search from every unvisited in-scope node; a cycle is
    /// reported on the first edge back to a node still on the search path.
    /// Edges leaving the scope are not followed.
    pub fn has_cycle_within<F: Fn(NodeId) -> bool>(&self, in_scope: F, ignore_control: bool) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for start in self.node_ids() {
            if !in_scope(start) || marks[start.index()] != Mark::Unvisited {
                continue;
            }
            marks[start.index()] = Mark::OnPath;
            let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];

            while let Some(top) = stack.last_mut() {
                let (node, pos) = *top;
                let succs = &self.successors[node.index()];
                if pos >= succs.len() {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                }
                top.1 += 1;

                let dep = match &self.edges[succs[pos].index()] {
                    Some(dep) => dep,
                    None => continue,
                };
                if ignore_control && dep.is_control_dependence() {
                    continue;
                }
                let next = dep.target;
                if !in_scope(next) {
                    continue;
                }
                match marks[next.index()] {
                    Mark::OnPath => return true,
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::OnPath;
                        stack.push((next, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        false
    }

    /// Get strongly connected components using Tarjan's algorithm.
    ///
    /// Forced pairs behave like edges in both directions. Components are
    /// returned in topological order of the condensed graph: if an edge
    /// goes from component `a` to component `b`, `a` comes first.
    pub fn strongly_connected_components(&self) -> Vec<Vec<NodeId>> {
        let mut forced_adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &(a, b) in &self.forced {
            forced_adj.entry(a).or_default().push(b);
            forced_adj.entry(b).or_default().push(a);
        }

        let n = self.nodes.len();
        let mut index_counter = 0;
        let mut indices: Vec<Option<usize>> = vec![None; n];
        let mut lowlinks = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut sccs: Vec<Vec<NodeId>> = Vec::new();

        // Explicit call stack of (node, its targets, next target position).
        let mut calls: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();

        for root in self.node_ids() {
            if indices[root.index()].is_some() {
                continue;
            }
            indices[root.index()] = Some(index_counter);
            lowlinks[root.index()] = index_counter;
            index_counter += 1;
            stack.push(root);
            on_stack[root.index()] = true;
            calls.push((root, self.tarjan_targets(root, &forced_adj), 0));

            while let Some(frame) = calls.last_mut() {
                let v = frame.0;
                if let Some(&w) = frame.1.get(frame.2) {
                    frame.2 += 1;
                    match indices[w.index()] {
                        None => {
                            indices[w.index()] = Some(index_counter);
                            lowlinks[w.index()] = index_counter;
                            index_counter += 1;
                            stack.push(w);
                            on_stack[w.index()] = true;
                            calls.push((w, self.tarjan_targets(w, &forced_adj), 0));
                        }
                        Some(index_w) if on_stack[w.index()] => {
                            lowlinks[v.index()] = lowlinks[v.index()].min(index_w);
                        }
                        Some(_) => {}
                    }
                    continue;
                }

                calls.pop();
                if let Some(parent) = calls.last() {
                    let p = parent.0.index();
                    lowlinks[p] = lowlinks[p].min(lowlinks[v.index()]);
                }
                if Some(lowlinks[v.index()]) == indices[v.index()] {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w.index()] = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    scc.sort();
                    sccs.push(scc);
                }
            }
        }

        // Tarjan emits sinks first.
        sccs.reverse();
        sccs
    }

    fn tarjan_targets(&self, v: NodeId, forced_adj: &HashMap<NodeId, Vec<NodeId>>) -> Vec<NodeId> {
        self.get_outgoing(v)
            .map(|(_, d)| d.target)
            .chain(forced_adj.get(&v).into_iter().flatten().copied())
            .collect()
    }

    /// Get a summary of the dependence graph.
    pub fn summary(&self) -> DependenceGraphSummary {
        let sccs = self.strongly_connected_components();
        let live: Vec<&Dependence> = self.edges().map(|(_, d)| d).collect();
        DependenceGraphSummary {
            num_nodes: self.nodes.len(),
            num_dependences: live.len(),
            num_control: live.iter().filter(|d| d.kind.is_control()).count(),
            num_data: live.iter().filter(|d| d.kind.is_data()).count(),
            num_memory: live.iter().filter(|d| d.is_memory).count(),
            num_loop_carried: live.iter().filter(|d| d.is_loop_carried).count(),
            num_sccs: sccs.len(),
            num_nontrivial_sccs: sccs.iter().filter(|s| s.len() > 1).count(),
            has_cycle: self.has_cycle(false),
        }
    }
}

/// Summary of a dependence graph.
#[derive(Debug, Clone, Serialize)]
pub struct DependenceGraphSummary {
    pub num_nodes: usize,
    pub num_dependences: usize,
    pub num_control: usize,
    pub num_data: usize,
    pub num_memory: usize,
    pub num_loop_carried: usize,
    pub num_sccs: usize,
    pub num_nontrivial_sccs: usize,
    pub has_cycle: bool,
}

impl fmt::Display for DependenceGraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dependence Graph Summary:")?;
        writeln!(f, "  Nodes: {}", self.num_nodes)?;
        writeln!(f, "  Total dependences: {}", self.num_dependences)?;
        writeln!(f, "    Control: {}", self.num_control)?;
        writeln!(f, "    Data: {} ({} through memory)", self.num_data, self.num_memory)?;
        writeln!(f, "  Loop-carried: {}", self.num_loop_carried)?;
        writeln!(f, "  SCCs: {} ({} non-trivial)", self.num_sccs, self.num_nontrivial_sccs)?;
        writeln!(f, "  Has cycle: {}", self.has_cycle)?;
        Ok(())
    }
}
