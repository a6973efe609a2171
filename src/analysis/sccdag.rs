//! The SCCDAG: a dependence graph condensed into its strongly connected
//! components.
//!
//! This module provides:
//! - Construction from a [`DependenceGraph`] (one SCC per Tarjan component)
//! - Inter-SCC edges derived from the original edges
//! - `merge_sccs`, which keeps the DAG acyclic by also folding every SCC
//!   that lies on a path between the merged ones
//! - Ordering queries answered from a lazily built transitive closure

use super::dependence::{DependenceGraph, EdgeId, NodeId};
use super::scc::{Scc, SccType};
use crate::ir::InstId;
use crate::utils::errors::SccDagError;
use crate::utils::matrix::BitMatrix;
use log::{debug, trace};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Handle of an SCC in an [`SccDag`]. Merged-away handles stay invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SccId(pub u32);

impl SccId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SccId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scc{}", self.0)
    }
}

/// Dense per-SCC indexes plus the closed reachability relation over them.
#[derive(Debug)]
struct Reachability {
    index: HashMap<SccId, usize>,
    matrix: BitMatrix,
}

/// Acyclic graph of SCCs.
#[derive(Debug)]
pub struct SccDag {
    sccs: Vec<Option<Scc>>,
    node_to_scc: Vec<Option<SccId>>,
    inter_edges: BTreeMap<(SccId, SccId), Vec<EdgeId>>,
    reachability: OnceCell<Reachability>,
}

impl SccDag {
    /// Condense `graph`. SCC handles are assigned in topological order.
    pub fn build(graph: &DependenceGraph) -> Result<Self, SccDagError> {
        let components = graph.strongly_connected_components();
        let mut sccs = Vec::with_capacity(components.len());
        let mut node_to_scc = vec![None; graph.num_nodes()];

        for (i, nodes) in components.iter().enumerate() {
            let id = SccId(i as u32);
            for &n in nodes {
                node_to_scc[n.index()] = Some(id);
            }
            sccs.push(Some(Scc::new(graph, nodes, true)?));
        }

        let mut dag = Self {
            sccs,
            node_to_scc,
            inter_edges: BTreeMap::new(),
            reachability: OnceCell::new(),
        };
        dag.rebuild_inter_edges(graph)?;
        debug!(
            "built SCCDAG: {} SCCs, {} inter-SCC edges from {} nodes",
            dag.len(),
            dag.inter_edges.len(),
            graph.num_nodes()
        );
        Ok(dag)
    }

    fn rebuild_inter_edges(&mut self, graph: &DependenceGraph) -> Result<(), SccDagError> {
        self.inter_edges.clear();
        for (id, dep) in graph.edges() {
            let from = self.scc_of_node(dep.source)?;
            let to = self.scc_of_node(dep.target)?;
            if from != to {
                self.inter_edges.entry((from, to)).or_default().push(id);
            }
        }
        Ok(())
    }

    /// Number of live SCCs.
    pub fn len(&self) -> usize {
        self.sccs.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live SCCs in handle order.
    pub fn sccs(&self) -> impl Iterator<Item = (SccId, &Scc)> {
        self.sccs
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SccId(i as u32), s)))
    }

    pub fn scc_ids(&self) -> Vec<SccId> {
        self.sccs().map(|(id, _)| id).collect()
    }

    pub fn scc(&self, id: SccId) -> Result<&Scc, SccDagError> {
        self.sccs
            .get(id.index())
            .and_then(|s| s.as_ref())
            .ok_or(SccDagError::UnknownScc(id))
    }

    pub fn scc_mut(&mut self, id: SccId) -> Result<&mut Scc, SccDagError> {
        self.sccs
            .get_mut(id.index())
            .and_then(|s| s.as_mut())
            .ok_or(SccDagError::UnknownScc(id))
    }

    /// SCC owning a graph node.
    pub fn scc_of_node(&self, node: NodeId) -> Result<SccId, SccDagError> {
        self.node_to_scc
            .get(node.index())
            .copied()
            .flatten()
            .ok_or(SccDagError::UnmappedNode(node))
    }

    /// SCC owning an operation, if any.
    pub fn scc_of_op(&self, op: InstId) -> Option<SccId> {
        self.sccs().find(|(_, s)| s.contains_op(op)).map(|(id, _)| id)
    }

    /// Inter-SCC edges keyed by `(source SCC, target SCC)`.
    pub fn inter_edges(&self) -> &BTreeMap<(SccId, SccId), Vec<EdgeId>> {
        &self.inter_edges
    }

    pub fn successors(&self, id: SccId) -> Vec<SccId> {
        self.inter_edges.keys().filter(|(s, _)| *s == id).map(|(_, t)| *t).collect()
    }

    pub fn predecessors(&self, id: SccId) -> Vec<SccId> {
        self.inter_edges.keys().filter(|(_, t)| *t == id).map(|(s, _)| *s).collect()
    }

    /// Replace the given SCCs with one SCC and return its handle.
    ///
    /// Every SCC that lies on a path from one merged SCC to another is
    /// folded in as well, so the result stays acyclic. The surviving
    /// handle is the smallest one involved; the others become invalid.
    /// Cached indexes and the reachability matrix are dropped.
    pub fn merge_sccs(&mut self, graph: &DependenceGraph, ids: &[SccId]) -> Result<SccId, SccDagError> {
        let members: BTreeSet<SccId> = ids.iter().copied().collect();
        if members.is_empty() {
            return Err(SccDagError::EmptyMerge);
        }
        for &id in &members {
            self.scc(id)?;
        }
        if members.len() == 1 {
            return Ok(*members.iter().next().ok_or(SccDagError::EmptyMerge)?);
        }

        let mut folded = members.clone();
        for (candidate, _) in self.sccs() {
            if members.contains(&candidate) {
                continue;
            }
            let after_member = self.any_ordered_before(&members, candidate)?;
            let before_member = self.ordered_before_any(candidate, &members)?;
            if after_member && before_member {
                trace!("folding {} into merge: it lies between merged SCCs", candidate);
                folded.insert(candidate);
            }
        }

        let mut iter = folded.iter().copied();
        let target = iter.next().ok_or(SccDagError::EmptyMerge)?;
        for other in iter {
            let scc = self.sccs[other.index()].take().ok_or(SccDagError::UnknownScc(other))?;
            for n in scc.internal_nodes() {
                self.node_to_scc[n.index()] = Some(target);
            }
            self.scc_mut(target)?.absorb(scc);
        }

        let merged = self.scc_mut(target)?;
        merged.rebuild_boundary(graph)?;
        merged.set_type(SccType::Sequential);
        self.rebuild_inter_edges(graph)?;
        self.reachability.take();

        debug!("merged {} SCCs into {} ({} requested)", folded.len(), target, members.len());
        Ok(target)
    }

    fn reachability(&self) -> &Reachability {
        self.reachability.get_or_init(|| {
            let index: HashMap<SccId, usize> =
                self.scc_ids().into_iter().enumerate().map(|(i, id)| (id, i)).collect();
            let mut matrix = BitMatrix::new(index.len());
            for &(from, to) in self.inter_edges.keys() {
                if let (Some(&i), Some(&j)) = (index.get(&from), index.get(&to)) {
                    matrix.set(i, j);
                }
            }
            matrix.transitive_closure();
            trace!("computed SCC reachability over {} SCCs", index.len());
            Reachability { index, matrix }
        })
    }

    /// Dense index of a live SCC, stable until the next merge.
    pub fn scc_index(&self, id: SccId) -> Result<usize, SccDagError> {
        self.reachability().index.get(&id).copied().ok_or(SccDagError::UnknownScc(id))
    }

    /// Check if `a` always executes before `b`: some dependence path
    /// leads from `a` to `b`.
    pub fn ordered_before(&self, a: SccId, b: SccId) -> Result<bool, SccDagError> {
        let r = self.reachability();
        let i = *r.index.get(&a).ok_or(SccDagError::UnknownScc(a))?;
        let j = *r.index.get(&b).ok_or(SccDagError::UnknownScc(b))?;
        Ok(r.matrix.get(i, j))
    }

    /// Check if `a` is ordered before at least one SCC of `set`.
    pub fn ordered_before_any(&self, a: SccId, set: &BTreeSet<SccId>) -> Result<bool, SccDagError> {
        for &b in set {
            if self.ordered_before(a, b)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Check if at least one SCC of `set` is ordered before `b`.
    pub fn any_ordered_before(&self, set: &BTreeSet<SccId>, b: SccId) -> Result<bool, SccDagError> {
        for &a in set {
            if self.ordered_before(a, b)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Check that no SCC reaches itself through inter-SCC edges.
    pub fn is_acyclic(&self) -> bool {
        !self.reachability().matrix.has_reflexive_entry()
    }

    /// Live SCCs in a topological order, ties broken by handle.
    pub fn topological_order(&self) -> Vec<SccId> {
        let mut in_degree: BTreeMap<SccId, usize> = self.scc_ids().into_iter().map(|id| (id, 0)).collect();
        for &(_, to) in self.inter_edges.keys() {
            if let Some(d) = in_degree.get_mut(&to) {
                *d += 1;
            }
        }

        let mut ready: BTreeSet<SccId> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for succ in self.successors(id) {
                if let Some(d) = in_degree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(succ);
                    }
                }
            }
        }
        order
    }

    /// Classify every SCC: Sequential if its internal nodes form a cycle,
    /// Independent otherwise. Returns the number of sequential SCCs.
    pub fn classify_sccs(&mut self, graph: &DependenceGraph, ignore_control: bool) -> usize {
        let mut sequential = 0;
        for scc in self.sccs.iter_mut().flatten() {
            if scc.revalidate_type(graph, ignore_control) == SccType::Sequential {
                sequential += 1;
            }
        }
        debug!("classified {} SCCs: {} sequential", self.len(), sequential);
        sequential
    }
}
