//! Assignment of sequential SCCs to sequential segments.
//!
//! Every SCC classified as sequential becomes one segment, numbered in
//! topological order of the SCCDAG. When more segments would be needed
//! than the configured cap allows, the trailing sequential SCCs are merged
//! into one through [`SccDag::merge_sccs`].

use super::segment::SequentialSegment;
use crate::analysis::{DependenceGraph, SccDag, SccId, SccType};
use crate::ir::{InstId, LoopStructure, Task};
use anyhow::{bail, Context, Result};
use log::{debug, info};

/// Builds the sequential segments of a loop.
#[derive(Debug, Clone)]
pub struct SegmentPartitioner {
    max_segments: Option<usize>,
    enable_merge: bool,
}

impl Default for SegmentPartitioner {
    fn default() -> Self {
        Self { max_segments: None, enable_merge: true }
    }
}

impl SegmentPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of segments (and thus coordination slots).
    pub fn with_max_segments(mut self, max: Option<usize>) -> Self {
        self.max_segments = max;
        self
    }

    /// Allow merging SCCs to honour the segment cap.
    pub fn with_scc_merge(mut self, enable: bool) -> Self {
        self.enable_merge = enable;
        self
    }

    /// Sequential SCCs in topological order.
    pub fn sequential_sccs(dag: &SccDag) -> Vec<SccId> {
        dag.topological_order()
            .into_iter()
            .filter(|&id| dag.scc(id).map_or(false, |s| s.scc_type() == SccType::Sequential))
            .collect()
    }

    /// Build one segment per sequential SCC of `dag`.
    pub fn partition(
        &self,
        graph: &DependenceGraph,
        dag: &mut SccDag,
        task: &Task,
        lp: &LoopStructure,
    ) -> Result<Vec<SequentialSegment>> {
        let mut sequential = Self::sequential_sccs(dag);

        if let Some(cap) = self.max_segments {
            while sequential.len() > cap {
                if !self.enable_merge {
                    bail!(
                        "{} sequential SCCs exceed the limit of {} segments and SCC merging is disabled",
                        sequential.len(),
                        cap
                    );
                }
                if cap == 0 {
                    bail!("a limit of zero segments leaves no room for {} sequential SCCs", sequential.len());
                }
                let tail = sequential[cap - 1..].to_vec();
                let merged = dag.merge_sccs(graph, &tail).context("Failed to merge trailing sequential SCCs")?;
                info!("merged {} trailing sequential SCCs into {}", tail.len(), merged);
                sequential = Self::sequential_sccs(dag);
            }
        }

        let mut segments = Vec::with_capacity(sequential.len());
        for (pos, &id) in sequential.iter().enumerate() {
            let ops: Vec<InstId> = dag.scc(id)?.ops().collect();
            let segment = SequentialSegment::from_instructions(pos as u32, task, lp, &ops)
                .with_context(|| format!("Failed to place segment {} for {}", pos, id))?
                .with_sccs(vec![id]);
            segments.push(segment);
        }
        debug!("partitioned loop into {} sequential segments", segments.len());
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Dependence, Hazard};
    use crate::ir::{abi, ComparePred, FunctionBuilder, Value};

    /// Loop body with three memory operations in `body`, each with a
    /// loop-carried self dependence.
    fn three_counters() -> (Task, Vec<InstId>) {
        let mut b = FunctionBuilder::new("task", abi::FIRST_USER_ARG + 1);
        let entry = b.entry();
        let header = b.block("header");
        let body = b.block("body");
        let exit = b.block("exit");
        let cells: Vec<InstId> = (0..3).map(|_| b.alloca()).collect();
        b.br(header);

        b.position_at(header);
        let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
        let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
        b.cond_br(cmp.into(), body, exit);

        b.position_at(body);
        let stores: Vec<InstId> = cells.iter().map(|&c| b.store(c.into(), i.into())).collect();
        let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
        b.br(header);
        b.add_incoming(i, body, next.into());

        b.position_at(exit);
        b.ret(None);
        (Task::new(b.finish().unwrap(), header), stores)
    }

    fn graph_of(stores: &[InstId]) -> DependenceGraph {
        let mut g = DependenceGraph::new();
        for &s in stores {
            let n = g.add_node(s);
            g.add_edge(Dependence::memory(n, n, Hazard::Output).loop_carried()).unwrap();
        }
        g
    }

    #[test]
    fn test_one_segment_per_sequential_scc() {
        let (task, stores) = three_counters();
        let lp = task.loop_structure().unwrap();
        let g = graph_of(&stores);
        let mut dag = SccDag::build(&g).unwrap();
        dag.classify_sccs(&g, true);

        let segments = SegmentPartitioner::new().partition(&g, &mut dag, &task, &lp).unwrap();
        assert_eq!(segments.len(), 3);
        for (pos, seg) in segments.iter().enumerate() {
            assert_eq!(seg.id(), pos as u32);
            assert_eq!(seg.entries().len(), 1);
            assert_eq!(seg.sccs().len(), 1);
        }
    }

    #[test]
    fn test_cap_merges_trailing_sccs() {
        let (task, stores) = three_counters();
        let lp = task.loop_structure().unwrap();
        let g = graph_of(&stores);
        let mut dag = SccDag::build(&g).unwrap();
        dag.classify_sccs(&g, true);

        let segments = SegmentPartitioner::new()
            .with_max_segments(Some(2))
            .partition(&g, &mut dag, &task, &lp)
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(dag.len(), 2);
        // The merged segment spans two stores: one entry, one exit.
        let merged = &segments[1];
        assert_eq!(merged.entries().len(), 1);
        assert_eq!(merged.exits().len(), 1);
        assert_ne!(merged.entries(), merged.exits());
    }

    #[test]
    fn test_cap_without_merge_fails() {
        let (task, stores) = three_counters();
        let lp = task.loop_structure().unwrap();
        let g = graph_of(&stores);
        let mut dag = SccDag::build(&g).unwrap();
        dag.classify_sccs(&g, true);

        let result = SegmentPartitioner::new()
            .with_max_segments(Some(1))
            .with_scc_merge(false)
            .partition(&g, &mut dag, &task, &lp);
        assert!(result.is_err());
    }

    #[test]
    fn test_independent_sccs_get_no_segment() {
        let (task, stores) = three_counters();
        let lp = task.loop_structure().unwrap();
        let mut g = DependenceGraph::new();
        for &s in &stores {
            g.add_node(s);
        }
        let mut dag = SccDag::build(&g).unwrap();
        dag.classify_sccs(&g, true);
        let segments = SegmentPartitioner::new().partition(&g, &mut dag, &task, &lp).unwrap();
        assert!(segments.is_empty());
    }
}
