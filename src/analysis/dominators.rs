//! Dominance within a single loop iteration.
//!
//! The iteration graph of a loop is its CFG restricted to the loop blocks,
//! rooted at the header, with back edges and loop-leaving edges removed.

use crate::ir::{BlockId, Function, InstId, LoopStructure};
use crate::utils::errors::IrError;
use fixedbitset::FixedBitSet;
use petgraph::algo::dominators;
use petgraph::graphmap::DiGraphMap;

/// Dominator sets of one loop iteration.
#[derive(Debug, Clone)]
pub struct IterationDominators {
    /// `dom[b]` holds every block dominating `b`; empty outside the
    /// iteration graph
    dom: Vec<FixedBitSet>,
}

impl IterationDominators {
    pub fn compute(func: &Function, lp: &LoopStructure) -> Result<Self, IrError> {
        let n = func.num_blocks();

        let mut graph: DiGraphMap<BlockId, ()> = DiGraphMap::new();
        for &bb in &lp.blocks {
            graph.add_node(bb);
            for s in lp.iteration_successors(func, bb)? {
                graph.add_edge(bb, s, ());
            }
        }

        let doms = dominators::simple_fast(&graph, lp.header);
        let mut dom = vec![FixedBitSet::with_capacity(n); n];
        for &bb in &lp.blocks {
            if let Some(chain) = doms.dominators(bb) {
                for d in chain {
                    dom[bb.index()].insert(d.index());
                }
            }
        }
        Ok(Self { dom })
    }

    fn row(&self, bb: BlockId) -> Option<&FixedBitSet> {
        self.dom.get(bb.index()).filter(|row| !row.is_clear())
    }

    /// Check if every iteration path from the header to `b` passes `a`.
    pub fn block_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.row(b).map_or(false, |row| row.contains(a.index()))
    }

    /// Instruction-level dominance (reflexive).
    pub fn dominates(&self, func: &Function, a: InstId, b: InstId) -> Result<bool, IrError> {
        let (ba, pa) = func.position_of(a)?;
        let (bb, pb) = func.position_of(b)?;
        if ba == bb {
            return Ok(self.row(ba).is_some() && pa <= pb);
        }
        Ok(self.block_dominates(ba, bb))
    }
}
