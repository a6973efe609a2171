//! Natural-loop structure of a task body.

use super::function::Function;
use super::inst::BlockId;
use crate::utils::errors::IrError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Blocks, latches and exits of the natural loop rooted at a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStructure {
    /// Loop header (target of every back edge)
    pub header: BlockId,
    /// All blocks of the loop, header included
    pub blocks: BTreeSet<BlockId>,
    /// Blocks with a back edge to the header
    pub latches: Vec<BlockId>,
    /// Loop blocks with a successor outside the loop
    pub exiting_blocks: Vec<BlockId>,
    /// Blocks outside the loop targeted from inside it
    pub exit_blocks: Vec<BlockId>,
}

impl LoopStructure {
    /// Compute the natural loop of `header`.
    ///
    /// Latches are the header's predecessors that the header can reach;
    /// the loop body is everything that reaches a latch without going
    /// through the header.
    pub fn analyze(func: &Function, header: BlockId) -> Result<Self, IrError> {
        let reachable = reachable_from(func, header)?;
        let latches: Vec<BlockId> = func
            .predecessors(header)?
            .into_iter()
            .filter(|p| reachable.contains(p))
            .collect();
        if latches.is_empty() {
            return Err(IrError::NotALoop(header));
        }

        let mut blocks = BTreeSet::new();
        blocks.insert(header);
        let mut worklist: Vec<BlockId> = latches.clone();
        while let Some(bb) = worklist.pop() {
            if blocks.insert(bb) {
                worklist.extend(func.predecessors(bb)?);
            }
        }

        let mut exiting = BTreeSet::new();
        let mut exits = BTreeSet::new();
        for &bb in &blocks {
            for succ in func.successors(bb)? {
                if !blocks.contains(&succ) {
                    exiting.insert(bb);
                    exits.insert(succ);
                }
            }
        }

        Ok(Self {
            header,
            blocks,
            latches,
            exiting_blocks: exiting.into_iter().collect(),
            exit_blocks: exits.into_iter().collect(),
        })
    }

    pub fn contains(&self, bb: BlockId) -> bool {
        self.blocks.contains(&bb)
    }

    pub fn is_exit(&self, bb: BlockId) -> bool {
        self.exit_blocks.contains(&bb)
    }

    /// Successors of `bb` within a single iteration: back edges to the
    /// header and edges leaving the loop are dropped.
    pub fn iteration_successors(&self, func: &Function, bb: BlockId) -> Result<Vec<BlockId>, IrError> {
        Ok(func
            .successors(bb)?
            .into_iter()
            .filter(|s| *s != self.header && self.contains(*s))
            .collect())
    }
}

fn reachable_from(func: &Function, start: BlockId) -> Result<BTreeSet<BlockId>, IrError> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<BlockId> = func.successors(start)?;
    while let Some(bb) = stack.pop() {
        if seen.insert(bb) {
            stack.extend(func.successors(bb)?);
        }
    }
    Ok(seen)
}
