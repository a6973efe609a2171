//! Sequential segments.
//!
//! A sequential segment is a set of loop operations whose relative order
//! across iterations must be preserved. Workers wait at the segment's
//! entry points and signal at its exit points; the segment identifier
//! selects the coordination slot.

use crate::analysis::{IterationDominators, SccId};
use crate::ir::{BlockId, Function, InstId, LoopStructure, Task};
use crate::utils::errors::{IrError, SyncError};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A segment with its program points in the task body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialSegment {
    id: u32,
    entries: BTreeSet<InstId>,
    exits: BTreeSet<InstId>,
    #[serde(default)]
    sccs: Vec<SccId>,
}

impl SequentialSegment {
    pub fn new(id: u32, entries: impl IntoIterator<Item = InstId>, exits: impl IntoIterator<Item = InstId>) -> Self {
        Self {
            id,
            entries: entries.into_iter().collect(),
            exits: exits.into_iter().collect(),
            sccs: Vec::new(),
        }
    }

    /// Derive entry and exit points from the segment's instructions.
    ///
    /// Entries are the instructions that no other instruction of the
    /// segment dominates within one iteration. Exits are those from which
    /// no other instruction of the segment can be reached before the
    /// iteration ends. Instructions outside the loop are ignored.
    ///
    /// Each iteration that stays in the loop must wait and signal exactly
    /// once, so a segment that some continuing iteration never enters, or
    /// that an iteration can abandon between an entry and an exit, is
    /// rejected.
    pub fn from_instructions(id: u32, task: &Task, lp: &LoopStructure, insts: &[InstId]) -> Result<Self, SyncError> {
        let body = &task.body;
        let doms = IterationDominators::compute(body, lp)?;

        let mut members = Vec::new();
        let mut member_blocks: BTreeMap<BlockId, Vec<usize>> = BTreeMap::new();
        for &inst in insts {
            let (bb, pos) = body.position_of(inst)?;
            if lp.contains(bb) {
                members.push(inst);
                member_blocks.entry(bb).or_default().push(pos);
            }
        }

        let ahead = MembersAhead::compute(body, lp, &member_blocks)?;
        ahead.check_coverage(id, body, lp, &member_blocks)?;

        let mut entries = BTreeSet::new();
        let mut exits = BTreeSet::new();
        for &inst in &members {
            let mut dominated = false;
            for &other in members.iter().filter(|&&o| o != inst) {
                dominated |= doms.dominates(body, other, inst)?;
            }
            if !dominated {
                entries.insert(inst);
            }

            let (bb, pos) = body.position_of(inst)?;
            let later_in_block = member_blocks[&bb].iter().any(|&p| p > pos);
            if !later_in_block && !ahead.after_end(bb) {
                exits.insert(inst);
            }
        }

        trace!(
            "segment {}: {} instructions, entries {:?}, exits {:?}",
            id,
            members.len(),
            entries,
            exits
        );
        Ok(Self { id, entries, exits, sccs: Vec::new() })
    }

    /// Record the SCCs this segment was built from.
    pub fn with_sccs(mut self, sccs: Vec<SccId>) -> Self {
        self.sccs = sccs;
        self
    }

    /// Dense, zero-based identifier; also the coordination slot index.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn entries(&self) -> &BTreeSet<InstId> {
        &self.entries
    }

    pub fn exits(&self) -> &BTreeSet<InstId> {
        &self.exits
    }

    pub fn sccs(&self) -> &[SccId] {
        &self.sccs
    }

    pub fn for_each_entry<F: FnMut(InstId)>(&self, f: F) {
        self.entries.iter().copied().for_each(f);
    }

    pub fn for_each_exit<F: FnMut(InstId)>(&self, f: F) {
        self.exits.iter().copied().for_each(f);
    }

    /// A segment without entries and exits needs no synchronization.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.exits.is_empty()
    }
}

/// For each loop block, whether a segment instruction can still run after
/// the block's terminator within the same iteration.
struct MembersAhead {
    after_end: BTreeMap<BlockId, bool>,
}

impl MembersAhead {
    fn compute(body: &Function, lp: &LoopStructure, member_blocks: &BTreeMap<BlockId, Vec<usize>>) -> Result<Self, IrError> {
        let mut after_end = BTreeMap::new();
        for &bb in &lp.blocks {
            let mut seen = BTreeSet::new();
            let mut stack = lp.iteration_successors(body, bb)?;
            let mut found = false;
            while let Some(next) = stack.pop() {
                if !seen.insert(next) {
                    continue;
                }
                if member_blocks.contains_key(&next) {
                    found = true;
                    break;
                }
                stack.extend(lp.iteration_successors(body, next)?);
            }
            after_end.insert(bb, found);
        }
        Ok(Self { after_end })
    }

    fn after_end(&self, bb: BlockId) -> bool {
        self.after_end.get(&bb).copied().unwrap_or(false)
    }

    /// Segment code can still run from the top of `bb`.
    fn at_start(&self, bb: BlockId, member_blocks: &BTreeMap<BlockId, Vec<usize>>) -> bool {
        member_blocks.contains_key(&bb) || self.after_end(bb)
    }

    fn check_coverage(
        &self,
        id: u32,
        body: &Function,
        lp: &LoopStructure,
        member_blocks: &BTreeMap<BlockId, Vec<usize>>,
    ) -> Result<(), SyncError> {
        if member_blocks.is_empty() {
            return Ok(());
        }

        // Once segment code lies ahead, every edge taken must keep it ahead
        // until the last instruction runs.
        for &bb in &lp.blocks {
            if !self.after_end(bb) {
                continue;
            }
            if lp.latches.contains(&bb) {
                return Err(SyncError::SegmentAbandoned { segment: id, block: bb });
            }
            for succ in lp.iteration_successors(body, bb)? {
                if !self.at_start(succ, member_blocks) {
                    return Err(SyncError::SegmentAbandoned { segment: id, block: bb });
                }
            }
        }

        // A continuing iteration must pass through at least one segment block.
        let mut seen = BTreeSet::new();
        let mut stack = vec![lp.header];
        while let Some(bb) = stack.pop() {
            if !seen.insert(bb) || member_blocks.contains_key(&bb) {
                continue;
            }
            if lp.latches.contains(&bb) {
                return Err(SyncError::SegmentBypassed { segment: id, latch: bb });
            }
            stack.extend(lp.iteration_successors(body, bb)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{abi, BinaryOp, ComparePred, FunctionBuilder, Value};

    /// header: phi, cmp -> then | latch; then: store -> latch; latch: load, step, br
    fn branchy_task() -> (Task, [InstId; 4]) {
        let mut b = FunctionBuilder::new("task", abi::FIRST_USER_ARG + 1);
        let entry = b.entry();
        let header = b.block("header");
        let then_bb = b.block("then");
        let latch = b.block("latch");
        let exit = b.block("exit");
        let cell = b.alloca();
        b.br(header);

        b.position_at(header);
        let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
        let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
        b.cond_br(cmp.into(), then_bb, exit);

        b.position_at(then_bb);
        let store = b.store(cell.into(), i.into());
        b.br(latch);

        b.position_at(latch);
        let load = b.load(cell.into());
        let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
        b.br(header);
        b.add_incoming(i, latch, next.into());

        b.position_at(exit);
        b.ret(None);

        (Task::new(b.finish().unwrap(), header), [cmp, store, load, next])
    }

    #[test]
    fn test_from_instructions_single_path() {
        let (task, [_, store, load, _]) = branchy_task();
        let lp = task.loop_structure().unwrap();
        let seg = SequentialSegment::from_instructions(0, &task, &lp, &[load, store]).unwrap();
        assert_eq!(seg.entries().iter().copied().collect::<Vec<_>>(), vec![store]);
        assert_eq!(seg.exits().iter().copied().collect::<Vec<_>>(), vec![load]);
    }

    #[test]
    fn test_same_block_members() {
        let (task, [_, _, load, next]) = branchy_task();
        let lp = task.loop_structure().unwrap();
        let seg = SequentialSegment::from_instructions(3, &task, &lp, &[next, load]).unwrap();
        assert_eq!(seg.id(), 3);
        assert!(seg.entries().contains(&load) && seg.entries().len() == 1);
        assert!(seg.exits().contains(&next) && seg.exits().len() == 1);
    }

    #[test]
    fn test_header_member_is_the_entry() {
        let (task, [cmp, store, _, _]) = branchy_task();
        let lp = task.loop_structure().unwrap();
        let seg = SequentialSegment::from_instructions(0, &task, &lp, &[cmp, store]).unwrap();
        assert_eq!(seg.entries().len(), 1);
        assert!(seg.entries().contains(&cmp));
        // Leaving through the header is covered by the loop-exit signals.
        assert_eq!(seg.exits().iter().copied().collect::<Vec<_>>(), vec![store]);
    }

    #[test]
    fn test_header_compare_is_not_an_exit() {
        let (task, [cmp, _, load, _]) = branchy_task();
        let lp = task.loop_structure().unwrap();
        let seg = SequentialSegment::from_instructions(0, &task, &lp, &[cmp, load]).unwrap();
        assert_eq!(seg.entries().iter().copied().collect::<Vec<_>>(), vec![cmp]);
        assert_eq!(seg.exits().iter().copied().collect::<Vec<_>>(), vec![load]);
    }

    /// header: phi, cmp -> body | exit; body: odd -> then | join;
    /// then: store -> join; join: load, step -> header
    fn diamond_task() -> (Task, [InstId; 3]) {
        let mut b = FunctionBuilder::new("task", abi::FIRST_USER_ARG + 1);
        let entry = b.entry();
        let header = b.block("header");
        let body = b.block("body");
        let then_bb = b.block("then");
        let join = b.block("join");
        let exit = b.block("exit");
        let cell = b.alloca();
        b.br(header);

        b.position_at(header);
        let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
        let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
        b.cond_br(cmp.into(), body, exit);

        b.position_at(body);
        let odd = b.binary(BinaryOp::Rem, i.into(), Value::Const(2));
        b.cond_br(odd.into(), then_bb, join);

        b.position_at(then_bb);
        let store = b.store(cell.into(), i.into());
        b.br(join);

        b.position_at(join);
        let load = b.load(cell.into());
        let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
        b.br(header);
        b.add_incoming(i, join, next.into());

        b.position_at(exit);
        b.ret(None);

        (Task::new(b.finish().unwrap(), header), [odd, store, load])
    }

    #[test]
    fn test_entries_on_both_sides_of_a_branch() {
        let (task, [_, store, load]) = diamond_task();
        let lp = task.loop_structure().unwrap();
        let seg = SequentialSegment::from_instructions(0, &task, &lp, &[store, load]).unwrap();
        assert_eq!(seg.entries().iter().copied().collect::<Vec<_>>(), vec![store, load]);
        assert_eq!(seg.exits().iter().copied().collect::<Vec<_>>(), vec![load]);
    }

    #[test]
    fn test_segment_skipped_by_a_branch_is_rejected() {
        let (task, [_, store, _]) = diamond_task();
        let lp = task.loop_structure().unwrap();
        let err = SequentialSegment::from_instructions(0, &task, &lp, &[store]).unwrap_err();
        assert!(matches!(err, SyncError::SegmentAbandoned { segment: 0, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_segment_left_midway_is_rejected() {
        let (task, [odd, store, _]) = diamond_task();
        let lp = task.loop_structure().unwrap();
        // `odd` may branch straight to `join`, where nothing of the segment runs.
        let err = SequentialSegment::from_instructions(1, &task, &lp, &[odd, store]).unwrap_err();
        assert!(matches!(err, SyncError::SegmentAbandoned { segment: 1, .. }));
    }

    #[test]
    fn test_visitors_and_emptiness() {
        let seg = SequentialSegment::new(1, [InstId(4), InstId(2)], Vec::new());
        let mut seen = Vec::new();
        seg.for_each_entry(|p| seen.push(p));
        assert_eq!(seen, vec![InstId(2), InstId(4)]);
        let mut exits = 0;
        seg.for_each_exit(|_| exits += 1);
        assert_eq!(exits, 0);
        assert!(!seg.is_empty());
        assert!(SequentialSegment::new(0, Vec::new(), Vec::new()).is_empty());
    }

    #[test]
    fn test_unknown_instruction() {
        let (task, _) = branchy_task();
        let lp = task.loop_structure().unwrap();
        let missing = InstId(999);
        assert_eq!(
            SequentialSegment::from_instructions(0, &task, &lp, &[missing]),
            Err(SyncError::Ir(IrError::UnknownInst(missing)))
        );
    }
}
