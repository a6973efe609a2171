//! Control-flow graph of a task body.
//!
//! A [`Function`] is an arena of basic blocks and instructions addressed by
//! [`BlockId`] and [`InstId`]. Every edit that changes the block structure
//! goes through an explicit operation here ([`Function::split_block_at`],
//! [`Function::replace_terminator`]) so that [`Function::verify`] can check
//! mechanically that merge parameters still match their predecessors.

use super::inst::{BlockId, InstData, InstId, InstKind, Value};
use crate::utils::errors::IrError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A basic block: a name and an ordered instruction list ending in a terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<InstId>,
}

/// A function body in CFG form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Number of positional arguments
    pub num_params: u32,
    blocks: Vec<BlockData>,
    insts: Vec<InstData>,
    entry: BlockId,
}

impl Function {
    /// Create a function with an empty entry block.
    pub fn new(name: impl Into<String>, num_params: u32) -> Self {
        let mut func = Self {
            name: name.into(),
            num_params,
            blocks: Vec::new(),
            insts: Vec::new(),
            entry: BlockId(0),
        };
        func.entry = func.add_block("entry");
        func
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// All block handles in creation order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Add a new, empty block.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData { name: name.into(), insts: Vec::new() });
        id
    }

    pub fn block(&self, bb: BlockId) -> Result<&BlockData, IrError> {
        self.blocks.get(bb.index()).ok_or(IrError::UnknownBlock(bb))
    }

    fn block_mut(&mut self, bb: BlockId) -> Result<&mut BlockData, IrError> {
        self.blocks.get_mut(bb.index()).ok_or(IrError::UnknownBlock(bb))
    }

    pub fn inst(&self, id: InstId) -> Result<&InstData, IrError> {
        self.insts.get(id.index()).ok_or(IrError::UnknownInst(id))
    }

    pub fn kind(&self, id: InstId) -> Result<&InstKind, IrError> {
        Ok(&self.inst(id)?.kind)
    }

    /// Instructions of a block in execution order.
    pub fn block_insts(&self, bb: BlockId) -> Result<&[InstId], IrError> {
        Ok(&self.block(bb)?.insts)
    }

    fn new_inst(&mut self, kind: InstKind, bb: BlockId) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(InstData { kind, block: Some(bb) });
        id
    }

    /// Append an instruction at the end of a block that has no terminator yet.
    pub fn append_inst(&mut self, bb: BlockId, kind: InstKind) -> Result<InstId, IrError> {
        if self.terminator(bb)?.is_some() {
            return Err(IrError::BlockTerminated(bb));
        }
        let id = self.new_inst(kind, bb);
        self.block_mut(bb)?.insts.push(id);
        Ok(id)
    }

    /// Insert an instruction immediately before `at`.
    pub fn insert_before(&mut self, at: InstId, kind: InstKind) -> Result<InstId, IrError> {
        let (bb, pos) = self.position_of(at)?;
        let id = self.new_inst(kind, bb);
        self.block_mut(bb)?.insts.insert(pos, id);
        Ok(id)
    }

    /// Insert an instruction immediately after `at`.
    pub fn insert_after(&mut self, at: InstId, kind: InstKind) -> Result<InstId, IrError> {
        let (bb, pos) = self.position_of(at)?;
        let id = self.new_inst(kind, bb);
        self.block_mut(bb)?.insts.insert(pos + 1, id);
        Ok(id)
    }

    /// Insert an instruction right before the terminator of `bb`.
    pub fn insert_before_terminator(&mut self, bb: BlockId, kind: InstKind) -> Result<InstId, IrError> {
        let term = self.terminator(bb)?.ok_or(IrError::MissingTerminator(bb))?;
        self.insert_before(term, kind)
    }

    /// Insert an instruction right after the merge parameters of `bb`.
    pub fn insert_at_first_non_phi(&mut self, bb: BlockId, kind: InstKind) -> Result<InstId, IrError> {
        let at = self.first_non_phi(bb)?.ok_or(IrError::MissingTerminator(bb))?;
        self.insert_before(at, kind)
    }

    /// The terminator of `bb`, if the block is already closed.
    pub fn terminator(&self, bb: BlockId) -> Result<Option<InstId>, IrError> {
        let last = self.block(bb)?.insts.last().copied();
        Ok(last.filter(|id| self.insts[id.index()].kind.is_terminator()))
    }

    /// The first instruction of `bb` that is not a merge parameter.
    pub fn first_non_phi(&self, bb: BlockId) -> Result<Option<InstId>, IrError> {
        Ok(self
            .block(bb)?
            .insts
            .iter()
            .copied()
            .find(|id| !self.insts[id.index()].kind.is_phi()))
    }

    /// Merge parameters of `bb`.
    pub fn phis(&self, bb: BlockId) -> Result<Vec<InstId>, IrError> {
        Ok(self
            .block(bb)?
            .insts
            .iter()
            .copied()
            .take_while(|id| self.insts[id.index()].kind.is_phi())
            .collect())
    }

    /// Successor blocks of `bb` (empty if the block is not terminated).
    pub fn successors(&self, bb: BlockId) -> Result<Vec<BlockId>, IrError> {
        match self.terminator(bb)? {
            Some(term) => Ok(self.insts[term.index()].kind.successors()),
            None => Ok(Vec::new()),
        }
    }

    /// Predecessor blocks of `bb`, sorted and deduplicated.
    pub fn predecessors(&self, bb: BlockId) -> Result<Vec<BlockId>, IrError> {
        self.block(bb)?;
        let mut preds = BTreeSet::new();
        for pred in self.block_ids() {
            if self.successors(pred)?.contains(&bb) {
                preds.insert(pred);
            }
        }
        Ok(preds.into_iter().collect())
    }

    /// Predecessor sets of every block.
    pub fn predecessor_map(&self) -> Result<HashMap<BlockId, Vec<BlockId>>, IrError> {
        let mut map: HashMap<BlockId, BTreeSet<BlockId>> =
            self.block_ids().map(|bb| (bb, BTreeSet::new())).collect();
        for bb in self.block_ids() {
            for succ in self.successors(bb)? {
                map.entry(succ).or_default().insert(bb);
            }
        }
        Ok(map.into_iter().map(|(bb, preds)| (bb, preds.into_iter().collect())).collect())
    }

    /// Block currently holding `inst`.
    pub fn block_of(&self, inst: InstId) -> Result<BlockId, IrError> {
        self.inst(inst)?.block.ok_or(IrError::DetachedInst(inst))
    }

    /// Block and index of `inst`.
    pub fn position_of(&self, inst: InstId) -> Result<(BlockId, usize), IrError> {
        let bb = self.block_of(inst)?;
        let pos = self
            .block(bb)?
            .insts
            .iter()
            .position(|&id| id == inst)
            .ok_or(IrError::CorruptPlacement(inst))?;
        Ok((bb, pos))
    }

    /// Split the block holding `at` so that `at` starts a new block.
    ///
    /// The original block keeps everything before `at` and ends in an
    /// unconditional branch to the new block. Merge parameters in the new
    /// block's successors that named the original block now name the new
    /// one, since it is the actual predecessor along that path.
    pub fn split_block_at(&mut self, at: InstId) -> Result<BlockId, IrError> {
        if self.kind(at)?.is_phi() {
            return Err(IrError::SplitAtPhi(at));
        }
        let (before, pos) = self.position_of(at)?;
        let name = format!("{}.split", self.block(before)?.name);
        let after = self.add_block(name);

        let moved = self.block_mut(before)?.insts.split_off(pos);
        for &id in &moved {
            self.insts[id.index()].block = Some(after);
        }
        self.block_mut(after)?.insts = moved;

        let br = self.new_inst(InstKind::Br { target: after }, before);
        self.block_mut(before)?.insts.push(br);

        for succ in self.successors(after)? {
            self.retarget_phis(succ, before, after)?;
        }
        Ok(after)
    }

    /// Rewrite incoming blocks `from` to `to` in every merge parameter of `bb`.
    pub fn retarget_phis(&mut self, bb: BlockId, from: BlockId, to: BlockId) -> Result<usize, IrError> {
        let mut rewritten = 0;
        for phi in self.phis(bb)? {
            if let InstKind::Phi { incoming } = &mut self.insts[phi.index()].kind {
                for (block, _) in incoming.iter_mut().filter(|(b, _)| *b == from) {
                    *block = to;
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }

    /// Add an incoming `(block, value)` pair to a merge parameter.
    pub fn add_phi_incoming(&mut self, phi: InstId, bb: BlockId, value: Value) -> Result<(), IrError> {
        self.block(bb)?;
        match &mut self.insts.get_mut(phi.index()).ok_or(IrError::UnknownInst(phi))?.kind {
            InstKind::Phi { incoming } => {
                incoming.push((bb, value));
                Ok(())
            }
            _ => Err(IrError::NotAPhi(phi)),
        }
    }

    /// Replace the terminator of `bb`, returning the new terminator.
    pub fn replace_terminator(&mut self, bb: BlockId, kind: InstKind) -> Result<InstId, IrError> {
        if !kind.is_terminator() {
            return Err(IrError::ExpectedTerminator(bb));
        }
        let old = self.terminator(bb)?.ok_or(IrError::MissingTerminator(bb))?;
        self.insts[old.index()].block = None;
        self.block_mut(bb)?.insts.pop();
        self.append_inst(bb, kind)
    }

    /// Check the structural invariants of the CFG.
    ///
    /// Every block ends in exactly one terminator, merge parameters sit at
    /// the top of their block, each merge parameter's incoming blocks equal
    /// the block's predecessor set, and every operand names a placed
    /// instruction.
    pub fn verify(&self) -> Result<(), IrError> {
        let preds = self.predecessor_map()?;
        for bb in self.block_ids() {
            let insts = &self.block(bb)?.insts;
            let last = insts.last().ok_or(IrError::MissingTerminator(bb))?;
            if !self.insts[last.index()].kind.is_terminator() {
                return Err(IrError::MissingTerminator(bb));
            }

            let mut seen_non_phi = false;
            for (pos, &id) in insts.iter().enumerate() {
                let data = self.inst(id)?;
                if data.block != Some(bb) {
                    return Err(IrError::CorruptPlacement(id));
                }
                if data.kind.is_terminator() && pos + 1 != insts.len() {
                    return Err(IrError::MisplacedTerminator { block: bb, inst: id });
                }
                if data.kind.is_phi() {
                    if seen_non_phi {
                        return Err(IrError::MisplacedPhi { block: bb, inst: id });
                    }
                } else {
                    seen_non_phi = true;
                }
                for target in data.kind.successors() {
                    self.block(target)?;
                }
                for operand in data.kind.operands() {
                    if let Value::Inst(src) = operand {
                        self.block_of(src)?;
                    }
                }
                if let InstKind::Phi { incoming } = &data.kind {
                    let found: BTreeSet<BlockId> = incoming.iter().map(|(b, _)| *b).collect();
                    let expected: BTreeSet<BlockId> =
                        preds.get(&bb).map(|p| p.iter().copied().collect()).unwrap_or_default();
                    if found != expected {
                        return Err(IrError::PhiIncomingMismatch {
                            block: bb,
                            phi: id,
                            expected: expected.into_iter().collect(),
                            found: found.into_iter().collect(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// All placed instructions, block by block.
    pub fn placed_insts(&self) -> impl Iterator<Item = (BlockId, InstId)> + '_ {
        self.block_ids()
            .flat_map(move |bb| self.blocks[bb.index()].insts.iter().map(move |&id| (bb, id)))
    }

    /// Count placed instructions matching a predicate.
    pub fn count_insts<F: Fn(&InstKind) -> bool>(&self, pred: F) -> usize {
        self.placed_insts()
            .filter(|(_, id)| pred(&self.insts[id.index()].kind))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::inst::{BinaryOp, ComparePred};

    /// entry -> loop(phi) -> loop | exit
    fn self_loop() -> (Function, BlockId, BlockId, InstId, InstId) {
        let mut f = Function::new("self_loop", 1);
        let entry = f.entry();
        let body = f.add_block("loop");
        let exit = f.add_block("exit");
        f.append_inst(entry, InstKind::Br { target: body }).unwrap();
        let phi = f
            .append_inst(body, InstKind::Phi { incoming: vec![(entry, Value::Const(0))] })
            .unwrap();
        let next = f
            .append_inst(body, InstKind::Binary { op: BinaryOp::Add, lhs: phi.into(), rhs: Value::Const(1) })
            .unwrap();
        if let InstKind::Phi { incoming } = &mut f.insts[phi.index()].kind {
            incoming.push((body, next.into()));
        }
        let cond = f
            .append_inst(body, InstKind::Compare { pred: ComparePred::Lt, lhs: next.into(), rhs: Value::Arg(0) })
            .unwrap();
        f.append_inst(body, InstKind::CondBr { cond: cond.into(), then_block: body, else_block: exit })
            .unwrap();
        f.append_inst(exit, InstKind::Ret { value: None }).unwrap();
        (f, body, exit, phi, next)
    }

    #[test]
    fn test_verify_well_formed() {
        let (f, ..) = self_loop();
        assert!(f.verify().is_ok());
    }

    #[test]
    fn test_predecessors() {
        let (f, body, exit, ..) = self_loop();
        assert_eq!(f.predecessors(body).unwrap(), vec![f.entry(), body]);
        assert_eq!(f.predecessors(exit).unwrap(), vec![body]);
    }

    #[test]
    fn test_split_retargets_self_loop_phi() {
        let (mut f, body, _exit, phi, next) = self_loop();
        let after = f.split_block_at(next).unwrap();

        assert_eq!(f.block_of(next).unwrap(), after);
        assert_eq!(f.successors(body).unwrap(), vec![after]);
        // The back edge now leaves from the new block.
        assert_eq!(f.predecessors(body).unwrap(), vec![f.entry(), after]);
        match f.kind(phi).unwrap() {
            InstKind::Phi { incoming } => assert!(incoming.iter().any(|(b, _)| *b == after)),
            other => panic!("expected phi, got {:?}", other),
        }
        f.verify().unwrap();
    }

    #[test]
    fn test_split_at_phi_rejected() {
        let (mut f, _, _, phi, _) = self_loop();
        assert_eq!(f.split_block_at(phi), Err(IrError::SplitAtPhi(phi)));
    }

    #[test]
    fn test_verify_detects_stale_phi() {
        let (mut f, body, ..) = self_loop();
        let fresh = f.add_block("fresh");
        f.append_inst(fresh, InstKind::Br { target: body }).unwrap();
        let entry = f.entry();
        f.replace_terminator(entry, InstKind::Br { target: fresh }).unwrap();
        assert!(matches!(f.verify(), Err(IrError::PhiIncomingMismatch { .. })));
    }

    #[test]
    fn test_append_after_terminator_rejected() {
        let (mut f, _, exit, ..) = self_loop();
        assert_eq!(f.append_inst(exit, InstKind::Alloca), Err(IrError::BlockTerminated(exit)));
    }

    #[test]
    fn test_insert_before_terminator() {
        let (mut f, _, exit, ..) = self_loop();
        let id = f.insert_before_terminator(exit, InstKind::Alloca).unwrap();
        assert_eq!(f.block_insts(exit).unwrap()[0], id);
        f.verify().unwrap();
    }

    #[test]
    fn test_replace_terminator_requires_terminator() {
        let (mut f, _, exit, ..) = self_loop();
        assert_eq!(f.replace_terminator(exit, InstKind::Alloca), Err(IrError::ExpectedTerminator(exit)));
    }
}
