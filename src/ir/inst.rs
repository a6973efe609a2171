//! Instructions of the task-body IR.
//!
//! The IR is deliberately small: enough to express a loop body, the
//! merge parameters (phis) that join control flow, stack cells for
//! per-iteration state, and the calls into the synchronization runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a basic block inside a [`Function`](super::Function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Handle of an instruction inside a [`Function`](super::Function).
///
/// Instruction handles are stable: cloning a function keeps them, and
/// moving an instruction between blocks does not renumber it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

impl InstId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Result of an instruction
    Inst(InstId),
    /// Function argument by position
    Arg(u32),
    /// Integer constant
    Const(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Inst(id) => write!(f, "{}", id),
            Value::Arg(n) => write!(f, "$arg{}", n),
            Value::Const(c) => write!(f, "{}", c),
        }
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

/// Integer arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
        }
    }
}

/// Signed integer comparison predicates. Comparisons produce 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparePred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparePred {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            ComparePred::Eq => "eq",
            ComparePred::Ne => "ne",
            ComparePred::Lt => "slt",
            ComparePred::Le => "sle",
            ComparePred::Gt => "sgt",
            ComparePred::Ge => "sge",
        }
    }

    /// Evaluate the predicate.
    pub fn holds(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            ComparePred::Eq => lhs == rhs,
            ComparePred::Ne => lhs != rhs,
            ComparePred::Lt => lhs < rhs,
            ComparePred::Le => lhs <= rhs,
            ComparePred::Gt => lhs > rhs,
            ComparePred::Ge => lhs >= rhs,
        }
    }
}

/// Call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    /// Blocking wait on a slot of the "past" array
    SegmentWait,
    /// Non-blocking signal on a slot of the "future" array
    SegmentSignal,
    /// Any other function, resolved by the embedder
    External(String),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::SegmentWait => write!(f, "@segment_wait"),
            Callee::SegmentSignal => write!(f, "@segment_signal"),
            Callee::External(name) => write!(f, "@{}", name),
        }
    }
}

/// The operation performed by an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstKind {
    /// Control-flow merge parameter: one incoming value per predecessor.
    Phi { incoming: Vec<(BlockId, Value)> },
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    Compare { pred: ComparePred, lhs: Value, rhs: Value },
    /// One 64-bit stack cell, live for the whole invocation.
    Alloca,
    Load { ptr: Value },
    Store { ptr: Value, value: Value },
    /// `base + offset` reinterpreted as a pointer into a coordination array.
    SlotAddress { base: Value, offset: u64 },
    Call { callee: Callee, args: Vec<Value> },
    Br { target: BlockId },
    CondBr { cond: Value, then_block: BlockId, else_block: BlockId },
    Ret { value: Option<Value> },
}

impl InstKind {
    /// Check if this instruction ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Blocks this instruction may transfer control to.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr { then_block, else_block, .. } => {
                if then_block == else_block {
                    vec![*then_block]
                } else {
                    vec![*then_block, *else_block]
                }
            }
            _ => Vec::new(),
        }
    }

    /// All operands read by this instruction.
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Phi { incoming } => incoming.iter().map(|(_, v)| *v).collect(),
            InstKind::Binary { lhs, rhs, .. } | InstKind::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Alloca => Vec::new(),
            InstKind::Load { ptr } => vec![*ptr],
            InstKind::Store { ptr, value } => vec![*ptr, *value],
            InstKind::SlotAddress { base, .. } => vec![*base],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Br { .. } => Vec::new(),
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Ret { value } => value.iter().copied().collect(),
        }
    }

    /// Check if this is a call to the given runtime primitive.
    pub fn calls(&self, target: &Callee) -> bool {
        matches!(self, InstKind::Call { callee, .. } if callee == target)
    }
}

/// An instruction together with its current placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstData {
    pub kind: InstKind,
    /// Owning block, `None` once the instruction has been removed
    pub block: Option<BlockId>,
}
