//! Error types for the parallelizer.
//!
//! This module defines all error types used throughout the framework,
//! organized by the phase that produces them.

use crate::analysis::dependence::{EdgeId, NodeId};
use crate::analysis::sccdag::SccId;
use crate::ir::{BlockId, InstId};
use thiserror::Error;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum ParloopError {
    /// Malformed or inconsistent task-body IR
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    /// Error while building or querying a dependence graph
    #[error("Dependence graph error: {0}")]
    Dependence(#[from] DependenceError),

    /// Error while building, merging or querying an SCCDAG
    #[error("SCCDAG error: {0}")]
    SccDag(#[from] SccDagError),

    /// Error during synchronization insertion
    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),

    /// Error while executing a task body
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems in a [`Function`](crate::ir::Function).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("unknown instruction {0}")]
    UnknownInst(InstId),

    /// The instruction exists but is not placed in any block
    #[error("instruction {0} is not placed in a block")]
    DetachedInst(InstId),

    #[error("block {0} does not end in a terminator")]
    MissingTerminator(BlockId),

    #[error("block {0} is already terminated")]
    BlockTerminated(BlockId),

    #[error("terminator {inst} is not the last instruction of {block}")]
    MisplacedTerminator { block: BlockId, inst: InstId },

    #[error("merge parameter {inst} follows a non-phi instruction in {block}")]
    MisplacedPhi { block: BlockId, inst: InstId },

    /// A merge parameter's incoming blocks differ from the predecessors
    #[error("merge parameter {phi} in {block} names {found:?} but predecessors are {expected:?}")]
    PhiIncomingMismatch {
        block: BlockId,
        phi: InstId,
        expected: Vec<BlockId>,
        found: Vec<BlockId>,
    },

    #[error("cannot split a block at merge parameter {0}")]
    SplitAtPhi(InstId),

    #[error("replacement terminator for {0} is not a terminator")]
    ExpectedTerminator(BlockId),

    #[error("instruction {0} is not a merge parameter")]
    NotAPhi(InstId),

    /// Block membership recorded on the instruction disagrees with the block
    #[error("placement of instruction {0} is inconsistent")]
    CorruptPlacement(InstId),

    #[error("block {0} is not the header of a loop")]
    NotALoop(BlockId),
}

/// Errors from the dependence graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependenceError {
    #[error("unknown dependence node {0}")]
    UnknownNode(NodeId),

    #[error("unknown dependence edge {0}")]
    UnknownEdge(EdgeId),

    #[error("operation {0} is not in the dependence graph")]
    UnknownOp(InstId),

    #[error("a component needs at least one node")]
    EmptyComponent,
}

/// Errors from the SCCDAG.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SccDagError {
    /// The SCC was never created or has been merged away
    #[error("unknown or merged SCC {0}")]
    UnknownScc(SccId),

    #[error("cannot merge an empty set of SCCs")]
    EmptyMerge,

    #[error("node {0} belongs to no SCC")]
    UnmappedNode(NodeId),

    #[error(transparent)]
    Dependence(#[from] DependenceError),
}

/// Errors from synchronization insertion.
///
/// Fatal variants are caller contract breaches; the others mean that the
/// loop cannot be synchronized and should be left untransformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("synchronization expects exactly one task, got {0}")]
    MultipleTasks(usize),

    #[error("no task to synchronize")]
    NoTask,

    #[error("task live-ins are read-only after synchronization")]
    TaskSealed,

    /// Segment identifiers must be dense and zero-based
    #[error("segment at position {expected} has identifier {found}")]
    SegmentIdMismatch { expected: u32, found: u32 },

    #[error("task entry block {0} is also the loop header")]
    EntryIsLoopHeader(BlockId),

    #[error("segment {segment}: program point {point} is not in the task body")]
    PointNotInBody { segment: u32, point: InstId },

    #[error("segment {segment}: program point {point} is outside the loop")]
    PointOutsideLoop { segment: u32, point: InstId },

    #[error("segment {segment}: an iteration can leave {block} with segment code still ahead but never reached")]
    SegmentAbandoned { segment: u32, block: BlockId },

    #[error("segment {segment}: an iteration can reach latch {latch} without entering the segment")]
    SegmentBypassed { segment: u32, latch: BlockId },

    #[error("task body is malformed: {0}")]
    Ir(#[from] IrError),
}

impl SyncError {
    /// Check if this error is a contract breach that must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::MultipleTasks(_)
                | SyncError::NoTask
                | SyncError::TaskSealed
                | SyncError::SegmentIdMismatch { .. }
        )
    }
}

/// Errors while interpreting a task body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),

    #[error("value {0} used before definition")]
    UndefinedValue(InstId),

    #[error("argument {0} out of range")]
    UnknownArg(u32),

    #[error("expected {expected} arguments, got {found}")]
    ArgCount { expected: u32, found: usize },

    #[error("{0} is not a stack cell")]
    BadStackCell(i64),

    #[error("address {0:#x} is not a coordination slot")]
    BadSlotAddress(i64),

    #[error("division by zero at {0}")]
    DivisionByZero(InstId),

    #[error("merge parameter {phi} has no incoming value for {block}")]
    NoIncoming { phi: InstId, block: BlockId },

    #[error("ring needs at least one thread")]
    EmptyRing,

    /// Another worker failed and released every waiter
    #[error("coordination ring was poisoned by a failing worker")]
    RingPoisoned,

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("malformed task body: {0}")]
    Ir(#[from] IrError),
}
