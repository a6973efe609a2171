//! Intermediate representation for task bodies.
//!
//! - `inst`: identifiers, operands and instruction kinds
//! - `function`: the CFG arena with its edit operations and verifier
//! - `builder`: cursor-based construction
//! - `loops`: natural-loop structure (latches, exit blocks)
//! - `task`: outlined loop bodies with live-ins and sync bookkeeping

pub mod inst;
pub mod function;
pub mod builder;
pub mod loops;
pub mod task;

pub use inst::{BinaryOp, BlockId, Callee, ComparePred, InstData, InstId, InstKind, Value};
pub use function::{BlockData, Function};
pub use builder::FunctionBuilder;
pub use loops::LoopStructure;
pub use task::{abi, Task};
