//! Interpreter for task bodies.
//!
//! One [`Interpreter`] is shared by every worker of a parallel region;
//! each call to [`Interpreter::run`] executes the body for one worker with
//! its own frame. Values are 64-bit integers. Stack cells created by
//! `alloca` are addressed by negative handles so they can never be
//! confused with coordination slot addresses.

use super::SyncRing;
use crate::ir::{abi, BinaryOp, BlockId, Callee, InstId, InstKind, Task, Value};
use crate::utils::errors::{IrError, RuntimeError};
use log::{debug, trace};
use serde::Serialize;

/// Callback for calls to external functions: `(thread_id, name, args)`.
pub type ExternalHook = dyn Fn(usize, &str, &[i64]) -> i64 + Sync;

/// Default bound on executed instructions per worker.
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// Execution counters of one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStats {
    pub thread_id: usize,
    pub waits: u64,
    pub signals: u64,
    pub steps: u64,
    pub return_value: Option<i64>,
}

/// Executes a synchronized task body against a [`SyncRing`].
pub struct Interpreter<'a> {
    task: &'a Task,
    ring: &'a SyncRing,
    step_limit: u64,
    hook: Option<&'a ExternalHook>,
}

/// Per-worker state.
struct Frame {
    args: Vec<i64>,
    values: Vec<Option<i64>>,
    cells: Vec<i64>,
}

impl Frame {
    fn eval(&self, value: Value) -> Result<i64, RuntimeError> {
        match value {
            Value::Inst(id) => self
                .values
                .get(id.index())
                .copied()
                .flatten()
                .ok_or(RuntimeError::UndefinedValue(id)),
            Value::Arg(n) => self.args.get(n as usize).copied().ok_or(RuntimeError::UnknownArg(n)),
            Value::Const(c) => Ok(c),
        }
    }

    fn define(&mut self, id: InstId, value: i64) {
        if let Some(slot) = self.values.get_mut(id.index()) {
            *slot = Some(value);
        }
    }

    fn alloc_cell(&mut self) -> i64 {
        self.cells.push(0);
        -(self.cells.len() as i64)
    }

    fn cell(&mut self, handle: i64) -> Result<&mut i64, RuntimeError> {
        if handle >= 0 {
            return Err(RuntimeError::BadStackCell(handle));
        }
        let idx = (-(handle + 1)) as usize;
        self.cells.get_mut(idx).ok_or(RuntimeError::BadStackCell(handle))
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(task: &'a Task, ring: &'a SyncRing) -> Self {
        Self { task, ring, step_limit: DEFAULT_STEP_LIMIT, hook: None }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Route external calls to `hook`; without one they return 0.
    pub fn with_hook(mut self, hook: &'a ExternalHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Execute the body as worker `thread_id`.
    ///
    /// The launcher arguments of [`abi`] are prepended to `user_args`.
    pub fn run(&self, thread_id: usize, user_args: &[i64]) -> Result<ThreadStats, RuntimeError> {
        let body = &self.task.body;
        let mut args = Vec::with_capacity(abi::FIRST_USER_ARG as usize + user_args.len());
        args.push(thread_id as i64);
        args.push(self.ring.num_threads() as i64);
        args.push(self.ring.past_base(thread_id));
        args.push(self.ring.future_base(thread_id));
        args.extend_from_slice(user_args);
        if args.len() != body.num_params as usize {
            return Err(RuntimeError::ArgCount { expected: body.num_params, found: args.len() });
        }

        let mut frame = Frame { args, values: vec![None; body.num_insts()], cells: Vec::new() };
        let mut stats = ThreadStats { thread_id, ..Default::default() };
        let mut prev: Option<BlockId> = None;
        let mut bb = body.entry();

        'blocks: loop {
            trace!("worker {} enters {}", thread_id, bb);
            let insts = body.block_insts(bb)?;

            // Merge parameters read their inputs before any of them is written.
            let mut phi_values = Vec::new();
            let mut first = 0;
            for &id in insts {
                let InstKind::Phi { incoming } = body.kind(id)? else { break };
                self.step(&mut stats)?;
                let value = prev
                    .and_then(|from| incoming.iter().find(|(b, _)| *b == from))
                    .map(|(_, v)| *v)
                    .ok_or(RuntimeError::NoIncoming { phi: id, block: prev.unwrap_or(bb) })?;
                phi_values.push((id, frame.eval(value)?));
                first += 1;
            }
            for (id, value) in phi_values {
                frame.define(id, value);
            }

            for &id in &insts[first..] {
                self.step(&mut stats)?;
                match body.kind(id)? {
                    InstKind::Phi { .. } => return Err(IrError::MisplacedPhi { block: bb, inst: id }.into()),
                    InstKind::Binary { op, lhs, rhs } => {
                        let value = binary(*op, frame.eval(*lhs)?, frame.eval(*rhs)?, id)?;
                        frame.define(id, value);
                    }
                    InstKind::Compare { pred, lhs, rhs } => {
                        let value = pred.holds(frame.eval(*lhs)?, frame.eval(*rhs)?) as i64;
                        frame.define(id, value);
                    }
                    InstKind::Alloca => {
                        let handle = frame.alloc_cell();
                        frame.define(id, handle);
                    }
                    InstKind::Load { ptr } => {
                        let handle = frame.eval(*ptr)?;
                        let value = *frame.cell(handle)?;
                        frame.define(id, value);
                    }
                    InstKind::Store { ptr, value } => {
                        let value = frame.eval(*value)?;
                        let handle = frame.eval(*ptr)?;
                        *frame.cell(handle)? = value;
                    }
                    InstKind::SlotAddress { base, offset } => {
                        let value = frame.eval(*base)?.wrapping_add(*offset as i64);
                        frame.define(id, value);
                    }
                    InstKind::Call { callee, args } => {
                        let vals = args.iter().map(|a| frame.eval(*a)).collect::<Result<Vec<_>, _>>()?;
                        let result = match callee {
                            Callee::SegmentWait => {
                                self.ring.wait(slot_arg(&vals)?)?;
                                stats.waits += 1;
                                0
                            }
                            Callee::SegmentSignal => {
                                self.ring.signal(slot_arg(&vals)?)?;
                                stats.signals += 1;
                                0
                            }
                            Callee::External(name) => self.hook.map_or(0, |hook| hook(thread_id, name, &vals)),
                        };
                        frame.define(id, result);
                    }
                    InstKind::Br { target } => {
                        prev = Some(bb);
                        bb = *target;
                        continue 'blocks;
                    }
                    InstKind::CondBr { cond, then_block, else_block } => {
                        prev = Some(bb);
                        bb = if frame.eval(*cond)? != 0 { *then_block } else { *else_block };
                        continue 'blocks;
                    }
                    InstKind::Ret { value } => {
                        stats.return_value = value.map(|v| frame.eval(v)).transpose()?;
                        debug!(
                            "worker {} returned after {} steps ({} waits, {} signals)",
                            thread_id, stats.steps, stats.waits, stats.signals
                        );
                        return Ok(stats);
                    }
                }
            }
            return Err(IrError::MissingTerminator(bb).into());
        }
    }

    fn step(&self, stats: &mut ThreadStats) -> Result<(), RuntimeError> {
        if stats.steps >= self.step_limit {
            return Err(RuntimeError::StepLimitExceeded(self.step_limit));
        }
        stats.steps += 1;
        Ok(())
    }
}

fn slot_arg(vals: &[i64]) -> Result<i64, RuntimeError> {
    vals.first().copied().ok_or(RuntimeError::BadSlotAddress(0))
}

fn binary(op: BinaryOp, lhs: i64, rhs: i64, at: InstId) -> Result<i64, RuntimeError> {
    Ok(match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::Div => {
            if rhs == 0 {
                return Err(RuntimeError::DivisionByZero(at));
            }
            lhs.wrapping_div(rhs)
        }
        BinaryOp::Rem => {
            if rhs == 0 {
                return Err(RuntimeError::DivisionByZero(at));
            }
            lhs.wrapping_rem(rhs)
        }
    })
}
