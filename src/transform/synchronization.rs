//! Synchronization insertion for sequential segments.
//!
//! Every worker runs the same task body on a disjoint set of iterations.
//! For each sequential segment the body is rewritten so that:
//! - an iteration-scoped state cell, reset at the top of each iteration,
//!   records whether the segment has been waited for
//! - the first entry point reached in an iteration waits on the segment's
//!   slot in the "past" array and flips the state cell
//! - every exit point, and every loop exit block, signals the segment's
//!   slot in the "future" array
//!
//! Slot addresses are `array base + segment id * CACHE_LINE_SIZE`.
//! Insertion works on a copy of the body and only commits it once every
//! segment has been rewritten and the result verifies.

use super::segment::SequentialSegment;
use crate::ir::abi::CACHE_LINE_SIZE;
use crate::ir::{BlockId, Callee, ComparePred, Function, InstId, InstKind, Task, Value};
use crate::utils::errors::{IrError, SyncError};
use log::{debug, trace};
use serde::Serialize;

/// Counts of what synchronization inserted into a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Segments that received a state cell and slots
    pub segments: usize,
    /// Wait calls inserted at entry points
    pub waits: usize,
    /// Signal calls inserted at exit points
    pub signals: usize,
    /// Signal calls inserted in loop exit blocks
    pub exit_signals: usize,
    /// Decision blocks created, one per entry point
    pub decision_blocks: Vec<BlockId>,
}

/// Per-segment values materialized in the task's entry block.
#[derive(Debug, Clone, Copy)]
struct SegmentSlots {
    id: u32,
    state: Value,
    past: Value,
    future: Value,
}

/// Rewrites a task body so that sequential segments keep their order.
#[derive(Debug)]
pub struct SynchronizationInserter<'a> {
    segments: &'a [SequentialSegment],
    loop_exit_blocks: &'a [BlockId],
}

impl<'a> SynchronizationInserter<'a> {
    pub fn new(segments: &'a [SequentialSegment], loop_exit_blocks: &'a [BlockId]) -> Self {
        Self { segments, loop_exit_blocks }
    }

    /// Synchronize the single task in `tasks`.
    ///
    /// Zero or several tasks, a sealed task and non-dense segment
    /// identifiers are contract breaches ([`SyncError::is_fatal`]). Invalid
    /// program points make the loop unsynchronizable and leave the task
    /// untouched.
    pub fn run(&self, tasks: &mut [Task]) -> Result<SyncReport, SyncError> {
        let count = tasks.len();
        let task = match tasks {
            [task] => task,
            [] => return Err(SyncError::NoTask),
            _ => return Err(SyncError::MultipleTasks(count)),
        };
        if task.is_sealed() {
            return Err(SyncError::TaskSealed);
        }
        for (pos, seg) in self.segments.iter().enumerate() {
            if seg.id() != pos as u32 {
                return Err(SyncError::SegmentIdMismatch { expected: pos as u32, found: seg.id() });
            }
        }
        self.validate(task)?;

        // Resolve program points against the untouched body, before any
        // reset store lands in front of the first non-phi instruction.
        let mut entries = Vec::new();
        let mut exits = Vec::new();
        for seg in self.active_segments() {
            let points: Result<Vec<InstId>, IrError> =
                seg.entries().iter().map(|&p| clamp_to_non_phi(&task.body, p)).collect();
            entries.push(points?);
            let points: Result<Vec<ExitPoint>, IrError> =
                seg.exits().iter().map(|&p| ExitPoint::resolve(&task.body, p)).collect();
            exits.push(points?);
        }

        let mut body = task.body.clone();
        let mut report = SyncReport::default();
        let mut waits = Vec::new();
        let mut signals = Vec::new();

        let slots = self.allocate_slots(task, &mut body)?;
        report.segments = slots.len();

        for (points, slot) in entries.iter().zip(&slots) {
            for &point in points {
                let (decision, wait) = inject_wait(&mut body, point, slot)?;
                report.decision_blocks.push(decision);
                waits.push(wait);
            }
        }
        report.waits = waits.len();

        for (points, slot) in exits.iter().zip(&slots) {
            for &point in points {
                signals.push(inject_signal(&mut body, point, slot)?);
            }
        }
        report.signals = signals.len();

        for &bb in self.loop_exit_blocks {
            for slot in &slots {
                let id = body.insert_before_terminator(bb, signal_call(slot))?;
                signals.push(id);
                report.exit_signals += 1;
            }
        }

        body.verify()?;

        task.body = body;
        for id in waits {
            task.record_wait(id);
        }
        for id in signals {
            task.record_signal(id);
        }
        task.seal();

        debug!(
            "synchronized {} segments: {} waits, {} signals, {} loop-exit signals",
            report.segments, report.waits, report.signals, report.exit_signals
        );
        Ok(report)
    }

    fn active_segments(&self) -> impl Iterator<Item = &'a SequentialSegment> {
        self.segments.iter().filter(|s| !s.is_empty())
    }

    /// Check every precondition that does not need the rewritten body.
    fn validate(&self, task: &Task) -> Result<(), SyncError> {
        let entry = task.entry_block();
        if entry == task.header {
            return Err(SyncError::EntryIsLoopHeader(entry));
        }
        let lp = task.loop_structure()?;
        for seg in self.segments {
            for &point in seg.entries().iter().chain(seg.exits()) {
                let bb = task
                    .body
                    .block_of(point)
                    .map_err(|_| SyncError::PointNotInBody { segment: seg.id(), point })?;
                if !lp.contains(bb) {
                    return Err(SyncError::PointOutsideLoop { segment: seg.id(), point });
                }
            }
        }
        for &bb in self.loop_exit_blocks {
            task.body.terminator(bb)?.ok_or(IrError::MissingTerminator(bb))?;
        }
        Ok(())
    }

    /// Allocate state cells and slot addresses in the entry block and reset
    /// the state cells at the top of the loop header.
    fn allocate_slots(&self, task: &Task, body: &mut Function) -> Result<Vec<SegmentSlots>, SyncError> {
        let entry = task.entry_block();
        let mut slots = Vec::new();
        for seg in self.active_segments() {
            let offset = seg.id() as u64 * CACHE_LINE_SIZE;
            let state = body.insert_before_terminator(entry, InstKind::Alloca)?;
            let past = body.insert_before_terminator(entry, InstKind::SlotAddress { base: task.past_array, offset })?;
            let future =
                body.insert_before_terminator(entry, InstKind::SlotAddress { base: task.future_array, offset })?;
            body.insert_at_first_non_phi(task.header, InstKind::Store { ptr: state.into(), value: Value::Const(0) })?;
            trace!("segment {}: state cell {}, slot offset {}", seg.id(), state, offset);
            slots.push(SegmentSlots { id: seg.id(), state: state.into(), past: past.into(), future: future.into() });
        }
        Ok(slots)
    }
}

/// Synchronize `tasks` against `segments`; see [`SynchronizationInserter::run`].
pub fn insert_synchronization(
    tasks: &mut [Task],
    segments: &[SequentialSegment],
    loop_exit_blocks: &[BlockId],
) -> Result<SyncReport, SyncError> {
    SynchronizationInserter::new(segments, loop_exit_blocks).run(tasks)
}

fn signal_call(slot: &SegmentSlots) -> InstKind {
    InstKind::Call { callee: Callee::SegmentSignal, args: vec![slot.future] }
}

/// Merge parameters cannot host code: move the point to the first
/// non-phi instruction of its block.
fn clamp_to_non_phi(body: &Function, point: InstId) -> Result<InstId, IrError> {
    if !body.kind(point)?.is_phi() {
        return Ok(point);
    }
    let bb = body.block_of(point)?;
    body.first_non_phi(bb)?.ok_or(IrError::MissingTerminator(bb))
}

/// Where a signal goes relative to an existing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitPoint {
    After(InstId),
    Before(InstId),
}

impl ExitPoint {
    /// Signals go right after the exit point; a terminator gets the signal
    /// in front of it, a merge parameter in front of the first non-phi.
    fn resolve(body: &Function, point: InstId) -> Result<Self, IrError> {
        let kind = body.kind(point)?;
        if kind.is_terminator() {
            Ok(ExitPoint::Before(point))
        } else if kind.is_phi() {
            Ok(ExitPoint::Before(clamp_to_non_phi(body, point)?))
        } else {
            Ok(ExitPoint::After(point))
        }
    }
}

/// Guard `point` with a wait:
/// `before -> decision -> {wait -> after | after}`.
fn inject_wait(body: &mut Function, point: InstId, slot: &SegmentSlots) -> Result<(BlockId, InstId), IrError> {
    let before = body.block_of(point)?;
    let after = body.split_block_at(point)?;

    let decision = body.add_block(format!("seg{}.decide", slot.id));
    let wait_bb = body.add_block(format!("seg{}.wait", slot.id));
    body.replace_terminator(before, InstKind::Br { target: decision })?;

    let state = body.append_inst(decision, InstKind::Load { ptr: slot.state })?;
    let not_waited = body.append_inst(
        decision,
        InstKind::Compare { pred: ComparePred::Eq, lhs: state.into(), rhs: Value::Const(0) },
    )?;
    body.append_inst(
        decision,
        InstKind::CondBr { cond: not_waited.into(), then_block: wait_bb, else_block: after },
    )?;

    let wait = body.append_inst(wait_bb, InstKind::Call { callee: Callee::SegmentWait, args: vec![slot.past] })?;
    body.append_inst(wait_bb, InstKind::Store { ptr: slot.state, value: Value::Const(1) })?;
    body.append_inst(wait_bb, InstKind::Br { target: after })?;

    trace!("segment {}: wait {} guards {} in {}", slot.id, wait, point, after);
    Ok((decision, wait))
}

fn inject_signal(body: &mut Function, point: ExitPoint, slot: &SegmentSlots) -> Result<InstId, IrError> {
    let id = match point {
        ExitPoint::Before(at) => body.insert_before(at, signal_call(slot))?,
        ExitPoint::After(at) => body.insert_after(at, signal_call(slot))?,
    };
    trace!("segment {}: signal {} at {:?}", slot.id, id, point);
    Ok(id)
}
