//! Tasks: the outlined, per-worker body of a parallelized loop.

use super::function::Function;
use super::inst::{BlockId, InstId, Value};
use super::loops::LoopStructure;
use crate::utils::errors::SyncError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Argument positions every task body receives from the launcher.
pub mod abi {
    /// Index of the executing worker in the ring
    pub const THREAD_ID: u32 = 0;
    /// Number of workers in the ring
    pub const NUM_THREADS: u32 = 1;
    /// Base address of this worker's "past" array
    pub const PAST_ARRAY: u32 = 2;
    /// Base address of this worker's "future" array
    pub const FUTURE_ARRAY: u32 = 3;
    /// First argument available to the loop itself
    pub const FIRST_USER_ARG: u32 = 4;
    /// Byte stride between two segment slots of a coordination array
    pub const CACHE_LINE_SIZE: u64 = 64;
}

/// A parallel-executable loop body.
#[derive(Debug, Clone)]
pub struct Task {
    /// The cloned body
    pub body: Function,
    /// Loop header inside `body`
    pub header: BlockId,
    /// Pointer to the past array
    pub past_array: Value,
    /// Pointer to the future array
    pub future_array: Value,
    live_ins: HashMap<Value, Value>,
    waits: BTreeSet<InstId>,
    signals: BTreeSet<InstId>,
    sealed: bool,
}

impl Task {
    /// Wrap an already outlined body following the [`abi`] argument layout.
    pub fn new(body: Function, header: BlockId) -> Self {
        Self {
            body,
            header,
            past_array: Value::Arg(abi::PAST_ARRAY),
            future_array: Value::Arg(abi::FUTURE_ARRAY),
            live_ins: HashMap::new(),
            waits: BTreeSet::new(),
            signals: BTreeSet::new(),
            sealed: false,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        self.body.entry()
    }

    /// Loop structure of the body around its header.
    pub fn loop_structure(&self) -> Result<LoopStructure, crate::utils::errors::IrError> {
        LoopStructure::analyze(&self.body, self.header)
    }

    /// Register the clone of an original live-in value.
    pub fn add_live_in(&mut self, original: Value, internal: Value) -> Result<(), SyncError> {
        if self.sealed {
            return Err(SyncError::TaskSealed);
        }
        self.live_ins.insert(original, internal);
        Ok(())
    }

    pub fn is_original_live_in(&self, value: &Value) -> bool {
        self.live_ins.contains_key(value)
    }

    /// Clone of an original live-in, if registered.
    pub fn clone_of_live_in(&self, original: &Value) -> Option<Value> {
        self.live_ins.get(original).copied()
    }

    pub fn original_live_ins(&self) -> HashSet<Value> {
        self.live_ins.keys().copied().collect()
    }

    /// Wait calls inserted by synchronization.
    pub fn waits(&self) -> &BTreeSet<InstId> {
        &self.waits
    }

    /// Signal calls inserted by synchronization.
    pub fn signals(&self) -> &BTreeSet<InstId> {
        &self.signals
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn record_wait(&mut self, id: InstId) {
        self.waits.insert(id);
    }

    pub(crate) fn record_signal(&mut self, id: InstId) {
        self.signals.insert(id);
    }

    /// Make the live-in map read-only.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_task() -> Task {
        let mut body = Function::new("task", abi::FIRST_USER_ARG);
        let entry = body.entry();
        body.append_inst(entry, super::super::inst::InstKind::Ret { value: None }).unwrap();
        Task::new(body, entry)
    }

    #[test]
    fn test_live_ins() {
        let mut task = empty_task();
        task.add_live_in(Value::Arg(7), Value::Arg(abi::FIRST_USER_ARG)).unwrap();
        assert!(task.is_original_live_in(&Value::Arg(7)));
        assert_eq!(task.clone_of_live_in(&Value::Arg(7)), Some(Value::Arg(abi::FIRST_USER_ARG)));
        assert_eq!(task.clone_of_live_in(&Value::Arg(8)), None);
        assert_eq!(task.original_live_ins().len(), 1);
    }

    #[test]
    fn test_sealed_task_rejects_live_ins() {
        let mut task = empty_task();
        task.seal();
        assert_eq!(task.add_live_in(Value::Arg(1), Value::Arg(5)), Err(SyncError::TaskSealed));
    }
}
