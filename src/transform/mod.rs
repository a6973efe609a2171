//! Loop transformations for parallel execution.
//!
//! - `segment`: sequential segments and their entry/exit points
//! - `partition`: assignment of sequential SCCs to segments
//! - `synchronization`: wait/signal insertion into a task body
//! - `pipeline`: the multi-loop driver

pub mod segment;
pub mod partition;
pub mod synchronization;
pub mod pipeline;

pub use partition::SegmentPartitioner;
pub use pipeline::{LoopCandidate, LoopResult, ParallelizationReport, Parallelizer};
pub use segment::SequentialSegment;
pub use synchronization::{insert_synchronization, SyncReport, SynchronizationInserter};
