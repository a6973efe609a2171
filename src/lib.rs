//! # parloop - Automatic Loop Parallelization
//!
//! Dependence analysis and synchronization for loops whose iterations are
//! spread round-robin over a ring of worker threads:
//! - Dependence graphs over loop operations
//! - Strongly connected components and the acyclic SCCDAG
//! - Sequential segments for the SCCs that must keep iteration order
//! - Wait/signal insertion into the per-worker task body
//! - A reference ring runtime that executes synchronized task bodies
//!
//! ## Architecture
//!
//! ```text
//! LoopCandidate → DependenceGraph → SccDag → SequentialSegments → Task + sync → Runtime
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use parloop::prelude::*;
//!
//! let loops = parloop::load_loops("loops.json")?;
//! let results = parloop::parallelize(&loops, ParallelizerConfig::default())?;
//! for result in &results {
//!     println!("{}", result.report);
//! }
//! ```

#![warn(clippy::all)]

pub mod ir;
pub mod analysis;
pub mod transform;
pub mod runtime;
pub mod codegen;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::analysis::{
        Dependence, DependenceGraph, DependenceKind, EdgeId, Hazard, NodeId, OpDependence, Scc, SccDag, SccId,
        SccType,
    };
    pub use crate::ir::{abi, BlockId, Callee, Function, FunctionBuilder, InstId, InstKind, LoopStructure, Task, Value};
    pub use crate::runtime::{run_parallel, SyncRing, ThreadStats};
    pub use crate::transform::{
        insert_synchronization, LoopCandidate, LoopResult, ParallelizationReport, Parallelizer, SequentialSegment,
    };
    pub use crate::utils::errors::*;
    pub use crate::ParallelizerConfig;
}

use anyhow::{Context, Result};
use runtime::{ExternalHook, SyncRing, ThreadStats};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use transform::{LoopCandidate, LoopResult, Parallelizer};

/// Configuration for the parallelization pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelizerConfig {
    /// Verbosity level (0-3)
    pub verbosity: u8,
    /// Parallelize loops even when no SCC needs ordering
    pub force_parallelization: bool,
    /// Merge SCCs when more segments are needed than allowed
    pub enable_scc_merge: bool,
    /// Upper bound on sequential segments per loop
    pub max_sequential_segments: Option<usize>,
    /// Classify SCCs by their data cycles only
    pub ignore_control_for_cycles: bool,
    /// Ring size used when simulating a parallelized loop
    pub num_threads: usize,
    /// Per-worker instruction budget of the simulator
    pub step_limit: u64,
}

impl Default for ParallelizerConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            force_parallelization: false,
            enable_scc_merge: true,
            max_sequential_segments: None,
            ignore_control_for_cycles: true,
            num_threads: 4,
            step_limit: runtime::interp::DEFAULT_STEP_LIMIT,
        }
    }
}

impl ParallelizerConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_force_parallelization(mut self, force: bool) -> Self {
        self.force_parallelization = force;
        self
    }

    pub fn with_scc_merge(mut self, enable: bool) -> Self {
        self.enable_scc_merge = enable;
        self
    }

    pub fn with_max_sequential_segments(mut self, max: Option<usize>) -> Self {
        self.max_sequential_segments = max;
        self
    }

    pub fn with_ignore_control_for_cycles(mut self, ignore: bool) -> Self {
        self.ignore_control_for_cycles = ignore;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse loop candidates from JSON text (an array of loops).
pub fn parse_loops(json: &str) -> Result<Vec<LoopCandidate>> {
    serde_json::from_str(json).context("Failed to parse loop candidates")
}

/// Read loop candidates from a JSON file.
pub fn load_loops(path: impl AsRef<Path>) -> Result<Vec<LoopCandidate>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read input file: {:?}", path))?;
    parse_loops(&text).with_context(|| format!("Invalid loop file: {:?}", path))
}

/// Run the full pipeline over `loops`.
pub fn parallelize(loops: &[LoopCandidate], config: ParallelizerConfig) -> Result<Vec<LoopResult>> {
    Parallelizer::new(config).run(loops)
}

/// Execute a parallelized loop on `num_threads` workers.
///
/// Returns `Ok(None)` for a loop that was left untransformed.
pub fn simulate(
    result: &LoopResult,
    num_threads: usize,
    user_args: &[i64],
    hook: Option<&ExternalHook>,
    step_limit: u64,
) -> Result<Option<Vec<ThreadStats>>> {
    let Some(task) = &result.task else {
        return Ok(None);
    };
    let ring = SyncRing::new(num_threads, result.segments.len())?;
    let stats = runtime::run_parallel(task, &ring, user_args, hook, step_limit)
        .with_context(|| format!("Simulation of loop {} failed", result.report.loop_name))?;
    Ok(Some(stats))
}
