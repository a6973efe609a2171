//! Multi-loop parallelization driver.
//!
//! Each [`LoopCandidate`] goes through the same steps: dependence graph,
//! SCCDAG and classification, sequential segments, task creation and
//! synchronization insertion. A loop that cannot be handled is skipped
//! with a warning and the driver moves on; only contract breaches in
//! synchronization ([`SyncError::is_fatal`]) abort the whole run.

use super::partition::SegmentPartitioner;
use super::segment::SequentialSegment;
use super::synchronization::{insert_synchronization, SyncReport};
use crate::analysis::{DependenceGraph, DependenceGraphSummary, OpDependence, SccDag};
use crate::ir::{BlockId, Function, InstId, LoopStructure, Task, Value};
use crate::utils::errors::{DependenceError, IrError, SyncError};
use crate::ParallelizerConfig;
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A loop offered for parallelization, with its dependence information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopCandidate {
    /// Name used in logs and reports
    pub name: String,
    /// Outlined loop body; its entry block precedes the loop
    pub body: Function,
    /// Loop header inside `body`
    pub header: BlockId,
    /// Operations of the loop; all instructions of the loop blocks when empty
    #[serde(default)]
    pub ops: Vec<InstId>,
    /// Dependences reported by the alias/control analysis
    #[serde(default)]
    pub dependences: Vec<OpDependence>,
    /// Operation pairs that must share an SCC
    #[serde(default)]
    pub forced: Vec<(InstId, InstId)>,
    /// Original live-in values and their counterparts in `body`
    #[serde(default)]
    pub live_ins: Vec<(Value, Value)>,
}

impl LoopCandidate {
    pub fn new(name: impl Into<String>, body: Function, header: BlockId) -> Self {
        Self {
            name: name.into(),
            body,
            header,
            ops: Vec::new(),
            dependences: Vec::new(),
            forced: Vec::new(),
            live_ins: Vec::new(),
        }
    }

    pub fn with_dependences(mut self, dependences: Vec<OpDependence>) -> Self {
        self.dependences = dependences;
        self
    }

    pub fn with_forced(mut self, a: InstId, b: InstId) -> Self {
        self.forced.push((a, b));
        self
    }

    pub fn with_live_in(mut self, original: Value, internal: Value) -> Self {
        self.live_ins.push((original, internal));
        self
    }

    /// Operations in scope for the dependence graph.
    pub fn loop_ops(&self, lp: &LoopStructure) -> Result<Vec<InstId>, IrError> {
        if !self.ops.is_empty() {
            return Ok(self.ops.clone());
        }
        let mut ops = Vec::new();
        for &bb in &lp.blocks {
            ops.extend_from_slice(self.body.block_insts(bb)?);
        }
        Ok(ops)
    }
}

/// Outcome of one loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParallelizationReport {
    pub loop_name: String,
    pub parallelized: bool,
    /// Why the loop was left untransformed
    pub skip_reason: Option<String>,
    pub dependences: Option<DependenceGraphSummary>,
    pub num_sccs: usize,
    pub sequential_sccs: usize,
    pub segments: usize,
    pub sync: Option<SyncReport>,
}

impl fmt::Display for ParallelizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Loop {}:", self.loop_name)?;
        match &self.skip_reason {
            Some(reason) => writeln!(f, "  Skipped: {}", reason)?,
            None => writeln!(f, "  Parallelized: {}", self.parallelized)?,
        }
        writeln!(f, "  SCCs: {} ({} sequential)", self.num_sccs, self.sequential_sccs)?;
        writeln!(f, "  Sequential segments: {}", self.segments)?;
        if let Some(sync) = &self.sync {
            writeln!(
                f,
                "  Inserted: {} waits, {} signals, {} loop-exit signals",
                sync.waits, sync.signals, sync.exit_signals
            )?;
        }
        Ok(())
    }
}

/// Everything produced for one loop.
#[derive(Debug)]
pub struct LoopResult {
    pub report: ParallelizationReport,
    pub graph: Option<DependenceGraph>,
    pub dag: Option<SccDag>,
    pub segments: Vec<SequentialSegment>,
    /// The synchronized task, present only when the loop was parallelized
    pub task: Option<Task>,
}

impl LoopResult {
    fn new(name: &str) -> Self {
        Self {
            report: ParallelizationReport { loop_name: name.to_string(), ..Default::default() },
            graph: None,
            dag: None,
            segments: Vec::new(),
            task: None,
        }
    }
}

/// The multi-loop driver.
#[derive(Debug, Clone, Default)]
pub struct Parallelizer {
    config: ParallelizerConfig,
}

impl Parallelizer {
    pub fn new(config: ParallelizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParallelizerConfig {
        &self.config
    }

    /// Parallelize every loop, one at a time.
    pub fn run(&self, loops: &[LoopCandidate]) -> Result<Vec<LoopResult>> {
        info!("Parallelizer: {} loops to parallelize", loops.len());
        let mut results = Vec::with_capacity(loops.len());
        for candidate in loops {
            let result = self
                .parallelize_loop(candidate)
                .with_context(|| format!("Fatal error while parallelizing loop {}", candidate.name))?;
            results.push(result);
        }
        let done = results.iter().filter(|r| r.report.parallelized).count();
        info!("Parallelizer: parallelized {} of {} loops", done, loops.len());
        Ok(results)
    }

    /// Parallelize one loop. Returns `Err` only for fatal errors; a loop
    /// that cannot be handled comes back with a skip reason.
    pub fn parallelize_loop(&self, candidate: &LoopCandidate) -> Result<LoopResult> {
        info!("Parallelizer: try to parallelize loop {}", candidate.name);
        let mut result = LoopResult::new(&candidate.name);
        match self.try_parallelize(candidate, &mut result) {
            Ok(()) => {
                result.report.parallelized = true;
                Ok(result)
            }
            Err(e) if e.downcast_ref::<SyncError>().map_or(false, SyncError::is_fatal) => Err(e),
            Err(e) => {
                warn!("Parallelizer: skipping loop {}: {:#}", candidate.name, e);
                result.report.skip_reason = Some(format!("{:#}", e));
                result.task = None;
                Ok(result)
            }
        }
    }

    fn try_parallelize(&self, candidate: &LoopCandidate, result: &mut LoopResult) -> Result<()> {
        candidate.body.verify().context("Loop body does not verify")?;

        let mut task = Task::new(candidate.body.clone(), candidate.header);
        for &(original, internal) in &candidate.live_ins {
            task.add_live_in(original, internal)?;
        }
        let lp = task.loop_structure().context("Header does not start a loop")?;

        let ops = candidate.loop_ops(&lp)?;
        let mut graph = DependenceGraph::from_loop(&ops, &candidate.dependences);
        for &(a, b) in &candidate.forced {
            let na = graph.node_of(a).ok_or(DependenceError::UnknownOp(a))?;
            let nb = graph.node_of(b).ok_or(DependenceError::UnknownOp(b))?;
            graph.force_together(na, nb)?;
        }
        let summary = graph.summary();
        if self.config.verbosity >= 2 {
            info!("{}", summary);
        }
        result.report.dependences = Some(summary);

        let mut dag = SccDag::build(&graph)?;
        let sequential = dag.classify_sccs(&graph, self.config.ignore_control_for_cycles);
        result.report.num_sccs = dag.len();
        result.report.sequential_sccs = sequential;

        if sequential == 0 && !self.config.force_parallelization {
            result.graph = Some(graph);
            result.dag = Some(dag);
            bail!("no sequential SCCs: nothing to synchronize");
        }

        let segments = SegmentPartitioner::new()
            .with_max_segments(self.config.max_sequential_segments)
            .with_scc_merge(self.config.enable_scc_merge)
            .partition(&graph, &mut dag, &task, &lp)?;
        result.report.segments = segments.len();
        result.report.num_sccs = dag.len();
        debug!("loop {}: {} segments over {} SCCs", candidate.name, segments.len(), dag.len());

        result.graph = Some(graph);
        result.dag = Some(dag);

        let mut tasks = vec![task];
        let sync = insert_synchronization(&mut tasks, &segments, &lp.exit_blocks)?;
        result.report.sync = Some(sync);
        result.segments = segments;
        result.task = tasks.pop();
        Ok(())
    }
}
