//! Analysis passes for loop parallelization.
//!
//! - `dependence`: the dependence graph over loop operations
//! - `scc`: local views of strongly connected components
//! - `sccdag`: the condensed, acyclic SCC graph with ordering queries
//! - `dominators`: dominance within a single loop iteration

pub mod dependence;
pub mod scc;
pub mod sccdag;
pub mod dominators;

pub use dependence::{
    Dependence, DependenceGraph, DependenceGraphSummary, DependenceKind, EdgeId, Hazard, NodeId, OpDependence,
};
pub use dominators::IterationDominators;
pub use scc::{Scc, SccDescription, SccType};
pub use sccdag::{SccDag, SccId};

use anyhow::{Context, Result};

/// Build the dependence graph of a loop and condense it into a classified SCCDAG.
pub fn analyze_loop(ops: &[crate::ir::InstId], deps: &[OpDependence], ignore_control: bool) -> Result<(DependenceGraph, SccDag)> {
    let graph = DependenceGraph::from_loop(ops, deps);
    let mut dag = SccDag::build(&graph).context("Failed to build the SCCDAG")?;
    dag.classify_sccs(&graph, ignore_control);
    Ok((graph, dag))
}
