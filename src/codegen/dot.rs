//! Graphviz export.

use crate::analysis::{DependenceGraph, DependenceKind, SccDag, SccType};
use crate::utils::errors::DependenceError;
use crate::utils::pretty::{escape_label, CodeFormatter};

/// Render a dependence graph: one node per operation, one edge per live
/// dependence. Control edges are dashed, loop-carried edges red.
pub fn dependence_graph_to_dot(graph: &DependenceGraph) -> Result<String, DependenceError> {
    let mut f = CodeFormatter::new("  ");
    f.open("digraph dependences");
    f.line("node [shape=ellipse];");
    for n in graph.node_ids() {
        f.line(format!("{} [label=\"{}\"];", n, graph.op_of(n)?));
    }
    for (_, dep) in graph.edges() {
        let mut attrs = vec![format!("label=\"{}\"", escape_label(&edge_label(dep.kind, dep.is_memory)))];
        if dep.kind == DependenceKind::Control {
            attrs.push("style=dashed".to_string());
        }
        if dep.is_loop_carried {
            attrs.push("color=red".to_string());
        }
        f.line(format!("{} -> {} [{}];", dep.source, dep.target, attrs.join(", ")));
    }
    for (a, b) in graph.forced_pairs() {
        f.line(format!("{} -> {} [dir=none, style=dotted];", a, b));
    }
    f.close();
    Ok(f.finish())
}

fn edge_label(kind: DependenceKind, is_memory: bool) -> String {
    match (kind, is_memory) {
        (DependenceKind::Control, _) => "ctrl".to_string(),
        (k, true) => format!("{} mem", k.short_name()),
        (k, false) => k.short_name().to_string(),
    }
}

/// Render an SCCDAG: one box per SCC listing its operations, one edge per
/// pair of connected SCCs labelled with the number of dependences.
pub fn sccdag_to_dot(graph: &DependenceGraph, dag: &SccDag) -> Result<String, DependenceError> {
    let mut f = CodeFormatter::new("  ");
    f.open("digraph sccdag");
    f.line("node [shape=box];");
    for (id, scc) in dag.sccs() {
        let mut label = format!("{} ({:?})\n", id, scc.scc_type());
        for op in scc.ops() {
            label.push_str(&format!("{}\n", op));
        }
        let style = match scc.scc_type() {
            SccType::Sequential => ", style=filled, fillcolor=lightsalmon",
            SccType::Independent => "",
        };
        f.line(format!("{} [label=\"{}\"{}];", id, escape_label(&label), style));
    }
    for ((from, to), edges) in dag.inter_edges() {
        let carried = edges
            .iter()
            .filter_map(|&e| graph.edge(e).ok())
            .any(|dep| dep.is_loop_carried);
        let color = if carried { ", color=red" } else { "" };
        f.line(format!("{} -> {} [label=\"{}\"{}];", from, to, edges.len(), color));
    }
    f.close();
    Ok(f.finish())
}
