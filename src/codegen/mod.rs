//! Textual output for task bodies and analysis results.
//!
//! - `ir_printer`: readable listing of a function or synchronized task
//! - `dot`: Graphviz export of dependence graphs and SCCDAGs

pub mod ir_printer;
pub mod dot;

pub use dot::{dependence_graph_to_dot, sccdag_to_dot};
pub use ir_printer::{format_inst, print_function, print_task};
