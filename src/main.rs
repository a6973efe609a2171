//! parloop Command Line Interface
//!
//! Usage:
//!   parloop [OPTIONS] <loops.json>
//!   parloop --help
//!
//! Examples:
//!   parloop loops.json                      # Parallelize, print a report per loop
//!   parloop --emit=task loops.json          # Print the synchronized task bodies
//!   parloop --emit=dot -o dag.dot loops.json
//!   parloop --simulate 4 --args 100 loops.json

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info, trace};
use parloop::codegen::{dependence_graph_to_dot, print_task, sccdag_to_dot};
use parloop::transform::LoopResult;
use parloop::ParallelizerConfig;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// parloop - dependence-driven loop parallelizer
#[derive(Parser, Debug)]
#[command(name = "parloop")]
#[command(author = "parloop Contributors")]
#[command(version)]
#[command(about = "Parallelizes loops with ordered sequential segments", long_about = None)]
struct Cli {
    /// Loop candidates (JSON array)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Configuration file (JSON); flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// What to emit
    #[arg(long, default_value = "report")]
    emit: EmitKind,

    /// Parallelize loops that need no synchronization
    #[arg(long)]
    force: bool,

    /// Never merge SCCs to honour the segment limit
    #[arg(long)]
    no_scc_merge: bool,

    /// Maximum number of sequential segments per loop
    #[arg(long, value_name = "N")]
    max_segments: Option<usize>,

    /// Treat control dependences as part of dependence cycles
    #[arg(long)]
    control_cycles: bool,

    /// Run every parallelized loop on N worker threads
    #[arg(long, value_name = "N")]
    simulate: Option<usize>,

    /// User arguments passed to simulated loops
    #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true)]
    args: Vec<i64>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitKind {
    /// Human-readable report per loop
    Report,
    /// Reports as JSON
    Json,
    /// SCCDAG listing
    Sccdag,
    /// SCCDAG (DOT format)
    Dot,
    /// Dependence graph (DOT format)
    Deps,
    /// Synchronized task bodies
    Task,
    /// All stages (for debugging)
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("parloop v{}", parloop::VERSION);
    debug!("Input file: {:?}", cli.input);

    let loops = parloop::load_loops(&cli.input)?;
    let config = build_config(&cli)?;
    debug!("Parallelizer config: {:?}", config);

    info!("Parallelizing {} loops...", loops.len());
    let results = parloop::parallelize(&loops, config.clone())?;

    let mut output = render(&results, cli.emit)?;

    if cli.simulate.is_some() {
        output.push_str(&simulate_all(&results, config.num_threads, &cli.args, config.step_limit)?);
    }

    write_output(&cli.output, &output)
}

fn build_config(cli: &Cli) -> Result<ParallelizerConfig> {
    let mut config = match &cli.config {
        Some(path) => ParallelizerConfig::from_json_file(path)?,
        None => ParallelizerConfig::default(),
    };

    // Override with CLI flags
    if cli.force {
        config.force_parallelization = true;
    }
    if cli.no_scc_merge {
        config.enable_scc_merge = false;
    }
    if cli.max_segments.is_some() {
        config.max_sequential_segments = cli.max_segments;
    }
    if cli.control_cycles {
        config.ignore_control_for_cycles = false;
    }
    if let Some(threads) = cli.simulate {
        config.num_threads = threads;
    }
    config.verbosity = cli.verbose;

    Ok(config)
}

fn render(results: &[LoopResult], emit: EmitKind) -> Result<String> {
    if emit == EmitKind::Json {
        let reports: Vec<_> = results.iter().map(|r| &r.report).collect();
        return serde_json::to_string_pretty(&reports).context("Failed to serialize reports");
    }

    let all = emit == EmitKind::All;
    let mut out = String::new();
    for result in results {
        if all || emit == EmitKind::Report {
            write!(out, "{}", result.report)?;
        }
        if let (Some(graph), Some(dag)) = (&result.graph, &result.dag) {
            if all || emit == EmitKind::Sccdag {
                writeln!(out, "// SCCDAG of {}", result.report.loop_name)?;
                for id in dag.topological_order() {
                    out.push_str(&dag.scc(id)?.describe(graph, 8));
                }
            }
            if all || emit == EmitKind::Deps {
                out.push_str(&dependence_graph_to_dot(graph)?);
            }
            if all || emit == EmitKind::Dot {
                out.push_str(&sccdag_to_dot(graph, dag)?);
            }
        }
        if all || emit == EmitKind::Task {
            if let Some(task) = &result.task {
                writeln!(out, "// task of {}", result.report.loop_name)?;
                out.push_str(&print_task(task)?);
            }
        }
    }
    Ok(out)
}

fn simulate_all(results: &[LoopResult], threads: usize, args: &[i64], step_limit: u64) -> Result<String> {
    let hook = |tid: usize, name: &str, call_args: &[i64]| -> i64 {
        trace!("worker {} calls @{}{:?}", tid, name, call_args);
        0
    };
    let mut out = String::new();
    for result in results {
        let Some(stats) = parloop::simulate(result, threads, args, Some(&hook), step_limit)? else {
            continue;
        };
        writeln!(out, "Simulation of {} on {} workers:", result.report.loop_name, threads)?;
        for s in &stats {
            writeln!(
                out,
                "  worker {}: {} steps, {} waits, {} signals",
                s.thread_id, s.steps, s.waits, s.signals
            )?;
        }
    }
    Ok(out)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content).with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
