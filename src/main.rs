use std::path::PathBuf;
use std::process::exit;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use crest::concolic::trace::write_inputs_file;
use crest::concolic::{ExecutionTrace, Z3Integration};
use crest::logging::Logger;
use crest::target_info::TargetInfo;

const EXIT_NO_CANDIDATE: i32 = 1;
const EXIT_ERROR: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "crest", about = "Inspect execution traces and generate the next test input.")]
struct Opt {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print the inputs, variables and path of a trace
    Dump {
        /// Trace file, the configured trace path by default
        trace: Option<PathBuf>,
    },
    /// Negate one symbolic branch of a trace and write an input reaching the other side
    Solve {
        /// Trace file, the configured trace path by default
        trace: Option<PathBuf>,

        /// Index of the symbolic branch to negate, the last one by default
        #[arg(short, long)]
        branch: Option<usize>,

        /// Input file to write, the configured input path by default
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Solver timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn dump(trace_path: PathBuf) -> Result<bool> {
    let trace = ExecutionTrace::read_from_file(&trace_path)
        .with_context(|| format!("cannot read trace {}", trace_path.display()))?;
    println!("inputs: {:?}", trace.inputs);
    for (var, ty) in &trace.vars {
        println!("x{} : {}", var, ty);
    }
    for entry in &trace.path {
        match &entry.predicate {
            Some(predicate) => println!("{:>6} {}", entry.branch, predicate),
            None => println!("{:>6}", entry.branch),
        }
    }
    Ok(true)
}

fn solve(trace_path: PathBuf, branch: Option<usize>, output: PathBuf, timeout_ms: Option<u64>) -> Result<bool> {
    let trace = ExecutionTrace::read_from_file(&trace_path)
        .with_context(|| format!("cannot read trace {}", trace_path.display()))?;
    let symbolic = trace.constraints().len();
    if symbolic == 0 {
        warn!("trace has no symbolic branch to negate");
        return Ok(false);
    }
    let k = branch.unwrap_or(symbolic - 1);
    let query = match trace.flip(k) {
        Some(query) => query,
        None => {
            warn!("branch index {} is out of range, the trace has {} symbolic branches", k, symbolic);
            return Ok(false);
        }
    };

    let z3 = Z3Integration::with_timeout(timeout_ms);
    let solution = match z3.incremental_solve(&trace.inputs, &trace.vars, &query) {
        Some(solution) => solution,
        None => {
            info!("no input reaches the other side of symbolic branch {}", k);
            return Ok(false);
        }
    };
    let inputs = trace.next_inputs(&solution);
    write_inputs_file(&output, &inputs).with_context(|| format!("cannot write inputs to {}", output.display()))?;
    info!("wrote {} inputs to {}", inputs.len(), output.display());
    Ok(true)
}

fn run(opt: Opt) -> Result<bool> {
    let target_info = TargetInfo::from_env()?;
    Logger::new(None, target_info.level_filter())?
        .install()
        .map_err(|err| anyhow!("cannot install logger: {}", err))?;

    match opt.command {
        Cmd::Dump { trace } => dump(trace.unwrap_or(target_info.trace_path)),
        Cmd::Solve { trace, branch, output, timeout_ms } => solve(
            trace.unwrap_or_else(|| target_info.trace_path.clone()),
            branch,
            output.unwrap_or_else(|| target_info.input_path.clone()),
            timeout_ms.or(target_info.solver_timeout_ms),
        ),
    }
}

fn main() {
    let opt = Opt::parse();
    match run(opt) {
        Ok(true) => {}
        Ok(false) => exit(EXIT_NO_CANDIDATE),
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit(EXIT_ERROR);
        }
    }
}
