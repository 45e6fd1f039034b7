//! cppstep - compile and step C++ teaching-subset programs
//!
//! Usage: cppstep check a.cpp b.cpp
//!        cppstep run main.cpp --trace

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cpp_stepper::frontend::source::SourceFile;
use cpp_stepper::program::Program;
use cpp_stepper::runtime::{SimEvent, Simulation, Status};
use cpp_stepper::NoteReporter;

#[derive(Parser, Debug)]
#[command(name = "cppstep")]
#[command(version)]
#[command(about = "Compiler and steppable simulator for a C++ teaching subset", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and link without running; print every note
    Check {
        /// Translation units, one per file
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Compile, link, and simulate the program
    Run {
        /// Translation units, one per file
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print every simulation event to stderr
        #[arg(long)]
        trace: bool,

        /// Abort after this many steps (guards runaway loops)
        #[arg(long, default_value = "1000000")]
        steps: u64,
    },
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(2);
        }
    }
}

fn run(args: &Args) -> anyhow::Result<i32> {
    match &args.command {
        Command::Check { files } => {
            let program = load_program(files)?;
            report_notes(&program);
            Ok(i32::from(!program.is_runnable()))
        }
        Command::Run {
            files,
            trace,
            steps,
        } => {
            let program = load_program(files)?;
            report_notes(&program);
            if !program.is_runnable() {
                eprintln!("program has errors and cannot run");
                return Ok(1);
            }
            simulate(&program, *trace, *steps)
        }
    }
}

fn load_program(files: &[PathBuf]) -> anyhow::Result<Program> {
    let mut sources = Vec::new();
    let mut unit_names = Vec::new();
    for path in files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let name = path.display().to_string();
        sources.push(SourceFile::new(name.clone(), text));
        unit_names.push(name);
    }
    Ok(Program::new(sources, &unit_names))
}

fn report_notes(program: &Program) {
    let mut reporter = NoteReporter::new();
    reporter.add_sources(&program.sources);
    reporter.report_all(program.notes().notes());
}

fn simulate(program: &Program, trace: bool, max_steps: u64) -> anyhow::Result<i32> {
    let mut sim = Simulation::new(program);
    let stdin = io::stdin();

    loop {
        let status = sim.step();
        for event in sim.drain_events() {
            if trace {
                eprintln!("[{:>6}] {event:?}", sim.step_count());
            }
            if let SimEvent::Output(text) = event {
                print!("{text}");
                io::stdout().flush().ok();
            }
        }

        match status {
            Status::Ready => {
                if sim.step_count() >= max_steps {
                    eprintln!("stopped after {max_steps} steps");
                    return Ok(1);
                }
            }
            Status::AwaitingInput => {
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    eprintln!("program wants input but stdin is closed");
                    return Ok(1);
                }
                sim.provide_input(&line);
            }
            Status::Finished { exit_code } => {
                return Ok(exit_code as i32);
            }
            Status::Aborted => {
                eprintln!("program aborted");
                return Ok(1);
            }
        }
    }
}
