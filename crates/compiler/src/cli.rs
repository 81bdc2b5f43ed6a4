//! CLI wiring for the taskforge developer toolkit.

use crate::session::{Session, SessionOptions, Strategy};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use taskforge_ir::{ops, MemoryScope, Task, Worker};
use taskforge_resolve::BruteForceOptions;
use taskforge_runtime::TensorValue;
use taskforge_verify::{verify_equivalence, VerifyOptions};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "taskforge", about = "taskforge developer toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum OpArg {
    Matmul,
    VectorAdd,
}

#[derive(clap::Args, Clone, Debug)]
pub struct TaskArgs {
    #[arg(long, value_enum, default_value = "matmul")]
    pub op: OpArg,
    /// Rows of the output (or vector length for vector-add).
    #[arg(long, default_value_t = 256)]
    pub n: usize,
    /// Columns of the output.
    #[arg(long, default_value_t = 256)]
    pub m: usize,
    /// Reduction extent.
    #[arg(long, default_value_t = 256)]
    pub k: usize,
}

impl TaskArgs {
    pub fn build(&self) -> Result<Task> {
        let task = match self.op {
            OpArg::Matmul => ops::matmul(self.n, self.m, self.k)?,
            OpArg::VectorAdd => ops::vector_add(self.n)?,
        };
        Ok(task)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Implement a task and print its tunable module.
    EmitIr {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long)]
        impl_name: Option<String>,
    },
    /// Compile with random resolution and run once on random inputs.
    Run {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long)]
        impl_name: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Exhaustively profile the tunable space and report the winner.
    Tune {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long)]
        impl_name: Option<String>,
        #[arg(long, default_value_t = 10)]
        repeat: usize,
        #[arg(long, default_value_t = 1)]
        warmup: usize,
        #[arg(long, default_value_t = 4096)]
        ceiling: u128,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Write the full per-candidate report as JSON.
        #[arg(long)]
        dump_report: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Check that the Grid and Host paths compute the same result.
    Verify {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long, default_value_t = 1e-5)]
        tolerance: f64,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long)]
        grid_impl: Option<String>,
        #[arg(long)]
        host_impl: Option<String>,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::EmitIr { task, impl_name } => {
            let task = task.build()?;
            let session = Session::new(SessionOptions {
                impl_name,
                ..SessionOptions::default()
            });
            let module = session.implement(&task)?;
            println!("{}", module.to_text());
        }
        Command::Run {
            task,
            impl_name,
            seed,
            output_dir,
        } => {
            let task = task.build()?;
            let mut options = SessionOptions {
                impl_name,
                strategy: Strategy::Random { seed },
                ..SessionOptions::default()
            };
            if let Some(dir) = output_dir {
                options.output_dir = dir;
            }
            let session = Session::new(options);
            let outcome = session.compile(&task)?;
            let kernel = outcome
                .artifact
                .kernel(task.name())
                .context("artifact lost its entry point")?;

            let mut args = random_args(&task, seed.unwrap_or(0));
            let latencies = kernel.profile(&mut args, 3, 1)?;
            let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
            info!(task = task.name(), mean_ms = mean, "run finished");
            println!("{}: mean latency {mean:.3} ms over 3 runs", task.name());
            println!("bindings: {:?}", outcome.resolved.bindings());
        }
        Command::Tune {
            task,
            impl_name,
            repeat,
            warmup,
            ceiling,
            seed,
            dump_report,
            output_dir,
        } => {
            let task = task.build()?;
            let tune_dir = output_dir
                .unwrap_or_else(|| std::env::temp_dir().join("taskforge-tune"));
            let session = Session::new(SessionOptions {
                impl_name,
                strategy: Strategy::BruteForce(BruteForceOptions {
                    repeat,
                    warmup,
                    ceiling,
                    seed,
                    output_dir: tune_dir.clone(),
                }),
                output_dir: tune_dir,
            });
            let outcome = session.compile(&task)?;
            let report = outcome
                .report
                .context("brute-force compile produced no report")?;
            println!(
                "{}: winner candidate {} at {:.3} ms ({} tried, {} failed)",
                task.name(),
                report.winner,
                report.winner_mean_ms,
                report.total_candidates,
                report.failed_candidates
            );
            println!("bindings: {:?}", outcome.resolved.bindings());
            if let Some(path) = dump_report {
                fs::write(path, serde_json::to_string_pretty(&report)?)?;
            }
        }
        Command::Verify {
            task,
            tolerance,
            seed,
            grid_impl,
            host_impl,
        } => {
            let task = task.build()?;
            let inputs = host_inputs(&task, seed);
            let opts = VerifyOptions {
                tolerance,
                seed,
                grid_impl,
                host_impl,
                ..VerifyOptions::default()
            };
            let session = Session::new(SessionOptions::default());
            verify_equivalence(session.registry(), &task, &inputs, &opts)?;
            println!("{}: grid and host agree within {tolerance}", task.name());
        }
    }
    Ok(())
}

fn host_inputs(task: &Task, seed: u64) -> Vec<TensorValue> {
    task.inputs()
        .iter()
        .enumerate()
        .map(|(i, input)| {
            TensorValue::randn(&input.shape, input.dtype, MemoryScope::Host, seed + i as u64)
        })
        .collect()
}

fn random_args(task: &Task, seed: u64) -> Vec<TensorValue> {
    let scope = match task.worker() {
        Worker::Grid => MemoryScope::Global,
        Worker::Host => MemoryScope::Host,
    };
    let mut args: Vec<TensorValue> = Vec::with_capacity(task.param_types().len());
    for (i, ty) in task.param_types().iter().enumerate() {
        if i + 1 == task.param_types().len() {
            args.push(TensorValue::zeros_like(ty, scope));
        } else {
            args.push(TensorValue::randn_like(ty, scope, seed + i as u64));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_a_tune_invocation() {
        let cli = Cli::try_parse_from([
            "taskforge",
            "tune",
            "--op",
            "matmul",
            "--n",
            "64",
            "--m",
            "64",
            "--k",
            "64",
            "--repeat",
            "3",
        ])
        .unwrap();
        match cli.command {
            Command::Tune { task, repeat, .. } => {
                assert_eq!(task.n, 64);
                assert_eq!(repeat, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_defaults_to_matmul_256() {
        let cli = Cli::try_parse_from(["taskforge", "emit-ir"]).unwrap();
        match cli.command {
            Command::EmitIr { task, .. } => {
                assert!(matches!(task.op, OpArg::Matmul));
                assert_eq!((task.n, task.m, task.k), (256, 256, 256));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn random_args_place_output_last_and_zeroed() {
        let task = ops::matmul(4, 4, 4).unwrap();
        let args = random_args(&task, 9);
        assert_eq!(args.len(), 3);
        assert!(args[2].as_slice().iter().all(|&v| v == 0.0));
        assert_eq!(args[0].scope(), MemoryScope::Global);
    }
}
