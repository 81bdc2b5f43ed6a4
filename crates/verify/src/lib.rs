//! Cross-worker equivalence checking.
//!
//! Runs the same task through the Grid and Host implementation paths on
//! identical inputs and compares the outputs element by element. A passing
//! check ties the whole pipeline together: implementer dispatch, tunable
//! resolution, lowering, and both execution backends have to agree.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use taskforge_backend::CompiledArtifact;
use taskforge_implement::ImplementerRegistry;
use taskforge_ir::{lower, MemoryScope, Task, Worker};
use taskforge_resolve::random_resolve;
use taskforge_runtime::TensorValue;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Maximum tolerated absolute difference per element.
    pub tolerance: f64,
    /// Seed for tunable resolution on both variants.
    pub seed: u64,
    /// Implementer to use for the Grid variant; default dispatch when None.
    pub grid_impl: Option<String>,
    /// Implementer to use for the Host variant; default dispatch when None.
    pub host_impl: Option<String>,
    /// Where the two build artifacts land.
    pub output_dir: PathBuf,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            seed: 1,
            grid_impl: None,
            host_impl: None,
            output_dir: std::env::temp_dir().join("taskforge-verify"),
        }
    }
}

/// First element where the two outputs disagree beyond the tolerance.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "outputs diverge at {index:?}: grid={grid}, host={host} (tolerance {tolerance})"
)]
pub struct MismatchError {
    pub index: Vec<usize>,
    pub grid: f32,
    pub host: f32,
    pub tolerance: f64,
}

/// Scan two equally-shaped tensors for the first element whose absolute
/// difference exceeds `tolerance`.
pub fn first_mismatch(
    grid: &TensorValue,
    host: &TensorValue,
    tolerance: f64,
) -> Option<MismatchError> {
    grid.as_slice()
        .iter()
        .zip(host.as_slice())
        .position(|(&g, &h)| ((g - h).abs() as f64) > tolerance)
        .map(|offset| {
            let index = grid.unravel(offset);
            MismatchError {
                index,
                grid: grid.as_slice()[offset],
                host: host.as_slice()[offset],
                tolerance,
            }
        })
}

/// Run `task` on both workers with the given host-resident inputs and check
/// that the outputs agree within `opts.tolerance`.
///
/// `inputs` must match the task's input tensors in order; the output buffer
/// is allocated here. On disagreement the returned error downcasts to
/// [`MismatchError`].
pub fn verify_equivalence(
    registry: &ImplementerRegistry,
    task: &Task,
    inputs: &[TensorValue],
    opts: &VerifyOptions,
) -> Result<()> {
    if inputs.len() != task.inputs().len() {
        bail!(
            "task '{}' expects {} inputs, got {}",
            task.name(),
            task.inputs().len(),
            inputs.len()
        );
    }

    let grid_out = run_variant(registry, task, inputs, Worker::Grid, opts)
        .context("grid variant failed")?;
    let host_out = run_variant(registry, task, inputs, Worker::Host, opts)
        .context("host variant failed")?;

    match first_mismatch(&grid_out, &host_out, opts.tolerance) {
        None => {
            info!(
                task = task.name(),
                elements = grid_out.num_elements(),
                tolerance = opts.tolerance,
                "grid and host outputs agree"
            );
            Ok(())
        }
        Some(mismatch) => Err(mismatch.into()),
    }
}

fn run_variant(
    registry: &ImplementerRegistry,
    task: &Task,
    inputs: &[TensorValue],
    worker: Worker,
    opts: &VerifyOptions,
) -> Result<TensorValue> {
    let (impl_name, scope, subdir) = match worker {
        Worker::Grid => (opts.grid_impl.as_deref(), MemoryScope::Global, "grid"),
        Worker::Host => (opts.host_impl.as_deref(), MemoryScope::Host, "host"),
    };
    let retargeted = task.retargeted(worker);
    let module = registry.implement(&retargeted, impl_name)?;
    debug!(task = task.name(), ?worker, module = module.name(), "implemented variant");

    let resolved = random_resolve(&module, Some(opts.seed))?;
    let lowered = lower(resolved)?;
    let artifact: CompiledArtifact =
        taskforge_backend::build(&lowered, &opts.output_dir.join(subdir))?;
    let kernel = artifact
        .kernel(task.name())
        .with_context(|| format!("artifact lost entry '{}'", task.name()))?;

    let mut args: Vec<TensorValue> = inputs
        .iter()
        .map(|input| match worker {
            Worker::Grid => input.to_device(),
            Worker::Host => input.clone(),
        })
        .collect();
    let output_ty = retargeted
        .param_types()
        .last()
        .context("task has no output parameter")?;
    args.push(TensorValue::zeros_like(output_ty, scope));
    kernel.invoke(&mut args)?;

    let output = args.pop().context("output buffer vanished")?;
    Ok(match worker {
        Worker::Grid => output.to_host(),
        Worker::Host => output,
    })
}
