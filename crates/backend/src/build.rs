//! Compilation of resolved modules into in-process kernels.
//!
//! The Grid hierarchy is simulated: thread blocks map to rayon tasks, threads
//! within a block run sequentially. The resolution engine only observes
//! wall-clock latency, so nothing above this boundary depends on how the
//! kernel actually runs.

use crate::exec::{contraction_coeffs, eval_body, OperandCoeffs};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use taskforge_ir::{
    row_major_strides, DataType, EntrySignature, MemoryScope, ParamSpec, ResolvedModule, Schedule,
    Worker,
};
use taskforge_runtime::TensorValue;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("module '{0}' has no packed entry signature; run the lowering pipeline first")]
    MissingEntry(String),

    #[error("dtype {dtype} of parameter '{param}' is not executable by this backend")]
    UnsupportedDataType { param: String, dtype: &'static str },

    #[error("schedule {schedule} cannot be built for worker '{worker}'")]
    UnsupportedSchedule {
        schedule: &'static str,
        worker: &'static str,
    },

    #[error("binding '{0}' missing from resolved module")]
    MissingBinding(&'static str),

    #[error("knob {knob}={value} is not a valid value")]
    InvalidKnob { knob: &'static str, value: i64 },

    #[error("tile knob {knob}={tile} exceeds problem extent {extent}")]
    TileExceedsExtent {
        knob: &'static str,
        tile: i64,
        extent: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to serialize build manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Executable lowering of one schedule, with all knob values baked in.
#[derive(Debug)]
enum KernelPlan {
    HostLoops,
    GridNaive {
        block_size: usize,
    },
    GridSplit {
        m: usize,
        n: usize,
        k: usize,
        lhs: OperandCoeffs,
        rhs: OperandCoeffs,
        tile_m: usize,
        tile_n: usize,
        tile_k: usize,
        unroll: usize,
    },
}

/// One compiled entry point: validates arguments against the packed
/// signature, executes, and profiles.
#[derive(Debug)]
pub struct CompiledKernel {
    signature: EntrySignature,
    worker: Worker,
    module: ResolvedModule,
    plan: KernelPlan,
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &EntrySignature {
        &self.signature
    }

    /// Run the kernel. Arguments follow the entry signature order; the last
    /// one is the output buffer, written in place.
    pub fn invoke(&self, args: &mut [TensorValue]) -> Result<()> {
        self.check_args(args)?;
        let (output, inputs) = args
            .split_last_mut()
            .context("entry point expects at least one argument")?;

        let mut buffers: HashMap<&str, (&[f32], &[usize])> = HashMap::new();
        for (param, value) in self.signature.params.iter().zip(inputs.iter()) {
            buffers.insert(param.name.as_str(), (value.as_slice(), &param.ty.strides));
        }

        let out_param = self
            .signature
            .params
            .last()
            .context("entry point has no output parameter")?;

        match &self.plan {
            KernelPlan::HostLoops => self.run_loops(output, &buffers, &out_param.ty.strides, None),
            KernelPlan::GridNaive { block_size } => {
                self.run_loops(output, &buffers, &out_param.ty.strides, Some(*block_size))
            }
            KernelPlan::GridSplit {
                m,
                n,
                k,
                lhs,
                rhs,
                tile_m,
                tile_n,
                tile_k,
                unroll,
            } => {
                let lhs_data = buffers
                    .get(lhs.tensor.as_str())
                    .map(|(data, _)| *data)
                    .context("missing contraction lhs buffer")?;
                let rhs_data = buffers
                    .get(rhs.tensor.as_str())
                    .map(|(data, _)| *data)
                    .context("missing contraction rhs buffer")?;
                run_grid_split(
                    output.as_mut_slice(),
                    lhs_data,
                    rhs_data,
                    lhs,
                    rhs,
                    *m,
                    *n,
                    *k,
                    *tile_m,
                    *tile_n,
                    *tile_k,
                    *unroll,
                );
                Ok(())
            }
        }
    }

    /// Invoke `repeat` times after `warmup` unmeasured calls; returns the
    /// per-call wall-clock latency in milliseconds.
    pub fn profile(&self, args: &mut [TensorValue], repeat: usize, warmup: usize) -> Result<Vec<f64>> {
        for _ in 0..warmup {
            self.invoke(args)?;
        }
        let mut latencies = Vec::with_capacity(repeat);
        for _ in 0..repeat {
            let start = Instant::now();
            self.invoke(args)?;
            latencies.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(latencies)
    }

    fn check_args(&self, args: &[TensorValue]) -> Result<()> {
        if args.len() != self.signature.params.len() {
            bail!(
                "entry '{}' expects {} arguments, got {}",
                self.signature.name,
                self.signature.params.len(),
                args.len()
            );
        }
        let expected_scope = match self.worker {
            Worker::Grid => MemoryScope::Global,
            Worker::Host => MemoryScope::Host,
        };
        for (param, value) in self.signature.params.iter().zip(args.iter()) {
            if value.dtype() != param.ty.dtype {
                bail!(
                    "argument '{}' has dtype {}, expected {}",
                    param.name,
                    value.dtype().element_type(),
                    param.ty.dtype.element_type()
                );
            }
            if value.shape() != param.ty.shape.as_slice() {
                bail!(
                    "argument '{}' has shape {:?}, expected {:?}",
                    param.name,
                    value.shape(),
                    param.ty.shape
                );
            }
            if value.scope() != expected_scope {
                bail!(
                    "argument '{}' lives in {} memory but worker '{}' expects {}",
                    param.name,
                    value.scope(),
                    self.worker,
                    expected_scope
                );
            }
        }
        Ok(())
    }

    /// Generic per-output-element execution: sequential for the host worker,
    /// block-parallel for the naive grid schedule.
    fn run_loops(
        &self,
        output: &mut TensorValue,
        buffers: &HashMap<&str, (&[f32], &[usize])>,
        out_strides: &[usize],
        block_size: Option<usize>,
    ) -> Result<()> {
        let compute = self.module.compute();
        let axes: Vec<&str> = compute.axes.iter().map(String::as_str).collect();
        let out = output.as_mut_slice();

        let element = |offset: usize| -> Result<f32> {
            let mut env: Vec<(&str, usize)> = Vec::with_capacity(axes.len() + 1);
            let mut rem = offset;
            for (axis, &stride) in axes.iter().zip(out_strides.iter()) {
                let stride = stride.max(1);
                env.push((axis, rem / stride));
                rem %= stride;
            }
            Ok(eval_body(&compute.body, &mut env, buffers)? as f32)
        };

        match block_size {
            None => {
                for (offset, slot) in out.iter_mut().enumerate() {
                    *slot = element(offset)?;
                }
                Ok(())
            }
            Some(block) => {
                out.par_chunks_mut(block)
                    .enumerate()
                    .try_for_each(|(block_idx, chunk)| {
                        let base = block_idx * block;
                        for (lane, slot) in chunk.iter_mut().enumerate() {
                            *slot = element(base + lane)?;
                        }
                        Ok::<(), anyhow::Error>(())
                    })
            }
        }
    }
}

/// Callable artifact produced by [`build`]; entry points are keyed by task
/// name.
#[derive(Debug)]
pub struct CompiledArtifact {
    output_dir: PathBuf,
    entries: HashMap<String, CompiledKernel>,
}

impl CompiledArtifact {
    pub fn kernel(&self, name: &str) -> Option<&CompiledKernel> {
        self.entries.get(name)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[derive(Serialize)]
struct BuildManifest<'a> {
    name: &'a str,
    worker: &'a str,
    schedule: &'a str,
    bindings: &'a BTreeMap<String, i64>,
    params: &'a [ParamSpec],
}

/// Compile a lowered module into a callable artifact, persisting a manifest
/// under `output_dir` keyed by task name.
pub fn build(module: &ResolvedModule, output_dir: &Path) -> Result<CompiledArtifact, BuildError> {
    let entry = module
        .entry()
        .cloned()
        .ok_or_else(|| BuildError::MissingEntry(module.name().to_string()))?;

    for param in module.params() {
        if param.ty.dtype != DataType::F32 {
            return Err(BuildError::UnsupportedDataType {
                param: param.name.clone(),
                dtype: param.ty.dtype.element_type(),
            });
        }
    }

    let plan = plan_schedule(module)?;

    fs::create_dir_all(output_dir)?;
    let manifest = BuildManifest {
        name: module.name(),
        worker: module.worker().as_str(),
        schedule: module.schedule().as_str(),
        bindings: module.bindings(),
        params: module.params(),
    };
    let manifest_path = output_dir.join(format!("{}.json", module.name()));
    fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)?;
    debug!(path = %manifest_path.display(), "wrote build manifest");

    let kernel = CompiledKernel {
        signature: entry,
        worker: module.worker(),
        module: module.clone(),
        plan,
    };
    info!(
        entry = module.name(),
        schedule = module.schedule().as_str(),
        worker = module.worker().as_str(),
        "built kernel"
    );

    let mut entries = HashMap::new();
    entries.insert(module.name().to_string(), kernel);
    Ok(CompiledArtifact {
        output_dir: output_dir.to_path_buf(),
        entries,
    })
}

fn plan_schedule(module: &ResolvedModule) -> Result<KernelPlan, BuildError> {
    let schedule = module.schedule();
    let worker = module.worker();
    match (schedule, worker) {
        (Schedule::HostLoops, Worker::Host) => Ok(KernelPlan::HostLoops),
        (Schedule::GridNaive, Worker::Grid) => {
            let block_size = binding(module, "block_size")?;
            if block_size <= 0 {
                return Err(BuildError::InvalidKnob {
                    knob: "block_size",
                    value: block_size,
                });
            }
            Ok(KernelPlan::GridNaive {
                block_size: block_size as usize,
            })
        }
        (Schedule::GridSplit, Worker::Grid) => plan_grid_split(module),
        _ => Err(BuildError::UnsupportedSchedule {
            schedule: schedule.as_str(),
            worker: worker.as_str(),
        }),
    }
}

fn plan_grid_split(module: &ResolvedModule) -> Result<KernelPlan, BuildError> {
    let spec = module
        .contraction()
        .ok_or(BuildError::UnsupportedSchedule {
            schedule: Schedule::GridSplit.as_str(),
            worker: module.worker().as_str(),
        })?;
    let shape = &module.compute().shape;
    let out_param = match module.params().last() {
        Some(param) if shape.len() == 2 => param,
        _ => {
            return Err(BuildError::UnsupportedSchedule {
                schedule: Schedule::GridSplit.as_str(),
                worker: module.worker().as_str(),
            })
        }
    };
    // The tiled writer walks the output row by row.
    if out_param.ty.strides != row_major_strides(&out_param.ty.shape) {
        return Err(BuildError::UnsupportedSchedule {
            schedule: Schedule::GridSplit.as_str(),
            worker: module.worker().as_str(),
        });
    }

    let (m, n) = (shape[0], shape[1]);
    let k = spec.reduce_extent;

    let tile_m = tile(module, "tile_m", m)?;
    let tile_n = tile(module, "tile_n", n)?;
    let tile_k = tile(module, "tile_k", k)?;
    let unroll = binding(module, "unroll")?;
    if unroll <= 0 {
        return Err(BuildError::InvalidKnob {
            knob: "unroll",
            value: unroll,
        });
    }

    let lhs = contraction_coeffs(&spec.lhs, module.params()).ok_or(
        BuildError::UnsupportedSchedule {
            schedule: Schedule::GridSplit.as_str(),
            worker: module.worker().as_str(),
        },
    )?;
    let rhs = contraction_coeffs(&spec.rhs, module.params()).ok_or(
        BuildError::UnsupportedSchedule {
            schedule: Schedule::GridSplit.as_str(),
            worker: module.worker().as_str(),
        },
    )?;

    Ok(KernelPlan::GridSplit {
        m,
        n,
        k,
        lhs,
        rhs,
        tile_m,
        tile_n,
        tile_k,
        unroll: unroll as usize,
    })
}

fn binding(module: &ResolvedModule, knob: &'static str) -> Result<i64, BuildError> {
    module.binding(knob).ok_or(BuildError::MissingBinding(knob))
}

fn tile(module: &ResolvedModule, knob: &'static str, extent: usize) -> Result<usize, BuildError> {
    let value = binding(module, knob)?;
    if value <= 0 {
        return Err(BuildError::InvalidKnob { knob, value });
    }
    if value as usize > extent {
        return Err(BuildError::TileExceedsExtent {
            knob,
            tile: value,
            extent,
        });
    }
    Ok(value as usize)
}

#[allow(clippy::too_many_arguments)]
fn run_grid_split(
    out: &mut [f32],
    lhs: &[f32],
    rhs: &[f32],
    lhs_map: &OperandCoeffs,
    rhs_map: &OperandCoeffs,
    m: usize,
    n: usize,
    k: usize,
    tile_m: usize,
    tile_n: usize,
    tile_k: usize,
    unroll: usize,
) {
    // One rayon task per tile_m-row band of the output; j/k tiles run
    // sequentially inside the band, like threads inside a block.
    out.par_chunks_mut(tile_m * n)
        .enumerate()
        .for_each(|(band, rows)| {
            let i0 = band * tile_m;
            let band_rows = rows.len() / n;
            rows.fill(0.0);
            for j0 in (0..n).step_by(tile_n) {
                let j_max = (j0 + tile_n).min(n);
                for p0 in (0..k).step_by(tile_k) {
                    let p_max = (p0 + tile_k).min(k);
                    for r in 0..band_rows {
                        let i = i0 + r;
                        for j in j0..j_max {
                            let mut acc = 0.0f32;
                            let mut p = p0;
                            while p + unroll <= p_max {
                                for u in 0..unroll {
                                    let q = p + u;
                                    acc += lhs[lhs_map.offset(i, j, q)]
                                        * rhs[rhs_map.offset(i, j, q)];
                                }
                                p += unroll;
                            }
                            while p < p_max {
                                acc += lhs[lhs_map.offset(i, j, p)] * rhs[rhs_map.offset(i, j, p)];
                                p += 1;
                            }
                            rows[r * n + j] += acc;
                        }
                    }
                }
            }
        });
}
