//! Profile-guided brute-force resolution.
//!
//! Enumerates the full Cartesian product of the tunable domains, builds and
//! profiles each candidate, and keeps the one with the lowest mean latency.
//! Per-candidate build or execution failures are recorded and skipped; only
//! a search with zero surviving candidates fails.

use crate::ResolveError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use taskforge_ir::{lower, MemoryScope, ResolvedModule, UnresolvedModule, Worker};
use taskforge_runtime::TensorValue;
use tracing::{info, warn};

/// Implementation-defined ceiling on the candidate count. Callers with larger
/// designs must pre-shrink their domains or fall back to random resolution.
pub const DEFAULT_SEARCH_CEILING: u128 = 4096;

#[derive(Debug, Clone)]
pub struct BruteForceOptions {
    /// Timed invocations per candidate.
    pub repeat: usize,
    /// Unmeasured invocations per candidate before timing starts.
    pub warmup: usize,
    /// Maximum admissible search-space size.
    pub ceiling: u128,
    /// Seed for the representative input data shared by all candidates.
    pub seed: u64,
    /// Where candidate build artifacts land.
    pub output_dir: PathBuf,
}

impl Default for BruteForceOptions {
    fn default() -> Self {
        Self {
            repeat: 10,
            warmup: 1,
            ceiling: DEFAULT_SEARCH_CEILING,
            seed: 1,
            output_dir: std::env::temp_dir().join("taskforge-tune"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub index: usize,
    pub bindings: BTreeMap<String, i64>,
    pub mean_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub module: String,
    pub total_candidates: usize,
    pub failed_candidates: usize,
    pub winner: usize,
    pub winner_mean_ms: f64,
    pub candidates: Vec<CandidateReport>,
}

/// Selection accumulator: strictly-lower mean wins, so the earlier candidate
/// survives a tie. The comparison is the one step that must stay serialized
/// if candidate builds are ever spread across threads.
#[derive(Debug, Default)]
pub struct SearchAccumulator {
    best: Option<(usize, f64)>,
}

impl SearchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate; returns true if it became the new best.
    pub fn offer(&mut self, index: usize, mean_ms: f64) -> bool {
        match self.best {
            Some((_, best_ms)) if mean_ms >= best_ms => false,
            _ => {
                self.best = Some((index, mean_ms));
                true
            }
        }
    }

    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }
}

/// Resolve by exhaustive measurement; the external contract of
/// [`brute_force_resolve`] with the per-candidate outcomes kept for
/// reporting.
pub fn brute_force_search(
    module: &UnresolvedModule,
    opts: &BruteForceOptions,
) -> Result<(ResolvedModule, SearchReport), ResolveError> {
    let size = module
        .search_space_size()
        .unwrap_or(u128::MAX)
        .max(1);
    if size > opts.ceiling {
        return Err(ResolveError::SearchSpaceTooLarge {
            size,
            ceiling: opts.ceiling,
        });
    }
    let total = size as usize;
    let repeat = opts.repeat.max(1);

    // Representative inputs are allocated once and shared by every candidate
    // so allocation cost cannot skew the measurements.
    let scope = match module.worker() {
        Worker::Grid => MemoryScope::Global,
        Worker::Host => MemoryScope::Host,
    };
    let mut args: Vec<TensorValue> = Vec::with_capacity(module.params().len());
    for (position, param) in module.params().iter().enumerate() {
        if position + 1 == module.params().len() {
            args.push(TensorValue::zeros_like(&param.ty, scope));
        } else {
            args.push(TensorValue::randn_like(
                &param.ty,
                scope,
                opts.seed + position as u64,
            ));
        }
    }

    let mut accumulator = SearchAccumulator::new();
    let mut best_module: Option<ResolvedModule> = None;
    let mut candidates = Vec::with_capacity(total);
    let mut failed = 0usize;

    for (index, bindings) in Assignments::new(module).enumerate() {
        match run_candidate(module, bindings.clone(), index, &mut args, opts, repeat) {
            Ok((resolved, mean_ms)) => {
                info!(
                    module = module.name(),
                    candidate = index,
                    mean_ms,
                    "profiled candidate"
                );
                if accumulator.offer(index, mean_ms) {
                    best_module = Some(resolved);
                }
                candidates.push(CandidateReport {
                    index,
                    bindings,
                    mean_ms: Some(mean_ms),
                    error: None,
                });
            }
            Err(err) => {
                warn!(
                    module = module.name(),
                    candidate = index,
                    error = %err,
                    "skipping failed candidate"
                );
                failed += 1;
                candidates.push(CandidateReport {
                    index,
                    bindings,
                    mean_ms: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let (winner, winner_mean_ms) = match accumulator.best() {
        Some(best) => best,
        None => return Err(ResolveError::NoValidCandidate { total }),
    };
    let best_module = best_module.ok_or(ResolveError::NoValidCandidate { total })?;

    info!(
        module = module.name(),
        winner,
        winner_mean_ms,
        failed,
        total,
        "brute-force search finished"
    );
    let report = SearchReport {
        module: module.name().to_string(),
        total_candidates: total,
        failed_candidates: failed,
        winner,
        winner_mean_ms,
        candidates,
    };
    Ok((best_module, report))
}

/// Enumerate, build, and profile every candidate; return the fastest one.
pub fn brute_force_resolve(
    module: &UnresolvedModule,
    opts: &BruteForceOptions,
) -> Result<ResolvedModule, ResolveError> {
    brute_force_search(module, opts).map(|(module, _)| module)
}

fn run_candidate(
    module: &UnresolvedModule,
    bindings: BTreeMap<String, i64>,
    index: usize,
    args: &mut [TensorValue],
    opts: &BruteForceOptions,
    repeat: usize,
) -> Result<(ResolvedModule, f64), ResolveError> {
    let resolved = module.bind(bindings)?;
    let lowered = lower(resolved.clone())?;
    let candidate_dir = opts.output_dir.join(format!("cand-{index}"));
    let artifact = taskforge_backend::build(&lowered, &candidate_dir)?;
    let kernel = artifact
        .kernel(module.name())
        .ok_or_else(|| anyhow::anyhow!("artifact lost entry '{}'", module.name()))?;
    let latencies = kernel.profile(args, repeat, opts.warmup)?;
    let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
    Ok((resolved, mean))
}

/// Odometer over the Cartesian product of the tunable domains, in
/// declaration order; candidate 0 is every knob at its first domain value.
struct Assignments<'a> {
    module: &'a UnresolvedModule,
    counters: Vec<usize>,
    done: bool,
}

impl<'a> Assignments<'a> {
    fn new(module: &'a UnresolvedModule) -> Self {
        Self {
            module,
            counters: vec![0; module.tunables().len()],
            done: false,
        }
    }
}

impl Iterator for Assignments<'_> {
    type Item = BTreeMap<String, i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let tunables = self.module.tunables();
        let assignment = tunables
            .iter()
            .zip(&self.counters)
            .map(|(tunable, &index)| (tunable.name().to_string(), tunable.domain()[index]))
            .collect();

        // Advance like an odometer, last knob fastest.
        self.done = true;
        for (position, counter) in self.counters.iter_mut().enumerate().rev() {
            *counter += 1;
            if *counter < tunables[position].domain().len() {
                self.done = false;
                break;
            }
            *counter = 0;
        }
        if tunables.is_empty() {
            self.done = true;
        }
        Some(assignment)
    }
}
