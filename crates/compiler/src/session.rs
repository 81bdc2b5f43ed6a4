//! Compilation session orchestration.
//!
//! A [`Session`] carries the implementer registry and the resolution
//! strategy, and drives a task through implement, resolve, lower, and build
//! in one call.

use anyhow::{Context, Result};
use std::path::PathBuf;
use taskforge_backend::CompiledArtifact;
use taskforge_implement::ImplementerRegistry;
use taskforge_ir::{lower, ResolvedModule, Task, UnresolvedModule};
use taskforge_resolve::{
    brute_force_search, random_resolve, BruteForceOptions, SearchReport,
};
use tracing::info;

/// How tunable parameters get pinned to concrete values.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// One uniform draw per tunable; `None` seeds from entropy.
    Random { seed: Option<u64> },
    /// Exhaustive profile-guided search over the whole tunable space.
    BruteForce(BruteForceOptions),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Force a specific implementer by name; default dispatch when None.
    pub impl_name: Option<String>,
    pub strategy: Strategy,
    /// Where build artifacts land.
    pub output_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            impl_name: None,
            strategy: Strategy::Random { seed: None },
            output_dir: std::env::temp_dir().join("taskforge-build"),
        }
    }
}

pub struct CompileOutcome {
    pub artifact: CompiledArtifact,
    pub resolved: ResolvedModule,
    /// Present when the session tuned via brute force.
    pub report: Option<SearchReport>,
}

pub struct Session {
    registry: ImplementerRegistry,
    options: SessionOptions,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_registry(ImplementerRegistry::with_default_implementers(), options)
    }

    pub fn with_registry(registry: ImplementerRegistry, options: SessionOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &ImplementerRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Pick an implementer for the task and produce its tunable module.
    pub fn implement(&self, task: &Task) -> Result<UnresolvedModule> {
        let module = self
            .registry
            .implement(task, self.options.impl_name.as_deref())?;
        info!(
            task = task.name(),
            module = module.name(),
            schedule = ?module.schedule(),
            tunables = module.tunables().len(),
            "task implemented"
        );
        Ok(module)
    }

    /// Pin tunables according to the session strategy.
    pub fn resolve(
        &self,
        module: &UnresolvedModule,
    ) -> Result<(ResolvedModule, Option<SearchReport>)> {
        match &self.options.strategy {
            Strategy::Random { seed } => Ok((random_resolve(module, *seed)?, None)),
            Strategy::BruteForce(opts) => {
                let (resolved, report) = brute_force_search(module, opts)?;
                Ok((resolved, Some(report)))
            }
        }
    }

    /// Full pipeline: implement, resolve, lower, build.
    pub fn compile(&self, task: &Task) -> Result<CompileOutcome> {
        let module = self.implement(task)?;
        let (resolved, report) = self.resolve(&module)?;
        let lowered = lower(resolved.clone()).context("lowering failed")?;
        let artifact = taskforge_backend::build(&lowered, &self.options.output_dir)?;
        info!(
            task = task.name(),
            output_dir = %self.options.output_dir.display(),
            "compilation finished"
        );
        Ok(CompileOutcome {
            artifact,
            resolved,
            report,
        })
    }
}
