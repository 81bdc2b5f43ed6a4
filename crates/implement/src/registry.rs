//! Implementer trait and ordered dispatch registry.
//!
//! The registry is an explicit object constructed once at startup and passed
//! by reference; registration order matters, first structural + worker match
//! wins. Dispatch performs no compilation, it only produces the unresolved
//! module.

use std::sync::Arc;
use taskforge_ir::{Task, TaskKind, UnresolvedModule, Worker};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ImplementError {
    #[error("no registered implementer accepts task '{task}' ({kind}) on worker '{worker}'")]
    NoApplicableImplementer {
        task: String,
        kind: &'static str,
        worker: &'static str,
    },

    #[error("implementer '{0}' is not registered")]
    NotRegistered(String),

    #[error("implementer '{name}' is not applicable to task '{task}'")]
    NotApplicable { name: String, task: String },
}

/// A stateless strategy that lowers a matching task into an unresolved
/// module. `accepts()` is the coarse dispatch table (computation discriminant
/// + worker variant); `applicable()` is the final structural check.
pub trait Implementer: Send + Sync {
    fn name(&self) -> &'static str;
    fn accepts(&self) -> (&'static [TaskKind], Worker);
    fn applicable(&self, task: &Task) -> bool;
    fn implement(&self, task: &Task) -> Result<UnresolvedModule, ImplementError>;
}

pub type DynImplementer = Arc<dyn Implementer>;

#[derive(Default, Clone)]
pub struct ImplementerRegistry {
    implementers: Vec<DynImplementer>,
}

impl ImplementerRegistry {
    pub fn new() -> Self {
        Self {
            implementers: Vec::new(),
        }
    }

    /// Stock implementers, most specific first.
    pub fn with_default_implementers() -> Self {
        let mut registry = Self::new();
        registry.register(crate::grid::GridSplitImplementer::new());
        registry.register(crate::grid::GridNaiveImplementer::new());
        registry.register(crate::host::HostNaiveImplementer::new());
        registry
    }

    pub fn register<I>(&mut self, implementer: I)
    where
        I: Implementer + 'static,
    {
        self.implementers.push(Arc::new(implementer));
    }

    pub fn implementers(&self) -> &[DynImplementer] {
        &self.implementers
    }

    pub fn find(&self, name: &str) -> Option<DynImplementer> {
        self.implementers
            .iter()
            .find(|implementer| implementer.name() == name)
            .map(Arc::clone)
    }

    /// Dispatch a task to an implementer and produce its unresolved module.
    /// `impl_name` overrides selection by name; otherwise registration order
    /// decides.
    pub fn implement(
        &self,
        task: &Task,
        impl_name: Option<&str>,
    ) -> Result<UnresolvedModule, ImplementError> {
        let implementer = match impl_name {
            Some(name) => {
                let implementer = self
                    .find(name)
                    .ok_or_else(|| ImplementError::NotRegistered(name.to_string()))?;
                if !matches(implementer.as_ref(), task) {
                    return Err(ImplementError::NotApplicable {
                        name: name.to_string(),
                        task: task.name().to_string(),
                    });
                }
                implementer
            }
            None => self
                .implementers
                .iter()
                .find(|implementer| matches(implementer.as_ref(), task))
                .map(Arc::clone)
                .ok_or_else(|| ImplementError::NoApplicableImplementer {
                    task: task.name().to_string(),
                    kind: task.kind().as_str(),
                    worker: task.worker().as_str(),
                })?,
        };
        debug!(
            implementer = implementer.name(),
            task = task.name(),
            worker = task.worker().as_str(),
            "dispatching task"
        );
        implementer.implement(task)
    }
}

fn matches(implementer: &dyn Implementer, task: &Task) -> bool {
    let (kinds, worker) = implementer.accepts();
    worker == task.worker() && kinds.contains(&task.kind()) && implementer.applicable(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridNaiveImplementer, GridSplitImplementer};
    use taskforge_ir::{ops, Worker};

    #[test]
    fn first_registration_order_match_wins() {
        let registry = ImplementerRegistry::with_default_implementers();
        let task = ops::matmul(64, 64, 64).unwrap();
        let module = registry.implement(&task, None).unwrap();
        // grid_split is registered first and accepts grid contractions.
        assert_eq!(module.schedule(), taskforge_ir::Schedule::GridSplit);
    }

    #[test]
    fn elementwise_grid_task_falls_through_to_naive() {
        let registry = ImplementerRegistry::with_default_implementers();
        let task = ops::vector_add(128).unwrap();
        let module = registry.implement(&task, None).unwrap();
        assert_eq!(module.schedule(), taskforge_ir::Schedule::GridNaive);
    }

    #[test]
    fn named_override_selects_specific_implementer() {
        let registry = ImplementerRegistry::with_default_implementers();
        let task = ops::matmul(32, 32, 32).unwrap();
        let module = registry.implement(&task, Some("grid_naive")).unwrap();
        assert_eq!(module.schedule(), taskforge_ir::Schedule::GridNaive);
    }

    #[test]
    fn unknown_name_is_not_registered() {
        let registry = ImplementerRegistry::with_default_implementers();
        let task = ops::matmul(8, 8, 8).unwrap();
        let err = registry.implement(&task, Some("cuda_grid_super")).unwrap_err();
        assert!(matches!(err, ImplementError::NotRegistered(_)));
    }

    #[test]
    fn named_implementer_must_be_applicable() {
        let registry = ImplementerRegistry::with_default_implementers();
        // grid_split only handles contractions.
        let task = ops::vector_add(64).unwrap();
        let err = registry.implement(&task, Some("grid_split")).unwrap_err();
        assert!(matches!(err, ImplementError::NotApplicable { .. }));
    }

    #[test]
    fn empty_match_set_reports_no_applicable_implementer() {
        let mut registry = ImplementerRegistry::new();
        registry.register(GridSplitImplementer::new());
        let task = ops::vector_add(64).unwrap();
        let err = registry.implement(&task, None).unwrap_err();
        assert!(matches!(err, ImplementError::NoApplicableImplementer { .. }));
    }

    #[test]
    fn every_default_implementer_is_reachable_by_dispatch() {
        let registry = ImplementerRegistry::with_default_implementers();
        let cases = [
            (ops::matmul(32, 32, 32).unwrap(), "grid_split"),
            (ops::vector_add(32).unwrap(), "grid_naive"),
            (
                ops::matmul(32, 32, 32).unwrap().retargeted(Worker::Host),
                "host_naive",
            ),
        ];
        for (task, expected) in cases {
            let implementer = registry
                .implementers()
                .iter()
                .find(|i| super::matches(i.as_ref(), &task))
                .unwrap();
            assert_eq!(implementer.name(), expected);
            assert!(implementer.applicable(&task));
        }
        // Sanity: grid_naive is also reachable for a contraction if asked for.
        let task = ops::matmul(16, 16, 16).unwrap();
        assert!(GridNaiveImplementer::new().applicable(&task));
    }
}
