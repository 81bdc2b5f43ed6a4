//! Host-worker implementer.

use crate::registry::{ImplementError, Implementer};
use taskforge_ir::{Schedule, Task, TaskKind, UnresolvedModule, Worker};

/// Sequential loop nest over the output; no tunable parameters, so its module
/// resolves trivially. The baseline every other implementation is checked
/// against.
pub struct HostNaiveImplementer;

impl HostNaiveImplementer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostNaiveImplementer {
    fn default() -> Self {
        Self::new()
    }
}

impl Implementer for HostNaiveImplementer {
    fn name(&self) -> &'static str {
        "host_naive"
    }

    fn accepts(&self) -> (&'static [TaskKind], Worker) {
        (
            &[TaskKind::Contraction, TaskKind::Elementwise],
            Worker::Host,
        )
    }

    fn applicable(&self, task: &Task) -> bool {
        task.worker() == Worker::Host
    }

    fn implement(&self, task: &Task) -> Result<UnresolvedModule, ImplementError> {
        Ok(UnresolvedModule::from_task(
            task,
            Schedule::HostLoops,
            Vec::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_ir::ops;

    #[test]
    fn host_naive_module_has_no_tunables() {
        let task = ops::matmul(4, 4, 4).unwrap().retargeted(Worker::Host);
        let module = HostNaiveImplementer::new().implement(&task).unwrap();
        assert!(module.tunables().is_empty());
        assert_eq!(module.search_space_size(), Some(1));
    }

    #[test]
    fn host_naive_rejects_grid_tasks() {
        let task = ops::matmul(4, 4, 4).unwrap();
        assert!(!HostNaiveImplementer::new().applicable(&task));
    }
}
