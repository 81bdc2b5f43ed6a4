//! Grid-worker implementers.

use crate::registry::{ImplementError, Implementer};
use taskforge_ir::{Schedule, Task, TaskKind, TunableParam, UnresolvedModule, Worker};

/// One simulated thread per output element, grouped into blocks of
/// `block_size` threads.
pub struct GridNaiveImplementer;

impl GridNaiveImplementer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GridNaiveImplementer {
    fn default() -> Self {
        Self::new()
    }
}

impl Implementer for GridNaiveImplementer {
    fn name(&self) -> &'static str {
        "grid_naive"
    }

    fn accepts(&self) -> (&'static [TaskKind], Worker) {
        (
            &[TaskKind::Contraction, TaskKind::Elementwise],
            Worker::Grid,
        )
    }

    fn applicable(&self, task: &Task) -> bool {
        task.worker() == Worker::Grid
    }

    fn implement(&self, task: &Task) -> Result<UnresolvedModule, ImplementError> {
        let tunables = vec![tunable("block_size", vec![32, 64, 128, 256])];
        Ok(UnresolvedModule::from_task(
            task,
            Schedule::GridNaive,
            tunables,
        ))
    }
}

/// Tiled contraction schedule: the output is split into `tile_m x tile_n`
/// blocks (one simulated thread block each) and the reduction runs in
/// `tile_k`-sized steps with an `unroll`-chunked inner loop.
pub struct GridSplitImplementer;

impl GridSplitImplementer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GridSplitImplementer {
    fn default() -> Self {
        Self::new()
    }
}

impl Implementer for GridSplitImplementer {
    fn name(&self) -> &'static str {
        "grid_split"
    }

    fn accepts(&self) -> (&'static [TaskKind], Worker) {
        (&[TaskKind::Contraction], Worker::Grid)
    }

    fn applicable(&self, task: &Task) -> bool {
        // Tiling assumes a rank-2 output large enough for the smallest tile;
        // anything smaller falls through to the naive grid schedule.
        let shape = &task.compute().shape;
        task.worker() == Worker::Grid
            && shape.len() == 2
            && shape[0] >= 16
            && shape[1] >= 16
            && task.contraction().is_some_and(|spec| spec.reduce_extent >= 4)
    }

    fn implement(&self, task: &Task) -> Result<UnresolvedModule, ImplementError> {
        let tunables = vec![
            tunable("tile_m", vec![16, 32, 64]),
            tunable("tile_n", vec![16, 32, 64]),
            tunable("tile_k", vec![4, 8, 16]),
            tunable("unroll", vec![1, 4, 8]),
        ];
        Ok(UnresolvedModule::from_task(
            task,
            Schedule::GridSplit,
            tunables,
        ))
    }
}

fn tunable(name: &str, domain: Vec<i64>) -> TunableParam {
    // Domains here are non-empty literals.
    TunableParam::new(name, domain).expect("stock tunable domain")
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_ir::ops;

    #[test]
    fn grid_split_declares_the_tiling_knobs() {
        let task = ops::matmul(64, 64, 64).unwrap();
        let module = GridSplitImplementer::new().implement(&task).unwrap();
        let names: Vec<&str> = module.tunables().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["tile_m", "tile_n", "tile_k", "unroll"]);
        assert_eq!(module.search_space_size(), Some(81));
    }

    #[test]
    fn grid_split_rejects_elementwise_and_host_tasks() {
        let implementer = GridSplitImplementer::new();
        assert!(!implementer.applicable(&ops::vector_add(16).unwrap()));
        let host = ops::matmul(32, 32, 32).unwrap().retargeted(Worker::Host);
        assert!(!implementer.applicable(&host));
    }

    #[test]
    fn grid_split_rejects_problems_below_the_smallest_tile() {
        let implementer = GridSplitImplementer::new();
        assert!(!implementer.applicable(&ops::matmul(2, 2, 2).unwrap()));
        assert!(!implementer.applicable(&ops::matmul(16, 8, 8).unwrap()));
        assert!(implementer.applicable(&ops::matmul(16, 16, 4).unwrap()));
    }

    #[test]
    fn grid_naive_covers_any_grid_task() {
        let implementer = GridNaiveImplementer::new();
        assert!(implementer.applicable(&ops::matmul(8, 8, 8).unwrap()));
        assert!(implementer.applicable(&ops::vector_add(8).unwrap()));
        let module = implementer.implement(&ops::vector_add(8).unwrap()).unwrap();
        assert_eq!(module.tunables().len(), 1);
    }
}
