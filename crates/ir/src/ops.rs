//! Stock operator definitions: the caller side of the task-construction API.

use crate::error::ValidationError;
use crate::expr::{compute, reduce_sum, tensor_input, DataType, MemoryScope, TensorType};
use crate::task::{Task, Worker};

/// Canonical gemm task: `C[i, j] = reduce_sum(k, A[i, k] * B[k, j])` with
/// `A: [n, k]`, `B: [k, m]`, `C: [n, m]`, targeting the Grid worker.
pub fn matmul(n: usize, m: usize, k: usize) -> Result<Task, ValidationError> {
    let a = tensor_input("A", DataType::F32, &[n, k]);
    let b = tensor_input("B", DataType::F32, &[k, m]);
    let body = reduce_sum(a.at(&["i", "k"]) * b.at(&["k", "j"]), "k", k);
    let c = compute("C", vec![n, m], &["i", "j"], body);
    let param_types = vec![
        TensorType::row_major(MemoryScope::Global, DataType::F32, &[n, k]),
        TensorType::row_major(MemoryScope::Global, DataType::F32, &[k, m]),
        TensorType::row_major(MemoryScope::Global, DataType::F32, &[n, m]),
    ];
    Task::new("matmul", c, vec![a, b], param_types, Worker::Grid)
}

/// Elementwise addition `Z[i] = X[i] + Y[i]`, targeting the Grid worker.
pub fn vector_add(n: usize) -> Result<Task, ValidationError> {
    let x = tensor_input("X", DataType::F32, &[n]);
    let y = tensor_input("Y", DataType::F32, &[n]);
    let z = compute("Z", vec![n], &["i"], x.at(&["i"]) + y.at(&["i"]));
    let param_types = vec![
        TensorType::row_major(MemoryScope::Global, DataType::F32, &[n]),
        TensorType::row_major(MemoryScope::Global, DataType::F32, &[n]),
        TensorType::row_major(MemoryScope::Global, DataType::F32, &[n]),
    ];
    Task::new("vector_add", z, vec![x, y], param_types, Worker::Grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    #[test]
    fn matmul_builds_a_grid_contraction() {
        let task = matmul(4, 6, 8).unwrap();
        assert_eq!(task.kind(), TaskKind::Contraction);
        assert_eq!(task.worker(), Worker::Grid);
        assert_eq!(task.param_types().len(), 3);
    }

    #[test]
    fn vector_add_is_elementwise() {
        let task = vector_add(32).unwrap();
        assert_eq!(task.kind(), TaskKind::Elementwise);
    }
}
