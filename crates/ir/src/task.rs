//! The task model: a named computation bound to an execution worker.

use crate::error::ValidationError;
use crate::expr::{ComputeTensor, ReduceOp, ScalarExpr, TensorInput, TensorType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Execution hierarchy a task targets. `Grid` is a three-level accelerator
/// domain (grid of blocks of threads over global/shared/register memory);
/// `Host` is a single flat context with one memory scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Worker {
    Grid,
    Host,
}

impl Worker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Worker::Grid => "grid",
            Worker::Host => "host",
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape-of-computation discriminant used for implementer dispatch.
/// `Elementwise` covers any per-output-element body that is not the
/// recognized contraction structure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Contraction,
    Elementwise,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Contraction => "contraction",
            TaskKind::Elementwise => "elementwise",
        }
    }
}

/// Where one operand dimension draws its index from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexSource {
    Output(usize),
    Reduce,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperandMap {
    pub tensor: String,
    pub dims: Vec<IndexSource>,
}

/// Recognized single-reduction-of-a-product structure:
/// `out[..] = reduce_sum(r, A[..] * B[..])` with every operand index being an
/// output axis or the reduce axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractionSpec {
    pub reduce_extent: usize,
    pub lhs: OperandMap,
    pub rhs: OperandMap,
}

/// A named computation: output expression, input tensors, parameter types
/// (inputs in order, then the output), and the worker it targets. Immutable
/// after construction except for the worker, which may be swapped to compile
/// the same body for another execution domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    name: String,
    compute: ComputeTensor,
    inputs: Vec<TensorInput>,
    param_types: Vec<TensorType>,
    worker: Worker,
    kind: TaskKind,
    contraction: Option<ContractionSpec>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        compute: ComputeTensor,
        inputs: Vec<TensorInput>,
        param_types: Vec<TensorType>,
        worker: Worker,
    ) -> Result<Self, ValidationError> {
        validate(&compute, &inputs, &param_types)?;
        let contraction = recognize_contraction(&compute, &inputs);
        let kind = if contraction.is_some() {
            TaskKind::Contraction
        } else {
            TaskKind::Elementwise
        };
        Ok(Self {
            name: name.into(),
            compute,
            inputs,
            param_types,
            worker,
            kind,
            contraction,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compute(&self) -> &ComputeTensor {
        &self.compute
    }

    pub fn inputs(&self) -> &[TensorInput] {
        &self.inputs
    }

    pub fn param_types(&self) -> &[TensorType] {
        &self.param_types
    }

    pub fn worker(&self) -> Worker {
        self.worker
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn contraction(&self) -> Option<&ContractionSpec> {
        self.contraction.as_ref()
    }

    pub fn input(&self, name: &str) -> Option<&TensorInput> {
        self.inputs.iter().find(|input| input.name == name)
    }

    /// Parameter type of a named tensor; the compute tensor maps to the last
    /// parameter slot.
    pub fn param_type_of(&self, name: &str) -> Option<&TensorType> {
        if name == self.compute.name {
            return self.param_types.last();
        }
        self.inputs
            .iter()
            .position(|input| input.name == name)
            .and_then(|pos| self.param_types.get(pos))
    }

    pub fn set_worker(&mut self, worker: Worker) {
        self.worker = worker;
    }

    pub fn retargeted(&self, worker: Worker) -> Task {
        let mut task = self.clone();
        task.worker = worker;
        task
    }
}

fn validate(
    compute: &ComputeTensor,
    inputs: &[TensorInput],
    param_types: &[TensorType],
) -> Result<(), ValidationError> {
    if param_types.len() != inputs.len() + 1 {
        return Err(ValidationError::ParamCountMismatch {
            expected: inputs.len() + 1,
            inputs: inputs.len(),
            actual: param_types.len(),
        });
    }
    if compute.axes.len() != compute.shape.len() {
        return Err(ValidationError::AxisArityMismatch {
            name: compute.name.clone(),
            axes: compute.axes.len(),
            rank: compute.shape.len(),
        });
    }

    let mut seen = HashSet::new();
    for input in inputs {
        if !seen.insert(input.name.as_str()) {
            return Err(ValidationError::DuplicateTensor(input.name.clone()));
        }
    }

    for (input, ty) in inputs.iter().zip(param_types.iter()) {
        if input.shape != ty.shape {
            return Err(ValidationError::ShapeMismatch {
                tensor: input.name.clone(),
                declared: input.shape.clone(),
                param: ty.shape.clone(),
            });
        }
        if input.dtype != ty.dtype {
            return Err(ValidationError::DtypeMismatch {
                tensor: input.name.clone(),
            });
        }
    }
    let out_ty = &param_types[inputs.len()];
    if compute.shape != out_ty.shape {
        return Err(ValidationError::ShapeMismatch {
            tensor: compute.name.clone(),
            declared: compute.shape.clone(),
            param: out_ty.shape.clone(),
        });
    }

    let mut bound: Vec<&str> = compute.axes.iter().map(String::as_str).collect();
    check_body(&compute.body, inputs, &mut bound)
}

fn check_body<'a>(
    expr: &'a ScalarExpr,
    inputs: &[TensorInput],
    bound: &mut Vec<&'a str>,
) -> Result<(), ValidationError> {
    match expr {
        ScalarExpr::Const(_) => Ok(()),
        ScalarExpr::Var(name) => {
            if bound.iter().any(|axis| axis == name) {
                Ok(())
            } else {
                Err(ValidationError::UnboundVariable(name.clone()))
            }
        }
        ScalarExpr::Load { tensor, indices } => {
            let input = inputs
                .iter()
                .find(|input| &input.name == tensor)
                .ok_or_else(|| ValidationError::UnknownTensor(tensor.clone()))?;
            if indices.len() != input.rank() {
                return Err(ValidationError::IndexArityMismatch {
                    tensor: tensor.clone(),
                    rank: input.rank(),
                    indices: indices.len(),
                });
            }
            for index in indices {
                check_body(index, inputs, bound)?;
            }
            Ok(())
        }
        ScalarExpr::Binary { lhs, rhs, .. } => {
            check_body(lhs, inputs, bound)?;
            check_body(rhs, inputs, bound)
        }
        ScalarExpr::Reduce { axis, body, .. } => {
            bound.push(axis);
            let result = check_body(body, inputs, bound);
            bound.pop();
            result
        }
    }
}

fn recognize_contraction(compute: &ComputeTensor, inputs: &[TensorInput]) -> Option<ContractionSpec> {
    let (axis, extent, product) = match &compute.body {
        ScalarExpr::Reduce {
            op: ReduceOp::Sum,
            axis,
            extent,
            body,
        } => (axis.as_str(), *extent, body.as_ref()),
        _ => return None,
    };
    let (lhs, rhs) = match product {
        ScalarExpr::Binary {
            op: crate::expr::BinaryOp::Mul,
            lhs,
            rhs,
        } => (lhs.as_ref(), rhs.as_ref()),
        _ => return None,
    };
    let lhs = operand_map(lhs, compute, inputs, axis)?;
    let rhs = operand_map(rhs, compute, inputs, axis)?;
    // Both operands must actually touch the reduce axis.
    if !lhs.dims.contains(&IndexSource::Reduce) || !rhs.dims.contains(&IndexSource::Reduce) {
        return None;
    }
    Some(ContractionSpec {
        reduce_extent: extent,
        lhs,
        rhs,
    })
}

fn operand_map(
    expr: &ScalarExpr,
    compute: &ComputeTensor,
    inputs: &[TensorInput],
    reduce_axis: &str,
) -> Option<OperandMap> {
    let (tensor, indices) = match expr {
        ScalarExpr::Load { tensor, indices } => (tensor, indices),
        _ => return None,
    };
    inputs.iter().find(|input| &input.name == tensor)?;
    let mut dims = Vec::with_capacity(indices.len());
    for index in indices {
        let var = index.as_var()?;
        if var == reduce_axis {
            dims.push(IndexSource::Reduce);
        } else {
            let pos = compute.axes.iter().position(|axis| axis == var)?;
            dims.push(IndexSource::Output(pos));
        }
    }
    Some(OperandMap {
        tensor: tensor.clone(),
        dims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compute, reduce_sum, tensor_input, DataType, MemoryScope, TensorType};

    fn matmul_parts(n: usize, m: usize, k: usize) -> (ComputeTensor, Vec<TensorInput>, Vec<TensorType>) {
        let a = tensor_input("A", DataType::F32, &[n, k]);
        let b = tensor_input("B", DataType::F32, &[k, m]);
        let body = reduce_sum(a.at(&["i", "k"]) * b.at(&["k", "j"]), "k", k);
        let c = compute("C", vec![n, m], &["i", "j"], body);
        let types = vec![
            TensorType::row_major(MemoryScope::Global, DataType::F32, &[n, k]),
            TensorType::row_major(MemoryScope::Global, DataType::F32, &[k, m]),
            TensorType::row_major(MemoryScope::Global, DataType::F32, &[n, m]),
        ];
        (c, vec![a, b], types)
    }

    #[test]
    fn matmul_task_is_recognized_as_contraction() {
        let (c, inputs, types) = matmul_parts(4, 6, 8);
        let task = Task::new("matmul", c, inputs, types, Worker::Grid).unwrap();
        assert_eq!(task.kind(), TaskKind::Contraction);
        let spec = task.contraction().unwrap();
        assert_eq!(spec.reduce_extent, 8);
        assert_eq!(spec.lhs.dims, vec![IndexSource::Output(0), IndexSource::Reduce]);
        assert_eq!(spec.rhs.dims, vec![IndexSource::Reduce, IndexSource::Output(1)]);
    }

    #[test]
    fn param_count_mismatch_is_rejected() {
        let (c, inputs, mut types) = matmul_parts(4, 6, 8);
        types.pop();
        let err = Task::new("matmul", c, inputs, types, Worker::Grid).unwrap_err();
        assert!(matches!(err, ValidationError::ParamCountMismatch { .. }));
    }

    #[test]
    fn unknown_tensor_reference_is_rejected() {
        let a = tensor_input("A", DataType::F32, &[4]);
        let ghost = tensor_input("G", DataType::F32, &[4]);
        let c = compute("C", vec![4], &["i"], a.at(&["i"]) + ghost.at(&["i"]));
        let types = vec![
            TensorType::row_major(MemoryScope::Host, DataType::F32, &[4]),
            TensorType::row_major(MemoryScope::Host, DataType::F32, &[4]),
        ];
        let err = Task::new("bad", c, vec![a], types, Worker::Host).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTensor(name) if name == "G"));
    }

    #[test]
    fn shape_mismatch_against_param_type_is_rejected() {
        let (c, inputs, mut types) = matmul_parts(4, 6, 8);
        types[0].shape = vec![4, 9];
        let err = Task::new("matmul", c, inputs, types, Worker::Grid).unwrap_err();
        assert!(matches!(err, ValidationError::ShapeMismatch { .. }));
    }

    #[test]
    fn unbound_variable_is_rejected() {
        let a = tensor_input("A", DataType::F32, &[4]);
        let c = compute("C", vec![4], &["i"], a.at(&["j"]));
        let types = vec![
            TensorType::row_major(MemoryScope::Host, DataType::F32, &[4]),
            TensorType::row_major(MemoryScope::Host, DataType::F32, &[4]),
        ];
        let err = Task::new("bad", c, vec![a], types, Worker::Host).unwrap_err();
        assert!(matches!(err, ValidationError::UnboundVariable(name) if name == "j"));
    }

    #[test]
    fn elementwise_body_gets_elementwise_kind() {
        let x = tensor_input("X", DataType::F32, &[16]);
        let y = tensor_input("Y", DataType::F32, &[16]);
        let c = compute("Z", vec![16], &["i"], x.at(&["i"]) + y.at(&["i"]));
        let types = vec![
            TensorType::row_major(MemoryScope::Global, DataType::F32, &[16]),
            TensorType::row_major(MemoryScope::Global, DataType::F32, &[16]),
            TensorType::row_major(MemoryScope::Global, DataType::F32, &[16]),
        ];
        let task = Task::new("add", c, vec![x, y], types, Worker::Grid).unwrap();
        assert_eq!(task.kind(), TaskKind::Elementwise);
        assert!(task.contraction().is_none());
    }

    #[test]
    fn retargeting_only_changes_the_worker() {
        let (c, inputs, types) = matmul_parts(2, 2, 2);
        let task = Task::new("matmul", c, inputs, types, Worker::Grid).unwrap();
        let host = task.retargeted(Worker::Host);
        assert_eq!(host.worker(), Worker::Host);
        assert_eq!(host.kind(), task.kind());
        assert_eq!(host.name(), task.name());
    }
}
