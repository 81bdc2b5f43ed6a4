//! Compute-expression term language.
//!
//! Just enough of a dialect to describe what a task computes: tensor loads,
//! scalar arithmetic, and reductions over a named axis. Implementers and the
//! backend consume this structurally; it is not a general tensor algebra.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    BF16,
}

impl DataType {
    pub fn element_type(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 | DataType::BF16 => 2,
        }
    }
}

/// Where a tensor lives. `Host` pairs with the Host worker; the other three
/// form the Grid worker's memory hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MemoryScope {
    Host,
    Global,
    Shared,
    Register,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Host => "host",
            MemoryScope::Global => "global",
            MemoryScope::Shared => "shared",
            MemoryScope::Register => "register",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape + layout + placement of one task parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TensorType {
    pub scope: MemoryScope,
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub strides: Vec<usize>,
}

impl TensorType {
    pub fn new(scope: MemoryScope, dtype: DataType, shape: Vec<usize>, strides: Vec<usize>) -> Self {
        Self {
            scope,
            dtype,
            shape,
            strides,
        }
    }

    /// Dense row-major layout for the given shape.
    pub fn row_major(scope: MemoryScope, dtype: DataType, shape: &[usize]) -> Self {
        Self {
            scope,
            dtype,
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

pub fn tensor_type(scope: MemoryScope, dtype: DataType, shape: &[usize], strides: &[usize]) -> TensorType {
    TensorType::new(scope, dtype, shape.to_vec(), strides.to_vec())
}

pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
        }
    }

    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Max => lhs.max(rhs),
            BinaryOp::Min => lhs.min(rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "reduce_sum",
            ReduceOp::Max => "reduce_max",
        }
    }

    pub fn identity(&self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Max => f64::NEG_INFINITY,
        }
    }

    pub fn combine(&self, acc: f64, value: f64) -> f64 {
        match self {
            ReduceOp::Sum => acc + value,
            ReduceOp::Max => acc.max(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ScalarExpr {
    Const(f64),
    Var(String),
    Load {
        tensor: String,
        indices: Vec<ScalarExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ScalarExpr>,
        rhs: Box<ScalarExpr>,
    },
    Reduce {
        op: ReduceOp,
        axis: String,
        extent: usize,
        body: Box<ScalarExpr>,
    },
}

impl ScalarExpr {
    pub fn var<N: Into<String>>(name: N) -> Self {
        ScalarExpr::Var(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: ScalarExpr, rhs: ScalarExpr) -> Self {
        ScalarExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            ScalarExpr::Const(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match self {
            ScalarExpr::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl From<f64> for ScalarExpr {
    fn from(value: f64) -> Self {
        ScalarExpr::Const(value)
    }
}

impl From<&str> for ScalarExpr {
    fn from(name: &str) -> Self {
        ScalarExpr::Var(name.to_string())
    }
}

impl std::ops::Add for ScalarExpr {
    type Output = ScalarExpr;
    fn add(self, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::binary(BinaryOp::Add, self, rhs)
    }
}

impl std::ops::Sub for ScalarExpr {
    type Output = ScalarExpr;
    fn sub(self, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::binary(BinaryOp::Sub, self, rhs)
    }
}

impl std::ops::Mul for ScalarExpr {
    type Output = ScalarExpr;
    fn mul(self, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::binary(BinaryOp::Mul, self, rhs)
    }
}

impl std::ops::Div for ScalarExpr {
    type Output = ScalarExpr;
    fn div(self, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::binary(BinaryOp::Div, self, rhs)
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Const(value) => write!(f, "{}", value),
            ScalarExpr::Var(name) => f.write_str(name),
            ScalarExpr::Load { tensor, indices } => {
                write!(f, "{}[", tensor)?;
                for (i, index) in indices.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", index)?;
                }
                f.write_str("]")
            }
            ScalarExpr::Binary { op, lhs, rhs } => match op {
                BinaryOp::Max | BinaryOp::Min => write!(f, "{}({}, {})", op.as_str(), lhs, rhs),
                _ => write!(f, "({} {} {})", lhs, op.as_str(), rhs),
            },
            ScalarExpr::Reduce {
                op,
                axis,
                extent,
                body,
            } => write!(f, "{}({}: 0..{}, {})", op.as_str(), axis, extent, body),
        }
    }
}

/// A named logical input tensor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TensorInput {
    pub name: String,
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl TensorInput {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Index this tensor with axis variables: `a.at(&["i", "k"])`.
    pub fn at(&self, indices: &[&str]) -> ScalarExpr {
        ScalarExpr::Load {
            tensor: self.name.clone(),
            indices: indices.iter().map(|v| ScalarExpr::var(*v)).collect(),
        }
    }
}

pub fn tensor_input<N: Into<String>>(name: N, dtype: DataType, shape: &[usize]) -> TensorInput {
    TensorInput {
        name: name.into(),
        dtype,
        shape: shape.to_vec(),
    }
}

/// The output computation of a task: one value per point of `shape`, with the
/// point coordinates bound to `axes` inside `body`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub axes: Vec<String>,
    pub body: ScalarExpr,
}

pub fn compute<N: Into<String>>(
    name: N,
    shape: Vec<usize>,
    axes: &[&str],
    body: ScalarExpr,
) -> ComputeTensor {
    ComputeTensor {
        name: name.into(),
        shape,
        axes: axes.iter().map(|a| a.to_string()).collect(),
        body,
    }
}

pub fn reduce<N: Into<String>>(op: ReduceOp, body: ScalarExpr, axis: N, extent: usize) -> ScalarExpr {
    ScalarExpr::Reduce {
        op,
        axis: axis.into(),
        extent,
        body: Box::new(body),
    }
}

pub fn reduce_sum<N: Into<String>>(body: ScalarExpr, axis: N, extent: usize) -> ScalarExpr {
    reduce(ReduceOp::Sum, body, axis, extent)
}

impl fmt::Display for ComputeTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.name)?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(axis)?;
        }
        write!(f, "] = {}", self.body)
    }
}
