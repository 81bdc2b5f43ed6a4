//! Error types for task construction and module binding.

use thiserror::Error;

/// Rejections raised while constructing a [`crate::Task`] or a tunable
/// parameter. All of these mean the caller handed us malformed inputs.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("expected {expected} parameter types for {inputs} inputs + 1 output, got {actual}")]
    ParamCountMismatch {
        expected: usize,
        inputs: usize,
        actual: usize,
    },

    #[error("compute tensor '{name}' declares {axes} axes for a rank-{rank} shape")]
    AxisArityMismatch {
        name: String,
        axes: usize,
        rank: usize,
    },

    #[error("input tensor '{0}' declared more than once")]
    DuplicateTensor(String),

    #[error("compute expression references tensor '{0}' which is not a task parameter")]
    UnknownTensor(String),

    #[error("tensor '{tensor}' has rank {rank} but is indexed with {indices} indices")]
    IndexArityMismatch {
        tensor: String,
        rank: usize,
        indices: usize,
    },

    #[error("shape of '{tensor}' disagrees with its parameter type: {declared:?} vs {param:?}")]
    ShapeMismatch {
        tensor: String,
        declared: Vec<usize>,
        param: Vec<usize>,
    },

    #[error("dtype of '{tensor}' disagrees with its parameter type")]
    DtypeMismatch { tensor: String },

    #[error("variable '{0}' is not an output axis or an enclosing reduce axis")]
    UnboundVariable(String),

    #[error("tunable parameter '{0}' has an empty domain")]
    EmptyDomain(String),
}

/// Rejections raised when binding tunable parameters into a resolved module.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("assignment names unknown tunable '{0}'")]
    UnknownTunable(String),

    #[error("value {value} for tunable '{name}' lies outside its domain")]
    ValueOutOfDomain { name: String, value: i64 },

    #[error("tunable '{0}' left unbound")]
    UnboundTunable(String),
}
