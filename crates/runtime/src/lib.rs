//! Runtime tensor values and explicit host/device placement.

pub mod value;

pub use value::*;
