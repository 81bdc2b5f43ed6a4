//! Implementer strategies and the dispatch registry.

pub mod grid;
pub mod host;
pub mod registry;

pub use grid::*;
pub use host::*;
pub use registry::*;
