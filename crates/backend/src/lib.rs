//! Build boundary: turns a lowered, resolved module into a callable,
//! profilable artifact.

pub mod build;
pub mod exec;

pub use build::*;
