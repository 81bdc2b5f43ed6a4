//! TaskForge intermediate representation: compute expressions, tasks, and
//! tunable modules.

pub mod error;
pub mod expr;
pub mod module;
pub mod ops;
pub mod passes;
pub mod task;

pub use error::*;
pub use expr::*;
pub use module::*;
pub use passes::*;
pub use task::*;
