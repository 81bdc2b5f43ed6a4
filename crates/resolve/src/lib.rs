//! Resolution strategies: collapse a module's open tunable choices into one
//! concrete instantiation.

pub mod brute_force;
pub mod random;

pub use brute_force::*;
pub use random::*;

use taskforge_backend::BuildError;
use taskforge_ir::ModuleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("search space of {size} candidates exceeds the ceiling of {ceiling}")]
    SearchSpaceTooLarge { size: u128, ceiling: u128 },

    #[error("all {total} candidates failed to build or execute")]
    NoValidCandidate { total: usize },

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("candidate execution failed: {0}")]
    Exec(#[from] anyhow::Error),
}
