//! taskforge compiler facade.

pub mod cli;
pub mod session;

pub use cli::*;
pub use session::*;
