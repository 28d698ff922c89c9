//! Utility functions and types.

mod env;
mod naming;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use env::*;
pub use naming::*;
pub use path::*;
