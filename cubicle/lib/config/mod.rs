//! Configuration types and helpers.

mod bind_mount;
mod cubicle;
mod defaults;
mod memory;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use bind_mount::*;
pub use cubicle::*;
pub use defaults::*;
pub use memory::*;
