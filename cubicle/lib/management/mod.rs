//! Host-side state of tenants: port ranges, workspaces and host capacity.

mod db;
mod home;
mod overlay;
mod ports;
mod resources;
mod workspace;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
pub use home::*;
pub use overlay::*;
pub use ports::*;
pub use resources::*;
pub use workspace::*;
