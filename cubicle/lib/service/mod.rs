//! The tenant-facing provisioning service.
//!
//! [`ProvisioningService`] ties together the port allocator, the workspace provisioner and the
//! sandbox lifecycle manager behind one operation per request of the HTTP API.

mod provisioning;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use provisioning::*;
pub use types::*;
