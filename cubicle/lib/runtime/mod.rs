//! Container runtimes and the sandbox lifecycle built on top of them.
//!
//! A [`ContainerRuntime`] is the seam to the engine that actually runs sandboxes.
//! [`DockerRuntime`] talks to a Docker daemon and [`MemoryRuntime`] keeps sandboxes as in-process
//! records for dry runs and tests. [`SandboxLifecycleManager`] drives either one.

mod docker;
mod lifecycle;
mod memory;
mod stats;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use lifecycle::*;
pub use memory::*;
pub use stats::*;
pub use traits::*;
