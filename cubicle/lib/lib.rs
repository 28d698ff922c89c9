//! `cubicle` provisions and manages per-tenant development sandboxes.
//!
//! # Overview
//!
//! Every tenant gets one sandbox: a privileged container running an editor, a guest OS simulator
//! and a file manager, reachable on a contiguous range of host ports reserved for the tenant. A
//! sandbox is backed by a workspace directory copied from a template tree, holding copy-on-write
//! overlays of the shared guest OS images.
//!
//! # Architecture
//!
//! - **Management**: durable port range allocation in SQLite, idempotent workspace and overlay
//!   provisioning, host capacity reporting
//! - **Runtime**: the container runtime seam, its Docker and in-memory implementations, the
//!   serialized sandbox lifecycle and resource statistics
//! - **Service**: the provisioning flow tying the above together per tenant
//! - **Server**: a REST API over the service
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use cubicle::{
//!     config::CubicleConfig,
//!     runtime::DockerRuntime,
//!     service::ProvisioningService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> cubicle::CubicleResult<()> {
//!     let config = CubicleConfig::from_env()?;
//!     let runtime = DockerRuntime::connect().await?;
//!     let service = ProvisioningService::new(config, Box::new(runtime)).await?;
//!
//!     let sandbox = service.create_sandbox("alice").await?;
//!     println!("{} is {}", sandbox.get_name(), sandbox.get_status());
//!
//!     let ports = service.port_map("alice").await?;
//!     println!("editor on port {}", ports.editor_port);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Deployment configuration from YAML or the environment
//! - [`management`] - Port ranges, workspaces, overlays and host resources
//! - [`runtime`] - Container runtimes, sandbox lifecycle and statistics
//! - [`server`] - REST API server
//! - [`service`] - The per-tenant provisioning service
//! - [`utils`] - Naming, paths and environment helpers

#![warn(missing_docs)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod management;
pub mod runtime;
pub mod server;
pub mod service;
pub mod utils;

pub use error::*;
pub use log::*;
