use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `cubicle` provisions and manages per-tenant development sandboxes
#[derive(Debug, Parser)]
#[command(name = "cubicle", author, version, about, styles=styles::styles())]
pub struct CubicleArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<CubicleSubcommand>,

    /// YAML configuration file. Environment variables are used when omitted
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum CubicleSubcommand {
    /// Run the provisioning API server
    #[command(name = "serve")]
    Serve {
        /// Address to listen on
        #[arg(short, long, value_name = "ADDR")]
        addr: Option<SocketAddr>,

        /// Keep sandboxes in memory instead of running them on Docker
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the cubicle home and the port allocation database
    #[command(name = "init")]
    Init {
        /// Also write the effective configuration to this file
        #[arg(long, value_name = "PATH")]
        write_config: Option<PathBuf>,
    },

    /// Inspect or release tenant port ranges
    #[command(name = "ports")]
    Ports {
        /// The ports action
        #[command(subcommand)]
        action: PortsSubcommand,
    },
}

/// Actions on tenant port ranges
#[derive(Debug, Subcommand)]
pub enum PortsSubcommand {
    /// List every allocated range
    #[command(name = "list")]
    List,

    /// Release the range of a tenant
    #[command(name = "release")]
    Release {
        /// The tenant whose range is released
        tenant_id: String,
    },
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
