use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use cubicle::{
    cli::{CubicleArgs, CubicleSubcommand, PortsSubcommand},
    config::{CubicleConfig, DEFAULT_SERVER_ADDR},
    management::{self, PortRangeAllocator},
    runtime::{ContainerRuntime, DockerRuntime, MemoryRuntime},
    server::{self, ServerState},
    service::ProvisioningService,
    CubicleError, CubicleResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> CubicleResult<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = CubicleArgs::parse();
    let config = load_config(args.config.as_ref()).await?;

    match args.subcommand {
        Some(CubicleSubcommand::Serve { addr, dry_run }) => {
            let _guard = cubicle::init_logging(config.log_dir(), args.verbose)?;
            let addr = match addr {
                Some(addr) => addr,
                None => DEFAULT_SERVER_ADDR.parse().map_err(CubicleError::custom)?,
            };
            serve(config, addr, dry_run).await?;
        }
        Some(CubicleSubcommand::Init { write_config }) => {
            cubicle::init_console_logging(args.verbose)?;
            let db_path = management::init_home(&config).await?;
            println!("port database: {}", db_path.display());

            if let Some(path) = write_config {
                config.save(&path).await?;
                println!("configuration: {}", path.display());
            }
        }
        Some(CubicleSubcommand::Ports { action }) => {
            cubicle::init_console_logging(args.verbose)?;
            ports(config, action).await?;
        }
        None => {
            CubicleArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

async fn load_config(path: Option<&PathBuf>) -> CubicleResult<CubicleConfig> {
    match path {
        Some(path) => CubicleConfig::load(path).await,
        None => CubicleConfig::from_env(),
    }
}

async fn serve(config: CubicleConfig, addr: std::net::SocketAddr, dry_run: bool) -> CubicleResult<()> {
    let runtime: Box<dyn ContainerRuntime> = if dry_run {
        tracing::warn!("dry run, sandboxes are kept in memory and never started");
        Box::new(MemoryRuntime::new())
    } else {
        Box::new(DockerRuntime::connect().await?)
    };

    tracing::info!(
        image = %config.image_ref(),
        port_base = config.get_port_base(),
        port_max = config.get_port_max(),
        range_size = config.get_port_range_size(),
        "starting provisioning service"
    );

    let service = ProvisioningService::new(config, runtime).await?;
    server::serve(addr, ServerState::new(service)).await
}

async fn ports(config: CubicleConfig, action: PortsSubcommand) -> CubicleResult<()> {
    let allocator = PortRangeAllocator::open(
        config.port_db_path(),
        config.get_port_base(),
        config.get_port_max(),
        config.get_port_range_size(),
    )
    .await?;

    match action {
        PortsSubcommand::List => {
            for allocation in allocator.list().await? {
                println!(
                    "{}\t{}\t{}",
                    allocation.get_tenant_id(),
                    allocation.get_range(),
                    allocation.get_created_at().as_deref().unwrap_or("-")
                );
            }
        }
        PortsSubcommand::Release { tenant_id } => {
            allocator.deallocate(&tenant_id).await?;
            println!("released ports of {tenant_id}");
        }
    }

    Ok(())
}
