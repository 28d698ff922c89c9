use std::{collections::BTreeMap, path::PathBuf};

use getset::Getters;

use crate::{
    config::{BindMount, CubicleConfig},
    management::{
        EnsureOutcome, HostCapacity, HostResources, PortRange, PortRangeAllocator,
        WorkspaceProvisioner,
    },
    runtime::{
        ContainerRuntime, PortBinding, ResourceUsage, SandboxInfo, SandboxLifecycleManager,
        SandboxSpec,
    },
    utils::{
        self, CODE_CONFIG_SUBDIR, GUESTOS_SUBDIR, KVM_DEVICE, QVP_SUBDIR, SANDBOX_NAME_PREFIX,
        TOOLS_SUBDIR,
    },
    CubicleError, CubicleResult,
};

use super::{PortMap, SandboxAction, SandboxReport};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provisions and manages one sandbox per tenant.
///
/// Creating a sandbox reserves the tenant's port range, prepares its workspace and guest OS
/// overlays, then creates and starts the container. Removing it releases the port range again.
#[derive(Getters)]
#[getset(get = "pub with_prefix")]
pub struct ProvisioningService {
    /// The deployment configuration.
    config: CubicleConfig,

    /// The tenant port range allocator.
    allocator: PortRangeAllocator,

    /// The tenant workspace provisioner.
    workspaces: WorkspaceProvisioner,

    /// The sandbox lifecycle manager.
    lifecycle: SandboxLifecycleManager,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProvisioningService {
    /// Creates a service over `runtime`, opening the port allocation database named by `config`.
    pub async fn new(
        config: CubicleConfig,
        runtime: Box<dyn ContainerRuntime>,
    ) -> CubicleResult<Self> {
        let allocator = PortRangeAllocator::open(
            config.port_db_path(),
            config.get_port_base(),
            config.get_port_max(),
            config.get_port_range_size(),
        )
        .await?;

        Ok(Self::with_allocator(config, allocator, runtime))
    }

    /// Creates a service over an existing allocator.
    pub fn with_allocator(
        config: CubicleConfig,
        allocator: PortRangeAllocator,
        runtime: Box<dyn ContainerRuntime>,
    ) -> Self {
        let workspaces = WorkspaceProvisioner::builder()
            .template_dir(config.get_workdir_template().clone())
            .deploy_root(config.get_workdir_deploy().clone())
            .overlay_tool(config.get_overlay_tool().clone())
            .guest_images(config.get_guest_os_list().clone())
            .build();

        Self {
            config,
            allocator,
            workspaces,
            lifecycle: SandboxLifecycleManager::from_boxed(runtime),
        }
    }

    /// Provisions the tenant's sandbox and returns it running.
    ///
    /// Each step is idempotent up to container creation, so a failed provisioning can be
    /// requested again. The port range stays reserved when a later step fails.
    pub async fn create_sandbox(&self, tenant_id: &str) -> CubicleResult<SandboxInfo> {
        utils::validate_tenant_id(tenant_id)?;

        let range = self.allocator.allocate(tenant_id).await?;

        let workspace = self.workspaces.workspace_dir(tenant_id);
        match self.workspaces.ensure(tenant_id).await? {
            EnsureOutcome::Created => {
                tracing::info!(tenant = %tenant_id, workspace = %workspace.display(), "workspace created")
            }
            EnsureOutcome::AlreadyValid => {
                tracing::info!(tenant = %tenant_id, workspace = %workspace.display(), "workspace already valid")
            }
        }

        let overlays = self.workspaces.ensure_overlays(tenant_id).await?;
        tracing::debug!(tenant = %tenant_id, count = overlays.len(), "guest os overlays ready");

        let spec = self.build_spec(tenant_id, &range)?;
        let info = self.lifecycle.create(&spec).await?;

        tracing::info!(tenant = %tenant_id, sandbox = %info.get_name(), %range, "sandbox provisioned");
        Ok(info)
    }

    /// Reports on the tenant's sandbox. A missing sandbox is reported, not an error.
    pub async fn sandbox(&self, tenant_id: &str) -> CubicleResult<SandboxReport> {
        utils::validate_tenant_id(tenant_id)?;

        match self.lifecycle.get(&utils::sandbox_name(tenant_id)).await {
            Ok(info) => Ok(info.into()),
            Err(CubicleError::NotFound(_)) => Ok(SandboxReport::absent()),
            Err(e) => Err(e),
        }
    }

    /// Applies `action` to the tenant's sandbox.
    ///
    /// Removal is forced and releases the tenant's port range. The range is released even when
    /// the sandbox is already gone, in which case [`CubicleError::NotFound`] is still returned.
    pub async fn sandbox_action(&self, tenant_id: &str, action: SandboxAction) -> CubicleResult<()> {
        utils::validate_tenant_id(tenant_id)?;
        let name = utils::sandbox_name(tenant_id);

        match action {
            SandboxAction::Start => self.lifecycle.start(&name).await,
            SandboxAction::Stop => self.lifecycle.stop(&name).await,
            SandboxAction::Restart => self.lifecycle.restart(&name).await,
            SandboxAction::Remove => {
                let removed = self.lifecycle.remove(&name, true).await;
                if removed.is_ok() || matches!(removed, Err(CubicleError::NotFound(_))) {
                    self.release_ports(tenant_id).await?;
                }
                removed
            }
        }
    }

    /// Returns the current utilization of the tenant's sandbox.
    pub async fn sandbox_stats(&self, tenant_id: &str) -> CubicleResult<ResourceUsage> {
        utils::validate_tenant_id(tenant_id)?;
        self.lifecycle.stats(&utils::sandbox_name(tenant_id)).await
    }

    /// Returns the host ports of the tenant's services.
    pub async fn port_map(&self, tenant_id: &str) -> CubicleResult<PortMap> {
        utils::validate_tenant_id(tenant_id)?;
        let range = self.allocator.lookup(tenant_id).await?;
        PortMap::from_range(&range)
    }

    /// Reports host capacity and what tenant sandboxes reserve of it.
    pub async fn host_resources(&self) -> CubicleResult<HostResources> {
        let capacity = HostCapacity::capture().await?;
        self.host_resources_with(&capacity).await
    }

    /// Like [`host_resources`](Self::host_resources) with an already measured capacity.
    pub async fn host_resources_with(&self, capacity: &HostCapacity) -> CubicleResult<HostResources> {
        let sandboxes = self
            .lifecycle
            .list(&format!("{SANDBOX_NAME_PREFIX}-"))
            .await?;
        Ok(HostResources::compute(capacity, &sandboxes))
    }

    /// Builds the container spec of the tenant's sandbox on `range`.
    pub fn build_spec(&self, tenant_id: &str, range: &PortRange) -> CubicleResult<SandboxSpec> {
        let config = &self.config;
        let workspace = self.workspaces.workspace_dir(tenant_id);

        let ports = PortMap::from_range(range)?
            .pair_with(config.get_container_ports())
            .into_iter()
            .map(|(host, container)| PortBinding::new(host, container))
            .collect::<Vec<_>>();

        let mut binds = vec![
            BindMount::read_only(config.get_guest_os_base_dir(), config.get_guest_os_base_dir()),
            BindMount::read_write(workspace.join(GUESTOS_SUBDIR), config.get_guest_os_mount()),
            BindMount::read_write(
                workspace.join(CODE_CONFIG_SUBDIR),
                config.get_code_config_mount(),
            ),
            BindMount::read_write(workspace.join(QVP_SUBDIR), config.get_qvp_binary_mount()),
            BindMount::read_only(workspace.join(TOOLS_SUBDIR), config.get_tools_mount()),
        ];
        binds.extend(
            config
                .get_extra_ro_binds()
                .iter()
                .map(|b| b.resolve_host(&workspace)),
        );

        Ok(SandboxSpec::builder()
            .name(utils::sandbox_name(tenant_id))
            .image(config.image_ref())
            .hostname(config.get_hostname().clone())
            .env(sandbox_env(config))
            .ports(ports)
            .binds(binds)
            .devices(vec![PathBuf::from(KVM_DEVICE)])
            .cpu_count(config.get_cpu_count())
            .cpu_percent(config.get_cpu_percent())
            .memory_bytes(config.memory_limit_bytes()?)
            .memory_swap_bytes(config.memory_swap_bytes()?)
            .build())
    }

    async fn release_ports(&self, tenant_id: &str) -> CubicleResult<()> {
        match self.allocator.deallocate(tenant_id).await {
            Err(CubicleError::NotAllocated(_)) => {
                tracing::warn!(tenant = %tenant_id, "no port range to release");
                Ok(())
            }
            result => result,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Environment of a sandbox. `PUID`/`PGID` fall back to the service's effective ids.
fn sandbox_env(config: &CubicleConfig) -> BTreeMap<String, String> {
    let puid = config
        .get_puid()
        .unwrap_or_else(|| nix::unistd::geteuid().as_raw());
    let pgid = config
        .get_pgid()
        .unwrap_or_else(|| nix::unistd::getegid().as_raw());

    let mut env = BTreeMap::from([
        ("PUID".to_string(), puid.to_string()),
        ("PGID".to_string(), pgid.to_string()),
        ("TZ".to_string(), config.get_tz().clone()),
        (
            "DEFAULT_WORKSPACE".to_string(),
            config.get_default_workspace().clone(),
        ),
    ]);

    if let Some(password) = config.get_sudo_password() {
        env.insert("SUDO_PASSWORD".to_string(), password.clone());
    }

    env
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
