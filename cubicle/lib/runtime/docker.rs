use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, Stats,
        StatsOptions, StopContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{ContainerInspectResponse, DeviceMapping, HostConfig, PortBinding as DockerPortBinding},
    Docker,
};
use futures::StreamExt;

use crate::{CubicleError, CubicleResult};

use super::{
    ContainerRuntime, PortBinding, ResourceSnapshot, SandboxInfo, SandboxSpec, SandboxStatus,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRuntime {
    /// Connects to the local Docker daemon and checks it answers.
    ///
    /// Uses `DOCKER_HOST` when set, otherwise the platform's default socket.
    pub async fn connect() -> CubicleResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(CubicleError::custom)?;
        docker
            .ping()
            .await
            .map_err(|e| CubicleError::RuntimeApi(format!("docker ping failed: {e}")))?;

        tracing::info!("connected to docker daemon");
        Ok(Self { docker })
    }

    /// Wraps a preconfigured client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn inspect_raw(&self, name: &str) -> CubicleResult<ContainerInspectResponse> {
        self.docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_docker_error(name, e))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits an image reference into name and tag. Digest references are returned whole.
fn parse_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    // A ':' followed by a '/' belongs to a registry port, not a tag.
    if let Some((name, tag)) = image.rsplit_once(':') {
        if !tag.contains('/') {
            return (name, tag);
        }
    }

    (image, "latest")
}

/// Maps a Docker error: 404 becomes [`CubicleError::NotFound`], anything else
/// [`CubicleError::RuntimeApi`].
fn map_docker_error(name: &str, error: DockerError) -> CubicleError {
    match error {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => CubicleError::NotFound(name.to_string()),
        e => CubicleError::RuntimeApi(e.to_string()),
    }
}

/// Docker answers 304 when a sandbox is already in the requested state.
fn is_not_modified(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn port_key(container_port: u16) -> String {
    format!("{container_port}/tcp")
}

fn build_host_config(spec: &SandboxSpec) -> HostConfig {
    let port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = spec
        .get_ports()
        .iter()
        .map(|p| {
            (
                port_key(p.get_container()),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(p.get_host().to_string()),
                }]),
            )
        })
        .collect();

    let binds = spec
        .get_binds()
        .iter()
        .map(|b| b.to_bind_spec())
        .collect::<Vec<_>>();

    let devices = spec
        .get_devices()
        .iter()
        .map(|d| DeviceMapping {
            path_on_host: Some(d.display().to_string()),
            path_in_container: Some(d.display().to_string()),
            cgroup_permissions: Some("rwm".to_string()),
        })
        .collect::<Vec<_>>();

    HostConfig {
        privileged: Some(spec.get_privileged()),
        port_bindings: Some(port_bindings),
        binds: Some(binds),
        devices: Some(devices),
        cpu_count: Some(i64::from(spec.get_cpu_count())),
        cpu_percent: Some(i64::from(spec.get_cpu_percent())),
        memory: Some(spec.get_memory_bytes()),
        memory_swap: Some(spec.get_memory_swap_bytes()),
        ..Default::default()
    }
}

fn sandbox_info_from(name: &str, inspect: ContainerInspectResponse) -> SandboxInfo {
    let status = inspect
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| s.to_string().parse().unwrap_or(SandboxStatus::Unknown))
        .unwrap_or(SandboxStatus::Unknown);

    let image = inspect
        .config
        .as_ref()
        .and_then(|c| c.image.clone())
        .or(inspect.image.clone())
        .unwrap_or_default();

    let host_config = inspect.host_config.unwrap_or_default();
    let mut ports = host_config
        .port_bindings
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, bindings)| {
            let container = key.split('/').next()?.parse::<u16>().ok()?;
            let host = bindings?
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()))?;
            Some(PortBinding::new(host, container))
        })
        .collect::<Vec<_>>();
    ports.sort_by_key(|p| p.get_host());

    let name = inspect
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| name.to_string());

    SandboxInfo::builder()
        .id(inspect.id.unwrap_or_default())
        .name(name)
        .status(status)
        .image(image)
        .created_at(inspect.created)
        .cpu_count(host_config.cpu_count.and_then(|c| u32::try_from(c).ok()))
        .memory_bytes(host_config.memory)
        .ports(ports)
        .build()
}

fn snapshot_from(stats: &Stats) -> ResourceSnapshot {
    ResourceSnapshot::builder()
        .cpu_total(stats.cpu_stats.cpu_usage.total_usage)
        .precpu_total(stats.precpu_stats.cpu_usage.total_usage)
        .system_cpu(stats.cpu_stats.system_cpu_usage.unwrap_or(0))
        .presystem_cpu(stats.precpu_stats.system_cpu_usage.unwrap_or(0))
        .online_cpus(stats.cpu_stats.online_cpus.unwrap_or(0))
        .memory_usage(stats.memory_stats.usage.unwrap_or(0))
        .memory_limit(stats.memory_stats.limit.unwrap_or(0))
        .build()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> CubicleResult<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(CubicleError::RuntimeApi(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> CubicleResult<()> {
        let (name, tag) = parse_image_ref(image);
        tracing::info!(%image, %name, %tag, "pulling image");

        let options = CreateImageOptions::<String> {
            from_image: name.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!(%status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(CubicleError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(%image, "image pulled");
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> CubicleResult<String> {
        let name = spec.get_name();

        let env = spec
            .get_env()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();

        let exposed_ports = spec
            .get_ports()
            .iter()
            .map(|p| (port_key(p.get_container()), HashMap::new()))
            .collect::<HashMap<_, _>>();

        let config = Config {
            image: Some(spec.get_image().clone()),
            hostname: Some(spec.get_hostname().clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(build_host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        tracing::info!(sandbox = %name, image = %spec.get_image(), "creating container");
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| CubicleError::RuntimeApi(e.to_string()))?;

        for warning in &response.warnings {
            tracing::warn!(sandbox = %name, %warning, "docker warning");
        }

        Ok(response.id)
    }

    async fn start(&self, name: &str) -> CubicleResult<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Err(e) if !is_not_modified(&e) => Err(map_docker_error(name, e)),
            _ => Ok(()),
        }
    }

    async fn stop(&self, name: &str) -> CubicleResult<()> {
        match self
            .docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            Err(e) if !is_not_modified(&e) => Err(map_docker_error(name, e)),
            _ => Ok(()),
        }
    }

    async fn restart(&self, name: &str) -> CubicleResult<()> {
        self.docker
            .restart_container(name, None::<RestartContainerOptions>)
            .await
            .map_err(|e| map_docker_error(name, e))
    }

    async fn remove(&self, name: &str, force: bool) -> CubicleResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_docker_error(name, e))
    }

    async fn inspect(&self, name: &str) -> CubicleResult<SandboxInfo> {
        let inspect = self.inspect_raw(name).await?;
        Ok(sandbox_info_from(name, inspect))
    }

    async fn list(&self, prefix: &str) -> CubicleResult<Vec<SandboxInfo>> {
        // Docker's name filter is a substring match, so the prefix is checked again below.
        let filters = HashMap::from([("name".to_string(), vec![prefix.to_string()])]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| CubicleError::RuntimeApi(e.to_string()))?;

        let mut sandboxes = Vec::new();
        for summary in summaries {
            let Some(name) = summary
                .names
                .unwrap_or_default()
                .into_iter()
                .map(|n| n.trim_start_matches('/').to_string())
                .find(|n| n.starts_with(prefix))
            else {
                continue;
            };

            match self.inspect(&name).await {
                Ok(info) => sandboxes.push(info),
                // Removed between listing and inspection.
                Err(CubicleError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(sandboxes)
    }

    async fn snapshot(&self, name: &str) -> CubicleResult<ResourceSnapshot> {
        // Without one-shot, the daemon samples twice so the previous counters are populated.
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let stats = self
            .docker
            .stats(name, Some(options))
            .next()
            .await
            .ok_or_else(|| CubicleError::RuntimeApi(format!("no stats returned for {name}")))?
            .map_err(|e| map_docker_error(name, e))?;

        Ok(snapshot_from(&stats))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
