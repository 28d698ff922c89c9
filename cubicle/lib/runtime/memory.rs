use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{CubicleError, CubicleResult};

use super::{ContainerRuntime, ResourceSnapshot, SandboxInfo, SandboxSpec, SandboxStatus};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-process container runtime.
///
/// Sandboxes only exist as records: nothing is executed. Used for dry runs and tests. Clones
/// share state, so a test can keep a handle while the lifecycle manager owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    images: HashSet<String>,
    sandboxes: BTreeMap<String, MemorySandbox>,
    pull_failure: Option<String>,
    start_failure: Option<String>,
    snapshot_failure: Option<String>,
    pulls: usize,
    next_id: u64,
}

#[derive(Debug, Clone)]
struct MemorySandbox {
    spec: SandboxSpec,
    info: SandboxInfo,
    snapshot: Option<ResourceSnapshot>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryRuntime {
    /// Creates an empty runtime with no local images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an image as available locally.
    pub async fn add_image(&self, image: impl Into<String>) {
        self.state.write().await.images.insert(image.into());
    }

    /// Makes every following pull fail with `reason`.
    pub async fn fail_pulls(&self, reason: impl Into<String>) {
        self.state.write().await.pull_failure = Some(reason.into());
    }

    /// Makes every following start fail with `reason`.
    pub async fn fail_starts(&self, reason: impl Into<String>) {
        self.state.write().await.start_failure = Some(reason.into());
    }

    /// Makes every following snapshot of an existing sandbox fail with `reason`.
    pub async fn fail_snapshots(&self, reason: impl Into<String>) {
        self.state.write().await.snapshot_failure = Some(reason.into());
    }

    /// Sets the counters returned by [`ContainerRuntime::snapshot`] for a sandbox.
    pub async fn set_snapshot(&self, name: &str, snapshot: ResourceSnapshot) -> CubicleResult<()> {
        let mut state = self.state.write().await;
        let sandbox = state
            .sandboxes
            .get_mut(name)
            .ok_or_else(|| CubicleError::NotFound(name.to_string()))?;
        sandbox.snapshot = Some(snapshot);
        Ok(())
    }

    /// Returns the spec a sandbox was created from.
    pub async fn spec(&self, name: &str) -> Option<SandboxSpec> {
        self.state
            .read()
            .await
            .sandboxes
            .get(name)
            .map(|s| s.spec.clone())
    }

    /// Returns how many pulls were performed.
    pub async fn pull_count(&self) -> usize {
        self.state.read().await.pulls
    }

    async fn set_status(&self, name: &str, status: SandboxStatus) -> CubicleResult<()> {
        let mut state = self.state.write().await;
        let sandbox = state
            .sandboxes
            .get_mut(name)
            .ok_or_else(|| CubicleError::NotFound(name.to_string()))?;
        sandbox.info = sandbox.info.clone().with_status(status);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Counters that read as a quarter of one CPU and a quarter of the memory limit.
fn default_snapshot(spec: &SandboxSpec) -> ResourceSnapshot {
    let limit = u64::try_from(spec.get_memory_bytes()).unwrap_or(0);
    ResourceSnapshot::builder()
        .cpu_total(1_250_000_000)
        .precpu_total(1_000_000_000)
        .system_cpu(2_000_000_000)
        .presystem_cpu(1_000_000_000)
        .online_cpus(u64::from(spec.get_cpu_count()))
        .memory_usage(limit / 4)
        .memory_limit(limit)
        .build()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn image_exists(&self, image: &str) -> CubicleResult<bool> {
        Ok(self.state.read().await.images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> CubicleResult<()> {
        let mut state = self.state.write().await;
        state.pulls += 1;
        if let Some(reason) = &state.pull_failure {
            return Err(CubicleError::ImagePullFailed {
                image: image.to_string(),
                reason: reason.clone(),
            });
        }

        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> CubicleResult<String> {
        let mut state = self.state.write().await;
        if state.sandboxes.contains_key(spec.get_name()) {
            return Err(CubicleError::RuntimeApi(format!(
                "name {} is already in use",
                spec.get_name()
            )));
        }
        if !state.images.contains(spec.get_image()) {
            return Err(CubicleError::RuntimeApi(format!(
                "no such image: {}",
                spec.get_image()
            )));
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        let info = SandboxInfo::builder()
            .id(id.clone())
            .name(spec.get_name().clone())
            .status(SandboxStatus::Created)
            .image(spec.get_image().clone())
            .created_at(Utc::now().to_rfc3339())
            .cpu_count(spec.get_cpu_count())
            .memory_bytes(spec.get_memory_bytes())
            .ports(spec.get_ports().clone())
            .build();

        state.sandboxes.insert(
            spec.get_name().clone(),
            MemorySandbox {
                spec: spec.clone(),
                info,
                snapshot: None,
            },
        );

        Ok(id)
    }

    async fn start(&self, name: &str) -> CubicleResult<()> {
        if let Some(reason) = self.state.read().await.start_failure.clone() {
            return Err(CubicleError::RuntimeApi(reason));
        }
        self.set_status(name, SandboxStatus::Running).await
    }

    async fn stop(&self, name: &str) -> CubicleResult<()> {
        self.set_status(name, SandboxStatus::Exited).await
    }

    async fn restart(&self, name: &str) -> CubicleResult<()> {
        self.set_status(name, SandboxStatus::Running).await
    }

    async fn remove(&self, name: &str, force: bool) -> CubicleResult<()> {
        let mut state = self.state.write().await;
        let sandbox = state
            .sandboxes
            .get(name)
            .ok_or_else(|| CubicleError::NotFound(name.to_string()))?;

        if sandbox.info.get_status() == SandboxStatus::Running && !force {
            return Err(CubicleError::RuntimeApi(format!(
                "cannot remove running sandbox {name}, stop it first or force removal"
            )));
        }

        state.sandboxes.remove(name);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> CubicleResult<SandboxInfo> {
        self.state
            .read()
            .await
            .sandboxes
            .get(name)
            .map(|s| s.info.clone())
            .ok_or_else(|| CubicleError::NotFound(name.to_string()))
    }

    async fn list(&self, prefix: &str) -> CubicleResult<Vec<SandboxInfo>> {
        Ok(self
            .state
            .read()
            .await
            .sandboxes
            .values()
            .filter(|s| s.info.get_name().starts_with(prefix))
            .map(|s| s.info.clone())
            .collect())
    }

    async fn snapshot(&self, name: &str) -> CubicleResult<ResourceSnapshot> {
        let state = self.state.read().await;
        let sandbox = state
            .sandboxes
            .get(name)
            .ok_or_else(|| CubicleError::NotFound(name.to_string()))?;

        if let Some(reason) = &state.snapshot_failure {
            return Err(CubicleError::RuntimeApi(reason.clone()));
        }

        if sandbox.info.get_status() != SandboxStatus::Running {
            return Ok(ResourceSnapshot::default());
        }

        Ok(sandbox
            .snapshot
            .unwrap_or_else(|| default_snapshot(&sandbox.spec)))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> SandboxSpec {
        SandboxSpec::builder()
            .name(name)
            .image("img:latest")
            .hostname("host")
            .cpu_count(2)
            .cpu_percent(100)
            .memory_bytes(1024)
            .memory_swap_bytes(2048)
            .build()
    }

    #[tokio::test]
    async fn test_memory_runtime_lifecycle() -> CubicleResult<()> {
        let runtime = MemoryRuntime::new();
        assert!(!runtime.image_exists("img:latest").await?);
        runtime.pull_image("img:latest").await?;
        assert!(runtime.image_exists("img:latest").await?);

        runtime.create(&spec("code-server-a")).await?;
        assert_eq!(
            runtime.inspect("code-server-a").await?.get_status(),
            SandboxStatus::Created
        );

        runtime.start("code-server-a").await?;
        assert_eq!(
            runtime.inspect("code-server-a").await?.get_status(),
            SandboxStatus::Running
        );

        assert!(matches!(
            runtime.remove("code-server-a", false).await,
            Err(CubicleError::RuntimeApi(_))
        ));

        runtime.stop("code-server-a").await?;
        runtime.remove("code-server-a", false).await?;
        assert!(matches!(
            runtime.inspect("code-server-a").await,
            Err(CubicleError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_runtime_list_and_snapshot() -> CubicleResult<()> {
        let runtime = MemoryRuntime::new();
        runtime.add_image("img:latest").await;
        runtime.create(&spec("code-server-a")).await?;
        runtime.create(&spec("other")).await?;
        runtime.start("code-server-a").await?;

        let listed = runtime.list("code-server").await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].get_name(), "code-server-a");

        assert_eq!(runtime.snapshot("other").await?, ResourceSnapshot::default());
        let snapshot = runtime.snapshot("code-server-a").await?;
        assert_eq!(snapshot.get_memory_usage(), Some(256));

        assert!(matches!(
            runtime.snapshot("missing").await,
            Err(CubicleError::NotFound(_))
        ));
        Ok(())
    }
}
