use tokio::sync::Mutex;

use crate::{CubicleError, CubicleResult};

use super::{ContainerRuntime, ResourceUsage, SandboxInfo, SandboxSpec};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Drives sandboxes through their lifecycle on a [`ContainerRuntime`].
///
/// Calls into the runtime are serialized, so two requests never race on the same sandbox name.
pub struct SandboxLifecycleManager {
    runtime: Mutex<Box<dyn ContainerRuntime>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxLifecycleManager {
    /// Creates a manager over `runtime`.
    pub fn new(runtime: impl ContainerRuntime + 'static) -> Self {
        Self::from_boxed(Box::new(runtime))
    }

    /// Creates a manager over an already boxed runtime.
    pub fn from_boxed(runtime: Box<dyn ContainerRuntime>) -> Self {
        Self {
            runtime: Mutex::new(runtime),
        }
    }

    /// Creates and starts a sandbox, pulling its image first when missing.
    ///
    /// Fails with [`CubicleError::SandboxExists`] if a sandbox with the same name exists. When the
    /// sandbox was created but fails to start, it is removed again so a retry starts clean.
    pub async fn create(&self, spec: &SandboxSpec) -> CubicleResult<SandboxInfo> {
        let runtime = self.runtime.lock().await;
        let name = spec.get_name();

        match runtime.inspect(name).await {
            Ok(_) => return Err(CubicleError::SandboxExists(name.clone())),
            Err(CubicleError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if !runtime.image_exists(spec.get_image()).await? {
            tracing::info!(image = %spec.get_image(), "image not found locally");
            runtime.pull_image(spec.get_image()).await?;
        }

        let id = runtime.create(spec).await?;
        tracing::info!(sandbox = %name, %id, "sandbox created");

        if let Err(e) = runtime.start(name).await {
            tracing::error!(sandbox = %name, error = %e, "sandbox failed to start");
            if let Err(cleanup) = runtime.remove(name, true).await {
                tracing::warn!(sandbox = %name, error = %cleanup, "failed removing unstarted sandbox");
            }
            return Err(e);
        }

        tracing::info!(sandbox = %name, "sandbox started");
        runtime.inspect(name).await
    }

    /// Describes a sandbox.
    pub async fn get(&self, name: &str) -> CubicleResult<SandboxInfo> {
        self.runtime.lock().await.inspect(name).await
    }

    /// Starts a sandbox.
    pub async fn start(&self, name: &str) -> CubicleResult<()> {
        let runtime = self.runtime.lock().await;
        runtime.inspect(name).await?;
        runtime.start(name).await?;
        tracing::info!(sandbox = %name, "sandbox started");
        Ok(())
    }

    /// Stops a sandbox.
    pub async fn stop(&self, name: &str) -> CubicleResult<()> {
        let runtime = self.runtime.lock().await;
        runtime.inspect(name).await?;
        runtime.stop(name).await?;
        tracing::info!(sandbox = %name, "sandbox stopped");
        Ok(())
    }

    /// Restarts a sandbox.
    pub async fn restart(&self, name: &str) -> CubicleResult<()> {
        let runtime = self.runtime.lock().await;
        runtime.inspect(name).await?;
        runtime.restart(name).await?;
        tracing::info!(sandbox = %name, "sandbox restarted");
        Ok(())
    }

    /// Removes a sandbox. With `force`, a running sandbox is killed first.
    pub async fn remove(&self, name: &str, force: bool) -> CubicleResult<()> {
        let runtime = self.runtime.lock().await;
        runtime.inspect(name).await?;
        runtime.remove(name, force).await?;
        tracing::info!(sandbox = %name, force, "sandbox removed");
        Ok(())
    }

    /// Describes every sandbox whose name starts with `prefix`.
    pub async fn list(&self, prefix: &str) -> CubicleResult<Vec<SandboxInfo>> {
        self.runtime.lock().await.list(prefix).await
    }

    /// Returns the current utilization of a sandbox.
    ///
    /// A missing sandbox fails with [`CubicleError::NotFound`]. Any other failure while reading
    /// or computing the counters yields all zeros.
    pub async fn stats(&self, name: &str) -> CubicleResult<ResourceUsage> {
        let snapshot = {
            let runtime = self.runtime.lock().await;
            runtime.snapshot(name).await
        };

        match snapshot.and_then(|s| ResourceUsage::from_snapshot(&s)) {
            Ok(usage) => Ok(usage),
            Err(e @ CubicleError::NotFound(_)) => Err(e),
            Err(e) => {
                tracing::error!(sandbox = %name, error = %e, "failed reading sandbox stats");
                Ok(ResourceUsage::default())
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
