use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};
use thiserror::Error;

use crate::management::PortRange;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a cubicle-related operation.
pub type CubicleResult<T> = Result<T, CubicleError>;

/// An error that occurred while provisioning or managing a sandbox.
#[derive(Debug, Error)]
pub enum CubicleError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error returned by the port allocation database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while running database migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred while (de)serializing YAML.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The tenant already holds a port range.
    #[error("ports already allocated for tenant {tenant}: {range}")]
    AlreadyAllocated {
        /// The tenant.
        tenant: String,

        /// The range the tenant already holds.
        range: PortRange,
    },

    /// No contiguous block of the requested size is free.
    #[error("no available port range of size {0}")]
    NoAvailableRange(u16),

    /// The tenant holds no port range.
    #[error("no ports allocated for tenant {0}")]
    NotAllocated(String),

    /// The workspace directory could not be prepared.
    #[error("invalid workdir: {0}")]
    WorkdirInvalid(String),

    /// Copying the workspace template failed part way.
    #[error("failed copying {path}: {source}")]
    CopyFailed {
        /// The path being copied when the failure happened.
        path: PathBuf,

        /// The underlying error.
        source: std::io::Error,
    },

    /// The disk image tool failed to create an overlay.
    #[error("failed creating overlay {overlay} (exit code {code:?}): {stderr}")]
    OverlayCreationFailed {
        /// The overlay image that was being created.
        overlay: PathBuf,

        /// Exit code of the tool, if it exited normally.
        code: Option<i32>,

        /// Captured standard error of the tool.
        stderr: String,
    },

    /// The sandbox image could not be pulled.
    #[error("failed pulling image {image}: {reason}")]
    ImagePullFailed {
        /// The image reference.
        image: String,

        /// Reason reported by the runtime.
        reason: String,
    },

    /// The container runtime returned an error.
    #[error("container runtime error: {0}")]
    RuntimeApi(String),

    /// The sandbox does not exist.
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// A sandbox with the same name already exists.
    #[error("sandbox already exists: {0}")]
    SandboxExists(String),

    /// Resource usage could not be derived from a stats snapshot.
    #[error("stats computation failed: {0}")]
    StatsComputationFailed(String),

    /// The tenant id cannot be used in names and paths.
    #[error("invalid tenant id: {0:?}")]
    InvalidTenantId(String),

    /// The requested sandbox action is not one of start, stop, restart or remove.
    #[error("invalid sandbox action: {0:?}")]
    InvalidAction(String),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A bind mount string could not be parsed.
    #[error("invalid bind mount: {0}")]
    InvalidBindMount(String),

    /// A memory size string could not be parsed.
    #[error("invalid memory size: {0}")]
    InvalidMemorySize(String),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CubicleError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> CubicleError {
        CubicleError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns true if the error means the addressed sandbox or allocation does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CubicleError::NotFound(_) | CubicleError::NotAllocated(_)
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
