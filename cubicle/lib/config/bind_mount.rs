use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CubicleError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a bind mount can be written from inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindMode {
    /// Read and write.
    #[default]
    ReadWrite,

    /// Read only.
    ReadOnly,
}

/// A host path mounted into a sandbox, following Docker's `host:guest[:mode]` volume convention.
///
/// ## Format
/// - `host:guest` mounts `host` read-write at `guest` (e.g. "/srv/data:/data")
/// - `host:guest:ro` or `host:guest:rw` sets the mode explicitly
/// - `path` mounts the same path on both sides
///
/// A relative host path is resolved against the tenant's workspace by
/// [`BindMount::resolve_host`].
///
/// ## Examples
///
/// ```
/// use cubicle::config::{BindMode, BindMount};
///
/// let bind = "tools/ARMCompiler6.16:/usr/local/ARMCompiler6.16:ro"
///     .parse::<BindMount>()
///     .unwrap();
/// assert_eq!(bind.get_mode(), BindMode::ReadOnly);
/// assert_eq!(bind.to_string(), "tools/ARMCompiler6.16:/usr/local/ARMCompiler6.16:ro");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters, CopyGetters)]
pub struct BindMount {
    /// The host path.
    #[getset(get = "pub with_prefix")]
    host: PathBuf,

    /// The path inside the sandbox.
    #[getset(get = "pub with_prefix")]
    guest: PathBuf,

    /// The access mode.
    #[getset(get_copy = "pub with_prefix")]
    mode: BindMode,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BindMount {
    /// Creates a read-write bind mount.
    pub fn read_write(host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
            mode: BindMode::ReadWrite,
        }
    }

    /// Creates a read-only bind mount.
    pub fn read_only(host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
            mode: BindMode::ReadOnly,
        }
    }

    /// Returns true if the mount is read only.
    pub fn is_read_only(&self) -> bool {
        self.mode == BindMode::ReadOnly
    }

    /// Returns a copy whose relative host path is joined onto `base`.
    pub fn resolve_host(&self, base: impl AsRef<Path>) -> Self {
        if self.host.is_absolute() {
            return self.clone();
        }

        Self {
            host: base.as_ref().join(&self.host),
            ..self.clone()
        }
    }

    /// Renders the mount in the `host:guest:mode` form the container runtime expects.
    pub fn to_bind_spec(&self) -> String {
        self.to_string()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for BindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "rw"),
            Self::ReadOnly => write!(f, "ro"),
        }
    }
}

impl FromStr for BindMode {
    type Err = CubicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rw" => Ok(Self::ReadWrite),
            "ro" => Ok(Self::ReadOnly),
            _ => Err(CubicleError::InvalidBindMount(s.to_string())),
        }
    }
}

impl FromStr for BindMount {
    type Err = CubicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CubicleError::InvalidBindMount(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        let (host, guest, mode) = match parts.as_slice() {
            [path] => (*path, *path, BindMode::ReadWrite),
            [host, guest] => (*host, *guest, BindMode::ReadWrite),
            [host, guest, mode] => (*host, *guest, mode.parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };

        if host.is_empty() || guest.is_empty() || !guest.starts_with('/') {
            return Err(invalid());
        }

        Ok(Self {
            host: PathBuf::from(host),
            guest: PathBuf::from(guest),
            mode,
        })
    }
}

impl fmt::Display for BindMount {
    /// Formats the mount as "host:guest:mode".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.host.display(),
            self.guest.display(),
            self.mode
        )
    }
}

impl Serialize for BindMount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BindMount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
