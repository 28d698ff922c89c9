//! Cubicle configuration types and helpers.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Deserializer, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    management::overlay_path_for,
    utils::{self, env_list, env_parse, env_string, LOG_SUBDIR, PORT_DB_FILENAME},
    CubicleError, CubicleResult,
};

use super::{defaults::*, parse_memory_size, BindMount};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The deployment configuration of a cubicle host.
///
/// Every field has a default, so an empty YAML document or an empty environment yields a working
/// configuration. See [`CubicleConfig::from_env`] for the environment variable names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
#[serde(default)]
pub struct CubicleConfig {
    /// Sandbox image name without tag.
    #[builder(default = DEFAULT_IMAGE.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    image: String,

    /// Sandbox image tag.
    #[builder(default = DEFAULT_TAG.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    tag: String,

    /// Hostname inside each sandbox.
    #[builder(default = DEFAULT_HOSTNAME.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    hostname: String,

    /// CPUs given to each sandbox.
    #[builder(default = DEFAULT_CPU_COUNT)]
    #[getset(get_copy = "pub with_prefix")]
    cpu_count: u32,

    /// Share of each CPU a sandbox may use, in percent.
    #[builder(default = DEFAULT_CPU_PERCENT)]
    #[getset(get_copy = "pub with_prefix")]
    cpu_percent: u32,

    /// Memory limit of each sandbox, e.g. `2g`.
    #[builder(default = DEFAULT_MEMORY_LIMIT.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    memory_limit: String,

    /// Memory plus swap limit of each sandbox, e.g. `3g`.
    #[builder(default = DEFAULT_MEMORY_SWAP.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    memory_swap: String,

    /// Template tree copied into every new workspace.
    #[builder(default = PathBuf::from(DEFAULT_WORKDIR_TEMPLATE), setter(into))]
    #[getset(get = "pub with_prefix")]
    workdir_template: PathBuf,

    /// Directory under which workspaces are created.
    #[builder(default = PathBuf::from(DEFAULT_WORKDIR_DEPLOY), setter(into))]
    #[getset(get = "pub with_prefix")]
    workdir_deploy: PathBuf,

    /// Base guest OS images that get an overlay in every workspace.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    guest_os_list: Vec<PathBuf>,

    /// Host directory holding the base images, mounted read-only at the same path.
    #[builder(default = PathBuf::from(DEFAULT_GUEST_OS_BASE_DIR), setter(into))]
    #[getset(get = "pub with_prefix")]
    guest_os_base_dir: PathBuf,

    /// Where the workspace's `guestos` directory is mounted.
    #[builder(default = PathBuf::from(DEFAULT_GUEST_OS_MOUNT), setter(into))]
    #[getset(get = "pub with_prefix")]
    guest_os_mount: PathBuf,

    /// Where the workspace's `code/config` directory is mounted.
    #[builder(default = PathBuf::from(DEFAULT_CODE_CONFIG_MOUNT), setter(into))]
    #[getset(get = "pub with_prefix")]
    code_config_mount: PathBuf,

    /// Where the workspace's `qvp` directory is mounted.
    #[builder(default = PathBuf::from(DEFAULT_QVP_BINARY_MOUNT), setter(into))]
    #[getset(get = "pub with_prefix")]
    qvp_binary_mount: PathBuf,

    /// Where the workspace's `tools` directory is mounted, read only.
    #[builder(default = PathBuf::from(DEFAULT_TOOLS_MOUNT), setter(into))]
    #[getset(get = "pub with_prefix")]
    tools_mount: PathBuf,

    /// Additional read-only mounts. Relative host paths are resolved against the workspace.
    #[builder(default)]
    #[serde(deserialize_with = "deserialize_extra_binds")]
    #[getset(get = "pub with_prefix")]
    extra_ro_binds: Vec<BindMount>,

    /// Service ports inside the sandbox.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    container_ports: ContainerPorts,

    /// Editor workspace directory inside the sandbox.
    #[builder(default = DEFAULT_WORKSPACE.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    default_workspace: String,

    /// Password for `sudo` inside the sandbox. Not passed when unset.
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[getset(get = "pub with_prefix")]
    sudo_password: Option<String>,

    /// Sandbox time zone.
    #[builder(default = DEFAULT_TZ.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    tz: String,

    /// User id the sandbox runs its services as. Defaults to the effective uid of the service.
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[getset(get_copy = "pub with_prefix")]
    puid: Option<u32>,

    /// Group id the sandbox runs its services as. Defaults to the effective gid of the service.
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[getset(get_copy = "pub with_prefix")]
    pgid: Option<u32>,

    /// First port handed out to tenants.
    #[builder(default = DEFAULT_PORT_BASE)]
    #[getset(get_copy = "pub with_prefix")]
    port_base: u16,

    /// Last port handed out to tenants.
    #[builder(default = DEFAULT_PORT_MAX)]
    #[getset(get_copy = "pub with_prefix")]
    port_max: u16,

    /// Width of each tenant's port range.
    #[builder(default = DEFAULT_PORT_RANGE_SIZE)]
    #[getset(get_copy = "pub with_prefix")]
    port_range_size: u16,

    /// Location of the port allocation database. Defaults to `<home>/ports.db`.
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    port_db_path: Option<PathBuf>,

    /// Disk image tool used to create overlays.
    #[builder(default = PathBuf::from(crate::management::DEFAULT_OVERLAY_TOOL), setter(into))]
    #[getset(get = "pub with_prefix")]
    overlay_tool: PathBuf,

    /// Directory holding cubicle's own state: the port database and logs.
    #[builder(default = utils::get_cubicle_home_path(), setter(into))]
    #[getset(get = "pub with_prefix")]
    home: PathBuf,
}

/// The service ports inside a sandbox that are forwarded to the tenant's host port range, in
/// range order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, CopyGetters)]
#[serde(default)]
#[getset(get_copy = "pub with_prefix")]
pub struct ContainerPorts {
    /// Editor, forwarded from `start + 0`.
    #[builder(default = DEFAULT_CODE_PORT)]
    editor: u16,

    /// Guest OS ssh, forwarded from `start + 1`.
    #[builder(default = DEFAULT_SSH_PORT)]
    shell: u16,

    /// Guest OS remote display, forwarded from `start + 2`.
    #[builder(default = DEFAULT_SPICE_PORT)]
    display: u16,

    /// File manager UI, forwarded from `start + 3`.
    #[builder(default = DEFAULT_FM_UI_PORT)]
    fm_ui: u16,

    /// File manager backend, forwarded from `start + 4`.
    #[builder(default = DEFAULT_FM_PORT)]
    fm_backend: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CubicleConfig {
    /// Builds a configuration from environment variables, falling back to defaults.
    ///
    /// Recognised variables: `DOCKER_IMAGE`, `DOCKER_TAG`, `DOCKER_HOSTNAME`, `DOCKER_CPU`,
    /// `DOCKER_CPU_PERCENT`, `DOCKER_MEM_LMT`, `DOCKER_MEM_SWAP`, `WORKDIR_TEMPLATE`,
    /// `WORKDIR_DEPLOY`, `GUEST_OS_LIST`, `GUEST_OS_BASE_DIR`, `GUEST_OS_MOUNT`,
    /// `CODE_CONFIG_MOUNT`, `QVP_BINARY_MOUNT`, `TOOLS_MOUNT`, `EXTRA_RO_BINDS`, `CODE_PORT`,
    /// `GUEST_OS_SSH_PORT`, `GUEST_OS_SPICE_PORT`, `OPENCXL_FM_UI_PORT`, `OPENCXL_FM_PORT`,
    /// `DEFAULT_WORKSPACE`, `SUDO_PASSWORD`, `TZ`, `PUID`, `PGID`, `PORT_BASE`, `PORT_MAX`,
    /// `PORT_RANGE_SIZE`, `PORT_DB_PATH`, `OVERLAY_TOOL` and `CUBICLE_HOME`.
    ///
    /// Lists (`GUEST_OS_LIST`, `EXTRA_RO_BINDS`) are comma separated. Extra binds default to
    /// read only.
    pub fn from_env() -> CubicleResult<Self> {
        let mut config = Self::default();

        if let Some(v) = env_string("DOCKER_IMAGE") {
            config.image = v;
        }
        if let Some(v) = env_string("DOCKER_TAG") {
            config.tag = v;
        }
        if let Some(v) = env_string("DOCKER_HOSTNAME") {
            config.hostname = v;
        }
        if let Some(v) = env_parse("DOCKER_CPU")? {
            config.cpu_count = v;
        }
        if let Some(v) = env_parse("DOCKER_CPU_PERCENT")? {
            config.cpu_percent = v;
        }
        if let Some(v) = env_string("DOCKER_MEM_LMT") {
            config.memory_limit = v;
        }
        if let Some(v) = env_string("DOCKER_MEM_SWAP") {
            config.memory_swap = v;
        }
        if let Some(v) = env_string("WORKDIR_TEMPLATE") {
            config.workdir_template = v.into();
        }
        if let Some(v) = env_string("WORKDIR_DEPLOY") {
            config.workdir_deploy = v.into();
        }

        let guest_os_list = env_list("GUEST_OS_LIST");
        if !guest_os_list.is_empty() {
            config.guest_os_list = guest_os_list.into_iter().map(PathBuf::from).collect();
        }

        if let Some(v) = env_string("GUEST_OS_BASE_DIR") {
            config.guest_os_base_dir = v.into();
        }
        if let Some(v) = env_string("GUEST_OS_MOUNT") {
            config.guest_os_mount = v.into();
        }
        if let Some(v) = env_string("CODE_CONFIG_MOUNT") {
            config.code_config_mount = v.into();
        }
        if let Some(v) = env_string("QVP_BINARY_MOUNT") {
            config.qvp_binary_mount = v.into();
        }
        if let Some(v) = env_string("TOOLS_MOUNT") {
            config.tools_mount = v.into();
        }

        let extra_ro_binds = env_list("EXTRA_RO_BINDS");
        if !extra_ro_binds.is_empty() {
            config.extra_ro_binds = extra_ro_binds
                .iter()
                .map(|s| parse_extra_bind(s))
                .collect::<CubicleResult<_>>()?;
        }

        if let Some(v) = env_parse("CODE_PORT")? {
            config.container_ports.editor = v;
        }
        if let Some(v) = env_parse("GUEST_OS_SSH_PORT")? {
            config.container_ports.shell = v;
        }
        if let Some(v) = env_parse("GUEST_OS_SPICE_PORT")? {
            config.container_ports.display = v;
        }
        if let Some(v) = env_parse("OPENCXL_FM_UI_PORT")? {
            config.container_ports.fm_ui = v;
        }
        if let Some(v) = env_parse("OPENCXL_FM_PORT")? {
            config.container_ports.fm_backend = v;
        }

        if let Some(v) = env_string("DEFAULT_WORKSPACE") {
            config.default_workspace = v;
        }
        if let Some(v) = env_string("SUDO_PASSWORD") {
            config.sudo_password = Some(v);
        }
        if let Some(v) = env_string("TZ") {
            config.tz = v;
        }
        config.puid = env_parse("PUID")?;
        config.pgid = env_parse("PGID")?;
        if let Some(v) = env_parse("PORT_BASE")? {
            config.port_base = v;
        }
        if let Some(v) = env_parse("PORT_MAX")? {
            config.port_max = v;
        }
        if let Some(v) = env_parse("PORT_RANGE_SIZE")? {
            config.port_range_size = v;
        }
        if let Some(v) = env_string("PORT_DB_PATH") {
            config.port_db_path = Some(v.into());
        }
        if let Some(v) = env_string("OVERLAY_TOOL") {
            config.overlay_tool = v.into();
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a YAML file. Missing fields take their defaults.
    pub async fn load(path: impl AsRef<Path>) -> CubicleResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to a YAML file.
    pub async fn save(&self, path: impl AsRef<Path>) -> CubicleResult<()> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path.as_ref(), content).await?;
        Ok(())
    }

    /// Checks the configuration for values that would make provisioning fail later.
    pub fn validate(&self) -> CubicleResult<()> {
        if self.image.trim().is_empty() {
            return Err(CubicleError::InvalidConfig("image must not be empty".into()));
        }

        if self.port_range_size < FORWARDED_SERVICE_COUNT {
            return Err(CubicleError::InvalidConfig(format!(
                "port range size {} is smaller than the {FORWARDED_SERVICE_COUNT} forwarded services",
                self.port_range_size
            )));
        }

        if self.port_base > self.port_max {
            return Err(CubicleError::InvalidConfig(format!(
                "port base {} is above port max {}",
                self.port_base, self.port_max
            )));
        }

        if self.cpu_count == 0 {
            return Err(CubicleError::InvalidConfig("cpu count must be at least 1".into()));
        }

        if !(1..=100).contains(&self.cpu_percent) {
            return Err(CubicleError::InvalidConfig(format!(
                "cpu percent {} is outside 1..=100",
                self.cpu_percent
            )));
        }

        let memory = self.memory_limit_bytes()?;
        let memory_swap = self.memory_swap_bytes()?;
        if memory_swap < memory {
            return Err(CubicleError::InvalidConfig(format!(
                "memory swap {} is below memory limit {}",
                self.memory_swap, self.memory_limit
            )));
        }

        let mut overlays = HashMap::new();
        for base in &self.guest_os_list {
            let overlay = overlay_path_for("", base);
            if let Some(other) = overlays.insert(overlay.clone(), base) {
                if other != base {
                    return Err(CubicleError::InvalidConfig(format!(
                        "guest images {} and {} both map to overlay {}",
                        other.display(),
                        base.display(),
                        overlay.display()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Returns the full image reference, `image:tag`.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Returns the memory limit in bytes.
    pub fn memory_limit_bytes(&self) -> CubicleResult<i64> {
        parse_memory_size(&self.memory_limit)
    }

    /// Returns the memory plus swap limit in bytes.
    pub fn memory_swap_bytes(&self) -> CubicleResult<i64> {
        parse_memory_size(&self.memory_swap)
    }

    /// Returns the port allocation database path.
    pub fn port_db_path(&self) -> PathBuf {
        self.port_db_path
            .clone()
            .unwrap_or_else(|| self.home.join(PORT_DB_FILENAME))
    }

    /// Returns the directory log files are written to.
    pub fn log_dir(&self) -> PathBuf {
        self.home.join(LOG_SUBDIR)
    }
}

impl ContainerPorts {
    /// Returns the container ports in the order they take host ports from a tenant's range.
    pub fn in_range_order(&self) -> [u16; FORWARDED_SERVICE_COUNT as usize] {
        [
            self.editor,
            self.shell,
            self.display,
            self.fm_ui,
            self.fm_backend,
        ]
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses an `EXTRA_RO_BINDS` item. Items without an explicit mode are read only.
fn parse_extra_bind(item: &str) -> CubicleResult<BindMount> {
    let bind: BindMount = item.parse()?;
    if item.matches(':').count() == 2 {
        return Ok(bind);
    }

    Ok(BindMount::read_only(bind.get_host(), bind.get_guest()))
}

fn deserialize_extra_binds<'de, D>(deserializer: D) -> Result<Vec<BindMount>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(deserializer)?
        .iter()
        .map(|s| parse_extra_bind(s).map_err(serde::de::Error::custom))
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for CubicleConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for ContainerPorts {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_default_config_is_valid() -> CubicleResult<()> {
        let config = CubicleConfig::default();
        config.validate()?;

        assert_eq!(config.image_ref(), "cxl.io/dev/code-server:latest");
        assert_eq!(config.get_port_range_size(), 5);
        assert_eq!(config.memory_limit_bytes()?, 2 * 1024 * 1024 * 1024);
        assert_eq!(
            config.get_container_ports().in_range_order(),
            [8443, 22, 3001, 3000, 8000]
        );
        assert_eq!(
            config.port_db_path(),
            config.get_home().join(PORT_DB_FILENAME)
        );
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let narrow = CubicleConfig::builder().port_range_size(4).build();
        assert!(matches!(narrow.validate(), Err(CubicleError::InvalidConfig(_))));

        let inverted = CubicleConfig::builder()
            .port_base(10000)
            .port_max(9000)
            .build();
        assert!(matches!(inverted.validate(), Err(CubicleError::InvalidConfig(_))));

        let swap = CubicleConfig::builder()
            .memory_limit("4g")
            .memory_swap("2g")
            .build();
        assert!(matches!(swap.validate(), Err(CubicleError::InvalidConfig(_))));

        let memory = CubicleConfig::builder().memory_limit("lots").build();
        assert!(matches!(memory.validate(), Err(CubicleError::InvalidMemorySize(_))));

        let cpu = CubicleConfig::builder().cpu_percent(0).build();
        assert!(cpu.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_overlays() {
        let colliding = CubicleConfig::builder()
            .guest_os_list(vec![
                PathBuf::from("/opt/os/a/ubuntu/disk.qcow2"),
                PathBuf::from("/opt/os/b/ubuntu/disk.qcow2"),
            ])
            .build();
        assert!(matches!(
            colliding.validate(),
            Err(CubicleError::InvalidConfig(ref msg)) if msg.contains("ubuntu/disk_overlay.qcow2")
        ));

        let distinct = CubicleConfig::builder()
            .guest_os_list(vec![
                PathBuf::from("/opt/os/a/ubuntu/disk.qcow2"),
                PathBuf::from("/opt/os/a/fedora/disk.qcow2"),
                PathBuf::from("/opt/os/a/ubuntu/disk.qcow2"),
            ])
            .build();
        assert!(distinct.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_yaml_with_defaults() -> CubicleResult<()> {
        let temp = tempdir()?;
        let path = temp.path().join("cubicle.yaml");
        tokio::fs::write(
            &path,
            r#"
image: registry.local/sandbox
port_base: 20000
port_range_size: 10
guest_os_list:
  - /opt/os/guestos_base/ubuntu/disk.qcow2
extra_ro_binds:
  - tools/arm:/usr/local/arm
  - /srv/share:/share:rw
container_ports:
  editor: 9443
"#,
        )
        .await?;

        let config = CubicleConfig::load(&path).await?;
        assert_eq!(config.get_image(), "registry.local/sandbox");
        assert_eq!(config.get_tag(), DEFAULT_TAG);
        assert_eq!(config.get_port_base(), 20000);
        assert_eq!(config.get_port_range_size(), 10);
        assert_eq!(config.get_guest_os_list().len(), 1);
        assert!(config.get_extra_ro_binds()[0].is_read_only());
        assert!(!config.get_extra_ro_binds()[1].is_read_only());
        assert_eq!(config.get_container_ports().get_editor(), 9443);
        assert_eq!(config.get_container_ports().get_shell(), DEFAULT_SSH_PORT);

        tokio::fs::write(&path, "port_range_size: 3\n").await?;
        assert!(CubicleConfig::load(&path).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_load() -> CubicleResult<()> {
        let temp = tempdir()?;
        let path = temp.path().join("cubicle.yaml");
        let config = CubicleConfig::builder()
            .home(temp.path().join("home"))
            .sudo_password("secret")
            .extra_ro_binds(vec![BindMount::read_only("tools/arm", "/usr/local/arm")])
            .build();

        config.save(&path).await?;
        assert_eq!(CubicleConfig::load(&path).await?, config);
        Ok(())
    }

    #[test]
    fn test_parse_extra_bind_defaults_to_read_only() -> CubicleResult<()> {
        assert!(parse_extra_bind("tools/arm:/usr/local/arm")?.is_read_only());
        assert!(!parse_extra_bind("/srv/share:/share:rw")?.is_read_only());
        Ok(())
    }
}
