//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default sandbox image, without tag.
pub const DEFAULT_IMAGE: &str = "cxl.io/dev/code-server";

/// The default sandbox image tag.
pub const DEFAULT_TAG: &str = "latest";

/// The default hostname inside a sandbox.
pub const DEFAULT_HOSTNAME: &str = "cxl-qvp";

/// The default number of CPUs given to a sandbox.
pub const DEFAULT_CPU_COUNT: u32 = 2;

/// The default share of each CPU a sandbox may use, in percent.
pub const DEFAULT_CPU_PERCENT: u32 = 100;

/// The default memory limit of a sandbox.
pub const DEFAULT_MEMORY_LIMIT: &str = "2g";

/// The default memory plus swap limit of a sandbox.
pub const DEFAULT_MEMORY_SWAP: &str = "3g";

/// The default workspace template directory.
pub const DEFAULT_WORKDIR_TEMPLATE: &str = "/opt/cxl/";

/// The default directory under which workspaces are deployed.
pub const DEFAULT_WORKDIR_DEPLOY: &str = "/home/vms/";

/// The default host directory holding the read-only guest OS base images.
pub const DEFAULT_GUEST_OS_BASE_DIR: &str = "/opt/os/guestos_base";

/// The default mount point of the workspace's guest OS overlays.
pub const DEFAULT_GUEST_OS_MOUNT: &str = "/opt/os/guestos";

/// The default mount point of the workspace's editor configuration.
pub const DEFAULT_CODE_CONFIG_MOUNT: &str = "/config";

/// The default mount point of the workspace's simulator binaries.
pub const DEFAULT_QVP_BINARY_MOUNT: &str = "/opt/qvp";

/// The default mount point of the workspace's toolchain.
pub const DEFAULT_TOOLS_MOUNT: &str = "/opt/tools";

/// Editor port inside the sandbox.
pub const DEFAULT_CODE_PORT: u16 = 8443;

/// Guest OS ssh port inside the sandbox.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Guest OS remote display port inside the sandbox.
pub const DEFAULT_SPICE_PORT: u16 = 3001;

/// File manager UI port inside the sandbox.
pub const DEFAULT_FM_UI_PORT: u16 = 3000;

/// File manager backend port inside the sandbox.
pub const DEFAULT_FM_PORT: u16 = 8000;

/// The default editor workspace inside the sandbox.
pub const DEFAULT_WORKSPACE: &str = "/config/workspace";

/// The default sandbox time zone.
pub const DEFAULT_TZ: &str = "Etc/UTC";

/// The first port handed out to tenants.
pub const DEFAULT_PORT_BASE: u16 = 9000;

/// The last port handed out to tenants.
pub const DEFAULT_PORT_MAX: u16 = 65535;

/// The number of forwarded services, and so the smallest usable range width.
pub const FORWARDED_SERVICE_COUNT: u16 = 5;

/// The default width of a tenant's port range.
pub const DEFAULT_PORT_RANGE_SIZE: u16 = FORWARDED_SERVICE_COUNT;

/// Default address of the HTTP server.
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:5001";
