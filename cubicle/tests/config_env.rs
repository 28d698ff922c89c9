use std::{env, path::PathBuf};

use cubicle::{config::CubicleConfig, CubicleError, CubicleResult};
use serial_test::serial;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const VARS: &[&str] = &[
    "DOCKER_IMAGE",
    "DOCKER_TAG",
    "DOCKER_HOSTNAME",
    "DOCKER_CPU",
    "DOCKER_CPU_PERCENT",
    "DOCKER_MEM_LMT",
    "DOCKER_MEM_SWAP",
    "WORKDIR_TEMPLATE",
    "WORKDIR_DEPLOY",
    "GUEST_OS_LIST",
    "GUEST_OS_BASE_DIR",
    "GUEST_OS_MOUNT",
    "CODE_CONFIG_MOUNT",
    "QVP_BINARY_MOUNT",
    "TOOLS_MOUNT",
    "EXTRA_RO_BINDS",
    "CODE_PORT",
    "GUEST_OS_SSH_PORT",
    "GUEST_OS_SPICE_PORT",
    "OPENCXL_FM_UI_PORT",
    "OPENCXL_FM_PORT",
    "DEFAULT_WORKSPACE",
    "SUDO_PASSWORD",
    "TZ",
    "PUID",
    "PGID",
    "PORT_BASE",
    "PORT_MAX",
    "PORT_RANGE_SIZE",
    "PORT_DB_PATH",
    "OVERLAY_TOOL",
    "CUBICLE_HOME",
];

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test]
#[serial]
fn test_from_env_defaults() -> CubicleResult<()> {
    helper::clear();

    let config = CubicleConfig::from_env()?;
    assert_eq!(config, CubicleConfig::default());
    assert_eq!(config.get_sudo_password(), &None);
    Ok(())
}

#[test]
#[serial]
fn test_from_env_overrides() -> CubicleResult<()> {
    helper::clear();
    env::set_var("DOCKER_IMAGE", "registry.local/sandbox");
    env::set_var("DOCKER_TAG", "v2");
    env::set_var("DOCKER_CPU", "4");
    env::set_var("DOCKER_MEM_LMT", "4g");
    env::set_var("DOCKER_MEM_SWAP", "6g");
    env::set_var(
        "GUEST_OS_LIST",
        "/opt/os/guestos_base/ubuntu/disk.qcow2, /opt/os/guestos_base/fedora/disk.qcow2",
    );
    env::set_var(
        "EXTRA_RO_BINDS",
        "tools/ARMCompiler6.16:/usr/local/ARMCompiler6.16,/srv/share:/share:rw",
    );
    env::set_var("CODE_PORT", "9443");
    env::set_var("SUDO_PASSWORD", "secret");
    env::set_var("PUID", "1001");
    env::set_var("PORT_BASE", "20000");
    env::set_var("PORT_RANGE_SIZE", "10");
    env::set_var("CUBICLE_HOME", "/var/lib/cubicle");

    let config = CubicleConfig::from_env();
    helper::clear();
    let config = config?;

    assert_eq!(config.image_ref(), "registry.local/sandbox:v2");
    assert_eq!(config.get_cpu_count(), 4);
    assert_eq!(config.memory_limit_bytes()?, 4 * 1024 * 1024 * 1024);
    assert_eq!(config.get_guest_os_list().len(), 2);
    assert_eq!(
        config.get_guest_os_list()[1],
        PathBuf::from("/opt/os/guestos_base/fedora/disk.qcow2")
    );

    let binds = config.get_extra_ro_binds();
    assert!(binds[0].is_read_only());
    assert!(!binds[1].is_read_only());

    assert_eq!(config.get_container_ports().get_editor(), 9443);
    assert_eq!(config.get_sudo_password().as_deref(), Some("secret"));
    assert_eq!(config.get_puid(), Some(1001));
    assert_eq!(config.get_pgid(), None);
    assert_eq!(config.get_port_base(), 20000);
    assert_eq!(config.get_port_range_size(), 10);
    assert_eq!(
        config.port_db_path(),
        PathBuf::from("/var/lib/cubicle/ports.db")
    );
    Ok(())
}

#[test]
#[serial]
fn test_from_env_rejects_invalid_values() {
    helper::clear();

    env::set_var("PORT_RANGE_SIZE", "3");
    assert!(matches!(
        CubicleConfig::from_env(),
        Err(CubicleError::InvalidConfig(_))
    ));

    env::set_var("PORT_RANGE_SIZE", "five");
    assert!(matches!(
        CubicleConfig::from_env(),
        Err(CubicleError::InvalidConfig(ref msg)) if msg.contains("PORT_RANGE_SIZE")
    ));

    helper::clear();
    env::set_var("DOCKER_MEM_LMT", "8g");
    assert!(CubicleConfig::from_env().is_err());

    helper::clear();
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use super::*;

    pub(super) fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }
}
