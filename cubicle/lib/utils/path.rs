use std::path::PathBuf;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of the user's home where cubicle state is kept by default.
pub const CUBICLE_SUBDIR: &str = ".cubicle";

/// The sub directory of the cubicle home where log files are written.
pub const LOG_SUBDIR: &str = "log";

/// The file name of the port allocation database inside the cubicle home.
pub const PORT_DB_FILENAME: &str = "ports.db";

/// The prefix of the rolling service log file.
pub const LOG_FILE_PREFIX: &str = "cubicle.log";

/// The file that marks a workspace as fully provisioned.
pub const SIGNATURE_FILENAME: &str = "signature.txt";

/// The workspace sub directory holding guest OS overlay images.
pub const GUESTOS_SUBDIR: &str = "guestos";

/// The workspace sub directory holding the editor configuration.
pub const CODE_CONFIG_SUBDIR: &str = "code/config";

/// The workspace sub directory holding the simulator binaries.
pub const QVP_SUBDIR: &str = "qvp";

/// The workspace sub directory holding the toolchain.
pub const TOOLS_SUBDIR: &str = "tools";

/// The host device passed through for hardware virtualization.
pub const KVM_DEVICE: &str = "/dev/kvm";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `~/.cubicle`, or `./.cubicle` when the home directory cannot be determined.
pub fn default_cubicle_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CUBICLE_SUBDIR)
}
