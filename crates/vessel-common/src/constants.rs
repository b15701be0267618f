//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for vessel data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/vessel";

/// Returns the data directory, preferring `$HOME/.vessel` when it can be
/// created, falling back to `/var/lib/vessel`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".vessel");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Name of the state index file inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// First argument marking a process already re-executed by `reexec`.
pub const REEXEC_SENTINEL: &str = "init";

/// First argument of the bootstrap child spawned by run-with-setup.
pub const CHILD_SUBCOMMAND: &str = "child";

/// Environment variable carrying the container ID into the child.
pub const ENV_CONTAINER_ID: &str = "CONTAINER_ID";
/// Environment variable carrying the rootfs source into the child.
pub const ENV_CONTAINER_ROOTFS: &str = "CONTAINER_ROOTFS";
/// Environment variable carrying the hostname into the child.
pub const ENV_CONTAINER_HOSTNAME: &str = "CONTAINER_HOSTNAME";
/// Environment variable carrying the versioned bootstrap payload.
pub const ENV_CONTAINER_BOOTSTRAP: &str = "CONTAINER_BOOTSTRAP";

/// `PATH` handed to container processes when none is configured.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Number of ID characters used for the default hostname.
pub const HOSTNAME_ID_LEN: usize = 12;

/// Exit status of a bootstrap child that failed before exec.
pub const BOOTSTRAP_FAILURE_STATUS: i32 = 125;

/// Application name used in CLI output.
pub const APP_NAME: &str = "vessel";
