//! User namespace isolation.
//!
//! Maps the container's root to the invoking host user, enabling
//! rootless containers.

use std::fs;
use std::path::Path;

use nix::unistd::Pid;
use vessel_common::error::{Result, VesselError};

/// Writes the UID/GID maps for a child in a new user namespace.
///
/// Maps container root (ID 0) onto `host_uid`/`host_gid` with a range of
/// one. `setgroups` is denied first, as the kernel requires for
/// unprivileged writers of `gid_map`.
///
/// # Errors
///
/// Returns an error if writing to `/proc/<pid>/setgroups`,
/// `/proc/<pid>/uid_map`, or `/proc/<pid>/gid_map` fails.
pub fn write_id_maps(pid: Pid, host_uid: u32, host_gid: u32) -> Result<()> {
    let proc_dir = Path::new("/proc").join(pid.as_raw().to_string());
    write_id_maps_at(&proc_dir, host_uid, host_gid)?;
    tracing::debug!(pid = pid.as_raw(), host_uid, host_gid, "wrote UID/GID map");
    Ok(())
}

fn write_id_maps_at(proc_dir: &Path, host_uid: u32, host_gid: u32) -> Result<()> {
    let setgroups_path = proc_dir.join("setgroups");
    if setgroups_path.exists() {
        write_proc(&setgroups_path, "deny")?;
    }
    write_proc(&proc_dir.join("uid_map"), &id_map_line(0, host_uid, 1))?;
    write_proc(&proc_dir.join("gid_map"), &id_map_line(0, host_gid, 1))
}

fn write_proc(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| VesselError::Namespace {
        message: format!("writing {}: {e}", path.display()),
    })
}

/// Formats one line of a `uid_map`/`gid_map` file.
#[must_use]
pub fn id_map_line(inside: u32, outside: u32, count: u32) -> String {
    format!("{inside} {outside} {count}\n")
}
