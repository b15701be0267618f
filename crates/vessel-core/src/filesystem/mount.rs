//! Mount utilities for container filesystem setup.
//!
//! Handles bind mounts, mount propagation, and the `/proc`, `/sys`, `/dev`
//! pseudo-filesystems inside the container's mount namespace.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use vessel_common::error::{Result, VesselError};

/// Character devices created in the container's `/dev`: name, major, minor.
pub const DEVICE_NODES: [(&str, u64, u64); 4] = [
    ("null", 1, 3),
    ("zero", 1, 5),
    ("random", 1, 8),
    ("urandom", 1, 9),
];

/// Creates a bind mount from `source` to `target`.
///
/// `target` is created as a directory when missing.
///
/// # Errors
///
/// Returns an error if `source` is inaccessible or the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path, recursive: bool) -> Result<()> {
    std::fs::metadata(source)
        .map_err(|e| VesselError::mount(target, format!("source {}: {e}", source.display())))?;
    ensure_dir(target)?;
    let mut flags = MsFlags::MS_BIND;
    if recursive {
        flags |= MsFlags::MS_REC;
    }
    mount(Some(source), target, None::<&str>, flags, None::<&str>)
        .map_err(|e| VesselError::mount(target, format!("bind from {}: {e}", source.display())))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        recursive,
        "bind mount created"
    );
    Ok(())
}

/// Marks every mount under `path` private so nothing mounted afterwards
/// propagates back to the host.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn make_rprivate(path: &Path) -> Result<()> {
    mount(
        None::<&str>,
        path,
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| VesselError::mount(path, format!("making mounts private: {e}")))?;
    tracing::debug!(path = %path.display(), "mount propagation set to rprivate");
    Ok(())
}

/// Lazily detaches the filesystem mounted at `target`.
///
/// Returns `false` when nothing was mounted there.
///
/// # Errors
///
/// Returns an error if `umount2(2)` fails for any reason other than the
/// target not being a mount point or not existing.
pub fn unmount_lazy(target: &Path) -> Result<bool> {
    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "lazily unmounted");
            Ok(true)
        }
        Err(e) if is_not_mounted(e) => {
            tracing::debug!(target = %target.display(), "nothing mounted, skipping unmount");
            Ok(false)
        }
        Err(e) => Err(VesselError::mount(target, format!("unmount: {e}"))),
    }
}

/// Returns whether an `umount2(2)` error means "nothing to unmount".
#[must_use]
pub const fn is_not_mounted(errno: Errno) -> bool {
    matches!(errno, Errno::EINVAL | Errno::ENOENT)
}

/// Mounts a fresh `proc` filesystem at `<root>/proc`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_proc(root: &Path) -> Result<()> {
    let target = root.join("proc");
    pseudo_mount(
        "proc",
        &target,
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None,
    )
}

/// Mounts a read-only `sysfs` at `<root>/sys`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_sys(root: &Path) -> Result<()> {
    let target = root.join("sys");
    pseudo_mount(
        "sysfs",
        &target,
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
        None,
    )
}

/// Mounts a `tmpfs` at `<root>/dev` and populates the basic device nodes.
///
/// Existing nodes are kept. When `mknod(2)` is not permitted (inside a user
/// namespace) the host node is bind-mounted instead.
///
/// # Errors
///
/// Returns an error if the tmpfs cannot be mounted or a node can neither be
/// created nor bind-mounted.
pub fn mount_dev(root: &Path) -> Result<()> {
    let dev = root.join("dev");
    pseudo_mount(
        "tmpfs",
        &dev,
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755,size=65536k"),
    )?;
    for (name, major, minor) in DEVICE_NODES {
        create_device_node(&dev.join(name), major, minor)?;
    }
    Ok(())
}

/// Mounts `/proc` (required), then `/sys` and `/dev` (best-effort) under `root`.
///
/// # Errors
///
/// Returns an error only if `/proc` cannot be mounted.
pub fn mount_essential_filesystems(root: &Path) -> Result<()> {
    mount_proc(root)?;
    if let Err(e) = mount_sys(root) {
        tracing::warn!(error = %e, "sysfs not mounted");
    }
    if let Err(e) = mount_dev(root) {
        tracing::warn!(error = %e, "/dev not populated");
    }
    Ok(())
}

fn pseudo_mount(fstype: &str, target: &Path, flags: MsFlags, data: Option<&str>) -> Result<()> {
    ensure_dir(target)?;
    match mount(Some(fstype), target, Some(fstype), flags, data) {
        Ok(()) => {
            tracing::debug!(fstype, target = %target.display(), "pseudo-filesystem mounted");
            Ok(())
        }
        Err(Errno::EBUSY) => {
            tracing::debug!(fstype, target = %target.display(), "already mounted");
            Ok(())
        }
        Err(e) => Err(VesselError::mount(target, format!("{fstype}: {e}"))),
    }
}

fn create_device_node(path: &Path, major: u64, minor: u64) -> Result<()> {
    match mknod(path, SFlag::S_IFCHR, Mode::from_bits_truncate(0o666), makedev(major, minor)) {
        Ok(()) => {
            // mknod(2) applies the umask; device nodes must be world-accessible.
            set_mode(path, 0o666)?;
            Ok(())
        }
        Err(Errno::EEXIST) => Ok(()),
        Err(Errno::EPERM) => bind_host_device(path),
        Err(e) => Err(VesselError::mount(path, format!("mknod: {e}"))),
    }
}

fn bind_host_device(path: &Path) -> Result<()> {
    let name = path.file_name().unwrap_or_default();
    let host = PathBuf::from("/dev").join(name);
    if !path.exists() {
        let _ = std::fs::File::create(path).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    mount(Some(&host), path, None::<&str>, MsFlags::MS_BIND, None::<&str>)
        .map_err(|e| VesselError::mount(path, format!("bind of {}: {e}", host.display())))?;
    tracing::debug!(device = %host.display(), "host device bind-mounted");
    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| VesselError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[test]
    fn not_mounted_errnos() {
        assert!(is_not_mounted(Errno::EINVAL));
        assert!(is_not_mounted(Errno::ENOENT));
        assert!(!is_not_mounted(Errno::EPERM));
        assert!(!is_not_mounted(Errno::EBUSY));
    }

    #[test]
    fn device_table_has_standard_numbers() {
        let null = DEVICE_NODES.iter().find(|(n, _, _)| *n == "null").expect("null");
        assert_eq!((null.1, null.2), (1, 3));
        assert_eq!(DEVICE_NODES.len(), 4);
    }

    #[test]
    fn bind_mount_of_missing_source_is_mount_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = bind_mount(&dir.path().join("missing"), &dir.path().join("target"), true)
            .expect_err("missing source");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::Mount);
    }

    #[test]
    fn unprivileged_proc_mount_fails_with_mount_error() {
        if is_root() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let err = mount_proc(dir.path()).expect_err("needs privilege");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::Mount);
        assert!(dir.path().join("proc").is_dir());
    }

    #[test]
    fn unprivileged_unmount_is_an_error() {
        if is_root() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        // Unprivileged callers get EPERM before the kernel checks the target.
        assert!(unmount_lazy(dir.path()).is_err());
    }
}
