//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`.

use std::path::Path;

use nix::mount::{MntFlags, umount2};
use nix::unistd::chdir;
use vessel_common::error::{Result, VesselError};

/// Directory inside the new root that temporarily holds the old root.
pub const PUT_OLD: &str = ".pivot_root";

/// Switches the root filesystem to `new_root`.
///
/// `new_root` must be a mount point in the caller's mount namespace. The old
/// root is parked in `<new_root>/.pivot_root`, detached, and the directory
/// removed. A failing step aborts without restoring the previous root.
///
/// # Errors
///
/// Returns [`VesselError::PivotRoot`] naming the step that failed.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let fail = |step: &str, e: &dyn std::fmt::Display| VesselError::PivotRoot {
        new_root: new_root.to_path_buf(),
        message: format!("{step}: {e}"),
    };

    let put_old = new_root.join(PUT_OLD);
    std::fs::create_dir_all(&put_old).map_err(|e| fail("creating put_old", &e))?;

    tracing::info!(new_root = %new_root.display(), "performing pivot_root");
    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| fail("pivot_root", &e))?;
    chdir("/").map_err(|e| fail("chdir", &e))?;

    let old_root = Path::new("/").join(PUT_OLD);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| fail("detaching old root", &e))?;
    std::fs::remove_dir(&old_root).map_err(|e| fail("removing put_old", &e))?;
    tracing::debug!("old root detached");
    Ok(())
}
