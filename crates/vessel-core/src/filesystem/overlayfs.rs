//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks read-only layers under a single writable upper layer so the
//! container can write without touching the layers it was started from.

use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};
use vessel_common::error::{Result, VesselError};

use super::mount::ensure_dir;

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, passed to `lowerdir` in this order.
    ///
    /// The kernel gives the first entry the highest precedence.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`, on the same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Lays out `upper/` and `work/` under `scratch_dir`.
    #[must_use]
    pub fn with_scratch(lower_dirs: Vec<PathBuf>, scratch_dir: &Path, merged_dir: PathBuf) -> Self {
        Self {
            lower_dirs,
            upper_dir: scratch_dir.join("upper"),
            work_dir: scratch_dir.join("work"),
            merged_dir,
        }
    }

    /// Builds the `lowerdir=…,upperdir=…,workdir=…` mount data string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there are no lower layers or a path
    /// contains a character that would corrupt the option string.
    pub fn options(&self) -> Result<String> {
        if self.lower_dirs.is_empty() {
            return Err(VesselError::Config {
                message: "overlay requires at least one lower layer".into(),
            });
        }
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| option_path(p, true))
            .collect::<Result<Vec<_>>>()?
            .join(":");
        Ok(format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            option_path(&self.upper_dir, false)?,
            option_path(&self.work_dir, false)?
        ))
    }
}

fn option_path(path: &Path, in_lowerdir: bool) -> Result<String> {
    let text = path.to_str().ok_or_else(|| VesselError::Config {
        message: format!("overlay path {} is not valid UTF-8", path.display()),
    })?;
    if text.contains(',') || (in_lowerdir && text.contains(':')) {
        return Err(VesselError::Config {
            message: format!("overlay path {text:?} contains a separator character"),
        });
    }
    Ok(text.to_string())
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist,
/// then issues the `mount(2)` syscall with overlay-specific options.
///
/// # Errors
///
/// Returns an error if the options are invalid, directory creation fails,
/// or the mount syscall fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    let opts = config.options()?;
    ensure_dir(&config.upper_dir)?;
    ensure_dir(&config.work_dir)?;
    ensure_dir(&config.merged_dir)?;

    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| VesselError::mount(&config.merged_dir, format!("overlay: {e}")))?;

    tracing::info!(
        merged = %config.merged_dir.display(),
        layers = config.lower_dirs.len(),
        "overlayfs mounted"
    );
    Ok(())
}
