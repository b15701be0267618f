//! Container root filesystem preparation.
//!
//! A [`RootFs`] with no layers is a recursive bind mount of `source`; with
//! layers it is an overlay union whose writable state lives in `scratch_dir`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};

use super::mount::{bind_mount, unmount_lazy};
use super::overlayfs::{OverlayConfig, mount_overlay};

/// Root filesystem description for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    /// Directory bind-mounted as the root. Unused when `layers` is non-empty.
    pub source: PathBuf,
    /// Where the prepared root is mounted.
    pub mount_point: PathBuf,
    /// Overlay lower layers in `lowerdir` order; empty selects a bind mount.
    #[serde(default)]
    pub layers: Vec<PathBuf>,
    /// Holds `upper/` and `work/` for the overlay strategy.
    pub scratch_dir: PathBuf,
}

/// How [`RootFs::setup`] prepares the mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFsStrategy {
    /// Recursive bind mount of `source`.
    Bind,
    /// Overlay union of `layers`.
    Overlay,
}

impl RootFs {
    /// Describes a bind-mounted root.
    #[must_use]
    pub fn bind(source: impl Into<PathBuf>, mount_point: impl Into<PathBuf>) -> Self {
        let mount_point = mount_point.into();
        Self {
            source: source.into(),
            scratch_dir: mount_point.clone(),
            mount_point,
            layers: Vec::new(),
        }
    }

    /// Describes an overlay root.
    #[must_use]
    pub fn overlay(
        layers: Vec<PathBuf>,
        mount_point: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: layers.first().cloned().unwrap_or_default(),
            mount_point: mount_point.into(),
            layers,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Returns the strategy selected by `layers`.
    #[must_use]
    pub fn strategy(&self) -> RootFsStrategy {
        if self.layers.is_empty() {
            RootFsStrategy::Bind
        } else {
            RootFsStrategy::Overlay
        }
    }

    /// Returns the overlay configuration this root would mount.
    #[must_use]
    pub fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig::with_scratch(self.layers.clone(), &self.scratch_dir, self.mount_point.clone())
    }

    /// Mounts the root at `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns a mount error if `source` (bind) is inaccessible or the
    /// mount syscall fails, and a configuration error for unusable overlay
    /// paths.
    pub fn setup(&self) -> Result<()> {
        match self.strategy() {
            RootFsStrategy::Bind => {
                tracing::info!(
                    source = %self.source.display(),
                    mount_point = %self.mount_point.display(),
                    "binding root filesystem"
                );
                bind_mount(&self.source, &self.mount_point, true)
            }
            RootFsStrategy::Overlay => mount_overlay(&self.overlay_config()),
        }
    }

    /// Lazily unmounts `mount_point`. Succeeds when nothing is mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails for another reason.
    pub fn teardown(&self) -> Result<()> {
        if unmount_lazy(&self.mount_point)? {
            tracing::info!(mount_point = %self.mount_point.display(), "root filesystem unmounted");
        }
        Ok(())
    }

    /// Removes the overlay `upper/` and `work/` directories.
    ///
    /// Does nothing for bind roots, whose scratch is never written.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing directory cannot be removed.
    pub fn remove_scratch(&self) -> Result<()> {
        if self.strategy() == RootFsStrategy::Bind {
            return Ok(());
        }
        let overlay = self.overlay_config();
        for dir in [&overlay.upper_dir, &overlay.work_dir] {
            remove_dir_if_present(dir)?;
        }
        // Only removes the scratch root once it is empty.
        let _ = std::fs::remove_dir(&self.scratch_dir);
        Ok(())
    }
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VesselError::Io {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}
