//! Runtime configuration passed explicitly to every component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VesselError};

/// Root configuration for the vessel runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base directory for state, mount points, and overlay scratch space.
    pub data_dir: PathBuf,
    /// Path to the state index file. Defaults to `<data_dir>/state.json`.
    pub state_file: Option<PathBuf>,
    /// Binary re-executed for run-with-setup. Defaults to the current executable.
    pub self_exe: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::with_data_dir(crate::constants::data_dir().clone())
    }
}

impl RuntimeConfig {
    /// Creates a configuration rooted at `data_dir`.
    #[must_use]
    pub const fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            state_file: None,
            self_exe: None,
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the effective state index path.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(crate::constants::STATE_FILE_NAME))
    }

    /// Returns the default mount point for a container's root filesystem.
    #[must_use]
    pub fn rootfs_mount_point(&self, container_id: &str) -> PathBuf {
        self.data_dir
            .join("containers")
            .join(container_id)
            .join("rootfs")
    }

    /// Returns the overlay scratch directory for a container.
    #[must_use]
    pub fn overlay_scratch_dir(&self, container_id: &str) -> PathBuf {
        self.data_dir.join("overlay").join(container_id)
    }

    /// Returns the binary to re-execute for the bootstrap child.
    ///
    /// # Errors
    ///
    /// Returns an error if no binary is configured and the current
    /// executable cannot be resolved.
    pub fn self_exe(&self) -> Result<PathBuf> {
        match &self.self_exe {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| VesselError::Io {
                path: "/proc/self/exe".into(),
                source: e,
            }),
        }
    }
}
