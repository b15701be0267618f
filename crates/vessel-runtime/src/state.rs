//! Persistent state management.
//!
//! Maintains a local JSON index of all containers and their current
//! states, enabling daemon-less lifecycle management. Every write replaces
//! the whole index through a temporary file and a rename.

use std::path::{Path, PathBuf};

use vessel_common::config::RuntimeConfig;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerState;

use crate::container::Container;

/// Loads the state index from disk. A missing file is an empty index.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_state(path: &Path) -> Result<Vec<Container>> {
    tracing::debug!(path = %path.display(), "loading state index");
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists the state index to disk atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(path: &Path, entries: &[Container]) -> Result<()> {
    tracing::debug!(path = %path.display(), count = entries.len(), "saving state index");
    let io_err = |source| VesselError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(entries)?;
    std::fs::write(&tmp, content).map_err(|source| VesselError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Container records stored in one index file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Opens the index at `path`. Nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens the index configured in `runtime`.
    #[must_use]
    pub fn open(runtime: &RuntimeConfig) -> Self {
        Self::new(runtime.state_file())
    }

    /// Path of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts or replaces the record with the same ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or written.
    pub fn save(&self, container: &Container) -> Result<()> {
        let mut entries = load_state(&self.path)?;
        match entries.iter_mut().find(|c| c.id == container.id) {
            Some(existing) => existing.clone_from(container),
            None => entries.push(container.clone()),
        }
        save_state(&self.path, &entries)
    }

    /// Looks a container up by full ID, unique ID prefix, or name.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if nothing matches, and a
    /// configuration error if a prefix is ambiguous.
    pub fn load(&self, reference: &str) -> Result<Container> {
        let entries = load_state(&self.path)?;
        if let Some(found) = entries
            .iter()
            .find(|c| c.id.as_str() == reference || c.name == reference)
        {
            return Ok(found.clone());
        }
        let mut matches = entries
            .into_iter()
            .filter(|c| !reference.is_empty() && c.id.as_str().starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some(found), None) => Ok(found),
            (Some(_), Some(_)) => Err(VesselError::Config {
                message: format!("container reference {reference:?} is ambiguous"),
            }),
            (None, _) => Err(VesselError::NotFound {
                kind: "container",
                id: reference.to_string(),
            }),
        }
    }

    /// Finds a container by exact name.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Container>> {
        Ok(load_state(&self.path)?.into_iter().find(|c| c.name == name))
    }

    /// Removes the record with `id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or written.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = load_state(&self.path)?;
        let before = entries.len();
        entries.retain(|c| c.id.as_str() != id);
        if entries.len() == before {
            return Ok(false);
        }
        save_state(&self.path, &entries)?;
        Ok(true)
    }

    /// All records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn list(&self) -> Result<Vec<Container>> {
        let mut entries = load_state(&self.path)?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    /// Records in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn list_by_state(&self, state: ContainerState) -> Result<Vec<Container>> {
        Ok(self.list()?.into_iter().filter(|c| c.state == state).collect())
    }
}
