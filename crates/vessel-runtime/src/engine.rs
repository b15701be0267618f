//! Runtime engine that orchestrates container lifecycle.
//!
//! The engine ties the isolation spec, the run strategies, and the state
//! index together. Every transition is persisted before the next step.

use std::path::Path;
use std::time::Duration;

use vessel_common::config::RuntimeConfig;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerState;

use crate::container::Container;
use crate::orchestrator::{self, RunStrategy};
use crate::spec::{ContainerConfig, IsolationSpec};
use crate::state::StateStore;

/// The runtime engine that coordinates all container operations.
#[derive(Debug, Clone)]
pub struct Engine {
    runtime: RuntimeConfig,
    store: StateStore,
}

impl Engine {
    /// Creates an engine for `runtime`.
    #[must_use]
    pub fn new(runtime: RuntimeConfig) -> Self {
        let store = StateStore::open(&runtime);
        Self { runtime, store }
    }

    /// Runtime configuration in use.
    #[must_use]
    pub const fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// The state index.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Resolves `config` and persists the container as `Created`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the name is
    /// already taken, or the record cannot be saved.
    pub fn create(&self, config: &ContainerConfig) -> Result<(IsolationSpec, Container)> {
        let spec = IsolationSpec::from_config(config, &self.runtime)?;
        if self.store.find_by_name(&spec.name)?.is_some() {
            return Err(VesselError::Config {
                message: format!("container name {:?} is already in use", spec.name),
            });
        }
        let container = Container::from_spec(&spec);
        self.store.save(&container)?;
        tracing::info!(id = %spec.id, name = %spec.name, "container created");
        Ok((spec, container))
    }

    /// Creates, starts, and waits for a container.
    ///
    /// Returns the exit status of the command. Start failures and
    /// non-zero exits are still recorded as `Exited`.
    ///
    /// # Errors
    ///
    /// Returns the error of the run itself (see
    /// [`ContainerProcess::wait`](crate::process::ContainerProcess::wait)),
    /// or an error if the state index cannot be updated.
    pub fn run(&self, config: &ContainerConfig, strategy: RunStrategy) -> Result<i32> {
        let (spec, mut container) = self.create(config)?;
        let process = match orchestrator::start(&spec, &self.runtime, strategy) {
            Ok(process) => process,
            Err(e) => {
                self.record_exit(&mut container, orchestrator::failure_code(&e));
                return Err(e);
            }
        };
        container.mark_running(process.pid())?;
        self.store.save(&container)?;

        let outcome = process.wait();
        // A concurrent `stop` may have moved the record to `Stopped`.
        let mut latest = self.store.load(spec.id.as_str()).unwrap_or(container);
        self.record_exit(&mut latest, orchestrator::exit_code(&outcome));
        outcome
    }

    fn record_exit(&self, container: &mut Container, code: i32) {
        let saved = container
            .mark_exited(code)
            .and_then(|()| self.store.save(container));
        if let Err(e) = saved {
            tracing::warn!(id = %container.id, error = %e, "failed to record exit");
        }
    }

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, not running, or
    /// cannot be signaled.
    pub fn stop(&self, reference: &str, grace: Duration) -> Result<Container> {
        let mut container = self.store.load(reference)?;
        container.stop(grace)?;
        self.store.save(&container)?;
        Ok(container)
    }

    /// Removes a container record and its on-disk leftovers.
    ///
    /// A running container is refused unless `force` is set, in which case
    /// it is killed first. Unmounting and directory cleanup are best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, running without
    /// `force`, or the index cannot be updated.
    pub fn remove(&self, reference: &str, force: bool) -> Result<Container> {
        let container = self.store.load(reference)?;
        container.ensure_removable(force)?;
        if force {
            container.kill()?;
        }

        if let Some(rootfs) = &container.rootfs {
            if let Err(e) = rootfs.teardown() {
                tracing::warn!(id = %container.id, error = %e, "rootfs teardown failed");
            }
            if let Err(e) = rootfs.remove_scratch() {
                tracing::warn!(id = %container.id, error = %e, "overlay scratch cleanup failed");
            }
        }
        let dir = self.runtime.data_dir.join("containers").join(container.id.as_str());
        remove_dir_best_effort(&dir);

        let _ = self.store.delete(container.id.as_str())?;
        tracing::info!(id = %container.id, "container removed");
        Ok(container)
    }

    /// Lists containers, optionally only those in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn list(&self, state: Option<ContainerState>) -> Result<Vec<Container>> {
        match state {
            Some(state) => self.store.list_by_state(state),
            None => self.store.list(),
        }
    }
}

fn remove_dir_best_effort(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!(path = %dir.display(), "container directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), error = %e, "container directory cleanup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::new(RuntimeConfig::with_data_dir(dir.path().to_path_buf()));
        (dir, engine)
    }

    fn named(name: &str) -> ContainerConfig {
        let mut config = ContainerConfig::with_command(vec!["true".into()]);
        config.name = Some(name.into());
        config
    }

    #[test]
    fn create_persists_created_record() {
        let (_dir, engine) = engine();
        let (spec, container) = engine.create(&named("web")).expect("create");
        assert_eq!(container.state, ContainerState::Created);
        let stored = engine.store().load("web").expect("load");
        assert_eq!(stored.id, spec.id);
    }

    #[test]
    fn names_are_unique() {
        let (_dir, engine) = engine();
        let _ = engine.create(&named("web")).expect("create");
        assert!(engine.create(&named("web")).is_err());
    }

    #[test]
    fn list_filters_by_state() {
        let (_dir, engine) = engine();
        let _ = engine.create(&named("a")).expect("create");
        let _ = engine.create(&named("b")).expect("create");
        assert_eq!(engine.list(None).expect("list").len(), 2);
        assert!(engine.list(Some(ContainerState::Running)).expect("list").is_empty());
    }

    #[test]
    fn remove_cleans_up_record_and_directory() {
        let (dir, engine) = engine();
        let (spec, _) = engine.create(&named("web")).expect("create");
        let container_dir = dir.path().join("containers").join(spec.id.as_str());
        std::fs::create_dir_all(&container_dir).expect("mkdir");
        let _ = engine.remove("web", false).expect("remove");
        assert!(!container_dir.exists());
        assert!(engine.list(None).expect("list").is_empty());
    }

    #[test]
    fn running_container_needs_force() {
        let (_dir, engine) = engine();
        let (_, mut container) = engine.create(&named("web")).expect("create");
        container.mark_running(i32::MAX.unsigned_abs()).expect("start");
        engine.store().save(&container).expect("save");
        let err = engine.remove("web", false).expect_err("running");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::InvalidState);
        let _ = engine.remove("web", true).expect("forced");
    }

    #[test]
    fn stop_unknown_container_is_not_found() {
        let (_dir, engine) = engine();
        let err = engine.stop("nope", Duration::ZERO).expect_err("missing");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::NotFound);
    }
}
