//! The two run strategies.
//!
//! **Direct** clones the container command straight into its namespaces:
//! no root filesystem switch, no security layers. **With setup** clones a
//! fresh copy of this executable running the hidden `child` subcommand,
//! which builds the container from a [`BootstrapPayload`] and then execs
//! the command.
//!
//! [`BootstrapPayload`]: crate::handoff::BootstrapPayload

use vessel_common::config::RuntimeConfig;
use vessel_common::constants::CHILD_SUBCOMMAND;
use vessel_common::error::{Result, VesselError};
use vessel_core::namespace::spawn::{SpawnRequest, spawn_isolated};

use crate::handoff::child_env;
use crate::process::ContainerProcess;
use crate::spec::IsolationSpec;

/// Which path creates the container process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStrategy {
    /// Exec the command directly in new namespaces.
    Direct,
    /// Re-exec this binary to build the root filesystem and apply security.
    #[default]
    WithSetup,
}

/// Starts `spec` with the given strategy.
///
/// # Errors
///
/// See [`start_direct`] and [`start_with_setup`].
pub fn start(
    spec: &IsolationSpec,
    runtime: &RuntimeConfig,
    strategy: RunStrategy,
) -> Result<ContainerProcess> {
    match strategy {
        RunStrategy::Direct => start_direct(spec),
        RunStrategy::WithSetup => start_with_setup(spec, runtime),
    }
}

/// Clones the command into new namespaces without further setup.
///
/// The command is resolved through `PATH` and inherits the caller's
/// environment, overlaid with the container's own entries.
///
/// # Errors
///
/// Returns [`VesselError::ContainerStart`] if the process cannot be created.
pub fn start_direct(spec: &IsolationSpec) -> Result<ContainerProcess> {
    if spec.rootfs.is_some() {
        tracing::warn!(id = %spec.id, "direct run ignores the root filesystem");
    }
    let mut env: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| !spec.env.iter().any(|(key, _)| key == k))
        .collect();
    env.extend(spec.env.iter().cloned());

    let request = SpawnRequest::new(&spec.command[0], spec.command.clone())
        .namespaces(spec.namespaces)
        .working_dir(spec.working_dir.clone())
        .env(env)
        .search_path(true);
    spawn(spec, &request)
}

/// Clones this executable in `child` mode to build and harden the container.
///
/// # Errors
///
/// Returns an error if the executable path cannot be determined, and
/// [`VesselError::ContainerStart`] if the process cannot be created.
pub fn start_with_setup(spec: &IsolationSpec, runtime: &RuntimeConfig) -> Result<ContainerProcess> {
    let exe = runtime.self_exe()?;
    let mut args = vec![exe.display().to_string(), CHILD_SUBCOMMAND.to_string()];
    args.extend(spec.command.iter().cloned());

    let request = SpawnRequest::new(exe, args)
        .namespaces(spec.namespaces)
        .env(child_env(spec)?)
        .pass_status_fd(true);
    spawn(spec, &request)
}

fn spawn(spec: &IsolationSpec, request: &SpawnRequest) -> Result<ContainerProcess> {
    let child = spawn_isolated(request).map_err(|e| match e {
        VesselError::Config { .. } => e,
        other => VesselError::ContainerStart {
            id: spec.id.to_string(),
            cause: other.to_string(),
        },
    })?;
    tracing::info!(
        id = %spec.id,
        pid = child.pid().as_raw(),
        namespaces = %spec.namespaces,
        "container process created"
    );
    Ok(ContainerProcess::new(spec.id.clone(), child))
}

/// Runs `spec` directly and blocks until it exits.
///
/// # Errors
///
/// See [`ContainerProcess::wait`].
pub fn run_direct(spec: &IsolationSpec) -> Result<i32> {
    start_direct(spec)?.wait()
}

/// Runs `spec` with setup and blocks until it exits.
///
/// # Errors
///
/// See [`ContainerProcess::wait`].
pub fn run_with_setup(spec: &IsolationSpec, runtime: &RuntimeConfig) -> Result<i32> {
    start_with_setup(spec, runtime)?.wait()
}

/// Process exit code for the outcome of a run.
#[must_use]
pub fn exit_code(outcome: &Result<i32>) -> i32 {
    match outcome {
        Ok(code) => *code,
        Err(e) => failure_code(e),
    }
}

/// Process exit code for a failed run.
#[must_use]
pub const fn failure_code(err: &VesselError) -> i32 {
    use vessel_common::constants::BOOTSTRAP_FAILURE_STATUS;

    match err {
        VesselError::ContainerExited { status, .. } => *status,
        VesselError::ContainerStart { .. } => BOOTSTRAP_FAILURE_STATUS,
        _ => 1,
    }
}
