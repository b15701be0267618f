//! Child side of run-with-setup.
//!
//! Runs as the first process of the new namespaces, before the container
//! command exists. Order matters:
//!
//! 1. decode the payload, close the status pipe on exec, and detect the
//!    host LSM while the host `/sys` is still visible;
//! 2. make the mount tree private, set the hostname;
//! 3. mount the root filesystem and its pseudo-filesystems, `pivot_root`;
//! 4. change into the working directory;
//! 5. apply LSM, seccomp, capabilities;
//! 6. exec the command.
//!
//! Any failure is written to the status pipe and the child exits with
//! [`BOOTSTRAP_FAILURE_STATUS`]. The command is never exec'd after a
//! partial setup.

use std::convert::Infallible;
use std::ffi::CString;
use std::path::Path;

use vessel_common::constants::BOOTSTRAP_FAILURE_STATUS;
use vessel_common::error::{Result, VesselError};
use vessel_core::filesystem::mount::{make_rprivate, mount_essential_filesystems, mount_proc};
use vessel_core::filesystem::pivot_root::pivot_root;
use vessel_core::namespace::NamespaceKind;
use vessel_core::namespace::spawn::STATUS_FD;
use vessel_core::namespace::uts::set_hostname;
use vessel_core::security::SecurityPipeline;

use crate::handoff::{BootstrapPayload, container_path};
use crate::spec::IsolationSpec;

/// Builds the container around the calling process and execs `command`.
///
/// Returns only on failure, with the exit status to use.
pub fn run(command: &[String]) -> i32 {
    match bootstrap(command) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(error = %e, "container setup failed");
            report_failure(&e);
            BOOTSTRAP_FAILURE_STATUS
        }
    }
}

fn bootstrap(command: &[String]) -> Result<Infallible> {
    let payload = BootstrapPayload::from_env(|key| std::env::var(key).ok(), command)?;
    let spec = payload.spec;
    close_status_on_exec();
    tracing::debug!(id = %spec.id, "bootstrapping container");
    let mut pipeline = security_pipeline(&spec);

    prepare_mounts(&spec)?;
    if spec.namespaces.contains(NamespaceKind::Uts) {
        set_hostname(&spec.hostname)?;
    }
    if let Some(dir) = &spec.working_dir {
        nix::unistd::chdir(dir).map_err(|e| VesselError::Config {
            message: format!("cannot enter working directory {}: {e}", dir.display()),
        })?;
    }

    let command = if command.is_empty() { &spec.command } else { command };
    let target = ExecTarget::new(command, &exec_env(&spec))?;

    let _ = pipeline.apply()?;
    target.exec(&spec.id.to_string())
}

/// Built before `pivot_root`: the container's sysfs has no LSM markers.
fn security_pipeline(spec: &IsolationSpec) -> SecurityPipeline {
    SecurityPipeline::new(
        spec.lsm.clone(),
        spec.seccomp.clone(),
        spec.capabilities.clone(),
    )
}

/// Mount setup inside the new mount namespace.
fn prepare_mounts(spec: &IsolationSpec) -> Result<()> {
    let own_mounts = spec.namespaces.contains(NamespaceKind::Mount);
    if own_mounts {
        make_rprivate(Path::new("/"))?;
    }
    match &spec.rootfs {
        Some(_) if !own_mounts => Err(VesselError::Namespace {
            message: "a root filesystem requires a mount namespace".into(),
        }),
        Some(rootfs) => {
            rootfs.setup()?;
            mount_essential_filesystems(&rootfs.mount_point)?;
            pivot_root(&rootfs.mount_point)
        }
        None if own_mounts && spec.namespaces.contains(NamespaceKind::Pid) => {
            mount_proc(Path::new("/"))
        }
        None => Ok(()),
    }
}

/// Environment of the container command. `PATH` is always set.
fn exec_env(spec: &IsolationSpec) -> Vec<(String, String)> {
    let mut env = spec.env.clone();
    if !env.iter().any(|(k, _)| k == "PATH") {
        env.push(("PATH".to_string(), container_path(spec)));
    }
    env
}

/// Command line prepared before the seccomp filter is installed.
struct ExecTarget {
    program: CString,
    args: Vec<CString>,
    env: Vec<CString>,
}

impl ExecTarget {
    fn new(command: &[String], env: &[(String, String)]) -> Result<Self> {
        let args = command
            .iter()
            .map(|a| cstring(a.clone()))
            .collect::<Result<Vec<_>>>()?;
        let program = args.first().cloned().ok_or_else(|| VesselError::Config {
            message: "a container needs a command to run".into(),
        })?;
        let env = env
            .iter()
            .map(|(k, v)| cstring(format!("{k}={v}")))
            .collect::<Result<_>>()?;
        Ok(Self { program, args, env })
    }

    fn exec(&self, id: &str) -> Result<Infallible> {
        tracing::debug!(program = ?self.program, "exec container command");
        nix::unistd::execvpe(&self.program, &self.args, &self.env).map_err(|e| {
            VesselError::ContainerStart {
                id: id.to_string(),
                cause: format!("exec {}: {e}", self.program.to_string_lossy()),
            }
        })
    }
}

fn cstring(value: String) -> Result<CString> {
    CString::new(value).map_err(|e| VesselError::Config {
        message: format!("value contains an interior NUL byte: {e}"),
    })
}

/// The status pipe must close when the command replaces this process, so
/// the parent sees EOF exactly on success.
fn close_status_on_exec() {
    // SAFETY: fcntl on a descriptor number; EBADF when the pipe was not
    // passed is harmless.
    let _ = unsafe { libc::fcntl(STATUS_FD, libc::F_SETFD, libc::FD_CLOEXEC) };
}

fn report_failure(err: &VesselError) {
    let message = err.to_string();
    // SAFETY: writing an initialized byte slice to a descriptor that is
    // either the status pipe or closed.
    let _ = unsafe { libc::write(STATUS_FD, message.as_ptr().cast(), message.len()) };
}
