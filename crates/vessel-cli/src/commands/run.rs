//! `vessel run` — Run a command in a new container and wait for it.

use std::path::PathBuf;

use clap::Args;
use vessel_common::config::RuntimeConfig;
use vessel_common::error::VesselError;
use vessel_core::security::{Capability, CapabilitySet, LsmProfile, SeccompProfile};
use vessel_runtime::engine::Engine;
use vessel_runtime::orchestrator::{RunStrategy, failure_code};
use vessel_runtime::spec::ContainerConfig;

use crate::output::report_error;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON container configuration; flags below override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Directory bind-mounted as the root filesystem.
    #[arg(long, value_name = "DIR")]
    pub rootfs: Option<PathBuf>,

    /// Overlay lower layer, topmost first. Repeatable; replaces --rootfs.
    #[arg(long = "layer", value_name = "DIR")]
    pub layers: Vec<PathBuf>,

    /// Where the root filesystem is mounted.
    #[arg(long, value_name = "DIR")]
    pub mount_point: Option<PathBuf>,

    /// Environment entry. Repeatable.
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Working directory inside the container.
    #[arg(short, long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Container hostname.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Also isolate IPC and network.
    #[arg(long)]
    pub isolate: bool,

    /// Run in a new user namespace mapped to the invoking user.
    #[arg(long)]
    pub userns: bool,

    /// Disable capability dropping, seccomp, and LSM confinement.
    #[arg(long)]
    pub privileged: bool,

    /// Keep a capability on top of the default set. Repeatable.
    #[arg(long, value_name = "CAP")]
    pub cap_add: Vec<Capability>,

    /// Drop a capability from the default set. Repeatable.
    #[arg(long, value_name = "CAP")]
    pub cap_drop: Vec<Capability>,

    /// Seccomp profile JSON instead of the built-in one.
    #[arg(long, value_name = "FILE", conflicts_with = "no_seccomp")]
    pub seccomp: Option<PathBuf>,

    /// Install no seccomp filter.
    #[arg(long)]
    pub no_seccomp: bool,

    /// AppArmor profile to switch to before exec.
    #[arg(long, value_name = "PROFILE", conflicts_with = "selinux")]
    pub apparmor: Option<String>,

    /// SELinux context to exec with.
    #[arg(long, value_name = "CONTEXT")]
    pub selinux: Option<String>,

    /// Exec the command directly: no root filesystem, no security layers.
    #[arg(long)]
    pub direct: bool,

    /// Command and arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Builds the container configuration from the optional file and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or seccomp file cannot be read.
    pub fn container_config(&self) -> anyhow::Result<ContainerConfig> {
        let mut config = match &self.config {
            Some(path) => ContainerConfig::load(path)?,
            None => ContainerConfig::default(),
        };
        if !self.command.is_empty() {
            config.command.clone_from(&self.command);
        }
        if self.name.is_some() {
            config.name.clone_from(&self.name);
        }
        if self.rootfs.is_some() {
            config.rootfs.clone_from(&self.rootfs);
        }
        if !self.layers.is_empty() {
            config.layers.clone_from(&self.layers);
        }
        if self.mount_point.is_some() {
            config.mount_point.clone_from(&self.mount_point);
        }
        config.env.extend(self.env.iter().cloned());
        if self.workdir.is_some() {
            config.working_dir.clone_from(&self.workdir);
        }
        if self.hostname.is_some() {
            config.hostname.clone_from(&self.hostname);
        }
        config.isolate |= self.isolate;
        config.user_namespace |= self.userns;
        config.privileged |= self.privileged;

        if !self.cap_add.is_empty() || !self.cap_drop.is_empty() {
            config.capabilities = Some(CapabilitySet::Explicit {
                add: self.cap_add.clone(),
                drop: self.cap_drop.clone(),
            });
        }
        if let Some(path) = &self.seccomp {
            config.seccomp = Some(SeccompProfile::load(path)?);
        } else if self.no_seccomp {
            config.seccomp = Some(SeccompProfile::disabled());
        }
        if let Some(profile) = &self.apparmor {
            config.lsm = Some(LsmProfile::apparmor(profile.clone()));
        } else if let Some(context) = &self.selinux {
            config.lsm = Some(LsmProfile::selinux(context.clone()));
        }
        Ok(config)
    }

    const fn strategy(&self) -> RunStrategy {
        if self.direct {
            RunStrategy::Direct
        } else {
            RunStrategy::WithSetup
        }
    }
}

/// Executes the `run` command.
///
/// Returns the container's exit status, or 125 when it could not start.
///
/// # Errors
///
/// Returns an error if the configuration cannot be built.
pub fn execute(args: RunArgs, runtime: RuntimeConfig) -> anyhow::Result<i32> {
    let config = args.container_config()?;
    let engine = Engine::new(runtime);
    match engine.run(&config, args.strategy()) {
        Ok(code) => Ok(code),
        Err(e @ VesselError::ContainerExited { .. }) => {
            tracing::debug!(error = %e, "container exited non-zero");
            Ok(failure_code(&e))
        }
        Err(e) => {
            report_error(&e);
            Ok(failure_code(&e))
        }
    }
}
