//! Container configuration and the isolation spec built from it.
//!
//! [`ContainerConfig`] is what a user writes (CLI flags or `--config`
//! JSON). [`IsolationSpec`] is the resolved value every run strategy and
//! the bootstrap child consume; it is built once and never re-derived.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vessel_common::config::RuntimeConfig;
use vessel_common::constants::HOSTNAME_ID_LEN;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerId;
use vessel_core::filesystem::RootFs;
use vessel_core::namespace::uts::validate_hostname;
use vessel_core::namespace::{NamespaceKind, NamespaceSet};
use vessel_core::security::{CapabilityConfig, CapabilitySet, LsmProfile, SeccompProfile};

/// User-facing description of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Human-readable name. Defaults to the short container ID.
    pub name: Option<String>,
    /// Command and arguments run inside the container.
    pub command: Vec<String>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<PathBuf>,
    /// Hostname. Defaults to the first 12 characters of the ID.
    pub hostname: Option<String>,
    /// Directory bind-mounted as the root filesystem.
    pub rootfs: Option<PathBuf>,
    /// Overlay lower layers; when set, `rootfs` is ignored.
    pub layers: Vec<PathBuf>,
    /// Where the root is mounted. Defaults to `<data_dir>/containers/<id>/rootfs`.
    pub mount_point: Option<PathBuf>,
    /// Also isolate IPC and network.
    pub isolate: bool,
    /// Map container root to the invoking user in a new user namespace.
    pub user_namespace: bool,
    /// Disable every security layer.
    pub privileged: bool,
    /// Capability policy. Defaults to the safe set.
    pub capabilities: Option<CapabilitySet>,
    /// Seccomp profile. Defaults to the built-in profile.
    pub seccomp: Option<SeccompProfile>,
    /// LSM profile. Defaults to none.
    pub lsm: Option<LsmProfile>,
}

impl ContainerConfig {
    /// A configuration running `command` with every default.
    #[must_use]
    pub fn with_command(command: Vec<String>) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Everything needed to create and harden one container process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSpec {
    /// Unique container ID.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Root filesystem, if the container gets its own.
    pub rootfs: Option<RootFs>,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Environment of the container process.
    pub env: Vec<(String, String)>,
    /// Working directory inside the container.
    pub working_dir: Option<PathBuf>,
    /// Container hostname.
    pub hostname: String,
    /// Namespaces the process is created in.
    pub namespaces: NamespaceSet,
    /// Capabilities kept by the process.
    pub capabilities: CapabilityConfig,
    /// Syscall filter.
    pub seccomp: SeccompProfile,
    /// LSM confinement.
    pub lsm: LsmProfile,
}

impl IsolationSpec {
    /// Resolves `config` into a spec with a freshly generated ID.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty command, a malformed
    /// environment entry, or an invalid hostname.
    pub fn from_config(config: &ContainerConfig, runtime: &RuntimeConfig) -> Result<Self> {
        Self::with_id(ContainerId::generate(), config, runtime)
    }

    /// Resolves `config` using the given ID.
    ///
    /// # Errors
    ///
    /// Same as [`IsolationSpec::from_config`].
    pub fn with_id(id: ContainerId, config: &ContainerConfig, runtime: &RuntimeConfig) -> Result<Self> {
        if config.command.first().is_none_or(String::is_empty) {
            return Err(VesselError::Config {
                message: "a container needs a command to run".into(),
            });
        }
        let env = parse_env(&config.env)?;
        let hostname = config
            .hostname
            .clone()
            .unwrap_or_else(|| id.short(HOSTNAME_ID_LEN).to_string());
        validate_hostname(&hostname)?;
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| id.short(HOSTNAME_ID_LEN).to_string());

        let (capabilities, seccomp, lsm) = security_defaults(config, &id);
        let spec = Self {
            rootfs: rootfs_for(config, runtime, &id),
            namespaces: namespaces_for(config),
            command: config.command.clone(),
            working_dir: config.working_dir.clone(),
            env,
            hostname,
            name,
            capabilities,
            seccomp,
            lsm,
            id,
        };
        tracing::debug!(
            id = %spec.id,
            namespaces = %spec.namespaces,
            privileged = config.privileged,
            "isolation spec built"
        );
        Ok(spec)
    }

    /// Value handed to the child as `CONTAINER_ROOTFS`.
    #[must_use]
    pub fn rootfs_source(&self) -> String {
        self.rootfs
            .as_ref()
            .map(|r| r.source.display().to_string())
            .unwrap_or_default()
    }
}

/// UTS, PID and Mount always; IPC and Network with `isolate`; User only on
/// explicit request.
#[must_use]
pub fn namespaces_for(config: &ContainerConfig) -> NamespaceSet {
    let mut set = NamespaceSet::empty()
        .with(NamespaceKind::Uts)
        .with(NamespaceKind::Pid)
        .with(NamespaceKind::Mount);
    if config.isolate {
        set = set.with(NamespaceKind::Ipc).with(NamespaceKind::Network);
    }
    if config.user_namespace {
        set = set.with(NamespaceKind::User);
    }
    set
}

fn security_defaults(
    config: &ContainerConfig,
    id: &ContainerId,
) -> (CapabilityConfig, SeccompProfile, LsmProfile) {
    if config.privileged {
        if config.capabilities.is_some() || config.seccomp.is_some() || config.lsm.is_some() {
            tracing::warn!(%id, "privileged container: explicit security profiles are ignored");
        }
        return (
            CapabilityConfig::allow_all(),
            SeccompProfile::disabled(),
            LsmProfile::disabled(),
        );
    }
    (
        config.capabilities.clone().unwrap_or_default().resolve(),
        config
            .seccomp
            .clone()
            .unwrap_or_else(SeccompProfile::default_profile),
        config.lsm.clone().unwrap_or_default(),
    )
}

fn rootfs_for(config: &ContainerConfig, runtime: &RuntimeConfig, id: &ContainerId) -> Option<RootFs> {
    let mount_point = || {
        config
            .mount_point
            .clone()
            .unwrap_or_else(|| runtime.rootfs_mount_point(id.as_str()))
    };
    if !config.layers.is_empty() {
        return Some(RootFs::overlay(
            config.layers.clone(),
            mount_point(),
            runtime.overlay_scratch_dir(id.as_str()),
        ));
    }
    config
        .rootfs
        .as_ref()
        .map(|source| RootFs::bind(source.clone(), mount_point()))
}

/// Splits `KEY=VALUE` entries.
///
/// # Errors
///
/// Returns a configuration error for an entry without `=` or with an empty key.
pub fn parse_env(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(VesselError::Config {
                message: format!("environment entry {entry:?} is not KEY=VALUE"),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use vessel_core::filesystem::RootFsStrategy;
    use vessel_core::security::capability::DEFAULT_SAFE;
    use vessel_core::security::seccomp::SeccompAction;

    use super::*;

    fn runtime() -> RuntimeConfig {
        RuntimeConfig::with_data_dir(PathBuf::from("/data"))
    }

    fn echo() -> ContainerConfig {
        ContainerConfig::with_command(vec!["/bin/echo".into(), "hi".into()])
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = IsolationSpec::from_config(&ContainerConfig::default(), &runtime())
            .expect_err("no command");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::Config);
    }

    #[test]
    fn hostname_defaults_to_id_prefix() {
        let spec = IsolationSpec::from_config(&echo(), &runtime()).expect("spec");
        assert_eq!(spec.hostname.len(), HOSTNAME_ID_LEN);
        assert!(spec.id.as_str().starts_with(&spec.hostname));
        assert_eq!(spec.name, spec.hostname);
    }

    #[test]
    fn default_namespaces() {
        let spec = IsolationSpec::from_config(&echo(), &runtime()).expect("spec");
        let kinds: Vec<_> = spec.namespaces.iter().collect();
        assert_eq!(kinds, vec![NamespaceKind::Uts, NamespaceKind::Pid, NamespaceKind::Mount]);
    }

    #[test]
    fn isolate_adds_ipc_and_network_but_not_user() {
        let mut config = echo();
        config.isolate = true;
        let set = namespaces_for(&config);
        assert!(set.contains(NamespaceKind::Ipc));
        assert!(set.contains(NamespaceKind::Network));
        assert!(!set.contains(NamespaceKind::User));
        config.user_namespace = true;
        assert!(namespaces_for(&config).contains(NamespaceKind::User));
    }

    #[test]
    fn privileged_disables_every_layer() {
        let mut config = echo();
        config.privileged = true;
        config.lsm = Some(LsmProfile::apparmor("ignored"));
        let spec = IsolationSpec::from_config(&config, &runtime()).expect("spec");
        assert!(spec.capabilities.allow_all);
        assert!(spec.seccomp.disabled);
        assert!(spec.lsm.disabled);
    }

    #[test]
    fn unprivileged_gets_restrictive_defaults() {
        let spec = IsolationSpec::from_config(&echo(), &runtime()).expect("spec");
        assert!(!spec.capabilities.allow_all);
        assert_eq!(spec.capabilities.keep, DEFAULT_SAFE.to_vec());
        assert_eq!(spec.seccomp, SeccompProfile::default_profile());
        assert_eq!(spec.seccomp.default_action, SeccompAction::Errno);
        assert!(!spec.lsm.disabled);
        assert_eq!(spec.lsm.kind, vessel_core::security::LsmKind::None);
    }

    #[test]
    fn explicit_profiles_are_kept_when_unprivileged() {
        let mut config = echo();
        config.capabilities = Some(CapabilitySet::AllowAll);
        config.seccomp = Some(SeccompProfile::disabled());
        let spec = IsolationSpec::from_config(&config, &runtime()).expect("spec");
        assert!(spec.capabilities.allow_all);
        assert!(spec.seccomp.disabled);
    }

    #[test]
    fn rootfs_strategy_follows_config() {
        let mut config = echo();
        assert!(IsolationSpec::from_config(&config, &runtime()).expect("spec").rootfs.is_none());

        config.rootfs = Some(PathBuf::from("/images/alpine"));
        let spec = IsolationSpec::from_config(&config, &runtime()).expect("spec");
        let rootfs = spec.rootfs.as_ref().expect("rootfs");
        assert_eq!(rootfs.strategy(), RootFsStrategy::Bind);
        assert_eq!(rootfs.mount_point, runtime().rootfs_mount_point(spec.id.as_str()));
        assert_eq!(spec.rootfs_source(), "/images/alpine");

        config.layers = vec!["/layers/app".into(), "/layers/base".into()];
        let spec = IsolationSpec::from_config(&config, &runtime()).expect("spec");
        let rootfs = spec.rootfs.expect("rootfs");
        assert_eq!(rootfs.strategy(), RootFsStrategy::Overlay);
        assert_eq!(rootfs.scratch_dir, runtime().overlay_scratch_dir(spec.id.as_str()));
    }

    #[test]
    fn env_entries_must_have_a_key() {
        assert_eq!(
            parse_env(&["A=1".into(), "B=x=y".into(), "C=".into()]).expect("env"),
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string()),
                ("C".to_string(), String::new()),
            ]
        );
        assert!(parse_env(&["NOEQUALS".into()]).is_err());
        assert!(parse_env(&["=v".into()]).is_err());
    }

    #[test]
    fn invalid_hostname_is_rejected() {
        let mut config = echo();
        config.hostname = Some("bad host".into());
        assert!(IsolationSpec::from_config(&config, &runtime()).is_err());
    }

    #[test]
    fn config_json_uses_defaults() {
        let config: ContainerConfig =
            serde_json::from_str(r#"{"command":["sh"],"isolate":true}"#).expect("parse");
        assert!(config.isolate);
        assert!(!config.privileged);
        assert!(config.seccomp.is_none());
    }
}
