//! Linux Security Module confinement (AppArmor, SELinux).
//!
//! The container process asks the kernel to switch its own label right
//! before exec. Only the LSM active on the host can be used.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};

const STAGE: &str = "lsm";

/// Which LSM a profile targets, or which one the host runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LsmKind {
    /// AppArmor profiles, switched with `changeprofile`.
    AppArmor,
    /// SELinux contexts.
    SeLinux,
    /// No LSM confinement.
    #[default]
    None,
}

impl fmt::Display for LsmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AppArmor => "apparmor",
            Self::SeLinux => "selinux",
            Self::None => "none",
        })
    }
}

/// LSM confinement requested for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsmProfile {
    /// Target LSM.
    #[serde(default)]
    pub kind: LsmKind,
    /// AppArmor profile name or SELinux context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Skip LSM confinement.
    #[serde(default)]
    pub disabled: bool,
}

impl LsmProfile {
    /// A profile that confines nothing.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            kind: LsmKind::None,
            profile: None,
            disabled: true,
        }
    }

    /// An AppArmor profile by name.
    #[must_use]
    pub fn apparmor(name: impl Into<String>) -> Self {
        Self {
            kind: LsmKind::AppArmor,
            profile: Some(name.into()),
            disabled: false,
        }
    }

    /// An SELinux process context.
    #[must_use]
    pub fn selinux(context: impl Into<String>) -> Self {
        Self {
            kind: LsmKind::SeLinux,
            profile: Some(context.into()),
            disabled: false,
        }
    }

    /// Switches the calling process to this profile, detecting the host
    /// LSM from the current `/sys`.
    ///
    /// # Errors
    ///
    /// See [`LsmProfile::apply_with`].
    pub fn apply(&self) -> Result<()> {
        self.apply_with(detect_lsm())
    }

    /// Switches the calling process to this profile on a host running
    /// `host`.
    ///
    /// Does nothing when disabled, when the kind is [`LsmKind::None`], when
    /// no profile is named, or when the process already carries the label.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Security`] if a profile is named but the host
    /// runs no LSM or a different one, the AppArmor profile is not loaded,
    /// or the kernel refuses the switch.
    pub fn apply_with(&self, host: LsmKind) -> Result<()> {
        self.apply_at(Path::new("/"), host)
    }

    fn apply_at(&self, root: &Path, host: LsmKind) -> Result<()> {
        let Some(name) = self.profile.as_deref().filter(|p| !p.is_empty()) else {
            tracing::debug!(kind = %self.kind, "no LSM profile named");
            return Ok(());
        };
        if self.disabled || self.kind == LsmKind::None {
            tracing::debug!("LSM confinement disabled");
            return Ok(());
        }
        if host != self.kind {
            return Err(VesselError::security(
                STAGE,
                format!("{} profile requested but the host runs {host}", self.kind),
            ));
        }

        let attr = attr_path(root, self.kind);
        let current = std::fs::read_to_string(&attr).map_err(|e| {
            VesselError::security(STAGE, format!("reading {}: {e}", attr.display()))
        })?;
        if current_label(&current) == name {
            tracing::debug!(profile = name, "LSM label already set");
            return Ok(());
        }

        let request = match self.kind {
            LsmKind::AppArmor => {
                ensure_apparmor_loaded(root, name)?;
                format!("changeprofile {name}")
            }
            LsmKind::SeLinux | LsmKind::None => name.to_string(),
        };
        std::fs::write(&attr, request).map_err(|e| {
            VesselError::security(
                STAGE,
                format!("switching to {} profile {name}: {e}", self.kind),
            )
        })?;
        tracing::info!(kind = %self.kind, profile = name, "LSM profile applied");
        Ok(())
    }
}

/// A profile bound to the LSM the host ran when the container was set up.
///
/// A container's own `/sys` carries neither securityfs nor selinuxfs, so
/// the host LSM must be detected before the root is switched and carried
/// across it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLsm {
    profile: LsmProfile,
    host: LsmKind,
}

impl HostLsm {
    /// Binds `profile` to the LSM detected from the current `/sys`.
    #[must_use]
    pub fn detect(profile: LsmProfile) -> Self {
        Self::detect_at(profile, Path::new("/"))
    }

    /// Binds `profile` to the LSM detected below `root`.
    #[must_use]
    pub fn detect_at(profile: LsmProfile, root: &Path) -> Self {
        let host = detect_lsm_at(root);
        tracing::debug!(%host, "host LSM detected");
        Self { profile, host }
    }

    /// The LSM the profile will be applied against.
    #[must_use]
    pub const fn host(&self) -> LsmKind {
        self.host
    }

    /// The bound profile.
    #[must_use]
    pub const fn profile(&self) -> &LsmProfile {
        &self.profile
    }

    /// Applies the profile against the recorded host LSM.
    ///
    /// # Errors
    ///
    /// See [`LsmProfile::apply_with`].
    pub fn apply(&self) -> Result<()> {
        self.profile.apply_with(self.host)
    }
}

/// Detects the LSM enforced on this host.
#[must_use]
pub fn detect_lsm() -> LsmKind {
    detect_lsm_at(Path::new("/"))
}

/// Detects the LSM using the marker files below `root`.
///
/// AppArmor is preferred when both are present. SELinux counts as active
/// in enforcing (`1`) and permissive (`0`) mode.
#[must_use]
pub fn detect_lsm_at(root: &Path) -> LsmKind {
    let apparmor_enabled = std::fs::read_to_string(root.join("sys/module/apparmor/parameters/enabled"))
        .is_ok_and(|v| v.trim() == "Y");
    if root.join("sys/kernel/security/apparmor").is_dir() || apparmor_enabled {
        return LsmKind::AppArmor;
    }
    match selinux_enforcing_at(root) {
        Some(_) => LsmKind::SeLinux,
        None => LsmKind::None,
    }
}

/// Returns the SELinux mode below `root`: `Some(true)` enforcing,
/// `Some(false)` permissive, `None` when SELinux is absent.
#[must_use]
pub fn selinux_enforcing_at(root: &Path) -> Option<bool> {
    let value = std::fs::read_to_string(root.join("sys/fs/selinux/enforce")).ok()?;
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

fn attr_path(root: &Path, kind: LsmKind) -> PathBuf {
    let attr = root.join("proc/self/attr");
    if kind == LsmKind::AppArmor {
        let apparmor = attr.join("apparmor/current");
        if apparmor.exists() {
            return apparmor;
        }
    }
    attr.join("current")
}

/// Strips the ` (enforce)` style mode suffix AppArmor appends.
fn current_label(raw: &str) -> &str {
    let trimmed = raw.trim_end_matches(['\n', '\0']).trim();
    trimmed
        .rsplit_once(" (")
        .map_or(trimmed, |(label, _)| label)
}

fn ensure_apparmor_loaded(root: &Path, name: &str) -> Result<()> {
    let profiles = root.join("sys/kernel/security/apparmor/profiles");
    let Ok(loaded) = std::fs::read_to_string(&profiles) else {
        // Without securityfs the kernel's answer to changeprofile is authoritative.
        return Ok(());
    };
    if loaded.lines().any(|line| current_label(line) == name) {
        Ok(())
    } else {
        Err(VesselError::security(
            STAGE,
            format!("AppArmor profile {name} is not loaded"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }

    #[test]
    fn detects_nothing_on_an_empty_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::None);
    }

    #[test]
    fn detects_apparmor_from_securityfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("sys/kernel/security/apparmor")).expect("mkdir");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::AppArmor);
    }

    #[test]
    fn detects_apparmor_from_module_parameter() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sys/module/apparmor/parameters/enabled", "Y\n");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::AppArmor);
        write(dir.path(), "sys/module/apparmor/parameters/enabled", "N\n");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::None);
    }

    #[test]
    fn detects_selinux_in_both_modes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sys/fs/selinux/enforce", "1");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::SeLinux);
        assert_eq!(selinux_enforcing_at(dir.path()), Some(true));
        write(dir.path(), "sys/fs/selinux/enforce", "0");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::SeLinux);
        assert_eq!(selinux_enforcing_at(dir.path()), Some(false));
    }

    #[test]
    fn apparmor_wins_when_both_are_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sys/fs/selinux/enforce", "1");
        std::fs::create_dir_all(dir.path().join("sys/kernel/security/apparmor")).expect("mkdir");
        assert_eq!(detect_lsm_at(dir.path()), LsmKind::AppArmor);
    }

    #[test]
    fn noop_cases() {
        let dir = tempfile::tempdir().expect("tempdir");
        LsmProfile::disabled().apply_at(dir.path(), LsmKind::AppArmor).expect("disabled");
        LsmProfile::default().apply_at(dir.path(), LsmKind::AppArmor).expect("kind none");
        let unnamed = LsmProfile {
            kind: LsmKind::AppArmor,
            profile: None,
            disabled: false,
        };
        unnamed.apply_at(dir.path(), LsmKind::AppArmor).expect("no name");
    }

    #[test]
    fn named_profile_without_host_lsm_is_a_security_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "proc/self/attr/current", "unconfined");
        for profile in [LsmProfile::apparmor("p"), LsmProfile::selinux("ctx")] {
            let err = profile
                .apply_at(dir.path(), LsmKind::None)
                .expect_err("no host LSM");
            assert!(matches!(err, VesselError::Security { stage: "lsm", .. }));
        }
        // Nothing requested, nothing to refuse.
        LsmProfile::default().apply_at(dir.path(), LsmKind::None).expect("kind none");
    }

    #[test]
    fn host_lsm_survives_a_root_without_markers() {
        let host_root = tempfile::tempdir().expect("tempdir");
        write(host_root.path(), "sys/fs/selinux/enforce", "1");
        let bound = HostLsm::detect_at(
            LsmProfile::selinux("system_u:system_r:container_t:s0"),
            host_root.path(),
        );
        assert_eq!(bound.host(), LsmKind::SeLinux);

        // The switched root has a fresh /proc and a sysfs without selinuxfs.
        let container_root = tempfile::tempdir().expect("tempdir");
        write(
            container_root.path(),
            "proc/self/attr/current",
            "unconfined_u:unconfined_r:unconfined_t:s0",
        );
        assert_eq!(detect_lsm_at(container_root.path()), LsmKind::None);
        bound
            .profile()
            .apply_at(container_root.path(), bound.host())
            .expect("apply");
        let written = std::fs::read_to_string(container_root.path().join("proc/self/attr/current"))
            .expect("read");
        assert_eq!(written, "system_u:system_r:container_t:s0");
    }

    #[test]
    fn mismatched_lsm_is_a_security_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = LsmProfile::selinux("system_u:system_r:container_t:s0")
            .apply_at(dir.path(), LsmKind::AppArmor)
            .expect_err("mismatch");
        assert!(matches!(err, VesselError::Security { stage: "lsm", .. }));
    }

    #[test]
    fn apparmor_writes_changeprofile() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "proc/self/attr/apparmor/current", "unconfined\n");
        write(dir.path(), "sys/kernel/security/apparmor/profiles", "vessel-default (enforce)\n");
        LsmProfile::apparmor("vessel-default")
            .apply_at(dir.path(), LsmKind::AppArmor)
            .expect("apply");
        let written = std::fs::read_to_string(dir.path().join("proc/self/attr/apparmor/current"))
            .expect("read");
        assert_eq!(written, "changeprofile vessel-default");
    }

    #[test]
    fn apparmor_falls_back_to_generic_attr() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "proc/self/attr/current", "unconfined");
        LsmProfile::apparmor("p")
            .apply_at(dir.path(), LsmKind::AppArmor)
            .expect("apply");
        let written = std::fs::read_to_string(dir.path().join("proc/self/attr/current")).expect("read");
        assert_eq!(written, "changeprofile p");
    }

    #[test]
    fn unloaded_apparmor_profile_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "proc/self/attr/current", "unconfined");
        write(dir.path(), "sys/kernel/security/apparmor/profiles", "other (enforce)\n");
        assert!(LsmProfile::apparmor("missing").apply_at(dir.path(), LsmKind::AppArmor).is_err());
    }

    #[test]
    fn already_confined_process_is_left_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "proc/self/attr/current", "vessel-default (enforce)\n");
        LsmProfile::apparmor("vessel-default")
            .apply_at(dir.path(), LsmKind::AppArmor)
            .expect("apply");
        let current = std::fs::read_to_string(dir.path().join("proc/self/attr/current")).expect("read");
        assert_eq!(current, "vessel-default (enforce)\n");
    }

    #[test]
    fn selinux_writes_the_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "proc/self/attr/current", "unconfined_u:unconfined_r:unconfined_t:s0\0");
        LsmProfile::selinux("system_u:system_r:container_t:s0")
            .apply_at(dir.path(), LsmKind::SeLinux)
            .expect("apply");
        let written = std::fs::read_to_string(dir.path().join("proc/self/attr/current")).expect("read");
        assert_eq!(written, "system_u:system_r:container_t:s0");
    }

    #[test]
    fn unreadable_attr_is_a_security_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = LsmProfile::selinux("ctx")
            .apply_at(dir.path(), LsmKind::SeLinux)
            .expect_err("no attr file");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::Security);
    }

    #[test]
    fn serde_lowercase_kinds() {
        let p: LsmProfile = serde_json::from_str(r#"{"kind":"apparmor","profile":"x"}"#).expect("parse");
        assert_eq!(p, LsmProfile::apparmor("x"));
    }
}
