//! Seccomp syscall filtering.
//!
//! Profiles use the OCI/Docker JSON vocabulary (`SCMP_ACT_*`, `SCMP_ARCH_*`,
//! `SCMP_CMP_*`) and are compiled to classic BPF with `seccompiler`.

mod compile;
mod default;
pub mod syscalls;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};

pub use compile::{CompiledFilters, compile};

pub(crate) const STAGE: &str = "seccomp";

/// Errno returned by `Errno` actions that do not set one.
pub const DEFAULT_ERRNO: u32 = libc::EPERM as u32;

/// What the kernel does when a filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeccompAction {
    /// Let the syscall run.
    #[serde(rename = "SCMP_ACT_ALLOW")]
    Allow,
    /// Fail the syscall with an errno.
    #[serde(rename = "SCMP_ACT_ERRNO")]
    Errno,
    /// Kill the whole process.
    #[serde(rename = "SCMP_ACT_KILL", alias = "SCMP_ACT_KILL_PROCESS")]
    Kill,
    /// Deliver `SIGSYS`.
    #[serde(rename = "SCMP_ACT_TRAP")]
    Trap,
    /// Notify a ptrace tracer.
    #[serde(rename = "SCMP_ACT_TRACE")]
    Trace,
    /// Allow and log.
    #[serde(rename = "SCMP_ACT_LOG")]
    Log,
}

impl fmt::Display for SeccompAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allow => "allow",
            Self::Errno => "errno",
            Self::Kill => "kill",
            Self::Trap => "trap",
            Self::Trace => "trace",
            Self::Log => "log",
        };
        f.write_str(name)
    }
}

/// CPU architectures a profile may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// 64-bit x86.
    #[serde(rename = "SCMP_ARCH_X86_64")]
    X86_64,
    /// 32-bit x86.
    #[serde(rename = "SCMP_ARCH_X86")]
    X86,
    /// x32 ABI.
    #[serde(rename = "SCMP_ARCH_X32")]
    X32,
    /// 64-bit ARM.
    #[serde(rename = "SCMP_ARCH_AARCH64")]
    Aarch64,
}

impl Arch {
    /// The architecture this binary was built for, when filters can be
    /// compiled for it.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Self::X86_64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Self::Aarch64)
        } else {
            None
        }
    }
}

/// Comparison applied to a syscall argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgOp {
    /// `arg != value`
    #[serde(rename = "SCMP_CMP_NE")]
    NotEqual,
    /// `arg < value`
    #[serde(rename = "SCMP_CMP_LT")]
    LessThan,
    /// `arg <= value`
    #[serde(rename = "SCMP_CMP_LE")]
    LessOrEqual,
    /// `arg == value`
    #[serde(rename = "SCMP_CMP_EQ")]
    Equal,
    /// `arg >= value`
    #[serde(rename = "SCMP_CMP_GE")]
    GreaterOrEqual,
    /// `arg > value`
    #[serde(rename = "SCMP_CMP_GT")]
    GreaterThan,
    /// `arg & value == value_two`
    #[serde(rename = "SCMP_CMP_MASKED_EQ")]
    MaskedEqual,
}

/// A condition on one syscall argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyscallArg {
    /// Argument position, 0 to 5.
    pub index: u8,
    /// Operand, or the mask for [`ArgOp::MaskedEqual`].
    pub value: u64,
    /// Expected masked value for [`ArgOp::MaskedEqual`].
    #[serde(default, skip_serializing_if = "is_zero")]
    pub value_two: u64,
    /// Comparison operator.
    pub op: ArgOp,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// One row of the syscall table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyscallRule {
    /// Syscalls the rule applies to.
    pub names: Vec<String>,
    /// Action taken when the rule matches.
    pub action: SeccompAction,
    /// All conditions must hold for the rule to match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<SyscallArg>,
    /// Errno for `Errno` actions, or the tracer message for `Trace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno_ret: Option<u32>,
}

impl SyscallRule {
    /// An unconditional rule for `names`.
    pub fn new<I, S>(action: SeccompAction, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            action,
            args: Vec::new(),
            errno_ret: None,
        }
    }

    /// Adds an argument condition.
    #[must_use]
    pub fn with_arg(mut self, index: u8, op: ArgOp, value: u64) -> Self {
        self.args.push(SyscallArg {
            index,
            value,
            value_two: 0,
            op,
        });
        self
    }
}

/// A complete seccomp policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompProfile {
    /// Action for syscalls no rule matches.
    pub default_action: SeccompAction,
    /// Errno for an `Errno` default action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_errno_ret: Option<u32>,
    /// Architectures the profile was written for. Empty means any.
    #[serde(default)]
    pub architectures: Vec<Arch>,
    /// Ordered syscall table.
    #[serde(default)]
    pub syscalls: Vec<SyscallRule>,
    /// Skip filtering entirely.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl SeccompProfile {
    /// A profile that installs nothing.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            default_action: SeccompAction::Allow,
            default_errno_ret: None,
            architectures: Vec::new(),
            syscalls: Vec::new(),
            disabled: true,
        }
    }

    /// Reads a JSON profile from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid profile
    /// JSON, or fails [`SeccompProfile::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let profile: Self = serde_json::from_str(&content)?;
        profile.validate()?;
        tracing::debug!(path = %path.display(), rules = profile.syscalls.len(), "seccomp profile loaded");
        Ok(profile)
    }

    /// Writes the profile to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Checks the table for rules that can never be compiled.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending rule.
    pub fn validate(&self) -> Result<()> {
        for (i, rule) in self.syscalls.iter().enumerate() {
            if rule.names.is_empty() || rule.names.iter().any(String::is_empty) {
                return Err(VesselError::Config {
                    message: format!("seccomp rule {i} has an empty syscall name"),
                });
            }
            if let Some(arg) = rule.args.iter().find(|a| a.index > 5) {
                return Err(VesselError::Config {
                    message: format!(
                        "seccomp rule {i} ({}) compares argument {}, syscalls take at most 6",
                        rule.names.join(","),
                        arg.index
                    ),
                });
            }
        }
        Ok(())
    }

    /// Number of distinct syscall names mapped to `action`.
    #[must_use]
    pub fn count_action(&self, action: SeccompAction) -> usize {
        let mut names: Vec<&str> = self
            .syscalls
            .iter()
            .filter(|r| r.action == action)
            .flat_map(|r| r.names.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    /// Compiles the profile and installs it on the calling thread.
    ///
    /// Sets `PR_SET_NO_NEW_PRIVS` first; filters are inherited across
    /// `execve(2)` and cannot be removed.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Security`] if the kernel lacks seccomp, the
    /// profile does not compile for this host, or installation fails.
    pub fn apply(&self) -> Result<()> {
        if self.disabled {
            tracing::debug!("seccomp disabled, no filter installed");
            return Ok(());
        }
        ensure_available()?;
        let arch = Arch::host().ok_or_else(|| {
            VesselError::security(STAGE, format!("no filter backend for {}", std::env::consts::ARCH))
        })?;
        let compiled = compile(self, arch)?;
        set_no_new_privs()?;
        for program in &compiled.programs {
            seccompiler::apply_filter(program)
                .map_err(|e| VesselError::security(STAGE, format!("installing filter: {e}")))?;
        }
        tracing::info!(
            filters = compiled.programs.len(),
            syscalls = compiled.syscalls,
            skipped = compiled.skipped.len(),
            default_action = %self.default_action,
            "seccomp filters installed"
        );
        Ok(())
    }
}

/// Returns whether the running kernel was built with seccomp support.
#[must_use]
pub fn is_available() -> bool {
    // SAFETY: PR_GET_SECCOMP takes no pointer arguments.
    let rc = unsafe { libc::prctl(libc::PR_GET_SECCOMP, 0, 0, 0, 0) };
    rc >= 0
}

fn ensure_available() -> Result<()> {
    if is_available() {
        Ok(())
    } else {
        Err(VesselError::security(
            STAGE,
            format!("kernel has no seccomp support: {}", std::io::Error::last_os_error()),
        ))
    }
}

fn set_no_new_privs() -> Result<()> {
    // SAFETY: PR_SET_NO_NEW_PRIVS takes only integer arguments.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(VesselError::security(
            STAGE,
            format!("PR_SET_NO_NEW_PRIVS: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_follow_oci() {
        let json = serde_json::to_string(&SeccompAction::Errno).expect("ser");
        assert_eq!(json, "\"SCMP_ACT_ERRNO\"");
        let kill: SeccompAction = serde_json::from_str("\"SCMP_ACT_KILL_PROCESS\"").expect("alias");
        assert_eq!(kill, SeccompAction::Kill);
    }

    #[test]
    fn parses_docker_style_rule() {
        let json = r#"{
            "defaultAction": "SCMP_ACT_ERRNO",
            "architectures": ["SCMP_ARCH_X86_64", "SCMP_ARCH_AARCH64"],
            "syscalls": [
                {"names": ["personality"], "action": "SCMP_ACT_ALLOW",
                 "args": [{"index": 0, "value": 8, "op": "SCMP_CMP_EQ"}]},
                {"names": ["mount"], "action": "SCMP_ACT_ERRNO", "errnoRet": 1}
            ]
        }"#;
        let profile: SeccompProfile = serde_json::from_str(json).expect("parse");
        assert_eq!(profile.architectures.len(), 2);
        assert_eq!(profile.syscalls[0].args[0].op, ArgOp::Equal);
        assert_eq!(profile.syscalls[1].errno_ret, Some(1));
        assert!(!profile.disabled);
    }

    #[test]
    fn save_then_load_restores_the_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("profile.json");
        let profile = SeccompProfile::default_profile();
        profile.save(&path).expect("save");
        assert_eq!(SeccompProfile::load(&path).expect("load"), profile);
    }

    #[test]
    fn load_rejects_bad_argument_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"defaultAction":"SCMP_ACT_ALLOW","syscalls":[{"names":["ioctl"],"action":"SCMP_ACT_ERRNO","args":[{"index":6,"value":0,"op":"SCMP_CMP_EQ"}]}]}"#,
        )
        .expect("write");
        let err = SeccompProfile::load(&path).expect_err("index 6");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::Config);
    }

    #[test]
    fn load_of_missing_file_is_io_error() {
        let err = SeccompProfile::load(Path::new("/nonexistent/profile.json")).expect_err("missing");
        assert_eq!(err.kind(), vessel_common::error::ErrorKind::Io);
    }

    #[test]
    fn disabled_profile_applies_nothing() {
        SeccompProfile::disabled().apply().expect("noop");
    }

    #[test]
    fn kernel_reports_seccomp() {
        assert!(is_available());
    }
}
