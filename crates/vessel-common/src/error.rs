//! Unified error types for the vessel workspace.
//!
//! Every error surfaced by the runtime carries a machine-readable
//! [`ErrorKind`], a human-readable message (its `Display`), the structured
//! fields of its variant, and an optional actionable hint.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VesselError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A permission or privilege error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// Creating or entering a namespace failed.
    #[error("namespace setup failed: {message}")]
    Namespace {
        /// Description of the failure.
        message: String,
    },

    /// A mount or unmount operation failed.
    #[error("mount of {target} failed: {message}")]
    Mount {
        /// Mount target.
        target: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Swapping the root filesystem failed.
    #[error("pivot_root into {new_root} failed: {message}")]
    PivotRoot {
        /// Directory that was to become `/`.
        new_root: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A hardening layer could not be applied.
    #[error("{stage} hardening failed: {message}")]
    Security {
        /// Layer that failed (`lsm`, `seccomp`, `capabilities`).
        stage: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// A feature is not available on this host.
    #[error("{feature} is not supported: {message}")]
    Unsupported {
        /// Name of the missing feature.
        feature: &'static str,
        /// Description of what is missing.
        message: String,
    },

    /// The container process could not be started.
    #[error("container {id} failed to start: {cause}")]
    ContainerStart {
        /// Container identifier.
        id: String,
        /// Failure reported by the host or the bootstrap child.
        cause: String,
    },

    /// The container's command exited with a non-zero status.
    #[error("container {id} exited with status {status}")]
    ContainerExited {
        /// Container identifier.
        id: String,
        /// Exit status (128 + signal for signal deaths).
        status: i32,
    },

    /// A lifecycle transition is not allowed from the current state.
    #[error("cannot {action} container {id} in state {state}")]
    InvalidState {
        /// Container identifier.
        id: String,
        /// Current lifecycle state.
        state: crate::types::ContainerState,
        /// Attempted transition.
        action: &'static str,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Machine-readable classification of a [`VesselError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Filesystem or descriptor I/O.
    Io,
    /// Invalid configuration or input.
    Config,
    /// Missing resource.
    NotFound,
    /// Insufficient privilege.
    PermissionDenied,
    /// Namespace creation or entry.
    Namespace,
    /// Mount, unmount, or pivot.
    Mount,
    /// LSM, seccomp, or capability application.
    Security,
    /// Host lacks a required kernel feature.
    Unsupported,
    /// Host-side or bootstrap failure before the command ran.
    ContainerStart,
    /// The command ran and exited non-zero.
    ContainerExited,
    /// Lifecycle transition rejected.
    InvalidState,
    /// Encoding or decoding failure.
    Serialization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Io => "io",
            Self::Config => "config",
            Self::NotFound => "not-found",
            Self::PermissionDenied => "permission-denied",
            Self::Namespace => "namespace",
            Self::Mount => "mount",
            Self::Security => "security",
            Self::Unsupported => "unsupported",
            Self::ContainerStart => "container-start",
            Self::ContainerExited => "container-exited",
            Self::InvalidState => "invalid-state",
            Self::Serialization => "serialization",
        };
        f.write_str(s)
    }
}

impl VesselError {
    /// Returns the machine-readable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Config { .. } => ErrorKind::Config,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Namespace { .. } => ErrorKind::Namespace,
            Self::Mount { .. } | Self::PivotRoot { .. } => ErrorKind::Mount,
            Self::Security { .. } => ErrorKind::Security,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::ContainerStart { .. } => ErrorKind::ContainerStart,
            Self::ContainerExited { .. } => ErrorKind::ContainerExited,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Returns an actionable suggestion for the operator, if one applies.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PermissionDenied { .. } | Self::Namespace { .. } => {
                Some("run as root, or request a user namespace with --userns")
            }
            Self::Mount { .. } | Self::PivotRoot { .. } => {
                Some("check that the rootfs exists and that the process has CAP_SYS_ADMIN")
            }
            Self::Security { stage: "lsm", .. } => {
                Some("load the profile on the host (apparmor_parser -r) or pass --privileged")
            }
            Self::Security { stage: "seccomp", .. } => {
                Some("validate the profile with `vessel seccomp check <file>`")
            }
            Self::Security { .. } => Some("run the container as root to manage capabilities"),
            Self::Unsupported { .. } => Some("upgrade the kernel or disable the feature"),
            Self::InvalidState { .. } => Some("use --force to remove a running container"),
            Self::NotFound { .. } => Some("list known containers with `vessel ps --all`"),
            Self::ContainerStart { .. } => {
                Some("rerun with RUST_LOG=debug to trace the bootstrap steps")
            }
            Self::Io { .. }
            | Self::Config { .. }
            | Self::ContainerExited { .. }
            | Self::Serialization { .. } => None,
        }
    }

    /// Builds a [`VesselError::Security`] for the given stage.
    pub fn security(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Security {
            stage,
            message: message.into(),
        }
    }

    /// Builds a [`VesselError::Mount`] for the given target.
    pub fn mount(target: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Mount {
            target: target.into(),
            message: message.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VesselError>;
