//! Parent-to-child handoff for run-with-setup.
//!
//! The parent serializes the resolved [`IsolationSpec`] once into a
//! versioned [`BootstrapPayload`] and passes it in `CONTAINER_BOOTSTRAP`,
//! next to the plain `CONTAINER_ID`, `CONTAINER_ROOTFS` and
//! `CONTAINER_HOSTNAME` variables. The child environment is built from
//! scratch so nothing else leaks from the parent.

use serde::{Deserialize, Serialize};
use vessel_common::config::RuntimeConfig;
use vessel_common::constants::{
    DEFAULT_PATH, ENV_CONTAINER_BOOTSTRAP, ENV_CONTAINER_HOSTNAME, ENV_CONTAINER_ID,
    ENV_CONTAINER_ROOTFS,
};
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerId;

use crate::spec::{ContainerConfig, IsolationSpec};

/// Current payload format. Bumped on any incompatible change.
pub const PAYLOAD_VERSION: u32 = 1;

/// Typed bootstrap state handed to the child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPayload {
    /// Format version, checked before anything else is decoded.
    pub version: u32,
    /// The container to set up.
    pub spec: IsolationSpec,
}

impl BootstrapPayload {
    /// Wraps `spec` in a payload of the current version.
    #[must_use]
    pub const fn new(spec: IsolationSpec) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            spec,
        }
    }

    /// Serializes the payload for the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a payload, rejecting other versions.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing or different version,
    /// or a serialization error for malformed JSON.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let version = value.get("version").and_then(serde_json::Value::as_u64);
        if version != Some(u64::from(PAYLOAD_VERSION)) {
            return Err(VesselError::Config {
                message: format!(
                    "bootstrap payload version {} is not supported (expected {PAYLOAD_VERSION})",
                    version.map_or_else(|| "<missing>".to_string(), |v| v.to_string())
                ),
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Reads the payload from the bootstrap variables.
    ///
    /// Without `CONTAINER_BOOTSTRAP`, a payload is rebuilt from the plain
    /// variables with unprivileged defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed, or if neither the
    /// payload nor `CONTAINER_ID` is present.
    pub fn from_env<F>(var: F, command: &[String]) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = var(ENV_CONTAINER_BOOTSTRAP) {
            return Self::decode(&raw);
        }
        let id = var(ENV_CONTAINER_ID).ok_or_else(|| VesselError::Config {
            message: format!("neither {ENV_CONTAINER_BOOTSTRAP} nor {ENV_CONTAINER_ID} is set"),
        })?;
        tracing::debug!(%id, "no bootstrap payload, using plain variables");
        let config = ContainerConfig {
            command: command.to_vec(),
            hostname: var(ENV_CONTAINER_HOSTNAME).filter(|h| !h.is_empty()),
            rootfs: var(ENV_CONTAINER_ROOTFS)
                .filter(|r| !r.is_empty())
                .map(Into::into),
            ..ContainerConfig::default()
        };
        let spec = IsolationSpec::with_id(ContainerId::new(id), &config, &RuntimeConfig::default())?;
        Ok(Self::new(spec))
    }
}

/// Builds the explicit environment of the bootstrap child.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn child_env(spec: &IsolationSpec) -> Result<Vec<(String, String)>> {
    let payload = BootstrapPayload::new(spec.clone()).encode()?;
    let mut env = vec![
        (ENV_CONTAINER_ID.to_string(), spec.id.to_string()),
        (ENV_CONTAINER_ROOTFS.to_string(), spec.rootfs_source()),
        (ENV_CONTAINER_HOSTNAME.to_string(), spec.hostname.clone()),
        (ENV_CONTAINER_BOOTSTRAP.to_string(), payload),
        ("PATH".to_string(), container_path(spec)),
    ];
    if let Ok(filter) = std::env::var("RUST_LOG") {
        env.push(("RUST_LOG".to_string(), filter));
    }
    Ok(env)
}

/// The container's `PATH`, or the default when it sets none.
#[must_use]
pub fn container_path(spec: &IsolationSpec) -> String {
    spec.env
        .iter()
        .find(|(k, _)| k == "PATH")
        .map_or_else(|| DEFAULT_PATH.to_string(), |(_, v)| v.clone())
}
