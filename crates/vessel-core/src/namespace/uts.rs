//! UTS namespace isolation.
//!
//! Allows the container to have its own hostname.

use vessel_common::error::{Result, VesselError};

/// Longest hostname accepted by the kernel (`HOST_NAME_MAX`).
pub const HOSTNAME_MAX: usize = 64;

/// Checks that `hostname` is non-empty, short enough, and uses only
/// letters, digits, `-` and `.`.
///
/// # Errors
///
/// Returns a configuration error describing the violation.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > HOSTNAME_MAX {
        return Err(VesselError::Config {
            message: format!("hostname must be 1-{HOSTNAME_MAX} bytes, got {}", hostname.len()),
        });
    }
    if let Some(bad) = hostname
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        return Err(VesselError::Config {
            message: format!("hostname {hostname:?} contains invalid character {bad:?}"),
        });
    }
    Ok(())
}

/// Sets the hostname inside the calling process's UTS namespace.
///
/// # Errors
///
/// Returns an error if the name is invalid or `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    validate_hostname(hostname)?;
    nix::unistd::sethostname(hostname).map_err(|e| VesselError::Namespace {
        message: format!("sethostname({hostname}) failed: {e}"),
    })?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_hostnames() {
        assert!(validate_hostname("web-1.internal").is_ok());
        assert!(validate_hostname("0123456789ab").is_ok());
    }

    #[test]
    fn rejects_empty_long_and_odd_hostnames() {
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname(&"a".repeat(HOSTNAME_MAX + 1)).is_err());
        assert!(validate_hostname("has space").is_err());
        assert!(validate_hostname("slash/name").is_err());
    }
}
