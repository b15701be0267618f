//! Self re-exec bootstrap.
//!
//! Isolation cannot be retrofitted onto a running process: a new PID
//! namespace only applies to children created into it. The binary therefore
//! re-invokes itself as `<self> init <original args…>` through a clone that
//! carries the namespace flags, and the re-executed copy recognises the
//! `init` sentinel and proceeds with setup.

use vessel_common::constants::REEXEC_SENTINEL;
use vessel_common::error::{Result, VesselError};

use super::NamespaceSet;
use super::spawn::{SpawnRequest, spawn_isolated};

/// Result of calling [`reexec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReexecOutcome {
    /// This process is the re-executed child and should continue setup.
    AlreadyReexeced,
    /// The re-executed child ran and exited with this status.
    Exited(i32),
}

/// Returns whether `args` belong to an already re-executed process.
pub fn is_reexeced<S: AsRef<str>>(args: &[S]) -> bool {
    args.get(1).is_some_and(|a| a.as_ref() == REEXEC_SENTINEL)
}

/// Builds the argument vector for the re-executed child.
///
/// `argv[0]` is kept, the sentinel is inserted, the remaining arguments follow.
#[must_use]
pub fn reexec_args(args: &[String]) -> Vec<String> {
    let argv0 = args
        .first()
        .cloned()
        .unwrap_or_else(|| vessel_common::constants::APP_NAME.to_string());
    std::iter::once(argv0)
        .chain(std::iter::once(REEXEC_SENTINEL.to_string()))
        .chain(args.iter().skip(1).cloned())
        .collect()
}

/// Strips the sentinel from a re-executed process's arguments.
#[must_use]
pub fn strip_sentinel(args: &[String]) -> Vec<String> {
    if is_reexeced(args) {
        args.iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, a)| a.clone())
            .collect()
    } else {
        args.to_vec()
    }
}

/// Re-executes the current binary inside `namespaces`.
///
/// Returns [`ReexecOutcome::AlreadyReexeced`] immediately when this process
/// is the re-executed child. Otherwise spawns the child, blocks until it
/// exits, and returns its status so the caller can forward it.
///
/// # Errors
///
/// Returns an error if the current executable cannot be resolved, the clone
/// fails, or the child cannot exec.
pub fn reexec(namespaces: NamespaceSet) -> Result<ReexecOutcome> {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    if is_reexeced(&args) {
        return Ok(ReexecOutcome::AlreadyReexeced);
    }

    let exe = std::env::current_exe().map_err(|e| VesselError::Io {
        path: "/proc/self/exe".into(),
        source: e,
    })?;
    tracing::info!(exe = %exe.display(), %namespaces, "re-executing inside new namespaces");

    let request = SpawnRequest::new(exe, reexec_args(&args)).namespaces(namespaces);
    let mut child = spawn_isolated(&request)?;
    if let Err(cause) = child.await_start() {
        let _ = child.wait();
        return Err(VesselError::Namespace {
            message: format!("re-exec failed: {cause}"),
        });
    }
    let status = child.wait()?;
    tracing::debug!(status, "re-executed child exited");
    Ok(ReexecOutcome::Exited(status))
}
