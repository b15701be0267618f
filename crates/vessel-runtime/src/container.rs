//! Container record and lifecycle transitions.
//!
//! ```text
//! Created ──start──▶ Running ──stop──▶ Stopped
//!    │                  │                 │
//!    └──────exit────────┴──────exit───────┴──▶ Exited
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};
use vessel_common::types::{ContainerId, ContainerState};
use vessel_core::filesystem::RootFs;

use crate::spec::IsolationSpec;

/// How often a stopping process is polled.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time a process gets between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// A container instance with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Host PID of the init process while it runs.
    pub pid: Option<u32>,
    /// Exit status once exited; signal deaths are `128 + signal`.
    pub exit_code: Option<i32>,
    /// Command executed inside the container.
    pub command: Vec<String>,
    /// Root filesystem, kept for cleanup on removal.
    #[serde(default)]
    pub rootfs: Option<RootFs>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 start timestamp.
    #[serde(default)]
    pub started_at: Option<String>,
    /// RFC 3339 exit timestamp.
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl Container {
    /// Creates a new container in the `Created` state.
    #[must_use]
    pub fn new(id: ContainerId, name: String, command: Vec<String>) -> Self {
        Self {
            id,
            name,
            state: ContainerState::Created,
            pid: None,
            exit_code: None,
            command,
            rootfs: None,
            created_at: now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Creates the record for a resolved spec.
    #[must_use]
    pub fn from_spec(spec: &IsolationSpec) -> Self {
        let mut container = Self::new(spec.id.clone(), spec.name.clone(), spec.command.clone());
        container.rootfs.clone_from(&spec.rootfs);
        container
    }

    /// Records that the process `pid` was created.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::InvalidState`] unless the container is `Created`.
    pub fn mark_running(&mut self, pid: u32) -> Result<()> {
        self.expect_state(&[ContainerState::Created], "start")?;
        self.state = ContainerState::Running;
        self.pid = Some(pid);
        self.started_at = Some(now());
        tracing::info!(id = %self.id, pid, "container running");
        Ok(())
    }

    /// Records that the process was asked to stop.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::InvalidState`] unless the container is `Running`.
    pub fn mark_stopped(&mut self) -> Result<()> {
        self.expect_state(&[ContainerState::Running], "stop")?;
        self.state = ContainerState::Stopped;
        Ok(())
    }

    /// Records the exit status. A container that never started may exit
    /// straight from `Created`.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::InvalidState`] if the container already exited.
    pub fn mark_exited(&mut self, code: i32) -> Result<()> {
        self.expect_state(
            &[ContainerState::Created, ContainerState::Running, ContainerState::Stopped],
            "exit",
        )?;
        self.state = ContainerState::Exited;
        self.pid = None;
        self.exit_code = Some(code);
        self.finished_at = Some(now());
        tracing::info!(id = %self.id, code, "container exited");
        Ok(())
    }

    /// Checks that the record may be removed.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::InvalidState`] for a running container
    /// unless `force` is set.
    pub fn ensure_removable(&self, force: bool) -> Result<()> {
        if self.state == ContainerState::Running && !force {
            return Err(self.invalid("remove"));
        }
        Ok(())
    }

    /// Stops the container's process.
    ///
    /// Sends SIGTERM, waits up to `grace` for the process to go away, then
    /// sends SIGKILL.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::InvalidState`] unless the container is
    /// `Running`, or a permission error if the process cannot be signaled.
    pub fn stop(&mut self, grace: Duration) -> Result<()> {
        self.expect_state(&[ContainerState::Running], "stop")?;
        if let Some(pid) = self.pid {
            use nix::sys::signal::Signal;

            if signal(pid, Signal::SIGTERM)? {
                tracing::info!(pid, "sent SIGTERM");
                if !wait_gone(pid, grace) && signal(pid, Signal::SIGKILL)? {
                    tracing::info!(pid, "sent SIGKILL");
                }
            }
        }
        self.mark_stopped()?;
        tracing::info!(id = %self.id, "container stopped");
        Ok(())
    }

    /// Sends SIGKILL to a running container's process.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the process cannot be signaled.
    pub fn kill(&self) -> Result<()> {
        if let (ContainerState::Running | ContainerState::Stopped, Some(pid)) = (self.state, self.pid) {
            if signal(pid, nix::sys::signal::Signal::SIGKILL)? {
                tracing::info!(id = %self.id, pid, "sent SIGKILL");
            }
        }
        Ok(())
    }

    fn expect_state(&self, allowed: &[ContainerState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> VesselError {
        VesselError::InvalidState {
            id: self.id.to_string(),
            state: self.state,
            action,
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Signals `pid`; `Ok(false)` when it no longer exists.
fn signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<bool> {
    use nix::errno::Errno;

    let target = nix::unistd::Pid::from_raw(i32::try_from(pid).map_err(|_| VesselError::Config {
        message: format!("pid {pid} is out of range"),
    })?);
    match nix::sys::signal::kill(target, sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(VesselError::PermissionDenied {
            message: format!("cannot send {sig} to pid {pid}: {e}"),
        }),
    }
}

/// Polls until `pid` disappears or `grace` elapses.
fn wait_gone(pid: u32, grace: Duration) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return true;
    };
    let target = nix::unistd::Pid::from_raw(raw);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if nix::sys::signal::kill(target, None).is_err() {
            return true;
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Container {
        Container::new(ContainerId::new("test-1"), "test".into(), vec!["sh".into()])
    }

    #[test]
    fn new_container_has_created_state() {
        let c = container();
        assert_eq!(c.state, ContainerState::Created);
        assert!(c.pid.is_none());
        assert!(c.exit_code.is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(&c.created_at).is_ok());
    }

    #[test]
    fn full_lifecycle() {
        let mut c = container();
        c.mark_running(42).expect("start");
        assert_eq!(c.pid, Some(42));
        assert!(c.started_at.is_some());
        c.mark_stopped().expect("stop");
        c.mark_exited(143).expect("exit");
        assert_eq!(c.state, ContainerState::Exited);
        assert_eq!(c.exit_code, Some(143));
        assert!(c.pid.is_none());
        assert!(c.finished_at.is_some());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut c = container();
        let err = c.mark_stopped().expect_err("not running");
        assert!(matches!(
            err,
            VesselError::InvalidState {
                state: ContainerState::Created,
                action: "stop",
                ..
            }
        ));
        c.mark_running(1).expect("start");
        assert!(c.mark_running(2).is_err());
        c.mark_exited(0).expect("exit");
        assert!(c.mark_exited(0).is_err());
        assert!(c.mark_running(3).is_err());
    }

    #[test]
    fn start_failure_exits_from_created() {
        let mut c = container();
        c.mark_exited(125).expect("exit");
        assert_eq!(c.exit_code, Some(125));
    }

    #[test]
    fn running_container_needs_force_to_remove() {
        let mut c = container();
        assert!(c.ensure_removable(false).is_ok());
        c.mark_running(7).expect("start");
        assert!(c.ensure_removable(false).is_err());
        assert!(c.ensure_removable(true).is_ok());
    }

    #[test]
    fn stop_requires_running_state() {
        let mut c = container();
        assert!(c.stop(Duration::ZERO).is_err());
        assert_eq!(c.state, ContainerState::Created);
    }

    #[test]
    fn stop_terminates_a_real_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let mut c = container();
        c.mark_running(child.id()).expect("start");
        c.stop(Duration::from_millis(500)).expect("stop");
        assert_eq!(c.state, ContainerState::Stopped);
        let status = child.wait().expect("wait");
        assert!(!status.success());
    }

    #[test]
    fn stop_of_vanished_process_still_transitions() {
        let mut c = container();
        c.mark_running(i32::MAX.unsigned_abs()).expect("start");
        c.stop(Duration::ZERO).expect("stop");
        assert_eq!(c.state, ContainerState::Stopped);
    }

    #[test]
    fn record_serializes_lowercase_state() {
        let json = serde_json::to_string(&container()).expect("serialize");
        assert!(json.contains(r#""state":"created""#));
        let back: Container = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, container_with_time(&back.created_at));
    }

    fn container_with_time(created_at: &str) -> Container {
        let mut c = container();
        created_at.clone_into(&mut c.created_at);
        c
    }
}
