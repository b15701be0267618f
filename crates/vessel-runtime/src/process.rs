//! A running container process as seen by the parent.

use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerId;
use vessel_core::namespace::spawn::IsolatedChild;

/// The init process of a container, created by one of the run strategies.
#[derive(Debug)]
pub struct ContainerProcess {
    id: ContainerId,
    child: IsolatedChild,
}

impl ContainerProcess {
    pub(crate) const fn new(id: ContainerId, child: IsolatedChild) -> Self {
        Self { id, child }
    }

    /// Container the process belongs to.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Host PID of the process.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.pid().as_raw().unsigned_abs()
    }

    /// Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::ContainerStart`] if setup or exec failed in
    /// the child, and [`VesselError::ContainerExited`] for a non-zero exit.
    pub fn wait(mut self) -> Result<i32> {
        if let Err(cause) = self.child.await_start() {
            let status = self.child.wait();
            tracing::debug!(id = %self.id, ?status, "child failed before exec");
            return Err(VesselError::ContainerStart {
                id: self.id.to_string(),
                cause,
            });
        }
        let status = self.child.wait()?;
        tracing::info!(id = %self.id, status, "container exited");
        if status == 0 {
            Ok(0)
        } else {
            Err(VesselError::ContainerExited {
                id: self.id.to_string(),
                status,
            })
        }
    }
}
