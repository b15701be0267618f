//! Security hardening applied to the container process before exec.
//!
//! Layers run in a fixed order: LSM, then seccomp, then capabilities. The
//! LSM switch needs `/proc` writes the seccomp filter may refuse, and the
//! filter must still allow `capset(2)` for the last layer. A layer may do
//! nothing; none may be skipped or reordered. The first failure stops the
//! pipeline and the caller must not exec.

pub mod capability;
pub mod lsm;
pub mod seccomp;

use std::fmt;

use vessel_common::error::{Result, VesselError};

pub use capability::{Capability, CapabilityConfig, CapabilitySet};
pub use lsm::{HostLsm, LsmKind, LsmProfile, detect_lsm};
pub use seccomp::SeccompProfile;

/// Progress through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    /// Nothing applied yet.
    Unapplied,
    /// The LSM layer finished.
    LsmApplied,
    /// The seccomp layer finished.
    SeccompApplied,
    /// The capability layer finished.
    CapabilitiesApplied,
    /// Every layer finished; the process may exec.
    Ready,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unapplied => "unapplied",
            Self::LsmApplied => "lsm-applied",
            Self::SeccompApplied => "seccomp-applied",
            Self::CapabilitiesApplied => "capabilities-applied",
            Self::Ready => "ready",
        })
    }
}

/// One hardening layer.
pub trait SecurityLayer {
    /// Stage name reported in errors.
    fn name(&self) -> &'static str;

    /// Applies the layer to the calling process.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be applied.
    fn apply(&self) -> Result<()>;
}

impl SecurityLayer for HostLsm {
    fn name(&self) -> &'static str {
        "lsm"
    }

    fn apply(&self) -> Result<()> {
        Self::apply(self)
    }
}

impl SecurityLayer for SeccompProfile {
    fn name(&self) -> &'static str {
        "seccomp"
    }

    fn apply(&self) -> Result<()> {
        Self::apply(self)
    }
}

impl SecurityLayer for CapabilityConfig {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    fn apply(&self) -> Result<()> {
        Self::apply(self)
    }
}

/// The ordered LSM → seccomp → capabilities pipeline.
pub struct SecurityPipeline {
    layers: [Box<dyn SecurityLayer>; 3],
    stage: PipelineStage,
}

impl fmt::Debug for SecurityPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityPipeline")
            .field("layers", &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("stage", &self.stage)
            .finish()
    }
}

impl SecurityPipeline {
    /// Builds the pipeline from the container's policies.
    ///
    /// The host LSM is detected here, from the current `/sys`, so the
    /// pipeline must be built before the root filesystem is switched.
    #[must_use]
    pub fn new(lsm: LsmProfile, seccomp: SeccompProfile, capabilities: CapabilityConfig) -> Self {
        Self::with_layers(
            Box::new(HostLsm::detect(lsm)),
            Box::new(seccomp),
            Box::new(capabilities),
        )
    }

    /// Builds the pipeline from arbitrary layers, kept in LSM, seccomp,
    /// capabilities order.
    #[must_use]
    pub fn with_layers(
        lsm: Box<dyn SecurityLayer>,
        seccomp: Box<dyn SecurityLayer>,
        capabilities: Box<dyn SecurityLayer>,
    ) -> Self {
        Self {
            layers: [lsm, seccomp, capabilities],
            stage: PipelineStage::Unapplied,
        }
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Applies every remaining layer in order.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Security`] naming the failed layer. The stage
    /// stays at the last layer that succeeded.
    pub fn apply(&mut self) -> Result<PipelineStage> {
        const AFTER: [PipelineStage; 3] = [
            PipelineStage::LsmApplied,
            PipelineStage::SeccompApplied,
            PipelineStage::CapabilitiesApplied,
        ];
        for (layer, next) in self.layers.iter().zip(AFTER) {
            if self.stage >= next {
                continue;
            }
            layer.apply().map_err(|e| match e {
                VesselError::Security { .. } => e,
                other => VesselError::security(layer.name(), other.to_string()),
            })?;
            self.stage = next;
            tracing::debug!(stage = %self.stage, "security layer applied");
        }
        self.stage = PipelineStage::Ready;
        Ok(self.stage)
    }
}
