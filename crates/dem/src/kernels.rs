//! Compute-kernel strategy traits.
//!
//! The scheduling core treats contact detection, force computation, and
//! time integration as injectable strategies with fixed signatures: scene
//! tables in, state/contact arrays out. The stages only assume each call
//! is blocking and synchronous and never touches data owned by the other
//! stage. This keeps the protocol testable with trivial deterministic
//! stand-ins, and lets a GPU backend slot in without the scheduler
//! knowing.

use std::sync::Arc;

use crate::boundary::BcPlane;
use crate::clump::GeometryTables;
use crate::contact::{ContactBatch, ContactStore};
use crate::family::FamilyTable;
use crate::params::SimParams;
use crate::state::{ClumpState, StateSnapshot};

/// Everything a kernel may read: frozen at `initialize()`.
#[derive(Clone)]
pub struct KernelScene {
    pub params: SimParams,
    pub geom: Arc<GeometryTables>,
    pub families: Arc<FamilyTable>,
    pub planes: Arc<Vec<BcPlane>>,
}

/// A kernel-level failure. Fatal to the run: the owning stage records it
/// and terminates.
#[derive(Debug)]
pub struct KernelError(pub String);

impl KernelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for KernelError {}

impl From<String> for KernelError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Broad-phase contact detection, run by the kinematic stage.
///
/// Contract: fill `out` with every candidate pair for the given
/// snapshot. Output must be complete before returning; the stage
/// publishes it atomically afterwards.
pub trait ContactDetector: Send {
    /// One-time setup before the stage loop starts (device acquisition,
    /// scratch sizing). Default: nothing.
    fn bind(&mut self, _scene: &KernelScene) -> Result<(), KernelError> {
        Ok(())
    }

    fn detect_contacts(
        &mut self,
        scene: &KernelScene,
        snapshot: &StateSnapshot,
        out: &mut ContactBatch,
    ) -> Result<(), KernelError>;
}

/// Per-cycle force computation, run by the dynamic stage.
///
/// Contract: reset the acceleration accumulators, preload gravity,
/// evaluate the current contact pairs, and scatter-reduce the resulting
/// forces and torques onto owner clumps. A clump with no contacts must
/// end the call with exactly the gravity preload.
pub trait ForceModel: Send {
    fn bind(&mut self, _scene: &KernelScene) -> Result<(), KernelError> {
        Ok(())
    }

    fn calculate_forces(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
        contacts: &mut ContactStore,
    ) -> Result<(), KernelError>;
}

/// One time-integration step over every clump, run by the dynamic stage
/// after force computation.
pub trait Integrator: Send {
    fn bind(&mut self, _scene: &KernelScene) -> Result<(), KernelError> {
        Ok(())
    }

    fn integrate(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
    ) -> Result<(), KernelError>;
}
