//! Asynchronous two-stage DEM solver for multi-sphere clump bodies.
//!
//! Two long-lived worker threads form a fixed pipeline: the kinematic
//! stage (kT) turns position snapshots into candidate contact pairs, the
//! dynamic stage (dT) turns contact pairs into forces and integrated
//! motion. Each direction of exchange is a single-slot mailbox, and a
//! drift policy bounds how far dT may integrate ahead of the contact
//! topology it last received. Compute kernels (broad phase, forces,
//! integration) are injectable strategies; stock CPU implementations are
//! included and a GPU backend can slot in without touching the
//! scheduling core.
//!
//! # Example
//!
//! ```
//! use dem::{DemSolver, Material};
//! use glam::{DVec3, Vec3};
//!
//! # fn main() -> Result<(), dem::SolverError> {
//! let mut sim = DemSolver::new();
//! let quartz = sim.load_material(Material::default());
//! let pebble = sim.load_simple_sphere(1.0, 0.05, quartz)?;
//!
//! sim.add_clumps(
//!     &[pebble, pebble],
//!     &[DVec3::new(-0.04, 0.0, 0.0), DVec3::new(0.04, 0.0, 0.0)],
//! )?;
//! sim.set_clump_vels(&[Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0)])?;
//!
//! sim.set_domain_voxels(16, 16, 16, 1e-7);
//! sim.center_coordinate_system();
//! sim.set_gravity(Vec3::ZERO);
//! sim.set_time_step(1e-4);
//!
//! sim.initialize()?;
//! sim.do_step_dynamics(100)?;
//!
//! let tracker = sim.tracker(0)?;
//! println!("clump 0 now at {:?}", tracker.position());
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod broadphase;
pub mod clump;
pub mod contact;
pub mod dynamic;
pub mod family;
pub mod force;
pub mod integrator;
pub mod kernels;
pub mod kinematic;
pub mod mailbox;
pub mod params;
pub mod sampler;
pub mod scheduler;
pub mod solver;
pub mod state;
pub mod writer;

pub use boundary::BcPlane;
pub use broadphase::BinSweepDetector;
pub use clump::{ClumpTemplate, GeometryTables, Material};
pub use contact::{ContactBatch, ContactStore};
pub use family::{FamilyPrescription, FamilyTable};
pub use force::SpringDashpotForce;
pub use integrator::HalfStepIntegrator;
pub use kernels::{ContactDetector, ForceModel, Integrator, KernelError, KernelScene};
pub use mailbox::Mailbox;
pub use params::{DriftConfig, SimParams};
pub use scheduler::{SchedCoord, SchedulingStats, StageId};
pub use solver::{ClumpTracker, DemSolver};
pub use state::{ClumpState, StateSnapshot};

/// Solver-level failure.
///
/// Stage-internal kernel errors are fatal to the run: the owning stage
/// records the error, the remaining cycles are abandoned, and the driver
/// surfaces it from the blocking run call. Results of cycles completed
/// before the failure remain valid.
#[derive(Debug)]
pub enum SolverError {
    /// A compute kernel failed inside a worker stage.
    Kernel {
        stage: scheduler::StageId,
        message: String,
    },
    /// Scene construction or API misuse.
    Scene(String),
    /// File output failure.
    Io(std::io::Error),
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::Kernel { stage, message } => {
                write!(f, "{} kernel failure: {}", stage, message)
            }
            SolverError::Scene(message) => write!(f, "scene error: {}", message),
            SolverError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for SolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SolverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SolverError {
    fn from(e: std::io::Error) -> Self {
        SolverError::Io(e)
    }
}
