//! Run-wide simulation parameters.
//!
//! `SimParams` is frozen at `initialize()` and copied into each worker
//! stage; nothing in here mutates during a run.

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Sub-voxel resolution exponent: each voxel edge is 2^16 length quanta.
///
/// Positions are stored as (voxel index, offset-in-quanta), which keeps
/// full precision even when the domain spans millions of voxels.
pub const VOXEL_RES_POWER2: u32 = 16;

/// Quanta per voxel edge (2^[`VOXEL_RES_POWER2`]).
pub const VOXEL_RES: u32 = 1 << VOXEL_RES_POWER2;

/// Immutable per-run scalar configuration.
///
/// Built by the solver from user calls before `initialize()`; each stage
/// gets its own copy at thread launch.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimParams {
    /// Voxel count exponents: the domain is 2^nv_x × 2^nv_y × 2^nv_z voxels.
    pub nv_x_p2: u8,
    pub nv_y_p2: u8,
    pub nv_z_p2: u8,
    /// Length quantum (m). One voxel edge is `l * VOXEL_RES`.
    pub l: f64,
    /// Voxel edge length (m), derived: `l * VOXEL_RES`.
    pub voxel_size: f64,
    /// Broad-phase bin edge length (m).
    pub bin_size: f64,
    /// Bins per axis, derived from domain extent and `bin_size`.
    pub nb_x: u64,
    pub nb_y: u64,
    pub nb_z: u64,
    /// Left-bottom-front corner of the domain in world space (m).
    pub lbf: DVec3,
    /// Gravitational acceleration (m/s²).
    pub gravity: Vec3,
    /// Time step size (s).
    pub h: f64,
    /// Contact margin added to sphere radii in the broad phase (m).
    /// Larger values find contacts earlier at the cost of more candidate
    /// pairs per kinematic update.
    pub expand_factor: f32,
    /// Population counts, frozen at initialization.
    pub n_clumps: usize,
    pub n_spheres: usize,
    pub n_templates: usize,
    pub n_materials: usize,
}

impl SimParams {
    /// Domain extent along each axis (m).
    pub fn domain_size(&self) -> DVec3 {
        DVec3::new(
            self.voxel_size * (1u64 << self.nv_x_p2) as f64,
            self.voxel_size * (1u64 << self.nv_y_p2) as f64,
            self.voxel_size * (1u64 << self.nv_z_p2) as f64,
        )
    }

    /// Recompute the derived voxel/bin geometry after the raw inputs
    /// (exponents, `l`, `bin_size`) change.
    pub fn derive_geometry(&mut self) {
        self.voxel_size = self.l * VOXEL_RES as f64;
        self.nb_x = (self.voxel_size * (1u64 << self.nv_x_p2) as f64 / self.bin_size) as u64 + 1;
        self.nb_y = (self.voxel_size * (1u64 << self.nv_y_p2) as f64 / self.bin_size) as u64 + 1;
        self.nb_z = (self.voxel_size * (1u64 << self.nv_z_p2) as f64 / self.bin_size) as u64 + 1;
    }
}

impl Default for SimParams {
    fn default() -> Self {
        let mut p = Self {
            nv_x_p2: 21,
            nv_y_p2: 21,
            nv_z_p2: 21,
            l: 1e-10,
            voxel_size: 0.0,
            bin_size: 1e-3,
            nb_x: 0,
            nb_y: 0,
            nb_z: 0,
            lbf: DVec3::ZERO,
            gravity: Vec3::new(0.0, 0.0, -9.81),
            h: 1e-4,
            expand_factor: 0.0,
            n_clumps: 0,
            n_spheres: 0,
            n_templates: 0,
            n_materials: 0,
        };
        p.derive_geometry();
        p
    }
}

/// Drift-control configuration for the dynamic stage.
///
/// The dynamic stage blocks before starting its next cycle when EITHER
/// bound is reached (see `SchedCoord::dynamic_should_wait`):
/// - it has integrated `max_drift` cycles since it last swapped in fresh
///   contact data, or
/// - its cycle stamp is `max_lookahead` ahead of the snapshot stamp behind
///   the freshest contact batch the kinematic stage has published.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Max cycles integrated on stale contact topology before stalling.
    pub max_drift: i64,
    /// Max cycle-stamp lead over the kinematic stage before stalling.
    pub max_lookahead: i64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        // Lockstep: every cycle waits for a contact update.
        Self {
            max_drift: 1,
            max_lookahead: 1,
        }
    }
}
