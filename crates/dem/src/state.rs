//! Per-clump state arrays and the split position encoding.
//!
//! Positions are stored as (voxel index, sub-voxel offset). The voxel
//! index packs three integer coordinates into a u64; the offset is a
//! float measured in length quanta (`l`) inside the voxel. Splitting the
//! encoding keeps sub-quantum precision at domain extents where a single
//! f32 world coordinate would have drifted to meter-scale rounding.
//!
//! Velocity and acceleration are half-step scaled the way the integrator
//! consumes them: `hv = v·h/l` (quanta per step), `h2a = a·h²/l`
//! (quanta per step²), and the angular analogues `h·ω`, `α·h²` in
//! radians. The force stage accumulates into `h2a`/`h2alpha`; the
//! integrator folds them into `hv`/`h_omg` and advances positions.

use glam::{DVec3, Quat, Vec3};

use crate::params::{SimParams, VOXEL_RES};

/// SoA state for every clump body.
///
/// The dynamic stage is the sole mutator during a run; the kinematic
/// stage only ever sees a buffered [`StateSnapshot`].
#[derive(Clone, Debug, Default)]
pub struct ClumpState {
    /// Packed voxel index: `x | y << nv_x_p2 | z << (nv_x_p2 + nv_y_p2)`.
    pub voxel: Vec<u64>,
    /// Offset from the voxel corner, in length quanta, each component in
    /// `[0, VOXEL_RES)`.
    pub loc: Vec<Vec3>,
    /// Orientation quaternion (body to world).
    pub ori: Vec<Quat>,
    /// Half-step-scaled linear velocity `v·h/l` (quanta per step).
    pub hv: Vec<Vec3>,
    /// Half-step-scaled angular velocity `ω·h` (radians per step).
    pub h_omg: Vec<Vec3>,
    /// Linear acceleration accumulator `a·h²/l` (quanta per step²).
    pub h2a: Vec<Vec3>,
    /// Angular acceleration accumulator `α·h²` (radians per step²).
    pub h2alpha: Vec<Vec3>,
    /// Family tag (boundary-condition / prescribed-motion group).
    pub family: Vec<u32>,
    /// Inertia-property offset: index into the template-level tables.
    pub template_offset: Vec<u32>,
}

impl ClumpState {
    pub fn with_len(n: usize) -> Self {
        Self {
            voxel: vec![0; n],
            loc: vec![Vec3::ZERO; n],
            ori: vec![Quat::IDENTITY; n],
            hv: vec![Vec3::ZERO; n],
            h_omg: vec![Vec3::ZERO; n],
            h2a: vec![Vec3::ZERO; n],
            h2alpha: vec![Vec3::ZERO; n],
            family: vec![0; n],
            template_offset: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.voxel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel.is_empty()
    }

    /// World-space center of clump `i` (m).
    pub fn world_position(&self, params: &SimParams, i: usize) -> DVec3 {
        decode_position(params, self.voxel[i], self.loc[i])
    }

    /// World-space linear velocity of clump `i` (m/s).
    pub fn world_velocity(&self, params: &SimParams, i: usize) -> Vec3 {
        self.hv[i] * (params.l / params.h) as f32
    }

    /// World-space angular velocity of clump `i` (rad/s).
    pub fn world_angular_velocity(&self, params: &SimParams, i: usize) -> Vec3 {
        self.h_omg[i] / params.h as f32
    }
}

/// Unpack a voxel index into integer coordinates.
#[inline]
pub fn voxel_xyz(params: &SimParams, voxel: u64) -> (u64, u64, u64) {
    let x = voxel & ((1u64 << params.nv_x_p2) - 1);
    let y = (voxel >> params.nv_x_p2) & ((1u64 << params.nv_y_p2) - 1);
    let z = voxel >> (params.nv_x_p2 + params.nv_y_p2);
    (x, y, z)
}

/// Pack integer voxel coordinates.
#[inline]
pub fn pack_voxel(params: &SimParams, x: u64, y: u64, z: u64) -> u64 {
    x | (y << params.nv_x_p2) | (z << (params.nv_x_p2 + params.nv_y_p2))
}

/// Encode a world position (m) into (voxel, offset-in-quanta).
pub fn encode_position(params: &SimParams, world: DVec3) -> (u64, Vec3) {
    let rel = world - params.lbf;
    let vx = (rel.x / params.voxel_size) as u64;
    let vy = (rel.y / params.voxel_size) as u64;
    let vz = (rel.z / params.voxel_size) as u64;
    let loc = Vec3::new(
        ((rel.x - vx as f64 * params.voxel_size) / params.l) as f32,
        ((rel.y - vy as f64 * params.voxel_size) / params.l) as f32,
        ((rel.z - vz as f64 * params.voxel_size) / params.l) as f32,
    );
    (pack_voxel(params, vx, vy, vz), loc)
}

/// Decode (voxel, offset-in-quanta) back to a world position (m).
pub fn decode_position(params: &SimParams, voxel: u64, loc: Vec3) -> DVec3 {
    let (vx, vy, vz) = voxel_xyz(params, voxel);
    DVec3::new(
        vx as f64 * params.voxel_size + loc.x as f64 * params.l,
        vy as f64 * params.voxel_size + loc.y as f64 * params.l,
        vz as f64 * params.voxel_size + loc.z as f64 * params.l,
    ) + params.lbf
}

/// Carry sub-voxel overflow into the voxel index after a position update,
/// clamping at the domain faces.
pub fn normalize_position(params: &SimParams, voxel: &mut u64, loc: &mut Vec3) {
    let (mut vx, mut vy, mut vz) = voxel_xyz(params, *voxel);
    let res = VOXEL_RES as f32;

    let mut carry_axis = |v: &mut u64, l: &mut f32, max: u64| {
        let carry = (*l / res).floor();
        *l -= carry * res;
        let shifted = *v as i64 + carry as i64;
        if shifted < 0 {
            *v = 0;
            *l = 0.0;
        } else if shifted as u64 >= max {
            *v = max - 1;
            *l = res - 1.0;
        } else {
            *v = shifted as u64;
        }
    };

    carry_axis(&mut vx, &mut loc.x, 1u64 << params.nv_x_p2);
    carry_axis(&mut vy, &mut loc.y, 1u64 << params.nv_y_p2);
    carry_axis(&mut vz, &mut loc.z, 1u64 << params.nv_z_p2);
    *voxel = pack_voxel(params, vx, vy, vz);
}

/// Position/orientation payload sent from the dynamic stage to the
/// kinematic stage (dT → kT mailbox).
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    pub voxel: Vec<u64>,
    pub loc: Vec<Vec3>,
    pub ori: Vec<Quat>,
    /// Dynamic-stage cycle stamp at send time; travels with the data so
    /// the drift policy can tell how stale downstream contact batches are.
    pub stamp: i64,
}

impl StateSnapshot {
    pub fn with_len(n: usize) -> Self {
        Self {
            voxel: vec![0; n],
            loc: vec![Vec3::ZERO; n],
            ori: vec![Quat::IDENTITY; n],
            stamp: 0,
        }
    }

    /// Overwrite this snapshot from the live state.
    pub fn copy_from(&mut self, state: &ClumpState, stamp: i64) {
        self.voxel.clear();
        self.voxel.extend_from_slice(&state.voxel);
        self.loc.clear();
        self.loc.extend_from_slice(&state.loc);
        self.ori.clear();
        self.ori.extend_from_slice(&state.ori);
        self.stamp = stamp;
    }

    /// Overwrite from another snapshot, reusing this one's allocations.
    pub fn copy_from_snapshot(&mut self, other: &StateSnapshot) {
        self.voxel.clear();
        self.voxel.extend_from_slice(&other.voxel);
        self.loc.clear();
        self.loc.extend_from_slice(&other.loc);
        self.ori.clear();
        self.ori.extend_from_slice(&other.ori);
        self.stamp = other.stamp;
    }

    pub fn len(&self) -> usize {
        self.voxel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel.is_empty()
    }

    /// World-space center of clump `i` (m).
    pub fn world_position(&self, params: &SimParams, i: usize) -> DVec3 {
        decode_position(params, self.voxel[i], self.loc[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> SimParams {
        let mut p = SimParams::default();
        p.nv_x_p2 = 8;
        p.nv_y_p2 = 8;
        p.nv_z_p2 = 8;
        p.l = 1e-5;
        p.lbf = DVec3::new(-1.0, -1.0, -1.0);
        p.derive_geometry();
        p
    }

    #[test]
    fn encode_decode_keeps_sub_voxel_precision() {
        let p = test_params();
        let world = DVec3::new(0.123456, -0.654321, 0.5);
        let (voxel, loc) = encode_position(&p, world);
        let back = decode_position(&p, voxel, loc);
        // Error bounded by the quantum, not by the domain extent.
        assert!((back - world).length() < p.l * 2.0, "error {:?}", back - world);
    }

    #[test]
    fn normalize_carries_overflow_into_voxel() {
        let p = test_params();
        let mut voxel = pack_voxel(&p, 3, 3, 3);
        let mut loc = Vec3::new(VOXEL_RES as f32 + 10.0, -5.0, 12.0);
        normalize_position(&p, &mut voxel, &mut loc);

        let (vx, vy, vz) = voxel_xyz(&p, voxel);
        assert_eq!((vx, vy, vz), (4, 2, 3));
        assert!((loc.x - 10.0).abs() < 1e-3);
        assert!((loc.y - (VOXEL_RES as f32 - 5.0)).abs() < 1e-3);
        assert!((loc.z - 12.0).abs() < 1e-3);
    }

    #[test]
    fn normalize_clamps_at_domain_faces() {
        let p = test_params();
        let mut voxel = pack_voxel(&p, 0, 255, 0);
        let mut loc = Vec3::new(-10.0, VOXEL_RES as f32 + 1.0, 0.0);
        normalize_position(&p, &mut voxel, &mut loc);

        let (vx, vy, _) = voxel_xyz(&p, voxel);
        assert_eq!(vx, 0);
        assert_eq!(loc.x, 0.0);
        assert_eq!(vy, 255);
    }
}
