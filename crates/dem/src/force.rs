//! Default force model: frictionless normal spring-dashpot contacts.
//!
//! One call covers the whole dynamic-stage force pass: accumulator reset
//! with gravity preload, per-pair normal forces over the current contact
//! list, analytical plane contacts, and the scatter-reduce of pair
//! forces and torques onto owner clumps.
//!
//! Normal force: `F = k·δ - c·v_n` along the contact normal, with the
//! pair stiffness `k` and damping ratio from the material proxy tables
//! and `c = 2ζ·sqrt(k·m_eff)`. Candidates that do not actually touch
//! (the broad phase over-approximates by the expand margin) contribute
//! zero force.

use glam::{DVec3, Quat, Vec3};
use rayon::prelude::*;

use crate::clump::GeometryTables;
use crate::contact::ContactStore;
use crate::kernels::{ForceModel, KernelError, KernelScene};
use crate::params::SimParams;
use crate::state::ClumpState;

/// The stock dynamic-stage force kernel.
#[derive(Default)]
pub struct SpringDashpotForce;

impl SpringDashpotForce {
    pub fn new() -> Self {
        Self
    }
}

/// Angular acceleration of a principal-axis body for a world torque.
#[inline]
fn angular_accel(ori: Quat, moi: Vec3, torque: Vec3) -> Vec3 {
    let t_body = ori.inverse() * torque;
    ori * (t_body / moi)
}

/// One pair's normal force and contact-point lever arms.
///
/// Returns (force on A, point rel A, point rel B); all zero when the
/// spheres do not touch.
fn pair_force(
    params: &SimParams,
    geom: &GeometryTables,
    state: &ClumpState,
    a: u32,
    b: u32,
) -> (Vec3, Vec3, Vec3) {
    let owner_a = geom.owner[a as usize] as usize;
    let owner_b = geom.owner[b as usize] as usize;

    let center_a = state.world_position(params, owner_a);
    let center_b = state.world_position(params, owner_b);
    let sphere_a = center_a + (state.ori[owner_a] * geom.sphere_rel_pos(a)).as_dvec3();
    let sphere_b = center_b + (state.ori[owner_b] * geom.sphere_rel_pos(b)).as_dvec3();

    let r_a = geom.sphere_radius(a);
    let r_b = geom.sphere_radius(b);
    let d: DVec3 = sphere_a - sphere_b;
    let dist = d.length();
    let overlap = (r_a + r_b) as f64 - dist;
    if overlap <= 0.0 || dist <= 0.0 {
        return (Vec3::ZERO, Vec3::ZERO, Vec3::ZERO);
    }

    // Normal points from B toward A; contact point sits mid-overlap.
    let normal = (d / dist).as_vec3();
    let contact = sphere_b + (d / dist) * (r_b as f64 - overlap * 0.5);
    let point_a = (contact - center_a).as_vec3();
    let point_b = (contact - center_b).as_vec3();

    let vel_a = state.world_velocity(params, owner_a)
        + state.world_angular_velocity(params, owner_a).cross(point_a);
    let vel_b = state.world_velocity(params, owner_b)
        + state.world_angular_velocity(params, owner_b).cross(point_b);
    let v_n = (vel_a - vel_b).dot(normal);

    let (stiffness, zeta) = geom.contact_proxies(a, b);
    let mass_a = geom.mass[state.template_offset[owner_a] as usize];
    let mass_b = geom.mass[state.template_offset[owner_b] as usize];
    let m_eff = mass_a * mass_b / (mass_a + mass_b);
    let damping = 2.0 * zeta * (stiffness * m_eff).sqrt();

    let magnitude = stiffness * overlap as f32 - damping * v_n;
    (normal * magnitude, point_a, point_b)
}

/// Reset the acceleration accumulators to the gravity preload. A body
/// that collects no contact afterwards ends its cycle with exactly this.
pub fn gravity_preload(params: &SimParams, state: &mut ClumpState) {
    let h2_over_l = (params.h * params.h / params.l) as f32;
    let g = params.gravity * h2_over_l;
    for i in 0..state.len() {
        state.h2a[i] = g;
        state.h2alpha[i] = Vec3::ZERO;
    }
}

/// Resolve analytical plane boundaries sphere-by-sphere, accumulating
/// directly onto owner clumps. Planes never pass through the broad
/// phase, so this runs against every sphere each cycle.
pub fn apply_plane_contacts(
    params: &SimParams,
    geom: &GeometryTables,
    planes: &[crate::boundary::BcPlane],
    state: &mut ClumpState,
) {
    let h2_over_l = (params.h * params.h / params.l) as f32;
    let h2 = (params.h * params.h) as f32;

    for plane in planes {
        for sph in 0..geom.n_spheres() as u32 {
            let owner = geom.owner[sph as usize] as usize;
            let center = state.world_position(params, owner);
            let sphere = center + (state.ori[owner] * geom.sphere_rel_pos(sph)).as_dvec3();
            let radius = geom.sphere_radius(sph);
            let overlap = radius as f64 - plane.signed_distance(sphere);
            if overlap <= 0.0 {
                continue;
            }

            let normal = plane.normal;
            let contact = sphere - normal.as_dvec3() * (radius as f64 - overlap * 0.5);
            let point = (contact - center).as_vec3();
            let vel = state.world_velocity(params, owner)
                + state.world_angular_velocity(params, owner).cross(point);
            let v_n = vel.dot(normal);

            let pair = crate::clump::pair_offset(
                geom.sphere_material(sph),
                plane.material,
                geom.n_materials,
            );
            let stiffness = geom.stiffness_proxy[pair];
            let zeta = geom.damping_proxy[pair];
            let mass = geom.mass[state.template_offset[owner] as usize];
            let damping = 2.0 * zeta * (stiffness * mass).sqrt();
            let f = normal * (stiffness * overlap as f32 - damping * v_n);

            let moi = geom.moi[state.template_offset[owner] as usize];
            state.h2a[owner] += f / mass * h2_over_l;
            state.h2alpha[owner] += angular_accel(state.ori[owner], moi, point.cross(f)) * h2;
        }
    }
}

/// Reduce per-pair forces and torques onto their owner clumps.
///
/// Keyed purely by owner index: an owner with zero, one, or many
/// contacts is handled identically, and a body with no pairs keeps
/// whatever preload is already in its accumulators.
pub fn scatter_reduce(
    params: &SimParams,
    geom: &GeometryTables,
    state: &mut ClumpState,
    id_a: &[u32],
    id_b: &[u32],
    force: &[Vec3],
    point_a: &[Vec3],
    point_b: &[Vec3],
) {
    let h2_over_l = (params.h * params.h / params.l) as f32;
    let h2 = (params.h * params.h) as f32;

    for k in 0..id_a.len() {
        let f = force[k];
        if f == Vec3::ZERO {
            continue;
        }
        let owner_a = geom.owner[id_a[k] as usize] as usize;
        let owner_b = geom.owner[id_b[k] as usize] as usize;

        let mass_a = geom.mass[state.template_offset[owner_a] as usize];
        state.h2a[owner_a] += f / mass_a * h2_over_l;
        let moi_a = geom.moi[state.template_offset[owner_a] as usize];
        state.h2alpha[owner_a] += angular_accel(state.ori[owner_a], moi_a, point_a[k].cross(f)) * h2;

        let mass_b = geom.mass[state.template_offset[owner_b] as usize];
        state.h2a[owner_b] -= f / mass_b * h2_over_l;
        let moi_b = geom.moi[state.template_offset[owner_b] as usize];
        state.h2alpha[owner_b] +=
            angular_accel(state.ori[owner_b], moi_b, point_b[k].cross(-f)) * h2;
    }
}

impl ForceModel for SpringDashpotForce {
    fn calculate_forces(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
        contacts: &mut ContactStore,
    ) -> Result<(), KernelError> {
        let params = &scene.params;
        let geom = &scene.geom;

        gravity_preload(params, state);

        // Per-pair forces; pairs are independent, so this is the one
        // embarrassingly parallel loop of the pass.
        let (ids_a, ids_b, force, point_a, point_b) = contacts.parts_mut();
        let st: &ClumpState = state;
        force
            .par_iter_mut()
            .zip(point_a.par_iter_mut())
            .zip(point_b.par_iter_mut())
            .enumerate()
            .for_each(|(k, ((f, pa), pb))| {
                let (fk, pak, pbk) = pair_force(params, geom, st, ids_a[k], ids_b[k]);
                *f = fk;
                *pa = pak;
                *pb = pbk;
            });

        apply_plane_contacts(params, geom, &scene.planes, state);

        scatter_reduce(params, geom, state, ids_a, ids_b, force, point_a, point_b);
        Ok(())
    }
}
