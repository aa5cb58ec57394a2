//! Default time integrator: half-step velocity update on the scaled
//! state representation.
//!
//! Works directly in the storage units: `hv += h2a` folds the
//! accumulated acceleration into the half-step velocity, `loc += hv`
//! advances the sub-voxel position (with voxel carry), and the
//! orientation advances by the rotation vector `h·ω`. Family rules are
//! applied here: fixed families hold pose, prescribed families translate
//! at their set velocity regardless of forces.

use glam::{Quat, Vec3};

use crate::kernels::{Integrator, KernelError, KernelScene};
use crate::state::{normalize_position, ClumpState};

/// The stock dynamic-stage integrator.
#[derive(Default)]
pub struct HalfStepIntegrator;

impl HalfStepIntegrator {
    pub fn new() -> Self {
        Self
    }
}

impl Integrator for HalfStepIntegrator {
    fn integrate(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
    ) -> Result<(), KernelError> {
        let params = &scene.params;
        let v_to_hv = (params.h / params.l) as f32;

        for i in 0..state.len() {
            let rule = scene.families.get(state.family[i]);
            if rule.fixed {
                state.hv[i] = Vec3::ZERO;
                state.h_omg[i] = Vec3::ZERO;
                continue;
            }

            if let Some(v) = rule.linear_velocity {
                state.hv[i] = v * v_to_hv;
                state.h_omg[i] = Vec3::ZERO;
            } else {
                state.hv[i] += state.h2a[i];
                state.h_omg[i] += state.h2alpha[i];
            }

            let mut voxel = state.voxel[i];
            let mut loc = state.loc[i] + state.hv[i];
            normalize_position(params, &mut voxel, &mut loc);
            state.voxel[i] = voxel;
            state.loc[i] = loc;

            let w = state.h_omg[i];
            let angle = w.length();
            if angle > 1e-12 {
                let dq = Quat::from_axis_angle(w / angle, angle);
                state.ori[i] = (dq * state.ori[i]).normalize();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clump::{ClumpTemplate, GeometryTables, Material};
    use crate::family::{FamilyPrescription, FamilyTable};
    use crate::params::SimParams;
    use crate::state::{decode_position, encode_position};
    use glam::DVec3;
    use std::sync::Arc;

    fn scene(families: FamilyTable) -> KernelScene {
        let mut params = SimParams::default();
        params.nv_x_p2 = 8;
        params.nv_y_p2 = 8;
        params.nv_z_p2 = 8;
        params.l = 1e-6;
        params.lbf = DVec3::splat(-1.0);
        params.derive_geometry();
        KernelScene {
            params,
            geom: Arc::new(GeometryTables::build(
                &[ClumpTemplate::simple_sphere(1.0, 0.1, 0)],
                &[Material::default()],
                &[0],
            )),
            families: Arc::new(families),
            planes: Arc::new(Vec::new()),
        }
    }

    fn state_at_origin(scene: &KernelScene) -> ClumpState {
        let mut state = ClumpState::with_len(1);
        let (voxel, loc) = encode_position(&scene.params, DVec3::ZERO);
        state.voxel[0] = voxel;
        state.loc[0] = loc;
        state
    }

    #[test]
    fn constant_acceleration_accumulates_into_velocity() {
        let scene = scene(FamilyTable::default());
        let mut state = state_at_origin(&scene);
        state.h2a[0] = Vec3::new(2.0, 0.0, 0.0);

        HalfStepIntegrator::new()
            .integrate(&scene, &mut state)
            .expect("integrate failed");
        HalfStepIntegrator::new()
            .integrate(&scene, &mut state)
            .expect("integrate failed");

        assert_eq!(state.hv[0].x, 4.0, "hv accumulates h2a per step");
        // Position advanced by 2 then 4 quanta.
        let pos = decode_position(&scene.params, state.voxel[0], state.loc[0]);
        assert!((pos.x - 6.0 * scene.params.l).abs() < scene.params.l * 0.01);
    }

    #[test]
    fn fixed_family_holds_pose() {
        let mut families = FamilyTable::default();
        families.set(
            5,
            FamilyPrescription {
                fixed: true,
                linear_velocity: None,
            },
        );
        let scene = scene(families);
        let mut state = state_at_origin(&scene);
        state.family[0] = 5;
        state.hv[0] = Vec3::new(100.0, 0.0, 0.0);
        state.h2a[0] = Vec3::new(50.0, 0.0, 0.0);
        let before = state.loc[0];

        HalfStepIntegrator::new()
            .integrate(&scene, &mut state)
            .expect("integrate failed");

        assert_eq!(state.hv[0], Vec3::ZERO, "fixed family zeroes velocity");
        assert_eq!(state.loc[0], before, "fixed family does not move");
    }

    #[test]
    fn angular_velocity_rotates_orientation() {
        let scene = scene(FamilyTable::default());
        let mut state = state_at_origin(&scene);
        state.h_omg[0] = Vec3::new(0.0, 0.0, 0.1);

        HalfStepIntegrator::new()
            .integrate(&scene, &mut state)
            .expect("integrate failed");

        let (axis, angle) = state.ori[0].to_axis_angle();
        assert!((angle - 0.1).abs() < 1e-5);
        assert!((axis - Vec3::Z).length() < 1e-5);
    }
}
