//! End-to-end solver runs through the public driver API.

use glam::{DVec3, Vec3};

use dem::contact::ContactBatch;
use dem::kernels::{ContactDetector, ForceModel, KernelError, KernelScene};
use dem::scheduler::StageId;
use dem::{ClumpState, ContactStore, DemSolver, Material, SolverError, StateSnapshot};

fn basic_solver() -> DemSolver {
    let mut sim = DemSolver::new();
    sim.set_domain_voxels(16, 16, 16, 1e-7);
    sim.center_coordinate_system();
    sim.set_time_step(1e-5);
    sim.set_gravity(Vec3::ZERO);
    sim
}

#[test]
fn overlapping_pair_with_fixed_family() {
    let mut sim = basic_solver();
    let mat = sim.load_material(Material {
        normal_stiffness: 5e6,
        damping_ratio: 0.3,
    });
    let ball = sim.load_simple_sphere(0.01, 0.05, mat).expect("template");

    // Two spheres of radius 0.05 with centers 0.08 apart: overlap 0.02.
    // The right one is held fixed through its family.
    sim.add_clumps(
        &[ball, ball],
        &[DVec3::new(-0.04, 0.0, 0.0), DVec3::new(0.04, 0.0, 0.0)],
    )
    .expect("add clumps");
    sim.set_clump_families(&[0, 1]).expect("families");
    sim.set_family_fixed(1);
    sim.set_cd_update_freq(1);
    sim.initialize().expect("initialize");

    let k = 8;
    sim.do_step_dynamics(k).expect("run");

    let free = sim.tracker(0).expect("tracker");
    let held = sim.tracker(1).expect("tracker");

    // The free clump must recoil along the contact normal (-X).
    let v = free.velocity();
    assert!(v.x < 0.0, "free clump recoils in -X, got {:?}", v);
    assert!(
        v.y.abs() < 1e-6 && v.z.abs() < 1e-6,
        "no off-normal velocity, got {:?}",
        v
    );

    // The fixed clump has not moved or picked up velocity.
    assert_eq!(held.velocity(), Vec3::ZERO);
    let held_pos = held.position();
    assert!(
        (held_pos - DVec3::new(0.04, 0.0, 0.0)).length() < 1e-6,
        "fixed clump drifted to {:?}",
        held_pos
    );

    // Lockstep settings: every cycle boundary but the last stalled.
    let stats = sim.scheduling_stats().expect("stats");
    assert_eq!(stats.n_dynamic_held_back, k - 1);
    assert!(stats.n_kinematic_updates >= 1);
    assert!(stats.n_kinematic_updates <= k + 1);
    assert_eq!(stats.current_stamp_dynamic, k as i64);
}

#[test]
fn isolated_clump_accelerates_at_gravity_only() {
    let mut sim = basic_solver();
    sim.set_time_step(1e-4);
    sim.set_gravity(Vec3::new(0.0, 0.0, -9.81));
    let mat = sim.load_material(Material::default());
    let ball = sim.load_simple_sphere(0.1, 0.02, mat).expect("template");
    sim.add_clumps(&[ball], &[DVec3::new(0.0, 0.0, 1.0)])
        .expect("add clumps");
    sim.initialize().expect("initialize");

    let k = 100u64;
    let h = 1e-4f64;
    sim.do_step_dynamics(k).expect("run");

    let tracker = sim.tracker(0).expect("tracker");
    let v = tracker.velocity();
    let expected_vz = -9.81 * k as f64 * h;
    assert!(
        ((v.z as f64) - expected_vz).abs() < expected_vz.abs() * 1e-3,
        "vz {} vs expected {}",
        v.z,
        expected_vz
    );
    assert!(v.x.abs() < 1e-9 && v.y.abs() < 1e-9);
    assert_eq!(tracker.angular_velocity(), Vec3::ZERO, "no spurious torque");

    // Symplectic Euler: z drop is g·h²·K(K+1)/2.
    let expected_drop = 9.81 * h * h * (k * (k + 1)) as f64 / 2.0;
    let z = tracker.position().z;
    assert!(
        ((1.0 - z) - expected_drop).abs() < expected_drop * 0.01,
        "dropped {} vs expected {}",
        1.0 - z,
        expected_drop
    );
}

/// Detector stand-in flooding dT with more candidate pairs than its
/// initial storage capacity, all between two far-apart spheres (zero
/// force), to exercise growth-on-unpack under the live protocol.
struct FloodDetector {
    pairs: usize,
}

impl ContactDetector for FloodDetector {
    fn detect_contacts(
        &mut self,
        _scene: &KernelScene,
        snapshot: &StateSnapshot,
        out: &mut ContactBatch,
    ) -> Result<(), KernelError> {
        out.clear();
        for _ in 0..self.pairs {
            out.push(0, 1);
        }
        out.origin_stamp = snapshot.stamp;
        Ok(())
    }
}

#[test]
fn contact_storage_grows_mid_run_without_data_loss() {
    let mut sim = basic_solver();
    let mat = sim.load_material(Material::default());
    let ball = sim.load_simple_sphere(0.01, 0.01, mat).expect("template");
    sim.add_clumps(
        &[ball, ball],
        &[DVec3::new(-0.5, 0.0, 0.0), DVec3::new(0.5, 0.0, 0.0)],
    )
    .expect("add clumps");
    // Initial capacity is max(4 * n_clumps, 16) = 16; flood well past it.
    sim.set_contact_detector(Box::new(FloodDetector { pairs: 300 }));
    sim.initialize().expect("initialize");

    sim.do_step_dynamics(5).expect("run survives the resize");

    // Non-touching candidates contribute nothing.
    let tracker = sim.tracker(0).expect("tracker");
    assert_eq!(tracker.velocity(), Vec3::ZERO);
}

/// Force stand-in that fails on its nth call.
struct FailingForce {
    calls: usize,
    fail_on: usize,
}

impl ForceModel for FailingForce {
    fn calculate_forces(
        &mut self,
        _scene: &KernelScene,
        _state: &mut ClumpState,
        _contacts: &mut ContactStore,
    ) -> Result<(), KernelError> {
        self.calls += 1;
        if self.calls >= self.fail_on {
            return Err(KernelError::new("synthetic device failure"));
        }
        Ok(())
    }
}

#[test]
fn kernel_error_aborts_run_and_latches_failure() {
    let mut sim = basic_solver();
    let mat = sim.load_material(Material::default());
    let ball = sim.load_simple_sphere(0.01, 0.01, mat).expect("template");
    sim.add_clumps(&[ball], &[DVec3::ZERO]).expect("add clumps");
    sim.set_force_model(Box::new(FailingForce {
        calls: 0,
        fail_on: 3,
    }));
    sim.initialize().expect("initialize");

    match sim.do_step_dynamics(10) {
        Err(SolverError::Kernel { stage, message }) => {
            assert_eq!(stage, StageId::Dynamic);
            assert!(message.contains("synthetic device failure"));
        }
        other => panic!("expected a dynamic kernel error, got {:?}", other.err()),
    }

    // The failure latches: later runs refuse to start.
    assert!(matches!(
        sim.do_step_dynamics(1),
        Err(SolverError::Scene(_))
    ));
}

#[test]
fn empty_scene_is_valid() {
    let mut sim = basic_solver();
    sim.initialize().expect("initialize");
    sim.do_step_dynamics(5).expect("empty run");
    let stats = sim.scheduling_stats().expect("stats");
    assert_eq!(stats.current_stamp_dynamic, 5);
}

#[test]
fn motion_accumulates_across_calls() {
    let mut sim = basic_solver();
    sim.set_time_step(1e-4);
    sim.set_gravity(Vec3::new(0.0, 0.0, -1.0));
    let mat = sim.load_material(Material::default());
    let ball = sim.load_simple_sphere(0.1, 0.02, mat).expect("template");
    sim.add_clumps(&[ball], &[DVec3::ZERO]).expect("add clumps");
    sim.initialize().expect("initialize");

    sim.do_step_dynamics(50).expect("first call");
    let v1 = sim.tracker(0).expect("tracker").velocity().z;
    sim.do_step_dynamics(50).expect("second call");
    let v2 = sim.tracker(0).expect("tracker").velocity().z;

    assert!(
        ((v2 / v1) as f64 - 2.0).abs() < 1e-3,
        "velocity doubles across equal calls: {} then {}",
        v1,
        v2
    );
}
