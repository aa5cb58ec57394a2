//! GPU backend smoke tests. Ignored by default: they need a working
//! adapter, which CI machines may not have. Run with
//! `cargo test -p demgpu -- --ignored` on a GPU host.

use dem::{DemSolver, Material};
use demgpu::{GpuContext, GpuDynamics};
use glam::{DVec3, Vec3};

#[test]
#[ignore = "requires a GPU adapter"]
fn gpu_kernels_match_cpu_on_head_on_collision() {
    let ctx = GpuContext::new_headless().expect("gpu context");
    let gpu = GpuDynamics::new(&ctx);

    let run = |use_gpu: bool| -> (DVec3, Vec3) {
        let mut sim = DemSolver::new();
        let mat = sim.load_material(Material {
            normal_stiffness: 1e6,
            damping_ratio: 0.2,
        });
        let ball = sim.load_simple_sphere(0.5, 0.1, mat).expect("template");
        sim.add_clumps(
            &[ball, ball],
            &[DVec3::new(-0.15, 0.0, 0.0), DVec3::new(0.15, 0.0, 0.0)],
        )
        .expect("add");
        sim.set_clump_vels(&[Vec3::new(2.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0)])
            .expect("vels");
        sim.set_domain_voxels(16, 16, 16, 1e-7);
        sim.center_coordinate_system();
        sim.set_time_step(1e-5);
        sim.set_gravity(Vec3::ZERO);
        if use_gpu {
            sim.set_force_model(gpu.force_model());
            sim.set_integrator(gpu.integrator());
        }
        sim.initialize().expect("initialize");
        sim.do_step_dynamics(5_000).expect("run");
        let t = sim.tracker(0).expect("tracker");
        (t.position(), t.velocity())
    };

    let (cpu_pos, cpu_vel) = run(false);
    let (gpu_pos, gpu_vel) = run(true);

    // f32 world-space GPU state vs split-encoding CPU state: expect
    // agreement to well under a sphere radius.
    assert!(
        (cpu_pos - gpu_pos).length() < 1e-3,
        "positions diverged: cpu {:?} gpu {:?}",
        cpu_pos,
        gpu_pos
    );
    assert!(
        (cpu_vel - gpu_vel).length() < 0.05 * cpu_vel.length().max(1.0),
        "velocities diverged: cpu {:?} gpu {:?}",
        cpu_vel,
        gpu_vel
    );
}
