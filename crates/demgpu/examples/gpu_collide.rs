//! The collide scene with the force and integration kernels running on
//! the GPU backend. Broad phase stays on the stock CPU detector.

use demgpu::{GpuContext, GpuDynamics};

use dem::{DemSolver, Material};
use glam::{DVec3, Vec3};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = GpuContext::new_headless()?;
    let gpu = GpuDynamics::new(&ctx);

    let mut sim = DemSolver::new();
    let mat = sim.load_material(Material {
        normal_stiffness: 1e7,
        damping_ratio: 0.2,
    });
    let ball = sim.load_simple_sphere(1.0, 0.15, mat)?;

    sim.add_clumps(
        &[ball, ball],
        &[DVec3::new(-0.3, 0.0, 0.0), DVec3::new(0.3, 0.0, 0.0)],
    )?;
    sim.set_clump_vels(&[Vec3::new(5.0, 0.0, 0.0), Vec3::new(-5.0, 0.0, 0.0)])?;

    sim.set_domain_voxels(16, 16, 16, 1e-7);
    sim.center_coordinate_system();
    sim.set_time_step(1e-5);
    sim.set_gravity(Vec3::ZERO);

    sim.set_force_model(gpu.force_model());
    sim.set_integrator(gpu.integrator());

    sim.initialize()?;

    for i in 0..10 {
        sim.do_step_dynamics(2_000)?;
        let t = sim.tracker(0)?;
        println!(
            "batch {}: clump 0 at {:?}, v {:?}",
            i + 1,
            t.position(),
            t.velocity()
        );
    }

    sim.write_spheres_csv("gpu_collide_final.csv")?;
    Ok(())
}
