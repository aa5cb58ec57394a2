//! A sampled pack of spheres settling onto a boundary plane under
//! gravity, run in batches with progress output.

use dem::sampler::{box_grid_sampler, jitter};
use dem::{DemSolver, Material};
use glam::{DVec3, Vec3};

fn main() -> Result<(), dem::SolverError> {
    env_logger::init();

    let mut sim = DemSolver::new();
    let gravel = sim.load_material(Material {
        normal_stiffness: 2e6,
        damping_ratio: 0.4,
    });
    let ball = sim.load_simple_sphere(0.02, 0.025, gravel)?;

    // A loose grid of spheres hovering above the floor.
    let mut seeds = box_grid_sampler(
        DVec3::new(0.0, 0.0, 0.4),
        DVec3::new(0.15, 0.15, 0.2),
        0.06,
    );
    jitter(&mut seeds, 0.004, 1234);
    let types = vec![ball; seeds.len()];
    sim.add_clumps(&types, &seeds)?;

    sim.set_domain_voxels(16, 16, 16, 1e-7);
    sim.center_coordinate_system();
    sim.set_time_step(5e-5);
    sim.set_gravity(Vec3::new(0.0, 0.0, -9.81));
    sim.set_expand_factor(0.005);
    sim.set_cd_update_freq(5);
    sim.add_bc_plane(DVec3::new(0.0, 0.0, 0.0), Vec3::Z, gravel);

    sim.initialize()?;
    println!("settling {} spheres...", seeds.len());

    for batch in 0..10 {
        sim.do_dynamics(0.05)?;
        let stats = sim.scheduling_stats()?;
        println!(
            "t = {:.2}s  kinematic updates {}  held back {}",
            (batch + 1) as f64 * 0.05,
            stats.n_kinematic_updates,
            stats.n_dynamic_held_back
        );
    }

    sim.write_spheres_csv("settle_pack_final.csv")?;
    println!("done, wrote settle_pack_final.csv");
    Ok(())
}
