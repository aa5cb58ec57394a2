//! Two randomly generated clumps shot at each other, state dumped as
//! CSV after each batch of steps.

use dem::sampler::jitter;
use dem::{ClumpTemplate, DemSolver, Material};
use glam::{DVec3, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_template(rng: &mut StdRng, material: u32) -> ClumpTemplate {
    let n_spheres = rng.gen_range(1..=3);
    let mut radii = Vec::with_capacity(n_spheres);
    let mut rel_pos = Vec::with_capacity(n_spheres);
    let mut materials = Vec::with_capacity(n_spheres);

    // Each sphere seeds its position from an already placed one so the
    // clump stays connected.
    let mut seed_pos = Vec3::ZERO;
    for j in 0..n_spheres {
        radii.push(rng.gen_range(0.08..0.2f32));
        let offset = if j == 0 {
            Vec3::ZERO
        } else {
            seed_pos
                + Vec3::new(
                    rng.gen_range(-0.1..0.1),
                    rng.gen_range(-0.1..0.1),
                    rng.gen_range(-0.1..0.1),
                )
        };
        rel_pos.push(offset);
        materials.push(material);
        seed_pos = rel_pos[rng.gen_range(0..=j)];
    }

    let mass = rng.gen_range(0.5..1.5f32);
    ClumpTemplate {
        mass,
        moi: Vec3::splat(0.4 * mass * 0.15 * 0.15),
        radii,
        rel_pos,
        materials,
    }
}

fn main() -> Result<(), dem::SolverError> {
    env_logger::init();
    let mut rng = StdRng::seed_from_u64(42);

    let mut sim = DemSolver::new();
    let mat = sim.load_material(Material {
        normal_stiffness: 1e7,
        damping_ratio: 0.2,
    });

    let mut types = Vec::new();
    for _ in 0..2 {
        let t = sim.load_clump_template(random_template(&mut rng, mat))?;
        types.push(t);
    }

    let mut xyz = vec![DVec3::new(-0.3, 0.0, 0.0), DVec3::new(0.3, 0.0, 0.0)];
    jitter(&mut xyz, 0.01, 7);
    sim.add_clumps(&types, &xyz)?;
    sim.set_clump_vels(&[Vec3::new(5.0, 0.0, 0.0), Vec3::new(-5.0, 0.0, 0.0)])?;

    sim.set_domain_voxels(16, 16, 16, 1e-7);
    sim.center_coordinate_system();
    sim.set_time_step(1e-5);
    sim.set_gravity(Vec3::ZERO);
    sim.set_cd_update_freq(1);

    sim.initialize()?;

    for i in 0..10 {
        println!("batch {}", i + 1);
        sim.do_step_dynamics(2_000)?;
        sim.write_spheres_csv(format!("collide_output_{:04}.csv", i))?;
    }

    let stats = sim.scheduling_stats()?;
    println!(
        "last batch: {} kinematic updates, dynamics held back {} times",
        stats.n_kinematic_updates, stats.n_dynamic_held_back
    );
    Ok(())
}
