//! The user-facing driver: declarative scene building, worker-thread
//! lifecycle, and per-call run control.
//!
//! Usage follows a strict phase order: describe the scene (materials,
//! templates, clump batches, domain, step size), `initialize()` once to
//! freeze it and spawn the two worker stages, then issue runs with
//! `do_step_dynamics`/`do_dynamics`. Each run blocks the caller until
//! the dynamic stage has burned its cycle budget; results are read back
//! through trackers or the CSV writer between runs. Dropping the solver
//! requests a cooperative join and reaps both threads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use glam::{DVec3, Quat, Vec3};

use crate::boundary::BcPlane;
use crate::broadphase::BinSweepDetector;
use crate::clump::{ClumpTemplate, GeometryTables, Material};
use crate::contact::PAIRS_PER_CLUMP_ESTIMATE;
use crate::dynamic::DynamicStage;
use crate::family::{FamilyPrescription, FamilyTable};
use crate::force::SpringDashpotForce;
use crate::integrator::HalfStepIntegrator;
use crate::kernels::{ContactDetector, ForceModel, Integrator, KernelScene};
use crate::kinematic::KinematicStage;
use crate::params::{DriftConfig, SimParams};
use crate::scheduler::{SchedCoord, SchedulingStats};
use crate::state::{encode_position, ClumpState};
use crate::writer;
use crate::SolverError;

/// Live handles of an initialized solver.
struct Runtime {
    sched: Arc<SchedCoord>,
    state: Arc<Mutex<ClumpState>>,
    scene: KernelScene,
    kinematic: Option<JoinHandle<()>>,
    dynamic: Option<JoinHandle<()>>,
    failed: bool,
}

/// The DEM solver driver.
pub struct DemSolver {
    params: SimParams,
    drift: DriftConfig,
    bin_size_override: Option<f64>,

    materials: Vec<Material>,
    templates: Vec<ClumpTemplate>,
    clump_types: Vec<u32>,
    clump_xyz: Vec<DVec3>,
    clump_vel: Vec<Vec3>,
    clump_family: Vec<u32>,
    families: FamilyTable,
    planes: Vec<BcPlane>,

    detector: Option<Box<dyn ContactDetector>>,
    force_model: Option<Box<dyn ForceModel>>,
    integrator: Option<Box<dyn Integrator>>,

    runtime: Option<Runtime>,
}

impl Default for DemSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DemSolver {
    pub fn new() -> Self {
        Self {
            params: SimParams::default(),
            drift: DriftConfig::default(),
            bin_size_override: None,
            materials: Vec::new(),
            templates: Vec::new(),
            clump_types: Vec::new(),
            clump_xyz: Vec::new(),
            clump_vel: Vec::new(),
            clump_family: Vec::new(),
            families: FamilyTable::default(),
            planes: Vec::new(),
            detector: Some(Box::new(BinSweepDetector::new())),
            force_model: Some(Box::new(SpringDashpotForce::new())),
            integrator: Some(Box::new(HalfStepIntegrator::new())),
            runtime: None,
        }
    }

    // ---- scene description ---------------------------------------------

    /// Register a surface material; returns its id.
    pub fn load_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    /// Register a clump template; returns its id.
    pub fn load_clump_template(&mut self, template: ClumpTemplate) -> Result<u32, SolverError> {
        if template.radii.len() != template.rel_pos.len()
            || template.radii.len() != template.materials.len()
        {
            return Err(SolverError::Scene(
                "template component arrays must have equal length".into(),
            ));
        }
        if template.radii.is_empty() {
            return Err(SolverError::Scene("template has no component spheres".into()));
        }
        if template.mass <= 0.0 || template.moi.min_element() <= 0.0 {
            return Err(SolverError::Scene(
                "template mass and principal MOI must be positive".into(),
            ));
        }
        if let Some(&bad) = template
            .materials
            .iter()
            .find(|&&m| m as usize >= self.materials.len())
        {
            return Err(SolverError::Scene(format!(
                "template references unknown material {}",
                bad
            )));
        }
        self.templates.push(template);
        Ok((self.templates.len() - 1) as u32)
    }

    /// Shorthand: a single-sphere clump template.
    pub fn load_simple_sphere(
        &mut self,
        mass: f32,
        radius: f32,
        material: u32,
    ) -> Result<u32, SolverError> {
        self.load_clump_template(ClumpTemplate::simple_sphere(mass, radius, material))
    }

    /// Append a batch of clump instances at the given centers.
    pub fn add_clumps(&mut self, types: &[u32], xyz: &[DVec3]) -> Result<(), SolverError> {
        if types.len() != xyz.len() {
            return Err(SolverError::Scene(
                "clump type and position arrays must have equal length".into(),
            ));
        }
        if let Some(&bad) = types.iter().find(|&&t| t as usize >= self.templates.len()) {
            return Err(SolverError::Scene(format!(
                "clump references unknown template {}",
                bad
            )));
        }
        self.clump_types.extend_from_slice(types);
        self.clump_xyz.extend_from_slice(xyz);
        self.clump_vel.extend(std::iter::repeat(Vec3::ZERO).take(types.len()));
        self.clump_family.extend(std::iter::repeat(0u32).take(types.len()));
        Ok(())
    }

    /// Set the initial velocity of every clump added so far.
    pub fn set_clump_vels(&mut self, vel: &[Vec3]) -> Result<(), SolverError> {
        if vel.len() != self.clump_types.len() {
            return Err(SolverError::Scene(format!(
                "expected {} velocities, got {}",
                self.clump_types.len(),
                vel.len()
            )));
        }
        self.clump_vel.copy_from_slice(vel);
        Ok(())
    }

    /// Set the family tag of every clump added so far.
    pub fn set_clump_families(&mut self, family: &[u32]) -> Result<(), SolverError> {
        if family.len() != self.clump_types.len() {
            return Err(SolverError::Scene(format!(
                "expected {} family tags, got {}",
                self.clump_types.len(),
                family.len()
            )));
        }
        self.clump_family.copy_from_slice(family);
        Ok(())
    }

    /// Domain shape: 2^nv voxels per axis with length quantum `l` (m).
    pub fn set_domain_voxels(&mut self, nv_x_p2: u8, nv_y_p2: u8, nv_z_p2: u8, l: f64) {
        self.params.nv_x_p2 = nv_x_p2;
        self.params.nv_y_p2 = nv_y_p2;
        self.params.nv_z_p2 = nv_z_p2;
        self.params.l = l;
        self.params.derive_geometry();
    }

    /// Put the world origin at the domain center.
    pub fn center_coordinate_system(&mut self) {
        self.params.lbf = -self.params.domain_size() / 2.0;
    }

    pub fn set_gravity(&mut self, g: Vec3) {
        self.params.gravity = g;
    }

    /// Time step size (s).
    pub fn set_time_step(&mut self, h: f64) {
        self.params.h = h;
    }

    /// Broad-phase margin added to sphere radii (m).
    pub fn set_expand_factor(&mut self, beta: f32) {
        self.params.expand_factor = beta;
    }

    /// Override the derived broad-phase bin size (m).
    pub fn set_bin_size(&mut self, bin_size: f64) {
        self.bin_size_override = Some(bin_size);
    }

    /// Contact-detection cadence: the dynamic stage may integrate at most
    /// `freq` cycles per kinematic update. Sets both drift bounds.
    pub fn set_cd_update_freq(&mut self, freq: u32) {
        self.drift.max_drift = freq.max(1) as i64;
        self.drift.max_lookahead = freq.max(1) as i64;
    }

    /// Full control over the two drift bounds.
    pub fn set_drift_config(&mut self, drift: DriftConfig) {
        self.drift = drift;
    }

    /// Mark a family as fixed (infinite mass: holds pose, ignores forces).
    pub fn set_family_fixed(&mut self, family: u32) {
        self.families.set(
            family,
            FamilyPrescription {
                fixed: true,
                linear_velocity: None,
            },
        );
    }

    /// Prescribe a constant translation velocity for a family.
    pub fn set_family_prescribed_lin_vel(&mut self, family: u32, v: Vec3) {
        self.families.set(
            family,
            FamilyPrescription {
                fixed: false,
                linear_velocity: Some(v),
            },
        );
    }

    /// Add an analytical boundary plane.
    pub fn add_bc_plane(&mut self, point: DVec3, normal: Vec3, material: u32) {
        self.planes.push(BcPlane::new(point, normal, material));
    }

    // ---- kernel injection ----------------------------------------------

    pub fn set_contact_detector(&mut self, detector: Box<dyn ContactDetector>) {
        self.detector = Some(detector);
    }

    pub fn set_force_model(&mut self, force_model: Box<dyn ForceModel>) {
        self.force_model = Some(force_model);
    }

    pub fn set_integrator(&mut self, integrator: Box<dyn Integrator>) {
        self.integrator = Some(integrator);
    }

    // ---- lifecycle -----------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.runtime.is_some()
    }

    /// Freeze the scene, build the runtime arrays, and spawn both worker
    /// stages. Callable once.
    pub fn initialize(&mut self) -> Result<(), SolverError> {
        if self.runtime.is_some() {
            return Err(SolverError::Scene("already initialized".into()));
        }
        if self.materials.is_empty() && !self.templates.is_empty() {
            return Err(SolverError::Scene("no materials loaded".into()));
        }

        let geom = GeometryTables::build(&self.templates, &self.materials, &self.clump_types);

        self.params.n_clumps = self.clump_types.len();
        self.params.n_spheres = geom.n_spheres();
        self.params.n_templates = self.templates.len();
        self.params.n_materials = self.materials.len();
        self.params.bin_size = self.bin_size_override.unwrap_or_else(|| {
            // Default: comfortably above the largest contact reach.
            let r_max = geom.max_sphere_radius() as f64;
            if r_max > 0.0 {
                4.0 * r_max + self.params.expand_factor as f64
            } else {
                self.params.bin_size
            }
        });
        self.params.derive_geometry();

        // Initial state from the scene description.
        let n = self.params.n_clumps;
        let mut state = ClumpState::with_len(n);
        let domain = self.params.domain_size();
        let hv_scale = (self.params.h / self.params.l) as f32;
        for i in 0..n {
            let rel = self.clump_xyz[i] - self.params.lbf;
            if rel.cmplt(DVec3::ZERO).any() || rel.cmpge(domain).any() {
                return Err(SolverError::Scene(format!(
                    "clump {} at {:?} is outside the domain",
                    i, self.clump_xyz[i]
                )));
            }
            let (voxel, loc) = encode_position(&self.params, self.clump_xyz[i]);
            state.voxel[i] = voxel;
            state.loc[i] = loc;
            state.ori[i] = Quat::IDENTITY;
            state.hv[i] = self.clump_vel[i] * hv_scale;
            state.family[i] = self.clump_family[i];
            state.template_offset[i] = self.clump_types[i];
        }

        let scene = KernelScene {
            params: self.params,
            geom: Arc::new(geom),
            families: Arc::new(self.families.clone()),
            planes: Arc::new(self.planes.clone()),
        };

        let pair_capacity = (n * PAIRS_PER_CLUMP_ESTIMATE).max(16);
        let sched = Arc::new(SchedCoord::new(n, pair_capacity, self.drift));
        let state = Arc::new(Mutex::new(state));

        let detector = self
            .detector
            .take()
            .ok_or_else(|| SolverError::Scene("no contact detector installed".into()))?;
        let force_model = self
            .force_model
            .take()
            .ok_or_else(|| SolverError::Scene("no force model installed".into()))?;
        let integrator = self
            .integrator
            .take()
            .ok_or_else(|| SolverError::Scene("no integrator installed".into()))?;

        let kinematic = {
            let stage = KinematicStage::new(scene.clone(), Arc::clone(&sched), detector);
            thread::Builder::new()
                .name("dem-kT".into())
                .spawn(move || stage.run())?
        };
        let dynamic = {
            let stage = DynamicStage::new(
                scene.clone(),
                Arc::clone(&sched),
                Arc::clone(&state),
                pair_capacity,
                force_model,
                integrator,
            );
            match thread::Builder::new()
                .name("dem-dT".into())
                .spawn(move || stage.run())
            {
                Ok(handle) => handle,
                Err(e) => {
                    // Don't leak the already-running kinematic thread.
                    sched.request_join();
                    let _ = kinematic.join();
                    return Err(e.into());
                }
            }
        };

        log::info!(
            "initialized: {} clumps, {} spheres, {} templates, drift {:?}",
            self.params.n_clumps,
            self.params.n_spheres,
            self.params.n_templates,
            self.drift
        );

        self.runtime = Some(Runtime {
            sched,
            state,
            scene,
            kinematic: Some(kinematic),
            dynamic: Some(dynamic),
            failed: false,
        });
        Ok(())
    }

    fn runtime(&self) -> Result<&Runtime, SolverError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| SolverError::Scene("call initialize() first".into()))
    }

    /// Run the dynamic stage for `n_cycles` time steps, blocking until
    /// the call completes. A fatal stage error aborts the remaining
    /// cycles and is returned here; completed cycles keep their results.
    pub fn do_step_dynamics(&mut self, n_cycles: u64) -> Result<(), SolverError> {
        let rt = self
            .runtime
            .as_mut()
            .ok_or_else(|| SolverError::Scene("call initialize() first".into()))?;
        if rt.failed || rt.sched.run_aborted() {
            return Err(SolverError::Scene(
                "solver is in a failed state from a previous run".into(),
            ));
        }
        rt.sched.reset_user_call(n_cycles);
        rt.sched.start_dynamic();
        rt.sched.wait_user_call_done();
        if let Some(err) = rt.sched.take_error() {
            rt.failed = true;
            return Err(err);
        }
        Ok(())
    }

    /// Run for a wall-clock duration of simulated time (s).
    pub fn do_dynamics(&mut self, duration: f64) -> Result<(), SolverError> {
        let h = self.params.h;
        self.do_step_dynamics((duration / h).round() as u64)
    }

    /// Counters for the most recent call.
    pub fn scheduling_stats(&self) -> Result<SchedulingStats, SolverError> {
        Ok(self.runtime()?.sched.stats())
    }

    /// Handle for reading one clump's state between runs.
    pub fn tracker(&self, clump: usize) -> Result<ClumpTracker, SolverError> {
        let rt = self.runtime()?;
        if clump >= self.params.n_clumps {
            return Err(SolverError::Scene(format!(
                "clump {} out of range ({} clumps)",
                clump, self.params.n_clumps
            )));
        }
        Ok(ClumpTracker {
            state: Arc::clone(&rt.state),
            params: rt.scene.params,
            idx: clump,
        })
    }

    /// Dump the current scene as component spheres (`x,y,z,r` CSV).
    pub fn write_spheres_csv(&self, path: impl AsRef<std::path::Path>) -> Result<(), SolverError> {
        let rt = self.runtime()?;
        let state = rt.state.lock().unwrap_or_else(PoisonError::into_inner);
        writer::write_spheres_csv_file(path, &rt.scene.params, &rt.scene.geom, &state)
    }
}

impl Drop for DemSolver {
    fn drop(&mut self) {
        let Some(rt) = self.runtime.as_mut() else {
            return;
        };
        rt.sched.request_join();
        for handle in [rt.kinematic.take(), rt.dynamic.take()].into_iter().flatten() {
            if handle.join().is_err() {
                log::error!("worker thread panicked during shutdown");
            }
        }
    }
}

/// Read-only view of one clump, valid for the solver's lifetime.
///
/// Reads lock the live state briefly; call between runs for consistent
/// snapshots (mid-run reads see some cycle boundary).
pub struct ClumpTracker {
    state: Arc<Mutex<ClumpState>>,
    params: SimParams,
    idx: usize,
}

impl ClumpTracker {
    fn lock(&self) -> MutexGuard<'_, ClumpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// World-space center (m).
    pub fn position(&self) -> DVec3 {
        self.lock().world_position(&self.params, self.idx)
    }

    /// World-space linear velocity (m/s).
    pub fn velocity(&self) -> Vec3 {
        self.lock().world_velocity(&self.params, self.idx)
    }

    /// World-space angular velocity (rad/s).
    pub fn angular_velocity(&self) -> Vec3 {
        self.lock().world_angular_velocity(&self.params, self.idx)
    }

    pub fn orientation(&self) -> Quat {
        self.lock().ori[self.idx]
    }
}
