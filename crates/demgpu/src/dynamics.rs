//! GPU force and integration kernels.
//!
//! One [`GpuDynamics`] owns the device resources; the solver receives
//! lightweight handles implementing the `ForceModel` and `Integrator`
//! traits that lock and delegate. Both run on the dynamic-stage thread,
//! so the lock is never contended; it only lets the two trait objects
//! share one buffer set.
//!
//! Work split per force pass: gravity preload, plane boundaries, and
//! the owner scatter-reduce stay on the CPU (cheap, O(bodies)); the
//! per-pair contact evaluation (the O(pairs) part) runs on the GPU and
//! its results are read back through staging buffers. The integrate
//! pass runs one thread per clump and reads the whole state back.
//!
//! GPU state is expressed in world units relative to the domain corner
//! as f32; the split voxel encoding is re-applied on readback. At
//! extreme domain extents this costs the sub-quantum precision the CPU
//! path keeps.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::{Pod, Zeroable};
use glam::Quat;
use wgpu::util::DeviceExt;
use wgpu::*;

use dem::force::{apply_plane_contacts, gravity_preload, scatter_reduce};
use dem::kernels::{ForceModel, Integrator, KernelError, KernelScene};
use dem::state::encode_position;
use dem::{ClumpState, ContactStore};

use crate::{await_buffer_map, GpuContext, GpuError};

/// Workgroup size for both compute shaders.
pub const WORKGROUP_SIZE: u32 = 64;

const FLAG_FIXED: u32 = 1 << 0;
const FLAG_PRESCRIBED: u32 = 1 << 1;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct GpuParams {
    n_clumps: u32,
    n_spheres: u32,
    n_pairs: u32,
    n_materials: u32,
    dt: f32,
    _pad: [f32; 3],
}

/// Device buffers, created once at bind.
struct Resources {
    params_buf: Buffer,

    // Per clump, rewritten every pass.
    pos_buf: Buffer,
    quat_buf: Buffer,
    vel_buf: Buffer,
    omg_buf: Buffer,
    mass_buf: Buffer,
    accel_buf: Buffer,
    alpha_buf: Buffer,
    flags_buf: Buffer,
    prescribed_buf: Buffer,

    // Static sphere and material tables.
    sphere_owner_buf: Buffer,
    sphere_radius_buf: Buffer,
    sphere_rel_pos_buf: Buffer,
    sphere_material_buf: Buffer,
    stiffness_buf: Buffer,
    damping_buf: Buffer,

    // Pair-sized, growth-only.
    pair_capacity: usize,
    pair_ids_buf: Buffer,
    pair_force_buf: Buffer,
    pair_point_a_buf: Buffer,
    pair_point_b_buf: Buffer,
    staging_force: Buffer,
    staging_point_a: Buffer,
    staging_point_b: Buffer,

    staging_pos: Buffer,
    staging_quat: Buffer,
    staging_vel: Buffer,
    staging_omg: Buffer,

    force_pipeline: ComputePipeline,
    force_bind_group: BindGroup,
    integrate_pipeline: ComputePipeline,
    integrate_bind_group: BindGroup,
}

struct Inner {
    device: Arc<Device>,
    queue: Arc<Queue>,
    res: Option<Resources>,

    // CPU scratch reused across calls.
    scratch_v4: Vec<[f32; 4]>,
    scratch_quat: Vec<[f32; 4]>,
    scratch_vel: Vec<[f32; 4]>,
    scratch_omg: Vec<[f32; 4]>,
    scratch_mass: Vec<f32>,
    scratch_flags: Vec<u32>,
    scratch_prescribed: Vec<[f32; 4]>,
    scratch_pairs: Vec<[u32; 2]>,
}

/// Shared GPU kernel set; hand its [`force_model`](Self::force_model) and
/// [`integrator`](Self::integrator) handles to the solver.
pub struct GpuDynamics {
    inner: Arc<Mutex<Inner>>,
}

impl GpuDynamics {
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                device: Arc::clone(&ctx.device),
                queue: Arc::clone(&ctx.queue),
                res: None,
                scratch_v4: Vec::new(),
                scratch_quat: Vec::new(),
                scratch_vel: Vec::new(),
                scratch_omg: Vec::new(),
                scratch_mass: Vec::new(),
                scratch_flags: Vec::new(),
                scratch_prescribed: Vec::new(),
                scratch_pairs: Vec::new(),
            })),
        }
    }

    pub fn force_model(&self) -> Box<dyn ForceModel> {
        Box::new(ForceHandle(Arc::clone(&self.inner)))
    }

    pub fn integrator(&self) -> Box<dyn Integrator> {
        Box::new(IntegrateHandle(Arc::clone(&self.inner)))
    }
}

struct ForceHandle(Arc<Mutex<Inner>>);
struct IntegrateHandle(Arc<Mutex<Inner>>);

fn lock_inner(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn gpu_err(e: GpuError) -> KernelError {
    KernelError::new(format!("gpu backend: {}", e))
}

fn storage_buffer(device: &Device, label: &str, size: u64) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: size.max(16),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn staging_buffer(device: &Device, label: &str, size: u64) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: size.max(16),
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Start an async map and block until it completes.
fn map_blocking(device: &Device, buffer: &Buffer) -> Result<(), GpuError> {
    let (tx, rx) = mpsc::channel();
    buffer.slice(..).map_async(MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(Maintain::Wait);
    await_buffer_map(rx)
}

fn read_v4(buffer: &Buffer, out: &mut [[f32; 4]]) {
    let data = buffer.slice(..).get_mapped_range();
    let slice: &[[f32; 4]] = bytemuck::cast_slice(&data);
    out.copy_from_slice(&slice[..out.len()]);
}

fn bind_group_from(
    device: &Device,
    label: &str,
    pipeline: &ComputePipeline,
    buffers: &[&Buffer],
) -> BindGroup {
    let entries: Vec<BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, buf)| BindGroupEntry {
            binding: i as u32,
            resource: buf.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&BindGroupDescriptor {
        label: Some(label),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &entries,
    })
}

impl Inner {
    fn build_force_bind_group(res: &Resources, device: &Device) -> BindGroup {
        bind_group_from(
            device,
            "DEM Force Bind Group",
            &res.force_pipeline,
            &[
                &res.pair_ids_buf,
                &res.pos_buf,
                &res.quat_buf,
                &res.vel_buf,
                &res.omg_buf,
                &res.sphere_owner_buf,
                &res.sphere_radius_buf,
                &res.sphere_rel_pos_buf,
                &res.sphere_material_buf,
                &res.mass_buf,
                &res.stiffness_buf,
                &res.damping_buf,
                &res.pair_force_buf,
                &res.pair_point_a_buf,
                &res.pair_point_b_buf,
                &res.params_buf,
            ],
        )
    }

    fn build_integrate_bind_group(res: &Resources, device: &Device) -> BindGroup {
        bind_group_from(
            device,
            "DEM Integrate Bind Group",
            &res.integrate_pipeline,
            &[
                &res.pos_buf,
                &res.quat_buf,
                &res.vel_buf,
                &res.omg_buf,
                &res.accel_buf,
                &res.alpha_buf,
                &res.flags_buf,
                &res.prescribed_buf,
                &res.params_buf,
            ],
        )
    }

    fn bind(&mut self, scene: &KernelScene) -> Result<(), KernelError> {
        if self.res.is_some() {
            return Ok(());
        }
        let device = Arc::clone(&self.device);
        let geom = &scene.geom;
        let n_clumps = scene.params.n_clumps.max(1) as u64;
        let n_spheres = geom.n_spheres().max(1) as u64;

        // Static per-sphere tables, resolved through the component
        // offsets once so the shaders index flat arrays.
        let radii: Vec<f32> = (0..geom.n_spheres() as u32)
            .map(|s| geom.sphere_radius(s))
            .collect();
        let rel_pos: Vec<[f32; 4]> = (0..geom.n_spheres() as u32)
            .map(|s| {
                let p = geom.sphere_rel_pos(s);
                [p.x, p.y, p.z, 0.0]
            })
            .collect();
        let materials: Vec<u32> = (0..geom.n_spheres() as u32)
            .map(|s| geom.sphere_material(s))
            .collect();

        let contents_or_pad = |label: &str, bytes: &[u8]| -> Buffer {
            if bytes.is_empty() {
                storage_buffer(&device, label, 16)
            } else {
                device.create_buffer_init(&util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytes,
                    usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
                })
            }
        };

        let force_shader = device.create_shader_module(include_wgsl!("shaders/contact_force.wgsl"));
        let integrate_shader = device.create_shader_module(include_wgsl!("shaders/integrate.wgsl"));

        let force_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("DEM Contact Force Pipeline"),
            layout: None,
            module: &force_shader,
            entry_point: Some("main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });
        let integrate_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("DEM Integrate Pipeline"),
            layout: None,
            module: &integrate_shader,
            entry_point: Some("main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });

        let pair_capacity = 1024usize;
        let pair_bytes = (pair_capacity * 16) as u64;

        let params_buf = device.create_buffer(&BufferDescriptor {
            label: Some("DEM Params Buffer"),
            size: std::mem::size_of::<GpuParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let pos_buf = storage_buffer(&device, "DEM Position Buffer", n_clumps * 16);
        let quat_buf = storage_buffer(&device, "DEM Orientation Buffer", n_clumps * 16);
        let vel_buf = storage_buffer(&device, "DEM Velocity Buffer", n_clumps * 16);
        let omg_buf = storage_buffer(&device, "DEM Angular Velocity Buffer", n_clumps * 16);
        let mass_buf = storage_buffer(&device, "DEM Mass Buffer", n_clumps * 4);
        let accel_buf = storage_buffer(&device, "DEM Accel Buffer", n_clumps * 16);
        let alpha_buf = storage_buffer(&device, "DEM Angular Accel Buffer", n_clumps * 16);
        let flags_buf = storage_buffer(&device, "DEM Flags Buffer", n_clumps * 4);
        let prescribed_buf = storage_buffer(&device, "DEM Prescribed Vel Buffer", n_clumps * 16);
        let sphere_owner_buf =
            contents_or_pad("DEM Sphere Owner Buffer", bytemuck::cast_slice(&geom.owner));
        let sphere_radius_buf =
            contents_or_pad("DEM Sphere Radius Buffer", bytemuck::cast_slice(&radii));
        let sphere_rel_pos_buf =
            contents_or_pad("DEM Sphere Offsets Buffer", bytemuck::cast_slice(&rel_pos));
        let sphere_material_buf = contents_or_pad(
            "DEM Sphere Material Buffer",
            bytemuck::cast_slice(&materials),
        );
        let stiffness_buf = contents_or_pad(
            "DEM Stiffness Proxy Buffer",
            bytemuck::cast_slice(&geom.stiffness_proxy),
        );
        let damping_buf = contents_or_pad(
            "DEM Damping Proxy Buffer",
            bytemuck::cast_slice(&geom.damping_proxy),
        );
        let pair_ids_buf = storage_buffer(&device, "DEM Pair IDs Buffer", pair_bytes);
        let pair_force_buf = storage_buffer(&device, "DEM Pair Force Buffer", pair_bytes);
        let pair_point_a_buf = storage_buffer(&device, "DEM Pair Point A Buffer", pair_bytes);
        let pair_point_b_buf = storage_buffer(&device, "DEM Pair Point B Buffer", pair_bytes);

        let force_bind_group = bind_group_from(
            &device,
            "DEM Force Bind Group",
            &force_pipeline,
            &[
                &pair_ids_buf,
                &pos_buf,
                &quat_buf,
                &vel_buf,
                &omg_buf,
                &sphere_owner_buf,
                &sphere_radius_buf,
                &sphere_rel_pos_buf,
                &sphere_material_buf,
                &mass_buf,
                &stiffness_buf,
                &damping_buf,
                &pair_force_buf,
                &pair_point_a_buf,
                &pair_point_b_buf,
                &params_buf,
            ],
        );
        let integrate_bind_group = bind_group_from(
            &device,
            "DEM Integrate Bind Group",
            &integrate_pipeline,
            &[
                &pos_buf,
                &quat_buf,
                &vel_buf,
                &omg_buf,
                &accel_buf,
                &alpha_buf,
                &flags_buf,
                &prescribed_buf,
                &params_buf,
            ],
        );

        let res = Resources {
            params_buf,
            pos_buf,
            quat_buf,
            vel_buf,
            omg_buf,
            mass_buf,
            accel_buf,
            alpha_buf,
            flags_buf,
            prescribed_buf,
            sphere_owner_buf,
            sphere_radius_buf,
            sphere_rel_pos_buf,
            sphere_material_buf,
            stiffness_buf,
            damping_buf,
            pair_capacity,
            pair_ids_buf,
            pair_force_buf,
            pair_point_a_buf,
            pair_point_b_buf,
            staging_force: staging_buffer(&device, "DEM Force Staging", pair_bytes),
            staging_point_a: staging_buffer(&device, "DEM Point A Staging", pair_bytes),
            staging_point_b: staging_buffer(&device, "DEM Point B Staging", pair_bytes),
            staging_pos: staging_buffer(&device, "DEM Position Staging", n_clumps * 16),
            staging_quat: staging_buffer(&device, "DEM Orientation Staging", n_clumps * 16),
            staging_vel: staging_buffer(&device, "DEM Velocity Staging", n_clumps * 16),
            staging_omg: staging_buffer(&device, "DEM Angular Velocity Staging", n_clumps * 16),
            force_pipeline,
            force_bind_group,
            integrate_pipeline,
            integrate_bind_group,
        };

        log::info!(
            "gpu kernels bound: {} clumps, {} spheres",
            n_clumps,
            n_spheres
        );
        self.res = Some(res);
        Ok(())
    }

    /// Growth-only pair storage, mirroring the CPU contact store.
    fn ensure_pair_capacity(&mut self, n: usize) {
        let res = self.res.as_mut().expect("bind() before use");
        if n <= res.pair_capacity {
            return;
        }
        let capacity = n.next_power_of_two();
        log::debug!(
            "gpu pair buffers growing {} -> {}",
            res.pair_capacity,
            capacity
        );
        let bytes = (capacity * 16) as u64;
        res.pair_ids_buf = storage_buffer(&self.device, "DEM Pair IDs Buffer", bytes);
        res.pair_force_buf = storage_buffer(&self.device, "DEM Pair Force Buffer", bytes);
        res.pair_point_a_buf = storage_buffer(&self.device, "DEM Pair Point A Buffer", bytes);
        res.pair_point_b_buf = storage_buffer(&self.device, "DEM Pair Point B Buffer", bytes);
        res.staging_force = staging_buffer(&self.device, "DEM Force Staging", bytes);
        res.staging_point_a = staging_buffer(&self.device, "DEM Point A Staging", bytes);
        res.staging_point_b = staging_buffer(&self.device, "DEM Point B Staging", bytes);
        res.pair_capacity = capacity;
        res.force_bind_group = Self::build_force_bind_group(res, &self.device);
    }

    /// Upload the per-clump dynamic state (world units, positions
    /// relative to the domain corner).
    fn upload_state(&mut self, scene: &KernelScene, state: &ClumpState, n_pairs: usize) {
        let params = &scene.params;
        let n = state.len();
        self.scratch_v4.resize(n, [0.0; 4]);
        self.scratch_quat.resize(n, [0.0; 4]);
        self.scratch_vel.resize(n, [0.0; 4]);
        self.scratch_omg.resize(n, [0.0; 4]);
        self.scratch_mass.resize(n, 0.0);
        self.scratch_flags.resize(n, 0);
        self.scratch_prescribed.resize(n, [0.0; 4]);

        for i in 0..n {
            let p = state.world_position(params, i) - params.lbf;
            self.scratch_v4[i] = [p.x as f32, p.y as f32, p.z as f32, 0.0];
            self.scratch_quat[i] = state.ori[i].to_array();
            let v = state.world_velocity(params, i);
            self.scratch_vel[i] = [v.x, v.y, v.z, 0.0];
            let w = state.world_angular_velocity(params, i);
            self.scratch_omg[i] = [w.x, w.y, w.z, 0.0];
            self.scratch_mass[i] = scene.geom.mass[state.template_offset[i] as usize];

            let rule = scene.families.get(state.family[i]);
            let mut flags = 0u32;
            if rule.fixed {
                flags |= FLAG_FIXED;
            }
            if let Some(pv) = rule.linear_velocity {
                flags |= FLAG_PRESCRIBED;
                self.scratch_prescribed[i] = [pv.x, pv.y, pv.z, 0.0];
            }
            self.scratch_flags[i] = flags;
        }

        let res = self.res.as_ref().expect("bind() before use");
        if n > 0 {
            self.queue
                .write_buffer(&res.pos_buf, 0, bytemuck::cast_slice(&self.scratch_v4));
            self.queue
                .write_buffer(&res.quat_buf, 0, bytemuck::cast_slice(&self.scratch_quat));
            self.queue
                .write_buffer(&res.vel_buf, 0, bytemuck::cast_slice(&self.scratch_vel));
            self.queue
                .write_buffer(&res.omg_buf, 0, bytemuck::cast_slice(&self.scratch_omg));
            self.queue
                .write_buffer(&res.mass_buf, 0, bytemuck::cast_slice(&self.scratch_mass));
            self.queue
                .write_buffer(&res.flags_buf, 0, bytemuck::cast_slice(&self.scratch_flags));
            self.queue.write_buffer(
                &res.prescribed_buf,
                0,
                bytemuck::cast_slice(&self.scratch_prescribed),
            );
        }
        let gpu_params = GpuParams {
            n_clumps: n as u32,
            n_spheres: scene.geom.n_spheres() as u32,
            n_pairs: n_pairs as u32,
            n_materials: scene.geom.n_materials as u32,
            dt: params.h as f32,
            _pad: [0.0; 3],
        };
        self.queue
            .write_buffer(&res.params_buf, 0, bytemuck::bytes_of(&gpu_params));
    }

    fn run_force_pass(
        &mut self,
        scene: &KernelScene,
        state: &ClumpState,
        contacts: &mut ContactStore,
    ) -> Result<(), KernelError> {
        let n = contacts.active();
        self.ensure_pair_capacity(n);
        self.upload_state(scene, state, n);

        self.scratch_pairs.resize(n, [0; 2]);
        let (ids_a, ids_b) = contacts.active_pairs();
        for k in 0..n {
            self.scratch_pairs[k] = [ids_a[k], ids_b[k]];
        }

        let res = self.res.as_ref().expect("bind() before use");
        self.queue.write_buffer(
            &res.pair_ids_buf,
            0,
            bytemuck::cast_slice(&self.scratch_pairs),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("DEM Force Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("DEM Contact Force Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&res.force_pipeline);
            pass.set_bind_group(0, &res.force_bind_group, &[]);
            pass.dispatch_workgroups((n as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        let bytes = (n * 16) as u64;
        encoder.copy_buffer_to_buffer(&res.pair_force_buf, 0, &res.staging_force, 0, bytes);
        encoder.copy_buffer_to_buffer(&res.pair_point_a_buf, 0, &res.staging_point_a, 0, bytes);
        encoder.copy_buffer_to_buffer(&res.pair_point_b_buf, 0, &res.staging_point_b, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        map_blocking(&self.device, &res.staging_force).map_err(gpu_err)?;
        map_blocking(&self.device, &res.staging_point_a).map_err(gpu_err)?;
        map_blocking(&self.device, &res.staging_point_b).map_err(gpu_err)?;

        {
            let f = res.staging_force.slice(..).get_mapped_range();
            let pa = res.staging_point_a.slice(..).get_mapped_range();
            let pb = res.staging_point_b.slice(..).get_mapped_range();
            let f: &[[f32; 4]] = bytemuck::cast_slice(&f);
            let pa: &[[f32; 4]] = bytemuck::cast_slice(&pa);
            let pb: &[[f32; 4]] = bytemuck::cast_slice(&pb);
            for k in 0..n {
                contacts.force[k] = glam::Vec3::from_slice(&f[k][..3]);
                contacts.point_a[k] = glam::Vec3::from_slice(&pa[k][..3]);
                contacts.point_b[k] = glam::Vec3::from_slice(&pb[k][..3]);
            }
        }
        res.staging_force.unmap();
        res.staging_point_a.unmap();
        res.staging_point_b.unmap();
        Ok(())
    }

    fn run_integrate_pass(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
    ) -> Result<(), KernelError> {
        let params = &scene.params;
        let n = state.len();
        if n == 0 {
            return Ok(());
        }
        self.upload_state(scene, state, 0);

        // Accelerations back to world units for the shader.
        let l_over_h2 = (params.l / (params.h * params.h)) as f32;
        let inv_h2 = 1.0 / (params.h * params.h) as f32;
        self.scratch_v4.resize(n, [0.0; 4]);
        let mut accel = std::mem::take(&mut self.scratch_v4);
        for i in 0..n {
            let a = state.h2a[i] * l_over_h2;
            accel[i] = [a.x, a.y, a.z, 0.0];
        }
        let res = self.res.as_ref().expect("bind() before use");
        self.queue
            .write_buffer(&res.accel_buf, 0, bytemuck::cast_slice(&accel));
        for i in 0..n {
            let al = state.h2alpha[i] * inv_h2;
            accel[i] = [al.x, al.y, al.z, 0.0];
        }
        self.queue
            .write_buffer(&res.alpha_buf, 0, bytemuck::cast_slice(&accel));
        self.scratch_v4 = accel;

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("DEM Integrate Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("DEM Integrate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&res.integrate_pipeline);
            pass.set_bind_group(0, &res.integrate_bind_group, &[]);
            pass.dispatch_workgroups((n as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        let bytes = (n * 16) as u64;
        encoder.copy_buffer_to_buffer(&res.pos_buf, 0, &res.staging_pos, 0, bytes);
        encoder.copy_buffer_to_buffer(&res.quat_buf, 0, &res.staging_quat, 0, bytes);
        encoder.copy_buffer_to_buffer(&res.vel_buf, 0, &res.staging_vel, 0, bytes);
        encoder.copy_buffer_to_buffer(&res.omg_buf, 0, &res.staging_omg, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        map_blocking(&self.device, &res.staging_pos).map_err(gpu_err)?;
        map_blocking(&self.device, &res.staging_quat).map_err(gpu_err)?;
        map_blocking(&self.device, &res.staging_vel).map_err(gpu_err)?;
        map_blocking(&self.device, &res.staging_omg).map_err(gpu_err)?;

        let mut pos = vec![[0.0f32; 4]; n];
        let mut quat = vec![[0.0f32; 4]; n];
        let mut vel = vec![[0.0f32; 4]; n];
        let mut omg = vec![[0.0f32; 4]; n];
        read_v4(&res.staging_pos, &mut pos);
        read_v4(&res.staging_quat, &mut quat);
        read_v4(&res.staging_vel, &mut vel);
        read_v4(&res.staging_omg, &mut omg);
        res.staging_pos.unmap();
        res.staging_quat.unmap();
        res.staging_vel.unmap();
        res.staging_omg.unmap();

        let hv_scale = (params.h / params.l) as f32;
        let h = params.h as f32;
        for i in 0..n {
            let world = params.lbf
                + glam::DVec3::new(pos[i][0] as f64, pos[i][1] as f64, pos[i][2] as f64);
            let (voxel, loc) = encode_position(params, world);
            state.voxel[i] = voxel;
            state.loc[i] = loc;
            state.ori[i] = Quat::from_array(quat[i]).normalize();
            state.hv[i] = glam::Vec3::from_slice(&vel[i][..3]) * hv_scale;
            state.h_omg[i] = glam::Vec3::from_slice(&omg[i][..3]) * h;
        }
        Ok(())
    }
}

impl ForceModel for ForceHandle {
    fn bind(&mut self, scene: &KernelScene) -> Result<(), KernelError> {
        lock_inner(&self.0).bind(scene)
    }

    fn calculate_forces(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
        contacts: &mut ContactStore,
    ) -> Result<(), KernelError> {
        let mut inner = lock_inner(&self.0);
        gravity_preload(&scene.params, state);

        if contacts.active() > 0 {
            inner.run_force_pass(scene, state, contacts)?;
            let (ids_a, ids_b, force, point_a, point_b) = contacts.parts_mut();
            scatter_reduce(
                &scene.params,
                &scene.geom,
                state,
                ids_a,
                ids_b,
                force,
                point_a,
                point_b,
            );
        }

        apply_plane_contacts(&scene.params, &scene.geom, &scene.planes, state);
        Ok(())
    }
}

impl Integrator for IntegrateHandle {
    fn bind(&mut self, scene: &KernelScene) -> Result<(), KernelError> {
        lock_inner(&self.0).bind(scene)
    }

    fn integrate(
        &mut self,
        scene: &KernelScene,
        state: &mut ClumpState,
    ) -> Result<(), KernelError> {
        lock_inner(&self.0).run_integrate_pass(scene, state)
    }
}
