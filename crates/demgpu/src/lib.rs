//! wgpu compute backend for the `dem` solver.
//!
//! Implements the solver's `ForceModel` and `Integrator` strategy traits
//! on top of a headless wgpu device: per-pair contact forces and the
//! per-clump integration step run as WGSL compute passes over SoA
//! storage buffers, with staged map-async readback. The scatter-reduce
//! of pair forces onto owners stays on the CPU side of the boundary
//! (shared with the stock kernel), keeping the GPU passes free of
//! floating-point atomics.

pub mod dynamics;

pub use dynamics::GpuDynamics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Global flag indicating the GPU device was lost.
static GPU_DEVICE_LOST: AtomicBool = AtomicBool::new(false);

/// Check if the GPU device has been lost.
pub fn is_device_lost() -> bool {
    GPU_DEVICE_LOST.load(Ordering::SeqCst)
}

/// GPU error type for device and buffer operations.
#[derive(Debug)]
pub enum GpuError {
    NoAdapter,
    DeviceLost,
    RequestDevice(wgpu::RequestDeviceError),
    BufferMapFailed(wgpu::BufferAsyncError),
    ChannelDisconnected,
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "no suitable GPU adapter"),
            GpuError::DeviceLost => write!(f, "GPU device lost"),
            GpuError::RequestDevice(e) => write!(f, "device request failed: {}", e),
            GpuError::BufferMapFailed(e) => write!(f, "buffer map failed: {:?}", e),
            GpuError::ChannelDisconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for GpuError {}

/// Wait for a buffer map operation to complete, returning Result instead
/// of panicking.
pub fn await_buffer_map(
    rx: std::sync::mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
) -> Result<(), GpuError> {
    if is_device_lost() {
        return Err(GpuError::DeviceLost);
    }
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::error!("buffer map failed: {:?}", e);
            Err(GpuError::BufferMapFailed(e))
        }
        Err(_) => {
            log::error!("buffer map channel disconnected - possible device lost");
            GPU_DEVICE_LOST.store(true, Ordering::SeqCst);
            Err(GpuError::ChannelDisconnected)
        }
    }
}

/// Headless GPU context: device and queue, no surface.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Acquire the highest-performance adapter and a compute-capable
    /// device, blocking on the async wgpu calls.
    pub fn new_headless() -> Result<Self, GpuError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::PRIMARY,
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or(GpuError::NoAdapter)?;

            log::info!("using GPU: {:?}", adapter.get_info());

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("DEM Compute Device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits {
                            max_storage_buffers_per_shader_stage: 16,
                            ..wgpu::Limits::default()
                        }
                        .using_resolution(adapter.limits()),
                        memory_hints: wgpu::MemoryHints::Performance,
                    },
                    None,
                )
                .await
                .map_err(GpuError::RequestDevice)?;

            device.on_uncaptured_error(Box::new(|error| {
                log::error!("GPU uncaptured error: {:?}", error);
                if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                    GPU_DEVICE_LOST.store(true, Ordering::SeqCst);
                }
            }));
            GPU_DEVICE_LOST.store(false, Ordering::SeqCst);

            Ok(Self {
                device: Arc::new(device),
                queue: Arc::new(queue),
            })
        })
    }
}
