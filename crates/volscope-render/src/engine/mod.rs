//! The volume rendering engine.

mod bindings;
mod histogram;
mod rendering;
mod textures;

use glam::UVec3;

use crate::binding::{BindingTable, BindingValue, ResourceSlot, SizedResource};
use crate::error::{RenderError, RenderResult};
use crate::pipelines::{KernelPipelines, PipelineId};
use crate::resource::{GpuBuffer, GpuResource, GpuSampler, GpuTexture, HandleId, ResourceHandle};
use crate::timing::GpuTimer;
use crate::tuner::{DispatchTuner, PipelineLimits, WorkgroupSize};

pub use bindings::WgpuBindings;
pub use histogram::HistogramUniforms;

/// Metadata of the uploaded volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeInfo {
    pub dimensions: UVec3,
    pub intensity_range: (f32, f32),
}

/// Compute engine that owns the device, the kernels and every bound resource.
///
/// One frame is in flight at a time: each dispatch is submitted and waited on
/// before the call returns.
pub struct VolumeRenderEngine {
    /// The wgpu device.
    pub device: wgpu::Device,
    /// The wgpu queue.
    pub queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    limits: PipelineLimits,
    /// Workgroup-local memory available to the histogram kernel, in bytes.
    local_memory_budget: u32,
    pipelines: KernelPipelines,
    tuner: DispatchTuner,
    tuning_enabled: bool,
    table: BindingTable<GpuResource>,
    bindings: WgpuBindings,
    output: SizedResource<GpuTexture, (u32, u32)>,
    histogram_bins: SizedResource<GpuBuffer, u64>,
    timer: Option<GpuTimer>,
    volume: Option<VolumeInfo>,
    placeholder_lut: GpuTexture,
    placeholder_mask: GpuTexture,
}

impl VolumeRenderEngine {
    /// Creates an engine on a freshly requested adapter without a surface.
    ///
    /// A hardware adapter is preferred; a software fallback adapter is used when
    /// none is available. Timestamp queries are enabled when the adapter offers them.
    pub async fn new_headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });

        let mut adapter = None;
        for force_fallback_adapter in [false, true] {
            match instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter,
                })
                .await
            {
                Ok(found) => {
                    adapter = Some(found);
                    break;
                }
                Err(e) => log::debug!("no adapter (fallback {force_fallback_adapter}): {e}"),
            }
        }
        let adapter = adapter.ok_or(RenderError::AdapterCreationFailed)?;

        let required_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("volscope device (headless)"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        Self::from_device(device, queue, adapter.get_info())
    }

    /// Creates an engine on a caller-provided device.
    ///
    /// Fails if any kernel does not compile; that is an initialization error.
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
    ) -> RenderResult<Self> {
        let device_limits = device.limits();
        let limits = PipelineLimits::from_device_limits(
            &device_limits,
            PipelineLimits::execution_width_for(&adapter_info),
        );
        let pipelines = KernelPipelines::new(&device, limits.default_shape())?;
        let timer = GpuTimer::new(&device, &queue);
        log::info!(
            "volume engine on {} ({:?}), timestamps {}",
            adapter_info.name,
            adapter_info.backend,
            if timer.is_some() { "on" } else { "off" }
        );

        let placeholder_lut =
            textures::create_lut_texture(&device, &queue, &[0u8; 4], "placeholder lut")?;
        let placeholder_mask =
            textures::create_mask_texture(&device, &queue, 1, 1, &[0u8], "placeholder mask")?;
        let sampler = GpuSampler::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("lut sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }));

        let mut engine = Self {
            bindings: WgpuBindings::new(&device, &queue),
            device,
            queue,
            adapter_info,
            limits,
            local_memory_budget: device_limits.max_compute_workgroup_storage_size,
            pipelines,
            tuner: DispatchTuner::new(),
            tuning_enabled: true,
            table: BindingTable::new(),
            output: SizedResource::new(),
            histogram_bins: SizedResource::new(),
            timer,
            volume: None,
            placeholder_lut,
            placeholder_mask,
        };
        engine.bind(ResourceSlot::Sampler, BindingValue::Handle(sampler.into()))?;
        engine.reset_channel_resources()?;
        engine.set_overlay_mask(None)?;
        Ok(engine)
    }

    /// Adapter the device was created on.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Occupancy limits used for workgroup candidates.
    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    /// Whether kernel durations come from timestamp queries.
    pub fn has_gpu_timestamps(&self) -> bool {
        self.timer.is_some()
    }

    /// Metadata of the uploaded volume.
    pub fn volume(&self) -> Option<VolumeInfo> {
        self.volume
    }

    /// Enables or disables benchmarking of workgroup shapes on first dispatch.
    pub fn set_tuning_enabled(&mut self, enabled: bool) {
        self.tuning_enabled = enabled;
    }

    /// Shape the tuner settled on for a kernel.
    pub fn tuned_shape(&self, id: PipelineId) -> Option<WorkgroupSize> {
        self.tuner.cached(id)
    }

    /// Forgets tuned shapes so the next dispatch benchmarks again.
    pub fn reset_tuning(&self) {
        self.tuner.reset();
    }

    /// Number of backend binding calls issued so far.
    pub fn binding_uploads(&self) -> u64 {
        self.bindings.uploads()
    }

    /// Identity of the resource currently bound to a handle slot.
    pub fn bound_handle(&self, slot: ResourceSlot) -> Option<HandleId> {
        self.table.handle(slot).map(ResourceHandle::id)
    }

    /// Number of compiled pipeline variants.
    pub fn pipeline_variants(&self) -> usize {
        self.pipelines.variant_count()
    }

    /// Marks every slot dirty so the next bind of each re-uploads.
    pub fn invalidate_bindings(&mut self) {
        self.table.mark_all_dirty();
    }

    /// Binds through the cache. Returns whether the backend was called.
    pub(crate) fn bind(
        &mut self,
        slot: ResourceSlot,
        value: BindingValue<GpuResource>,
    ) -> RenderResult<bool> {
        self.table.bind(&mut self.bindings, slot, value)
    }

    /// Restores placeholder LUTs and identity tone curves on every channel.
    pub fn reset_channel_resources(&mut self) -> RenderResult<()> {
        let identity = volscope_core::ToneCurve::identity();
        for channel in 0..volscope_core::MAX_CHANNELS {
            let lut = self.placeholder_lut.clone();
            if let Some(slot) = ResourceSlot::transfer_lut(channel) {
                self.bind(slot, BindingValue::Handle(lut.into()))?;
            }
            self.upload_tone_lut(channel, identity.samples())?;
        }
        Ok(())
    }
}

/// Runs `create` inside validation and out-of-memory error scopes.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    error: fn(String) -> RenderError,
    create: impl FnOnce() -> T,
) -> RenderResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    if let Some(err) = oom {
        log::error!("GPU allocation failed: {err}");
        return Err(RenderError::OutOfMemory);
    }
    if let Some(err) = validation {
        log::error!("GPU resource creation failed: {err}");
        return Err(error(err.to_string()));
    }
    Ok(value)
}
