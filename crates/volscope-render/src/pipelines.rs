//! Compute pipelines for the volume kernels.
//!
//! Every kernel declares its workgroup size through the WGSL override
//! constants `wg_x` and `wg_y`, so a pipeline variant is built per shape the
//! tuner asks for. Variants are cached for the lifetime of the device.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Mutex;

use crate::binding::{ResourceSlot, SlotKind};
use crate::error::{RenderError, RenderResult};
use crate::tuner::WorkgroupSize;

/// Identity of a compute pipeline, used as the tuner cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineId {
    /// Ray marching compositor.
    Raycast,
    /// Oblique plane resampler.
    Mpr,
    /// Histogram with workgroup-local accumulation.
    HistogramLocal,
    /// Histogram with direct global atomics.
    HistogramGlobal,
}

impl PipelineId {
    /// All pipelines.
    pub const ALL: [Self; 4] = [
        Self::Raycast,
        Self::Mpr,
        Self::HistogramLocal,
        Self::HistogramGlobal,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// WGSL entry point.
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Raycast => "raycast",
            Self::Mpr => "resample",
            Self::HistogramLocal => "histogram_local",
            Self::HistogramGlobal => "histogram_global",
        }
    }

    /// Slots the kernel reads or writes.
    pub fn slots(self) -> &'static [ResourceSlot] {
        use ResourceSlot as S;
        match self {
            Self::Raycast => &[
                S::Parameters,
                S::Camera,
                S::Volume,
                S::Sampler,
                S::TransferLut0,
                S::TransferLut1,
                S::TransferLut2,
                S::TransferLut3,
                S::ToneLut0,
                S::ToneLut1,
                S::ToneLut2,
                S::ToneLut3,
                S::Output,
            ],
            Self::Mpr => &[
                S::Volume,
                S::Sampler,
                S::TransferLut0,
                S::Output,
                S::OverlayMask,
                S::MprParameters,
            ],
            Self::HistogramLocal | Self::HistogramGlobal => {
                &[S::Volume, S::HistogramParameters, S::HistogramBins]
            }
        }
    }

    /// Whether the kernel reads `slot`.
    pub fn uses(self, slot: ResourceSlot) -> bool {
        self.slots().contains(&slot)
    }

    fn source(self) -> &'static str {
        match self {
            Self::Raycast => include_str!("shaders/raycast.wgsl"),
            Self::Mpr => include_str!("shaders/mpr.wgsl"),
            Self::HistogramLocal | Self::HistogramGlobal => include_str!("shaders/histogram.wgsl"),
        }
    }

    /// Debug label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Raycast => "raycast",
            Self::Mpr => "mpr",
            Self::HistogramLocal => "histogram local",
            Self::HistogramGlobal => "histogram global",
        }
    }
}

/// Bind group layout entry for a slot.
pub fn layout_entry(slot: ResourceSlot) -> wgpu::BindGroupLayoutEntry {
    let ty = match slot.kind() {
        SlotKind::Uniform(size) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(size),
        },
        SlotKind::StorageBytes(size) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(size),
        },
        SlotKind::Buffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        SlotKind::Texture if slot == ResourceSlot::Volume => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Sint,
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        SlotKind::Texture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        SlotKind::StorageTexture => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: crate::OUTPUT_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        SlotKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    };
    wgpu::BindGroupLayoutEntry {
        binding: slot.binding(),
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

struct Kernel {
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
}

/// Shader modules, layouts and the per-shape pipeline cache.
pub struct KernelPipelines {
    device: wgpu::Device,
    kernels: Vec<Kernel>,
    variants: Mutex<HashMap<(PipelineId, WorkgroupSize), wgpu::ComputePipeline>>,
}

impl KernelPipelines {
    /// Compiles every kernel and builds one variant each at `default_shape`.
    ///
    /// A compile error or a missing entry point is an initialization failure.
    pub fn new(device: &wgpu::Device, default_shape: WorkgroupSize) -> RenderResult<Self> {
        let mut kernels = Vec::with_capacity(PipelineId::ALL.len());
        for id in PipelineId::ALL {
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(id.label()),
                source: wgpu::ShaderSource::Wgsl(id.source().into()),
            });
            if let Some(err) = pollster::block_on(device.pop_error_scope()) {
                return Err(RenderError::ShaderCompilationFailed(format!("{}: {err}", id.label())));
            }

            let entries: Vec<wgpu::BindGroupLayoutEntry> =
                id.slots().iter().map(|&slot| layout_entry(slot)).collect();
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(id.label()),
                    entries: &entries,
                });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(id.label()),
                bind_group_layouts: &[&bind_group_layout],
                ..Default::default()
            });
            kernels.push(Kernel {
                module,
                bind_group_layout,
                layout,
            });
        }

        let pipelines = Self {
            device: device.clone(),
            kernels,
            variants: Mutex::new(HashMap::new()),
        };
        for id in PipelineId::ALL {
            pipelines.variant(id, default_shape)?;
        }
        log::info!("compiled {} compute kernels", PipelineId::ALL.len());
        Ok(pipelines)
    }

    /// Bind group layout of a kernel.
    pub fn bind_group_layout(&self, id: PipelineId) -> &wgpu::BindGroupLayout {
        &self.kernels[id.index()].bind_group_layout
    }

    /// Returns the pipeline for `id` built with workgroup `shape`, creating it on first use.
    pub fn variant(
        &self,
        id: PipelineId,
        shape: WorkgroupSize,
    ) -> RenderResult<wgpu::ComputePipeline> {
        if let Ok(variants) = self.variants.lock() {
            if let Some(pipeline) = variants.get(&(id, shape)) {
                return Ok(pipeline.clone());
            }
        }

        let kernel = &self.kernels[id.index()];
        let constants = [("wg_x", f64::from(shape.x)), ("wg_y", f64::from(shape.y))];
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(id.label()),
                layout: Some(&kernel.layout),
                module: &kernel.module,
                entry_point: Some(id.entry_point()),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    ..Default::default()
                },
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::PipelineCreationFailed(id, err.to_string()));
        }
        log::debug!("built {} variant {}x{}", id.label(), shape.x, shape.y);

        if let Ok(mut variants) = self.variants.lock() {
            variants.insert((id, shape), pipeline.clone());
        }
        Ok(pipeline)
    }

    /// Number of cached variants.
    pub fn variant_count(&self) -> usize {
        self.variants.lock().map_or(0, |v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lists_sorted_and_unique() {
        for id in PipelineId::ALL {
            let slots = id.slots();
            assert!(slots.windows(2).all(|w| w[0] < w[1]), "{id:?}");
        }
    }

    #[test]
    fn test_kernel_slot_membership() {
        assert!(PipelineId::Raycast.uses(ResourceSlot::ToneLut3));
        assert!(!PipelineId::Raycast.uses(ResourceSlot::OverlayMask));
        assert!(PipelineId::Mpr.uses(ResourceSlot::OverlayMask));
        assert!(PipelineId::HistogramLocal.uses(ResourceSlot::HistogramBins));
        assert!(!PipelineId::HistogramGlobal.uses(ResourceSlot::Output));
    }

    #[test]
    fn test_layout_entries_use_slot_binding() {
        let entry = layout_entry(ResourceSlot::Output);
        assert_eq!(entry.binding, 12);
        assert!(matches!(entry.ty, wgpu::BindingType::StorageTexture { .. }));
        let entry = layout_entry(ResourceSlot::Parameters);
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, .. }
        ));
    }

    #[test]
    fn test_kernel_sources_declare_entry_points() {
        for id in PipelineId::ALL {
            let source = id.source();
            assert!(source.contains(&format!("fn {}(", id.entry_point())), "{id:?}");
            assert!(source.contains("override wg_x"), "{id:?}");
            for slot in id.slots() {
                assert!(
                    source.contains(&format!("@binding({})", slot.binding())),
                    "{id:?} missing binding for {slot:?}"
                );
            }
        }
    }
}
