use volscope_core::histogram::{ChannelHistogram, HistogramPlan, HistogramStrategy};

use super::rendering::Grid;
use super::textures::create_storage_buffer;
use super::VolumeRenderEngine;
use crate::binding::{BindingValue, ResourceSlot};
use crate::error::{RenderError, RenderResult};
use crate::pipelines::PipelineId;

/// Uniforms of the histogram kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct HistogramUniforms {
    pub voxel_min: f32,
    pub voxel_max: f32,
    pub bins: u32,
    pub channels: u32,
    pub dimensions: [u32; 3],
    pub _padding: u32,
}

const _: () = assert!(std::mem::size_of::<HistogramUniforms>() == 32);

impl VolumeRenderEngine {
    /// Plans a histogram against this device's workgroup memory.
    pub fn plan_histogram(&self, channels: u32, bins: u32) -> HistogramPlan {
        HistogramPlan::new(channels, bins, self.local_memory_budget)
    }

    /// Bins every voxel of the uploaded volume.
    ///
    /// `voxel_range` defaults to the volume's intensity range. Each of the
    /// `channels` histograms is an identical copy.
    pub fn compute_histogram(
        &mut self,
        channels: u32,
        bins: u32,
        voxel_range: Option<(f32, f32)>,
    ) -> RenderResult<Vec<ChannelHistogram>> {
        let volume = self.volume.ok_or(RenderError::NoVolume)?;
        let plan = self.plan_histogram(channels, bins);
        let (voxel_min, voxel_max) = voxel_range.unwrap_or(volume.intensity_range);
        let id = match plan.strategy {
            HistogramStrategy::WorkgroupLocal => PipelineId::HistogramLocal,
            HistogramStrategy::GlobalAtomic => PipelineId::HistogramGlobal,
        };

        let size = (plan.word_count() * 4) as u64;
        let device = &self.device;
        let (buffer, _) = self
            .histogram_bins
            .ensure(size, |s| create_storage_buffer(device, s, "histogram bins"))?;
        let buffer = buffer.clone();

        let dims = volume.dimensions;
        let uniforms = HistogramUniforms {
            voxel_min,
            voxel_max,
            bins: plan.bins,
            channels: plan.channels,
            dimensions: dims.to_array(),
            _padding: 0,
        };
        self.bind(ResourceSlot::HistogramParameters, BindingValue::from_pod(&uniforms))?;
        self.bind(ResourceSlot::HistogramBins, BindingValue::Handle(buffer.clone().into()))?;

        let grid = Grid {
            width: dims.x,
            height: dims.y,
            depth: dims.z,
        };
        let bind_group = self
            .bindings
            .bind_group(id, self.pipelines.bind_group_layout(id))?;
        // Benchmark runs accumulate into the bins, so clear after tuning.
        let shape = self.workgroup_shape(id, &bind_group, grid);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("histogram clear"),
            });
        encoder.clear_buffer(&buffer.buffer, 0, None);
        self.queue.submit(std::iter::once(encoder.finish()));
        let timings = self.submit(id, &bind_group, shape, grid)?;

        let bytes = crate::readback::read_buffer(&self.device, &self.queue, &buffer.buffer, size)?;
        let words = crate::readback::words_u32(&bytes);
        log::debug!(
            "histogram {:?} {} bins x {} channels in {:.3} ms",
            plan.strategy,
            plan.bins,
            plan.channels,
            timings.host_ms
        );
        Ok(ChannelHistogram::split(&words, &plan))
    }
}
