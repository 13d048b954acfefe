use std::time::Instant;

use volscope_core::{CameraUniforms, MprUniforms, RenderParameters};

use super::VolumeRenderEngine;
use crate::binding::{BindingValue, ResourceSlot};
use crate::error::{RenderError, RenderResult};
use crate::pipelines::PipelineId;
use crate::timing::{GpuTimer, RenderTimings};
use crate::tuner::WorkgroupSize;

/// Extent of one kernel launch in invocations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Grid {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VolumeRenderEngine {
    /// Ray marches the volume into a `width x height` output.
    pub fn render_raycast(
        &mut self,
        params: &RenderParameters,
        camera: &CameraUniforms,
        width: u32,
        height: u32,
    ) -> RenderResult<RenderTimings> {
        if self.volume.is_none() {
            return Err(RenderError::NoVolume);
        }
        self.ensure_output(width, height)?;
        self.bind(ResourceSlot::Parameters, BindingValue::from_pod(params))?;
        self.bind(ResourceSlot::Camera, BindingValue::from_pod(camera))?;
        self.run(
            PipelineId::Raycast,
            Grid {
                width,
                height,
                depth: 1,
            },
        )
    }

    /// Resamples an oblique plane or slab into a `width x height` output.
    pub fn render_mpr(
        &mut self,
        uniforms: &MprUniforms,
        width: u32,
        height: u32,
    ) -> RenderResult<RenderTimings> {
        if self.volume.is_none() {
            return Err(RenderError::NoVolume);
        }
        self.ensure_output(width, height)?;
        self.bind(ResourceSlot::MprParameters, BindingValue::from_pod(uniforms))?;
        self.run(
            PipelineId::Mpr,
            Grid {
                width,
                height,
                depth: 1,
            },
        )
    }

    /// Reads the last rendered frame as tightly packed RGBA8 rows.
    pub fn read_output(&self) -> RenderResult<Vec<u8>> {
        let (texture, _) = self.output.get().ok_or(RenderError::SlotUnbound(ResourceSlot::Output))?;
        crate::readback::read_texture_rgba8(&self.device, &self.queue, &texture.texture)
    }

    /// Tunes if needed, then dispatches `id` once over `grid`.
    pub(crate) fn run(&mut self, id: PipelineId, grid: Grid) -> RenderResult<RenderTimings> {
        let bind_group = self
            .bindings
            .bind_group(id, self.pipelines.bind_group_layout(id))?;
        let shape = self.workgroup_shape(id, &bind_group, grid);
        self.submit(id, &bind_group, shape, grid)
    }

    /// Resolves the workgroup shape, benchmarking candidates on first use.
    pub(crate) fn workgroup_shape(
        &self,
        id: PipelineId,
        bind_group: &wgpu::BindGroup,
        grid: Grid,
    ) -> WorkgroupSize {
        let default = self.limits.default_shape();
        if !self.tuning_enabled {
            return self.tuner.cached(id).unwrap_or(default);
        }
        let tuned = self
            .tuner
            .configuration(id, &self.limits, grid.width, grid.height, |shape| {
                self.submit(id, bind_group, shape, grid)
                    .map_err(|err| log::debug!("benchmark of {id:?} failed: {err}"))
                    .ok()
                    .map(|timings| timings.best())
            });
        tuned.unwrap_or_else(|| {
            log::warn!(
                "{id:?}: no workgroup candidate ran, using {}x{}",
                default.x,
                default.y
            );
            default
        })
    }

    /// Encodes, submits and waits for one dispatch.
    pub(crate) fn submit(
        &self,
        id: PipelineId,
        bind_group: &wgpu::BindGroup,
        shape: WorkgroupSize,
        grid: Grid,
    ) -> RenderResult<RenderTimings> {
        let pipeline = self.pipelines.variant(id, shape)?;
        let (groups_x, groups_y) = shape.dispatch_count(grid.width, grid.height);
        let start = Instant::now();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(id.label()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(id.label()),
                timestamp_writes: self.timer.as_ref().map(GpuTimer::pass_writes),
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, grid.depth.max(1));
        }
        if let Some(timer) = &self.timer {
            timer.resolve(&mut encoder);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        let polled = self.device.poll(wgpu::PollType::wait_indefinitely());
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::Gpu(err.to_string()));
        }
        polled.map_err(|e| RenderError::Gpu(e.to_string()))?;
        let host_ms = start.elapsed().as_secs_f64() * 1000.0;

        let gpu_ms = match &self.timer {
            Some(timer) => timer
                .read(&self.device)
                .map(|d| d.as_secs_f64() * 1000.0)
                .map_err(|err| log::debug!("timestamp readback failed: {err}"))
                .ok(),
            None => None,
        };
        log::trace!(
            "{} {}x{}x{} with {}x{} groups: {host_ms:.3} ms host",
            id.label(),
            grid.width,
            grid.height,
            grid.depth,
            shape.x,
            shape.y
        );
        Ok(RenderTimings { gpu_ms, host_ms })
    }
}
