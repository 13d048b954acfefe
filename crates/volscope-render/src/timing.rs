//! GPU and host timing of kernel dispatches.

use std::time::Duration;

use crate::error::{RenderError, RenderResult};

/// Timing of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderTimings {
    /// Kernel execution time from timestamp queries, when the device supports them.
    pub gpu_ms: Option<f64>,
    /// Wall time from encoding to completion on the host.
    pub host_ms: f64,
}

impl RenderTimings {
    /// Best available estimate of the kernel's duration.
    pub fn best(&self) -> Duration {
        Duration::from_secs_f64(self.gpu_ms.unwrap_or(self.host_ms).max(0.0) / 1000.0)
    }
}

/// Timestamp query pair around one compute pass.
#[derive(Debug)]
pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    period_ns: f32,
}

impl GpuTimer {
    const BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

    /// Creates a timer, or `None` if the device lacks timestamp queries.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Option<Self> {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return None;
        }
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("kernel timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: Self::BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp readback"),
            size: Self::BYTES,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Some(Self {
            query_set,
            resolve,
            readback,
            period_ns: queue.get_timestamp_period(),
        })
    }

    /// Timestamp writes for a compute pass.
    pub fn pass_writes(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    /// Resolves the queries into the readback buffer. Call after the pass ends.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.readback, 0, Self::BYTES);
    }

    /// Reads the elapsed time of the last resolved pass. The submission must have completed.
    pub fn read(&self, device: &wgpu::Device) -> RenderResult<Duration> {
        let bytes = crate::readback::map_read(device, &self.readback)?;
        let ticks: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        let [start, end] = ticks[..] else {
            return Err(RenderError::BufferMapFailed);
        };
        let ns = end.saturating_sub(start) as f64 * f64::from(self.period_ns);
        Ok(Duration::from_nanos(ns as u64))
    }
}
