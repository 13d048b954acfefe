//! GPU-shared render parameter block.
//!
//! [`RenderParameters`] is uploaded verbatim into the ray marching kernel's
//! uniform buffer, so field order, 4-byte integer flags and the explicit padding
//! fields must match `RenderParams` in `raycast.wgsl`.

use glam::{Quat, Vec3};

use crate::clip::{ClipState, MAX_CLIP_PLANES};
use crate::options::{CompositingOrder, Options, RenderMethod};

/// Window-density threshold at which surface mode registers a hit.
pub const SURFACE_THRESHOLD: f32 = 0.2;

/// Maximum number of composited channels.
pub const MAX_CHANNELS: usize = 4;

/// Per-frame parameter snapshot read by the compositor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct RenderParameters {
    /// [`RenderMethod`] code.
    pub method: i32,
    /// Base step count across the in-volume ray segment.
    pub step_count: i32,
    /// Number of active channels (1..=4).
    pub channel_count: i32,
    /// Frame counter used to seed jitter.
    pub frame_index: u32,

    /// Display window minimum (HU).
    pub window_min: f32,
    /// Display window maximum (HU).
    pub window_max: f32,
    /// Dataset intensity minimum.
    pub data_min: f32,
    /// Dataset intensity maximum.
    pub data_max: f32,

    /// Volume dimensions in voxels.
    pub dimensions: [f32; 3],
    /// Window-density floor for projection gating.
    pub density_floor: f32,

    /// Window-density ceiling for projection gating.
    pub density_ceiling: f32,
    /// Raw intensity gate minimum.
    pub hu_gate_min: f32,
    /// Raw intensity gate maximum.
    pub hu_gate_max: f32,
    /// 1 when the raw intensity gate replaces the density gate.
    pub hu_gate_enabled: i32,

    /// Trim box minimum in normalized volume space.
    pub trim_min: [f32; 3],
    pub _pad0: f32,
    /// Trim box maximum in normalized volume space.
    pub trim_max: [f32; 3],
    pub _pad1: f32,
    /// Trim box rotation quaternion (x, y, z, w) about the volume centre.
    pub trim_rotation: [f32; 4],

    /// Clip plane equations: xyz normal, w offset, in centred volume space.
    pub clip_planes: [[f32; 4]; MAX_CLIP_PLANES],

    /// Per-channel intensity weights.
    pub channel_weights: [f32; 4],
    /// Per-channel gains.
    pub channel_gains: [f32; 4],

    /// Accumulated alpha that ends a DVR ray.
    pub early_termination: f32,
    /// Gradient magnitude that triggers finer steps.
    pub adaptive_threshold: f32,
    /// Smallest adaptive step scale.
    pub adaptive_min_factor: f32,
    /// Largest adaptive step scale.
    pub adaptive_max_factor: f32,

    /// Jitter amount in base steps.
    pub jitter: f32,
    /// 1 enables gradient lighting.
    pub lighting: i32,
    /// 1 selects back-to-front compositing.
    pub backward: i32,
    /// 1 enables adaptive stepping.
    pub adaptive: i32,

    /// Number of active clip planes.
    pub clip_plane_count: i32,
    /// Surface mode hit threshold.
    pub surface_threshold: f32,
    pub _pad2: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<RenderParameters>() == 240);

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            method: RenderMethod::Dvr.gpu_code(),
            step_count: 512,
            channel_count: 1,
            frame_index: 0,
            window_min: -1024.0,
            window_max: 3071.0,
            data_min: -1024.0,
            data_max: 3071.0,
            dimensions: [1.0; 3],
            density_floor: 0.0,
            density_ceiling: 1.0,
            hu_gate_min: -1024.0,
            hu_gate_max: 3071.0,
            hu_gate_enabled: 0,
            trim_min: [0.0; 3],
            _pad0: 0.0,
            trim_max: [1.0; 3],
            _pad1: 0.0,
            trim_rotation: [0.0, 0.0, 0.0, 1.0],
            clip_planes: [[0.0; 4]; MAX_CLIP_PLANES],
            channel_weights: [1.0, 0.0, 0.0, 0.0],
            channel_gains: [1.0; 4],
            early_termination: 0.99,
            adaptive_threshold: 0.1,
            adaptive_min_factor: 0.5,
            adaptive_max_factor: 2.0,
            jitter: 0.0,
            lighting: 1,
            backward: 0,
            adaptive: 0,
            clip_plane_count: 0,
            surface_threshold: SURFACE_THRESHOLD,
            _pad2: [0.0; 2],
        }
    }
}

impl RenderParameters {
    /// Creates parameters seeded from the given options.
    pub fn from_options(options: &Options) -> Self {
        let mut params = Self::default();
        params.apply_options(options);
        params
    }

    /// Copies the marching tunables from `options`.
    pub fn apply_options(&mut self, options: &Options) {
        self.step_count = i32::try_from(options.step_count.max(1)).unwrap_or(i32::MAX);
        self.early_termination = options.early_termination.clamp(0.0, 0.9999);
        self.adaptive = i32::from(options.adaptive_steps);
        self.adaptive_threshold = options.adaptive_gradient_threshold;
        self.adaptive_min_factor = options.adaptive_min_factor;
        self.adaptive_max_factor = options.adaptive_max_factor;
        self.jitter = options.jitter.clamp(0.0, 1.0);
        self.lighting = i32::from(options.lighting);
        self.backward = i32::from(options.compositing == CompositingOrder::BackToFront);
    }

    /// Returns the active render method.
    pub fn render_method(&self) -> RenderMethod {
        match self.method {
            0 => RenderMethod::Surface,
            2 => RenderMethod::Mip,
            3 => RenderMethod::MinIp,
            4 => RenderMethod::Mean,
            5 => RenderMethod::Mpr,
            _ => RenderMethod::Dvr,
        }
    }

    /// Sets the render method.
    pub fn set_render_method(&mut self, method: RenderMethod) {
        self.method = method.gpu_code();
    }

    /// Sets the display window.
    ///
    /// An inverted window is logged and asserted in debug builds; release builds
    /// render with the window as given.
    pub fn set_window(&mut self, min: f32, max: f32) {
        if min >= max {
            log::warn!("display window [{min}, {max}] is inverted or empty");
            debug_assert!(min < max, "display window min must be below max");
        }
        self.window_min = min;
        self.window_max = max;
    }

    /// Sets the dataset intensity range used for transfer function lookup.
    pub fn set_dataset_range(&mut self, min: f32, max: f32) {
        self.data_min = min;
        self.data_max = max;
    }

    /// Sets the volume dimensions.
    pub fn set_dimensions(&mut self, dimensions: [u32; 3]) {
        self.dimensions = dimensions.map(|d| d.max(1) as f32);
    }

    /// Sets the projection density gate, swapping an inverted pair.
    pub fn set_density_gate(&mut self, floor: f32, ceiling: f32) {
        let (lo, hi) = if floor <= ceiling {
            (floor, ceiling)
        } else {
            log::warn!("density gate [{floor}, {ceiling}] inverted, swapping");
            (ceiling, floor)
        };
        self.density_floor = lo.clamp(0.0, 1.0);
        self.density_ceiling = hi.clamp(0.0, 1.0);
    }

    /// Enables or disables the raw intensity gate.
    pub fn set_hu_gate(&mut self, range: Option<(f32, f32)>) {
        match range {
            Some((min, max)) => {
                self.hu_gate_min = min.min(max);
                self.hu_gate_max = min.max(max);
                self.hu_gate_enabled = 1;
            }
            None => self.hu_gate_enabled = 0,
        }
    }

    /// Copies trim box, rotation and clip planes from the clip state.
    pub fn apply_clip(&mut self, clip: &ClipState) {
        let (min, max) = clip.trim_bounds();
        self.trim_min = min.to_array();
        self.trim_max = max.to_array();
        self.trim_rotation = clip.rotation().to_array();
        self.clip_planes = [[0.0; 4]; MAX_CLIP_PLANES];
        let planes = clip.plane_equations();
        for (dst, plane) in self.clip_planes.iter_mut().zip(planes.iter()) {
            *dst = plane.to_array();
        }
        self.clip_plane_count = i32::try_from(planes.len()).unwrap_or(0);
    }

    /// Sets per-channel weights and gains for `count` active channels.
    pub fn set_channels(&mut self, count: usize, weights: [f32; 4], gains: [f32; 4]) {
        let count = count.clamp(1, MAX_CHANNELS);
        self.channel_count = count as i32;
        self.channel_weights = weights;
        self.channel_gains = gains;
    }

    /// Clamps every field into its documented domain.
    ///
    /// Trim bounds are reordered per axis and a non-unit rotation falls back to
    /// identity. The window is left alone (see [`Self::set_window`]).
    pub fn sanitize(&mut self) {
        for axis in 0..3 {
            let lo = self.trim_min[axis].clamp(0.0, 1.0);
            let hi = self.trim_max[axis].clamp(0.0, 1.0);
            if lo > hi {
                log::warn!("trim box axis {axis} inverted ({lo} > {hi}), swapping");
            }
            self.trim_min[axis] = lo.min(hi);
            self.trim_max[axis] = lo.max(hi);
        }

        let q = Quat::from_array(self.trim_rotation);
        self.trim_rotation = if q.is_finite() && (q.length() - 1.0).abs() < 1e-3 {
            q.normalize().to_array()
        } else {
            Quat::IDENTITY.to_array()
        };

        self.step_count = self.step_count.max(1);
        self.channel_count = self.channel_count.clamp(1, MAX_CHANNELS as i32);
        self.early_termination = self.early_termination.clamp(0.0, 0.9999);
        self.jitter = self.jitter.clamp(0.0, 1.0);
        self.clip_plane_count = self.clip_plane_count.clamp(0, MAX_CLIP_PLANES as i32);
        if self.adaptive_min_factor > self.adaptive_max_factor {
            std::mem::swap(&mut self.adaptive_min_factor, &mut self.adaptive_max_factor);
        }
    }

    /// Normalizes a raw intensity against the display window, clamped to `[0, 1]`.
    pub fn window_density(&self, value: f32) -> f32 {
        normalize(value, self.window_min, self.window_max)
    }

    /// Normalizes a raw intensity against the dataset range, clamped to `[0, 1]`.
    pub fn dataset_density(&self, value: f32) -> f32 {
        normalize(value, self.data_min, self.data_max)
    }

    /// Volume dimensions as a vector.
    pub fn dimensions(&self) -> Vec3 {
        Vec3::from_array(self.dimensions)
    }
}

/// Maps `value` from `[min, max]` to `[0, 1]`, guarding an empty span.
pub fn normalize(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span.abs() < f32::EPSILON {
        return 0.0;
    }
    ((value - min) / span).clamp(0.0, 1.0)
}
