//! Configuration options for volscope.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Rendering method selected for the active frame.
///
/// The discriminants are shared with the GPU kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum RenderMethod {
    /// First-hit iso surface with gradient shading.
    Surface = 0,
    /// Direct volume rendering with transfer functions.
    #[default]
    Dvr = 1,
    /// Maximum intensity projection.
    Mip = 2,
    /// Minimum intensity projection.
    MinIp = 3,
    /// Average intensity projection.
    Mean = 4,
    /// Oblique multi-planar reformation.
    Mpr = 5,
}

impl RenderMethod {
    /// Returns the value stored in the GPU parameter block.
    pub fn gpu_code(self) -> i32 {
        self as i32
    }

    /// Returns whether this method aggregates samples along the ray.
    pub fn is_projection(self) -> bool {
        matches!(self, Self::Mip | Self::MinIp | Self::Mean)
    }
}

/// Order in which samples are accumulated along a ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompositingOrder {
    /// `accum += (1 - accum.a) * sample`, marching away from the camera.
    #[default]
    FrontToBack,
    /// `accum = sample.a * sample + (1 - sample.a) * accum`, marching toward the camera.
    BackToFront,
}

/// Global configuration options for volscope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Number of base steps across the ray segment inside the volume.
    pub step_count: u32,

    /// Accumulated alpha at which DVR rays stop marching.
    pub early_termination: f32,

    /// Whether step size adapts to the local gradient magnitude.
    pub adaptive_steps: bool,

    /// Gradient magnitude above which steps get finer.
    pub adaptive_gradient_threshold: f32,

    /// Smallest step scale used in high-gradient regions.
    pub adaptive_min_factor: f32,

    /// Largest step scale used in flat regions.
    pub adaptive_max_factor: f32,

    /// Ray start jitter as a fraction of one base step (0 disables).
    pub jitter: f32,

    /// Whether gradient lighting is applied to DVR and surface samples.
    pub lighting: bool,

    /// Sample accumulation order.
    pub compositing: CompositingOrder,

    /// Number of histogram bins requested by default.
    pub histogram_bins: u32,

    /// Width of the baked transfer function lookup texture.
    pub lut_width: u32,

    /// Whether workgroup shapes are benchmarked on first use.
    pub tune_workgroups: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            step_count: 512,
            early_termination: 0.99,
            adaptive_steps: false,
            adaptive_gradient_threshold: 0.1,
            adaptive_min_factor: 0.5,
            adaptive_max_factor: 2.0,
            jitter: 0.0,
            lighting: true,
            compositing: CompositingOrder::FrontToBack,
            histogram_bins: 512,
            lut_width: crate::transfer_function::LUT_WIDTH,
            tune_workgroups: true,
        }
    }
}

impl Options {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base step count.
    pub fn with_step_count(mut self, step_count: u32) -> Self {
        self.step_count = step_count.max(1);
        self
    }

    /// Sets the early termination threshold, clamped to `[0, 0.9999]`.
    pub fn with_early_termination(mut self, threshold: f32) -> Self {
        self.early_termination = threshold.clamp(0.0, 0.9999);
        self
    }

    /// Enables adaptive stepping with the given gradient threshold.
    pub fn with_adaptive_steps(mut self, enabled: bool, gradient_threshold: f32) -> Self {
        self.adaptive_steps = enabled;
        self.adaptive_gradient_threshold = gradient_threshold.max(0.0);
        self
    }

    /// Sets the jitter amount, clamped to `[0, 1]` base steps.
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Sets whether gradient lighting is enabled.
    pub fn with_lighting(mut self, lighting: bool) -> Self {
        self.lighting = lighting;
        self
    }

    /// Sets the compositing order.
    pub fn with_compositing(mut self, compositing: CompositingOrder) -> Self {
        self.compositing = compositing;
        self
    }

    /// Sets the default histogram bin count.
    pub fn with_histogram_bins(mut self, bins: u32) -> Self {
        self.histogram_bins = crate::histogram::clamp_bin_count(bins);
        self
    }

    /// Sets whether workgroup tuning runs.
    pub fn with_workgroup_tuning(mut self, enabled: bool) -> Self {
        self.tune_workgroups = enabled;
        self
    }

    /// Parses options from JSON. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes options to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
