//! Per-channel transfer function, tone curve, gain and histogram state.

use glam::Vec2;

use crate::auto_window::{auto_window_points, AutoWindowPreset};
use crate::error::{Result, VolscopeError};
use crate::histogram::ChannelHistogram;
use crate::params::MAX_CHANNELS;
use crate::tone_curve::{ToneCurve, ToneInterpolation};
use crate::transfer_function::{TransferFunction, LUT_WIDTH};

/// State of one compositing channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    preset_id: Option<String>,
    transfer_function: TransferFunction,
    lut: Vec<[f32; 4]>,
    gain: f32,
    weight: f32,
    tone: ToneCurve,
    histogram: Option<ChannelHistogram>,
    revision: u64,
    lut_revision: u64,
}

impl Default for ChannelState {
    fn default() -> Self {
        let transfer_function = TransferFunction::default();
        let lut = transfer_function.bake(LUT_WIDTH);
        Self {
            preset_id: None,
            transfer_function,
            lut,
            gain: 1.0,
            weight: 1.0,
            tone: ToneCurve::identity(),
            histogram: None,
            revision: 0,
            lut_revision: 0,
        }
    }
}

impl ChannelState {
    /// Preset id the transfer function came from, if any.
    pub fn preset_id(&self) -> Option<&str> {
        self.preset_id.as_deref()
    }

    /// The channel's transfer function.
    pub fn transfer_function(&self) -> &TransferFunction {
        &self.transfer_function
    }

    /// Installs a transfer function and re-bakes the lookup table.
    pub fn set_transfer_function(&mut self, tf: TransferFunction, preset_id: Option<String>) {
        let mut tf = tf;
        tf.sanitize();
        self.lut = tf.bake(LUT_WIDTH);
        self.transfer_function = tf;
        self.preset_id = preset_id;
        self.touch_lut();
    }

    /// Applies a horizontal shift to the transfer function and re-bakes.
    pub fn set_shift(&mut self, shift: f32) {
        self.transfer_function.shift = shift;
        self.lut = self.transfer_function.bake(LUT_WIDTH);
        self.touch_lut();
    }

    /// Clears the preset, restoring the default transfer function and tone curve.
    pub fn clear_preset(&mut self) {
        let (revision, lut_revision) = (self.revision, self.lut_revision);
        *self = Self::default();
        self.revision = revision;
        self.lut_revision = lut_revision;
        self.touch_lut();
    }

    /// RGBA lookup table baked over the function's own `[min, max]`.
    pub fn lut(&self) -> &[[f32; 4]] {
        &self.lut
    }

    /// Scalar gain applied to the channel's opacity.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Sets the gain (clamped to be non-negative).
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.max(0.0);
        self.touch();
    }

    /// Intensity weight used when blending channels.
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Sets the blend weight (clamped to `[0, 1]`).
    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight.clamp(0.0, 1.0);
        self.touch();
    }

    /// The tone curve.
    pub fn tone(&self) -> &ToneCurve {
        &self.tone
    }

    /// Replaces the tone curve control points.
    pub fn set_tone_points(&mut self, points: Vec<Vec2>) {
        self.tone.set_points(points);
        self.touch();
    }

    /// Changes the tone interpolation mode.
    pub fn set_tone_interpolation(&mut self, interpolation: ToneInterpolation) {
        self.tone.set_interpolation(interpolation);
        self.touch();
    }

    /// Last histogram computed for this channel.
    pub fn histogram(&self) -> Option<&ChannelHistogram> {
        self.histogram.as_ref()
    }

    /// Stores a freshly computed histogram.
    pub fn set_histogram(&mut self, histogram: ChannelHistogram) {
        self.histogram = Some(histogram);
    }

    /// Rewrites the tone curve from the stored histogram.
    ///
    /// Returns `false` when no usable histogram is available.
    pub fn apply_auto_window(
        &mut self,
        preset: AutoWindowPreset,
        histogram_range: (f32, f32),
        display_window: (f32, f32),
    ) -> bool {
        let Some(histogram) = &self.histogram else {
            return false;
        };
        let points = auto_window_points(&histogram.bins, histogram_range, display_window, preset);
        match points {
            Some(points) => {
                self.set_tone_points(points);
                true
            }
            None => false,
        }
    }

    /// Monotonic change counter; bumps on every GPU-visible mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Change counter of the transfer function alone.
    ///
    /// Gain, weight and tone edits leave it alone; they reach the kernels
    /// through the parameter block and the tone buffer.
    pub fn lut_revision(&self) -> u64 {
        self.lut_revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn touch_lut(&mut self) {
        self.lut_revision = self.lut_revision.wrapping_add(1);
        self.touch();
    }
}

/// Fixed set of [`MAX_CHANNELS`] channels with an active count.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: [ChannelState; MAX_CHANNELS],
    active: usize,
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self {
            channels: Default::default(),
            active: 1,
        }
    }
}

impl ChannelSet {
    /// Creates a set with one active channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active channels.
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Sets the number of active channels (1..=4).
    pub fn set_active_count(&mut self, count: usize) {
        self.active = count.clamp(1, MAX_CHANNELS);
    }

    /// Returns a channel.
    pub fn get(&self, index: usize) -> Result<&ChannelState> {
        self.channels
            .get(index)
            .ok_or(VolscopeError::ChannelOutOfRange(index))
    }

    /// Returns a channel mutably.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut ChannelState> {
        self.channels
            .get_mut(index)
            .ok_or(VolscopeError::ChannelOutOfRange(index))
    }

    /// Iterates over all channels, active or not.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelState> {
        self.channels.iter()
    }

    /// Active channels.
    pub fn active(&self) -> &[ChannelState] {
        &self.channels[..self.active]
    }

    /// Weights of all channels; inactive channels report 0.
    pub fn weights(&self) -> [f32; 4] {
        std::array::from_fn(|i| {
            if i < self.active {
                self.channels[i].weight
            } else {
                0.0
            }
        })
    }

    /// Gains of all channels.
    pub fn gains(&self) -> [f32; 4] {
        std::array::from_fn(|i| self.channels[i].gain)
    }
}
