//! GPU-free render state behind the control surface.
//!
//! Every setter bumps [`SceneState::revision`] so the renderer can tell whether
//! anything changed since the last frame.

use std::path::Path;

use glam::{Quat, Vec2, Vec3, Vec4};
use volscope_core::{
    AutoWindowPreset, ChannelSet, ClipPlane, ClipPlanePreset, ClipState, CompositingOrder,
    MprBlend, MprState, MprUniforms, Options, RenderMethod, RenderParameters, Result,
    ToneInterpolation, TransferFunction, VolscopeError, VolumeDataset,
};

use crate::presets::PresetRegistry;

/// Metadata of the loaded volume the parameter block needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSummary {
    pub dimensions: [u32; 3],
    pub intensity_range: (f32, f32),
}

impl From<&VolumeDataset> for VolumeSummary {
    fn from(volume: &VolumeDataset) -> Self {
        Self {
            dimensions: volume.dimensions().to_array(),
            intensity_range: volume.intensity_range(),
        }
    }
}

/// Everything the orchestrator can adjust between frames.
#[derive(Debug, Clone)]
pub struct SceneState {
    options: Options,
    params: RenderParameters,
    channels: ChannelSet,
    clip: ClipState,
    mpr: MprState,
    presets: PresetRegistry,
    volume: Option<VolumeSummary>,
    revision: u64,
}

impl Default for SceneState {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl SceneState {
    /// Creates state seeded from `options`.
    pub fn new(options: Options) -> Self {
        Self {
            params: RenderParameters::from_options(&options),
            options,
            channels: ChannelSet::new(),
            clip: ClipState::new(),
            mpr: MprState::default(),
            presets: PresetRegistry::new(),
            volume: None,
            revision: 0,
        }
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Change counter over all tracked state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Current options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replaces the options and re-applies their marching tunables.
    pub fn set_options(&mut self, options: Options) {
        self.params.apply_options(&options);
        self.options = options;
        self.touch();
    }

    /// Channel state.
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Clip state.
    pub fn clip(&self) -> &ClipState {
        &self.clip
    }

    /// Oblique plane state.
    pub fn mpr(&self) -> &MprState {
        &self.mpr
    }

    /// Preset registry.
    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    /// Preset registry, for registering custom presets.
    pub fn presets_mut(&mut self) -> &mut PresetRegistry {
        &mut self.presets
    }

    /// Loaded volume metadata.
    pub fn volume(&self) -> Option<VolumeSummary> {
        self.volume
    }

    /// Records a newly loaded volume. The display window resets to its intensity range.
    pub fn set_volume(&mut self, volume: VolumeSummary) {
        let (lo, hi) = volume.intensity_range;
        self.params.set_dataset_range(lo, hi);
        self.params.set_dimensions(volume.dimensions);
        if lo < hi {
            self.params.set_window(lo, hi);
        }
        self.volume = Some(volume);
        self.touch();
    }

    /// Intensity range the kernels normalize against when reading transfer lookups.
    pub fn dataset_range(&self) -> (f32, f32) {
        (self.params.data_min, self.params.data_max)
    }

    /// Active render method.
    pub fn render_method(&self) -> RenderMethod {
        self.params.render_method()
    }

    pub fn set_render_method(&mut self, method: RenderMethod) {
        self.params.set_render_method(method);
        self.touch();
    }

    /// Display window in the volume's intensity units.
    pub fn hu_window(&self) -> (f32, f32) {
        (self.params.window_min, self.params.window_max)
    }

    /// Sets the display window. See [`RenderParameters::set_window`] for inverted windows.
    pub fn set_hu_window(&mut self, min: f32, max: f32) {
        self.params.set_window(min, max);
        self.touch();
    }

    /// Window-density gate for projection methods.
    pub fn set_density_gate(&mut self, floor: f32, ceiling: f32) {
        self.params.set_density_gate(floor, ceiling);
        self.touch();
    }

    /// Raw-intensity gate for projection methods; `None` returns to the density gate.
    pub fn set_hu_gate(&mut self, range: Option<(f32, f32)>) {
        self.params.set_hu_gate(range);
        self.touch();
    }

    pub fn set_clip_box(&mut self, min: Vec3, max: Vec3) {
        self.clip.set_trim_box(min, max);
        self.touch();
    }

    pub fn set_clip_rotation(&mut self, rotation: Quat) {
        self.clip.set_rotation(rotation);
        self.touch();
    }

    /// Installs custom clip planes (at most three are kept).
    pub fn set_clip_planes(&mut self, planes: &[ClipPlane]) {
        self.clip.set_planes(planes);
        self.touch();
    }

    pub fn set_clip_preset(&mut self, preset: ClipPlanePreset, offset: f32) {
        self.clip.set_preset(preset, offset);
        self.touch();
    }

    /// Clears trim box, rotation and planes.
    pub fn reset_clip(&mut self) {
        self.clip.reset();
        self.touch();
    }

    /// Sets how many channels are composited (1..=4).
    pub fn set_channel_count(&mut self, count: usize) {
        self.channels.set_active_count(count);
        self.touch();
    }

    /// Switches a channel to a registered preset.
    pub fn set_channel_preset(&mut self, channel: usize, preset_id: &str) -> Result<()> {
        let tf = self
            .presets
            .get(preset_id)
            .cloned()
            .ok_or_else(|| VolscopeError::PresetNotFound(preset_id.to_string()))?;
        self.channels
            .get_mut(channel)?
            .set_transfer_function(tf, Some(preset_id.to_string()));
        self.touch();
        Ok(())
    }

    /// Installs a custom transfer function on a channel.
    pub fn set_channel_transfer_function(
        &mut self,
        channel: usize,
        transfer_function: TransferFunction,
    ) -> Result<()> {
        self.channels
            .get_mut(channel)?
            .set_transfer_function(transfer_function, None);
        self.touch();
        Ok(())
    }

    /// Loads a channel's transfer function from JSON, falling back to pass-through.
    pub fn load_channel_transfer_function(
        &mut self,
        channel: usize,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        self.set_channel_transfer_function(channel, TransferFunction::load(path))
    }

    /// Horizontal shift applied to a channel's control points.
    pub fn set_channel_shift(&mut self, channel: usize, shift: f32) -> Result<()> {
        self.channels.get_mut(channel)?.set_shift(shift);
        self.touch();
        Ok(())
    }

    pub fn set_channel_gain(&mut self, channel: usize, gain: f32) -> Result<()> {
        self.channels.get_mut(channel)?.set_gain(gain);
        self.touch();
        Ok(())
    }

    pub fn set_channel_weight(&mut self, channel: usize, weight: f32) -> Result<()> {
        self.channels.get_mut(channel)?.set_weight(weight);
        self.touch();
        Ok(())
    }

    /// Replaces a channel's tone-curve control points (sanitized on insert).
    pub fn set_tone_curve_points(&mut self, channel: usize, points: Vec<Vec2>) -> Result<()> {
        if points.is_empty() {
            return Err(VolscopeError::EmptyControlPoints("tone curve"));
        }
        self.channels.get_mut(channel)?.set_tone_points(points);
        self.touch();
        Ok(())
    }

    pub fn set_tone_interpolation(
        &mut self,
        channel: usize,
        interpolation: ToneInterpolation,
    ) -> Result<()> {
        self.channels
            .get_mut(channel)?
            .set_tone_interpolation(interpolation);
        self.touch();
        Ok(())
    }

    /// Stores freshly computed histograms, one per channel in order.
    pub fn store_histograms(&mut self, histograms: Vec<volscope_core::ChannelHistogram>) {
        for (index, histogram) in histograms.into_iter().enumerate() {
            if let Ok(channel) = self.channels.get_mut(index) {
                channel.set_histogram(histogram);
            }
        }
    }

    /// Rewrites a channel's tone curve from its stored histogram.
    ///
    /// Returns `false` when the channel has no histogram yet.
    pub fn apply_auto_window(&mut self, channel: usize, preset: AutoWindowPreset) -> Result<bool> {
        let histogram_range = self
            .volume
            .map_or((self.params.data_min, self.params.data_max), |v| v.intensity_range);
        let display_window = self.hu_window();
        let applied = self
            .channels
            .get_mut(channel)?
            .apply_auto_window(preset, histogram_range, display_window);
        if applied {
            self.touch();
        }
        Ok(applied)
    }

    /// Moves the oblique plane.
    pub fn set_mpr_plane(&mut self, origin: Vec3, axis_u: Vec3, axis_v: Vec3) {
        self.mpr.origin = origin;
        self.mpr.axis_u = axis_u;
        self.mpr.axis_v = axis_v;
        self.touch();
    }

    /// Sets slab thickness, sample count and blend mode.
    pub fn set_mpr_slab(&mut self, half_thickness: f32, step_count: u32, blend: MprBlend) {
        self.mpr.slab_half_thickness = half_thickness.max(0.0);
        self.mpr.step_count = step_count.max(2);
        self.mpr.blend = blend;
        self.touch();
    }

    pub fn set_mpr_blend(&mut self, blend: MprBlend) {
        self.mpr.blend = blend;
        self.touch();
    }

    /// Colors the plane through channel 0's transfer function instead of grayscale.
    pub fn set_mpr_transfer_function(&mut self, enabled: bool) {
        self.mpr.use_transfer_function = enabled;
        self.touch();
    }

    /// Overlay highlight color (rgb) and opacity (a); `None` disables the overlay.
    pub fn set_mpr_overlay(&mut self, overlay: Option<Vec4>) {
        self.mpr.overlay = overlay;
        self.touch();
    }

    pub fn set_step_count(&mut self, step_count: u32) {
        self.options.step_count = step_count.max(1);
        self.params.apply_options(&self.options);
        self.touch();
    }

    /// Enables adaptive stepping with the given gradient threshold.
    pub fn set_adaptive(&mut self, enabled: bool, gradient_threshold: f32) {
        self.options.adaptive_steps = enabled;
        self.options.adaptive_gradient_threshold = gradient_threshold.max(0.0);
        self.params.apply_options(&self.options);
        self.touch();
    }

    /// Ray start jitter in base steps, clamped to `[0, 1]`.
    pub fn set_jitter(&mut self, jitter: f32) {
        self.options.jitter = jitter.clamp(0.0, 1.0);
        self.params.apply_options(&self.options);
        self.touch();
    }

    /// Early-termination alpha, clamped to `[0, 0.9999]`.
    pub fn set_early_termination(&mut self, threshold: f32) {
        self.options.early_termination = threshold.clamp(0.0, 0.9999);
        self.params.apply_options(&self.options);
        self.touch();
    }

    pub fn set_lighting(&mut self, lighting: bool) {
        self.options.lighting = lighting;
        self.params.apply_options(&self.options);
        self.touch();
    }

    pub fn set_compositing(&mut self, compositing: CompositingOrder) {
        self.options.compositing = compositing;
        self.params.apply_options(&self.options);
        self.touch();
    }

    /// Parameter block for a frame.
    pub fn frame_parameters(&self, frame_index: u32) -> RenderParameters {
        let mut params = self.params;
        params.apply_clip(&self.clip);
        params.set_channels(
            self.channels.active_count(),
            self.channels.weights(),
            self.channels.gains(),
        );
        params.frame_index = frame_index;
        params.sanitize();
        params
    }

    /// Uniform block for the oblique resampler.
    pub fn mpr_uniforms(&self) -> MprUniforms {
        let (data_min, data_max) = (self.params.data_min, self.params.data_max);
        self.mpr.uniforms(
            self.hu_window(),
            (data_min, data_max),
            self.volume.map_or([1; 3], |v| v.dimensions),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volscope_core::{ChannelHistogram, UVec3};

    #[test]
    fn test_setters_bump_revision() {
        let mut scene = SceneState::default();
        let r0 = scene.revision();
        scene.set_render_method(RenderMethod::Mip);
        assert!(scene.revision() > r0);
        let r1 = scene.revision();
        scene.set_jitter(0.5);
        scene.set_mpr_blend(MprBlend::Mean);
        assert_eq!(scene.revision(), r1 + 2);
    }

    #[test]
    fn test_volume_sets_ranges() {
        let mut scene = SceneState::default();
        let volume = VolumeDataset::constant(UVec3::new(4, 5, 6), 100)
            .unwrap()
            .with_intensity_range(-50.0, 250.0);
        scene.set_volume(VolumeSummary::from(&volume));
        let params = scene.frame_parameters(0);
        assert_eq!(params.dimensions, [4.0, 5.0, 6.0]);
        assert_eq!((params.data_min, params.data_max), (-50.0, 250.0));
        assert_eq!(scene.hu_window(), (-50.0, 250.0));
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let mut scene = SceneState::default();
        let err = scene.set_channel_preset(0, "nope").unwrap_err();
        assert!(matches!(err, VolscopeError::PresetNotFound(name) if name == "nope"));
        let err = scene.set_channel_gain(7, 1.0).unwrap_err();
        assert!(matches!(err, VolscopeError::ChannelOutOfRange(7)));
    }

    #[test]
    fn test_preset_recorded_on_channel() {
        let mut scene = SceneState::default();
        scene.set_channel_preset(0, "ct-bone").unwrap();
        assert_eq!(scene.channels().get(0).unwrap().preset_id(), Some("ct-bone"));
    }

    #[test]
    fn test_frame_parameters_carry_channels_and_clip() {
        let mut scene = SceneState::default();
        scene.set_channel_count(2);
        scene.set_channel_weight(1, 0.5).unwrap();
        scene.set_clip_preset(ClipPlanePreset::Axial, 0.0);
        let params = scene.frame_parameters(7);
        assert_eq!(params.channel_count, 2);
        assert_eq!(params.channel_weights[1], 0.5);
        assert_eq!(params.channel_weights[2], 0.0);
        assert_eq!(params.clip_plane_count, 1);
        assert_eq!(params.frame_index, 7);
    }

    #[test]
    fn test_auto_window_needs_histogram() {
        let mut scene = SceneState::default();
        assert!(!scene.apply_auto_window(0, AutoWindowPreset::Otsu).unwrap());

        let volume = VolumeDataset::from_fn(UVec3::new(8, 8, 8), |p| {
            if p.x < 0.5 { 0 } else { 1000 }
        })
        .unwrap();
        scene.set_volume(VolumeSummary::from(&volume));
        let mut bins = vec![0u32; 256];
        bins[0] = 256;
        bins[255] = 256;
        scene.store_histograms(vec![ChannelHistogram { bins }]);

        let before = scene.revision();
        assert!(scene.apply_auto_window(0, AutoWindowPreset::Otsu).unwrap());
        assert!(scene.revision() > before);
        let first = scene.channels().get(0).unwrap().tone().points().to_vec();
        assert!(scene.apply_auto_window(0, AutoWindowPreset::Otsu).unwrap());
        assert_eq!(scene.channels().get(0).unwrap().tone().points(), &first[..]);
    }

    #[test]
    fn test_mpr_uniforms_follow_state() {
        let mut scene = SceneState::default();
        scene.set_mpr_slab(0.1, 8, MprBlend::Mip);
        scene.set_mpr_overlay(Some(Vec4::new(1.0, 0.0, 0.0, 0.5)));
        let uniforms = scene.mpr_uniforms();
        assert_eq!(uniforms.blend, MprBlend::Mip as i32);
        assert_eq!(uniforms.step_count, 8);
        assert_eq!(uniforms.overlay_enabled, 1);
    }

    #[test]
    fn test_empty_tone_points_rejected() {
        let mut scene = SceneState::default();
        assert!(matches!(
            scene.set_tone_curve_points(0, Vec::new()),
            Err(VolscopeError::EmptyControlPoints(_))
        ));
    }
}
