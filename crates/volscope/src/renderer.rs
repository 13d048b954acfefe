//! The render context handed to the orchestrator.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pollster::FutureExt;
use volscope_core::{
    CameraSignature, ChannelHistogram, FrameCamera, Options, RenderMethod, Result, VolscopeError,
    VolumeDataset, MAX_CHANNELS,
};
use volscope_render::{
    HandleId, RenderError, RenderTimings, ResourceSlot, ScreenshotOptions, VolumeRenderEngine,
};

use crate::scene::{SceneState, VolumeSummary};

/// Why a frame was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Camera and every tracked parameter match the last rendered frame.
    Unchanged,
    /// Another frame is still in flight.
    Busy,
    /// No volume has been loaded.
    NoVolume,
    /// A GPU resource could not be created or the dispatch failed; retried next frame.
    ResourceFailure(String),
}

/// Result of [`VolumeRenderer::render_frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Rendered(RenderTimings),
    Skipped(SkipReason),
}

impl FrameOutcome {
    /// Whether new pixels were produced.
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct LastFrame {
    signature: CameraSignature,
    revision: u64,
    size: (u32, u32),
}

struct Inner {
    engine: VolumeRenderEngine,
    scene: SceneState,
    last_frame: Option<LastFrame>,
    uploaded_channels: [Option<UploadedChannel>; MAX_CHANNELS],
    frame_index: u32,
    timings: Option<RenderTimings>,
}

/// Clears the busy flag when the frame ends, including on early return.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Explicit render context: GPU engine plus all control-surface state.
///
/// All methods take `&self`, so the renderer can be shared between the
/// thread driving the UI and a background render trigger. One frame is in
/// flight at a time; an overlapping [`Self::render_frame`] returns
/// [`SkipReason::Busy`] instead of waiting.
pub struct VolumeRenderer {
    inner: Mutex<Inner>,
    busy: AtomicBool,
}

fn render_error(e: RenderError) -> VolscopeError {
    VolscopeError::RenderError(e.to_string())
}

impl VolumeRenderer {
    /// Creates a renderer on a headless GPU device.
    ///
    /// Fails when no adapter or device is available or a kernel does not compile.
    pub fn new_headless(options: Options) -> Result<Self> {
        let engine = VolumeRenderEngine::new_headless()
            .block_on()
            .map_err(|e| {
                VolscopeError::RenderError(format!("Failed to create headless engine: {e}"))
            })?;
        Ok(Self::with_engine(engine, options))
    }

    /// Wraps an existing engine.
    pub fn with_engine(mut engine: VolumeRenderEngine, options: Options) -> Self {
        engine.set_tuning_enabled(options.tune_workgroups);
        Self {
            inner: Mutex::new(Inner {
                engine,
                scene: SceneState::new(options),
                last_frame: None,
                uploaded_channels: [None; MAX_CHANNELS],
                frame_index: 0,
                timings: None,
            }),
            busy: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the control-surface state.
    ///
    /// Blocks while a frame is being rendered.
    pub fn update<R>(&self, f: impl FnOnce(&mut SceneState) -> R) -> R {
        f(&mut self.lock().scene)
    }

    /// Reads the control-surface state.
    pub fn inspect<R>(&self, f: impl FnOnce(&SceneState) -> R) -> R {
        f(&self.lock().scene)
    }

    /// Uploads a volume and resets the display window to its intensity range.
    pub fn load_volume(&self, volume: &VolumeDataset) -> Result<()> {
        let mut inner = self.lock();
        inner.engine.upload_volume(volume).map_err(render_error)?;
        inner.scene.set_volume(VolumeSummary::from(volume));
        Ok(())
    }

    /// Sets an MPR overlay mask (`width x height` bytes, row-major) or clears it.
    pub fn set_overlay_mask(&self, mask: Option<(u32, u32, &[u8])>) -> Result<()> {
        let mut inner = self.lock();
        inner.engine.set_overlay_mask(mask).map_err(render_error)?;
        inner.last_frame = None;
        Ok(())
    }

    pub fn set_render_method(&self, method: RenderMethod) {
        self.update(|s| s.set_render_method(method));
    }

    pub fn set_hu_window(&self, min: f32, max: f32) {
        self.update(|s| s.set_hu_window(min, max));
    }

    pub fn set_clip_box(&self, min: glam::Vec3, max: glam::Vec3) {
        self.update(|s| s.set_clip_box(min, max));
    }

    pub fn set_clip_planes(&self, planes: &[volscope_core::ClipPlane]) {
        self.update(|s| s.set_clip_planes(planes));
    }

    pub fn set_clip_preset(&self, preset: volscope_core::ClipPlanePreset, offset: f32) {
        self.update(|s| s.set_clip_preset(preset, offset));
    }

    pub fn set_channel_preset(&self, channel: usize, preset_id: &str) -> Result<()> {
        self.update(|s| s.set_channel_preset(channel, preset_id))
    }

    pub fn set_channel_gain(&self, channel: usize, gain: f32) -> Result<()> {
        self.update(|s| s.set_channel_gain(channel, gain))
    }

    pub fn set_tone_curve_points(&self, channel: usize, points: Vec<glam::Vec2>) -> Result<()> {
        self.update(|s| s.set_tone_curve_points(channel, points))
    }

    pub fn set_mpr_plane(&self, origin: glam::Vec3, axis_u: glam::Vec3, axis_v: glam::Vec3) {
        self.update(|s| s.set_mpr_plane(origin, axis_u, axis_v));
    }

    pub fn set_mpr_slab(&self, half_thickness: f32, step_count: u32, blend: volscope_core::MprBlend) {
        self.update(|s| s.set_mpr_slab(half_thickness, step_count, blend));
    }

    pub fn set_adaptive(&self, enabled: bool, gradient_threshold: f32) {
        self.update(|s| s.set_adaptive(enabled, gradient_threshold));
    }

    pub fn set_jitter(&self, jitter: f32) {
        self.update(|s| s.set_jitter(jitter));
    }

    /// Recomputes the histogram of every active channel and stores it on the channels.
    ///
    /// `bins` defaults to [`Options::histogram_bins`] and is clamped to `[64, 4096]`.
    pub fn compute_histogram(&self, bins: Option<u32>) -> Result<Vec<ChannelHistogram>> {
        let mut inner = self.lock();
        let bins = bins.unwrap_or(inner.scene.options().histogram_bins);
        let channels = inner.scene.channels().active_count() as u32;
        let histograms = inner
            .engine
            .compute_histogram(channels, bins, None)
            .map_err(render_error)?;
        inner.scene.store_histograms(histograms.clone());
        Ok(histograms)
    }

    /// Rewrites a channel's tone curve from its last histogram.
    pub fn apply_auto_window(
        &self,
        channel: usize,
        preset: volscope_core::AutoWindowPreset,
    ) -> Result<bool> {
        self.update(|s| s.apply_auto_window(channel, preset))
    }

    /// Renders one frame at `width x height`.
    ///
    /// Per-frame failures are logged and reported as skipped; the next call retries.
    pub fn render_frame(&self, camera: &FrameCamera, width: u32, height: u32) -> FrameOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            log::debug!("frame requested while another is in flight");
            return FrameOutcome::Skipped(SkipReason::Busy);
        };
        self.lock().render(camera, width, height)
    }

    /// Timings of the last rendered frame.
    pub fn last_timings(&self) -> Option<RenderTimings> {
        self.lock().timings
    }

    /// Forces the next frame to render even if nothing changed.
    pub fn invalidate(&self) {
        self.lock().last_frame = None;
    }

    /// Identity of the transfer lookup texture bound for `channel`.
    ///
    /// Stays the same across frames until the channel's transfer function or
    /// the dataset range changes.
    pub fn transfer_lut_handle(&self, channel: usize) -> Option<HandleId> {
        let slot = ResourceSlot::transfer_lut(channel)?;
        self.lock().engine.bound_handle(slot)
    }

    /// Last rendered frame as tightly packed RGBA8 rows.
    pub fn read_frame(&self) -> Result<Vec<u8>> {
        self.lock().engine.read_output().map_err(render_error)
    }

    /// Saves the last rendered frame as PNG or JPEG.
    pub fn save_frame(&self, path: impl AsRef<Path>) -> Result<()> {
        let inner = self.lock();
        let (width, height) = inner
            .engine
            .output_size()
            .ok_or_else(|| VolscopeError::RenderError("no frame rendered yet".to_string()))?;
        let data = inner.engine.read_output().map_err(render_error)?;
        volscope_render::save_image(path, &data, width, height, &ScreenshotOptions::default())
            .map_err(|e| VolscopeError::RenderError(format!("Failed to save image: {e}")))
    }

    /// Runs every kernel once so workgroup tuning happens before interactive use.
    pub fn warm_up(&self, width: u32, height: u32) -> Result<()> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        if inner.engine.volume().is_none() {
            return Err(render_error(RenderError::NoVolume));
        }
        inner.sync_channels().map_err(render_error)?;
        let camera = FrameCamera::default();
        let params = inner.scene.frame_parameters(0);
        inner
            .engine
            .render_raycast(&params, &camera.uniforms(width, height), width, height)
            .map_err(render_error)?;
        inner
            .engine
            .render_mpr(&inner.scene.mpr_uniforms(), width, height)
            .map_err(render_error)?;
        let bins = inner.scene.options().histogram_bins;
        inner
            .engine
            .compute_histogram(1, bins, None)
            .map_err(render_error)?;
        inner.last_frame = None;
        log::info!("warm-up finished at {width}x{height}");
        Ok(())
    }

    /// Name of the GPU adapter.
    pub fn adapter_name(&self) -> String {
        self.lock().engine.adapter_info().name.clone()
    }
}

/// Channel state last pushed to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
struct UploadedChannel {
    revision: u64,
    lut_revision: u64,
    lut_domain: (f32, f32),
}

impl Inner {
    fn render(&mut self, camera: &FrameCamera, width: u32, height: u32) -> FrameOutcome {
        if self.engine.volume().is_none() {
            return FrameOutcome::Skipped(SkipReason::NoVolume);
        }
        let signature = camera.signature();
        let revision = self.scene.revision();
        let unchanged = self.last_frame.is_some_and(|last| {
            last.revision == revision
                && last.size == (width, height)
                && last.signature.approx_eq(&signature)
        });
        if unchanged {
            return FrameOutcome::Skipped(SkipReason::Unchanged);
        }

        let result = self.sync_channels().and_then(|()| {
            if self.scene.render_method() == RenderMethod::Mpr {
                self.engine
                    .render_mpr(&self.scene.mpr_uniforms(), width, height)
            } else {
                let params = self.scene.frame_parameters(self.frame_index);
                self.engine
                    .render_raycast(&params, &camera.uniforms(width, height), width, height)
            }
        });

        match result {
            Ok(timings) => {
                self.frame_index = self.frame_index.wrapping_add(1);
                self.timings = Some(timings);
                self.last_frame = Some(LastFrame {
                    signature,
                    revision,
                    size: (width, height),
                });
                FrameOutcome::Rendered(timings)
            }
            Err(err) => {
                if err.is_recoverable() {
                    log::warn!("frame skipped: {err}");
                } else {
                    log::error!("frame skipped: {err}");
                }
                self.last_frame = None;
                FrameOutcome::Skipped(SkipReason::ResourceFailure(err.to_string()))
            }
        }
    }

    /// Re-uploads lookup resources of channels that changed since the last frame.
    ///
    /// The transfer texture is rebuilt only when the function or the dataset
    /// range changed; the tone buffer goes through the byte-compare cache.
    fn sync_channels(&mut self) -> volscope_render::RenderResult<()> {
        let lut_width = self.scene.options().lut_width.max(2);
        let (lo, hi) = self.scene.dataset_range();
        for (index, channel) in self.scene.channels().iter().enumerate() {
            let current = UploadedChannel {
                revision: channel.revision(),
                lut_revision: channel.lut_revision(),
                lut_domain: (lo, hi),
            };
            let previous = self.uploaded_channels[index];
            if previous == Some(current) {
                continue;
            }
            let lut_stale = previous.is_none_or(|p| {
                p.lut_revision != current.lut_revision || p.lut_domain != current.lut_domain
            });
            if lut_stale {
                let lut = channel.transfer_function().bake_rgba8_over(lut_width, lo, hi);
                self.engine.upload_transfer_lut(index, &lut)?;
                log::debug!("baked channel {index} transfer lookup over [{lo}, {hi}]");
            }
            self.engine.upload_tone_lut(index, channel.tone().samples())?;
            self.uploaded_channels[index] = Some(current);
        }
        Ok(())
    }
}
