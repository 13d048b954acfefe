//! One-shot headless rendering.
//!
//! Renders a single frame of a volume to an image buffer or file without a
//! window. Useful for integration tests, batch thumbnails and automated
//! screenshot generation. Interactive callers keep a [`VolumeRenderer`]
//! instead, which caches GPU state between frames.

use std::path::Path;

use volscope_core::{FrameCamera, Options, Result, VolscopeError, VolumeDataset};

use crate::renderer::{FrameOutcome, SkipReason, VolumeRenderer};

/// Renders one frame to a raw RGBA pixel buffer.
///
/// `configure` runs on a fresh [`VolumeRenderer`] after the volume is loaded,
/// before the frame, to set presets, windows or the render method.
///
/// The returned buffer has `width * height * 4` bytes, ordered row by row
/// from the top-left pixel.
///
/// # Example
/// ```no_run
/// use volscope::*;
///
/// let volume = VolumeDataset::constant(UVec3::splat(32), 100).unwrap();
/// let camera = FrameCamera::orbit(Vec3::ONE, Vec3::new(0.0, 0.0, 2.5), 0.8, 1.0);
/// let pixels = render_to_image(&volume, Options::default(), &camera, 256, 256, |_| Ok(())).unwrap();
/// assert_eq!(pixels.len(), 256 * 256 * 4);
/// ```
pub fn render_to_image(
    volume: &VolumeDataset,
    options: Options,
    camera: &FrameCamera,
    width: u32,
    height: u32,
    configure: impl FnOnce(&VolumeRenderer) -> Result<()>,
) -> Result<Vec<u8>> {
    let renderer = VolumeRenderer::new_headless(options)?;
    renderer.load_volume(volume)?;
    configure(&renderer)?;

    match renderer.render_frame(camera, width, height) {
        FrameOutcome::Rendered(timings) => {
            log::debug!("headless frame in {:.3} ms", timings.best().as_secs_f64() * 1e3);
        }
        FrameOutcome::Skipped(SkipReason::ResourceFailure(message)) => {
            return Err(VolscopeError::RenderError(message));
        }
        FrameOutcome::Skipped(reason) => {
            return Err(VolscopeError::RenderError(format!(
                "frame was not rendered: {reason:?}"
            )));
        }
    }
    renderer.read_frame()
}

/// Renders one frame and saves it as PNG or JPEG.
pub fn render_to_file(
    path: impl AsRef<Path>,
    volume: &VolumeDataset,
    options: Options,
    camera: &FrameCamera,
    width: u32,
    height: u32,
    configure: impl FnOnce(&VolumeRenderer) -> Result<()>,
) -> Result<()> {
    let data = render_to_image(volume, options, camera, width, height, configure)?;
    volscope_render::save_image(
        path,
        &data,
        width,
        height,
        &volscope_render::ScreenshotOptions::default(),
    )
    .map_err(|e| VolscopeError::RenderError(format!("Failed to save image: {e}")))
}
