//! volscope: GPU volume rendering for CT and MR datasets.
//!
//! Renders signed 16-bit scalar volumes with wgpu compute kernels:
//! direct volume rendering, isosurface, MIP/MinIP/average projections and
//! oblique multi-planar reconstruction with thin or thick slabs.
//!
//! # Quick Start
//!
//! ```no_run
//! use volscope::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let volume = VolumeDataset::from_fn(UVec3::splat(64), |p| {
//!         if p.distance(Vec3::splat(0.5)) < 0.35 { 1000 } else { -1000 }
//!     })?;
//!
//!     let renderer = VolumeRenderer::new_headless(Options::default())?;
//!     renderer.load_volume(&volume)?;
//!     renderer.set_channel_preset(0, "ct-bone")?;
//!
//!     let camera = FrameCamera::orbit(volume.physical_extent(), Vec3::new(0.0, 0.0, 2.5), 0.8, 1.0);
//!     renderer.render_frame(&camera, 512, 512);
//!     renderer.save_frame("bone.png")?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`SceneState`] is the control surface: render method, windows, clipping,
//!   channels and MPR plane. It is GPU-free and bumps a revision on every change.
//! - [`VolumeRenderer`] owns the GPU engine and a scene, uploads what changed
//!   and skips frames whose camera and scene match the previous one.
//! - [`PresetRegistry`] resolves transfer-function preset ids.

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

mod headless;
mod presets;
mod renderer;
mod scene;

pub use headless::{render_to_file, render_to_image};
pub use presets::PresetRegistry;
pub use renderer::{FrameOutcome, SkipReason, VolumeRenderer};
pub use scene::{SceneState, VolumeSummary};

// Re-export core types
pub use volscope_core::{
    AlphaPoint, AutoWindowPreset, CameraSignature, ChannelHistogram, ChannelSet, ChannelState,
    ClipPlane, ClipPlanePreset, ColourPoint, CompositingOrder, FrameCamera, MprBlend, Options,
    RayMarcher, RenderMethod, RenderParameters, Result, Rgba, ToneCurve, ToneInterpolation,
    TransferFunction, VolscopeError, VolumeDataset, MAX_CHANNELS, MAX_CLIP_PLANES,
};
pub use volscope_core::{Mat3, Mat4, Quat, UVec3, Vec2, Vec3, Vec4};

// Re-export render types
pub use volscope_render::{
    save_image, HandleId, PipelineId, RenderError, RenderTimings, ScreenshotOptions,
    VolumeRenderEngine, WorkgroupSize,
};

/// Initializes logging from `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
