//! Core abstractions for volscope.
//!
//! This crate holds the GPU-free half of the volume renderer:
//! - [`RenderParameters`], the per-frame block shared byte-for-byte with the kernels
//! - transfer functions, tone curves and auto-windowing for channel color mapping
//! - histogram planning and the binning rule used by the GPU reducer
//! - clip, MPR and camera state
//! - CPU reference implementations of the ray marcher and the oblique resampler

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Options structs legitimately have many boolean flags
#![allow(clippy::struct_excessive_bools)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
// Numeric conversions between voxel indices, GPU ints and floats are pervasive
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
#![allow(clippy::many_single_char_names)]

pub mod auto_window;
pub mod camera;
pub mod channel;
pub mod clip;
pub mod error;
pub mod histogram;
pub mod mpr;
pub mod options;
pub mod params;
pub mod raymarch;
pub mod tone_curve;
pub mod transfer_function;
pub mod volume;

pub use auto_window::{AutoWindowPreset, IntensityWindow};
pub use camera::{CameraSignature, CameraUniforms, FrameCamera, Ray};
pub use channel::{ChannelSet, ChannelState};
pub use clip::{ClipPlane, ClipPlanePreset, ClipState, MAX_CLIP_PLANES};
pub use error::{Result, VolscopeError};
pub use histogram::{ChannelHistogram, HistogramPlan, HistogramStrategy};
pub use mpr::{MprBlend, MprState, MprUniforms};
pub use options::{CompositingOrder, Options, RenderMethod};
pub use params::{RenderParameters, MAX_CHANNELS};
pub use raymarch::{MarchResult, RayMarcher};
pub use tone_curve::{ToneCurve, ToneInterpolation};
pub use transfer_function::{AlphaPoint, ColourPoint, Rgba, TransferFunction, LUT_WIDTH};
pub use volume::VolumeDataset;

// Re-export glam types for convenience
pub use glam::{Mat3, Mat4, Quat, UVec3, Vec2, Vec3, Vec4};
