//! Rendering backend for volscope.
//!
//! This crate provides the wgpu compute engine, including:
//! - the resource binding cache and its wgpu backend
//! - the workgroup dispatch tuner
//! - WGSL kernels for ray marching, oblique resampling and histograms
//! - volume, lookup-table and mask uploads
//! - frame readback, GPU timing and image export

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
// Sizes and dimensions move between u32, u64 and usize
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]

pub mod binding;
pub mod engine;
pub mod error;
pub mod pipelines;
pub mod readback;
pub mod resource;
pub mod screenshot;
pub mod timing;
pub mod tuner;

pub use binding::{BindingBackend, BindingTable, BindingValue, ResourceSlot, SizedResource, SlotKind};
pub use engine::{HistogramUniforms, VolumeInfo, VolumeRenderEngine, WgpuBindings};
pub use error::{RenderError, RenderResult};
pub use pipelines::{KernelPipelines, PipelineId};
pub use resource::{GpuBuffer, GpuResource, GpuSampler, GpuTexture, HandleId, ResourceHandle};
pub use screenshot::{save_image, save_to_buffer, ScreenshotError, ScreenshotOptions};
pub use timing::{GpuTimer, RenderTimings};
pub use tuner::{DispatchTuner, PipelineLimits, WorkgroupSize, PRESET_SHAPES};

/// Format of the output storage texture.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
