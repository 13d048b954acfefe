//! Rendering error types.

use thiserror::Error;

use crate::binding::ResourceSlot;
use crate::pipelines::PipelineId;

/// Errors that can occur during rendering operations.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failed to create wgpu adapter.
    #[error("failed to create graphics adapter")]
    AdapterCreationFailed,

    /// Failed to create wgpu device.
    #[error("failed to create graphics device: {0}")]
    DeviceCreationFailed(#[from] wgpu::RequestDeviceError),

    /// Shader compilation failed.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),

    /// A kernel entry point could not be turned into a pipeline.
    #[error("pipeline {0:?} not available: {1}")]
    PipelineCreationFailed(PipelineId, String),

    /// Buffer creation failed.
    #[error("buffer creation failed: {0}")]
    BufferCreationFailed(String),

    /// Texture creation failed.
    #[error("texture creation failed: {0}")]
    TextureCreationFailed(String),

    /// A kernel needs a slot that has never been bound.
    #[error("resource slot {0:?} is not bound")]
    SlotUnbound(ResourceSlot),

    /// A value of the wrong kind was bound to a slot.
    #[error("resource slot {0:?} cannot hold this value")]
    SlotKindMismatch(ResourceSlot),

    /// Channel index outside the four supported channels.
    #[error("channel {0} out of range")]
    ChannelOutOfRange(usize),

    /// Volume data has not been uploaded yet.
    #[error("no volume uploaded")]
    NoVolume,

    /// Buffer mapping for readback failed.
    #[error("GPU buffer mapping failed")]
    BufferMapFailed,

    /// GPU reported a validation or execution error.
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,
}

impl RenderError {
    /// Whether the error is local to one frame and may succeed on retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::AdapterCreationFailed
                | Self::DeviceCreationFailed(_)
                | Self::ShaderCompilationFailed(_)
                | Self::PipelineCreationFailed(..)
        )
    }
}

/// A specialized Result type for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
