//! Error types for volscope.

use thiserror::Error;

/// The main error type for volscope domain operations.
#[derive(Error, Debug)]
pub enum VolscopeError {
    /// Volume dimensions contain a zero extent.
    #[error("invalid volume dimensions {0}x{1}x{2}")]
    InvalidDimensions(u32, u32, u32),

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Display window with `min >= max`.
    #[error("invalid window [{min}, {max}]: min must be below max")]
    InvalidWindow { min: f32, max: f32 },

    /// Channel index outside `0..MAX_CHANNELS`.
    #[error("channel {0} out of range")]
    ChannelOutOfRange(usize),

    /// A preset with the given name was not found.
    #[error("preset '{0}' not found")]
    PresetNotFound(String),

    /// A control point list that must not be empty was empty.
    #[error("{0} has no control points")]
    EmptyControlPoints(&'static str),

    /// Rendering error.
    #[error("render error: {0}")]
    RenderError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for volscope operations.
pub type Result<T> = std::result::Result<T, VolscopeError>;
