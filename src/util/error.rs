//! Error types for the ray-traced viewport mode.

use thiserror::Error;

/// Main error type for ray-tracing mode operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No compute-capable device or context could be obtained
    #[error("Compute platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// Shader or pipeline creation failed
    #[error("Pipeline compilation failed: {0}")]
    PipelineCompile(String),

    /// Operation not valid in the orchestrator's current state
    #[error("Cannot {op} while {state}")]
    InvalidState { op: &'static str, state: &'static str },

    /// Raw bytes do not form a whole number of records
    #[error("Buffer layout mismatch: {0}")]
    BufferLayout(String),

    /// BVH failed structural validation
    #[error("Invalid BVH: {0}")]
    InvalidBvh(String),

    /// Device-side failure (allocation, submission, readback)
    #[error("Device error: {0}")]
    Device(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("Settings error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a device error from a string.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a BVH validation error.
    pub fn invalid_bvh(msg: impl Into<String>) -> Self {
        Self::InvalidBvh(msg.into())
    }

    /// Whether the failure comes from the environment (no usable device).
    pub fn is_platform(&self) -> bool {
        matches!(self, Self::PlatformUnsupported(_))
    }
}

/// Result type alias for ray-tracing mode operations.
pub type Result<T> = std::result::Result<T, Error>;
