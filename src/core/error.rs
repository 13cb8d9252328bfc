//! Error types for edgecl.
//!
//! Uses thiserror for structured errors with context. Every compute error is
//! fatal for the dispatch it occurs in; there is no local recovery or retry,
//! so errors carry the underlying runtime message verbatim.

use thiserror::Error;

/// Top-level error type for edgecl.
///
/// Wraps the compute-layer taxonomy together with the collaborators around
/// it (file I/O, image codecs, configuration).
#[derive(Error, Debug)]
pub enum EdgeclError {
    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by the compute-dispatch layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// No platforms or devices, or an enumeration call failed.
    #[error("Device discovery failed: {0}")]
    Discovery(String),

    #[error("Context creation failed for device '{device}': {reason}")]
    ContextCreation { device: String, reason: String },

    #[error("Command queue creation failed for device '{device}': {reason}")]
    QueueCreation { device: String, reason: String },

    /// Compilation or link failure. `log` is the compiler's build log.
    #[error("Program build failed for device '{device}':\n{log}")]
    ProgramBuild { device: String, log: String },

    #[error("Kernel entry point '{name}' not found in program")]
    KernelNotFound { name: String },

    #[error("Unsupported pixel format for the {path} path: {format}")]
    UnsupportedPixelFormat { path: String, format: String },

    #[error("Memory object creation failed: {0}")]
    MemoryObject(String),

    #[error("Kernel argument error: {0}")]
    KernelArgument(String),

    #[error("Kernel enqueue failed: {0}")]
    Enqueue(String),

    #[error("Read-back failed: {0}")]
    ReadBack(String),

    /// Profiling info was queried before the command completed.
    #[error("Event has not completed; profiling info unavailable")]
    EventNotComplete,

    /// A session operation was called out of order.
    #[error("'{operation}' is not legal in session state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl ComputeError {
    /// Whether this error signals a broken call-order contract rather than
    /// a runtime failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ComputeError::EventNotComplete | ComputeError::InvalidState { .. }
        )
    }

    /// Whether this error aborts before any device work starts.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            ComputeError::Discovery(_)
                | ComputeError::ContextCreation { .. }
                | ComputeError::QueueCreation { .. }
                | ComputeError::ProgramBuild { .. }
        )
    }
}

/// Result type alias for edgecl operations.
pub type EdgeclResult<T> = Result<T, EdgeclError>;

/// Result type alias for compute-layer operations.
pub type ComputeResult<T> = Result<T, ComputeError>;
