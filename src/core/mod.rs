//! Core types shared across edgecl.
//!
//! This module contains:
//! - Device capability and handle types
//! - Host pixel views and memory object descriptors
//! - Error types
//! - Dispatch configuration

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{DispatchConfig, ReportFormat};
pub use error::{ComputeError, ComputeResult, EdgeclError, EdgeclResult};
pub use types::{DeviceClass, DeviceInfo, DeviceType, HostPixels, PixelLayout, PlatformInfo};
