//! # edgecl - Edge detection on parallel-compute devices
//!
//! edgecl runs a Sobel edge-detection kernel on a device exposed by a
//! general-purpose parallel-compute runtime (OpenCL), and reports the
//! kernel's device-side execution time.
//!
//! ## Features
//!
//! - **Capability inventory**: every platform and device with its limits
//! - **Device selection**: preferred device class with first-device fallback
//! - **Explicit lifecycle**: context, program, queue and dispatch as a checked state machine
//! - **Two memory paths**: native 2-D images, or flat buffers when images are
//!   unsupported or buffers are forced
//! - **Profiling**: kernel latency from the device's own timestamps
//! - **Host backend**: an in-process runtime for running without a driver
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use edgecl::prelude::*;
//!
//! let config = DispatchConfig::default().with_device_class(DeviceClass::Gpu);
//! let mut detector = EdgeDetector::new(HostBackend::new(), config)?;
//!
//! let input = image::open("input.png")?.into_rgba8();
//! let result = detector.run(&DynamicImage::ImageRgba8(input))?;
//! result.image.save("edges.png")?;
//! println!("{}", result.profile);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Device types, host pixel views, configuration and errors
//! - [`backend`]: The [`ComputeBackend`](backend::ComputeBackend) runtime abstraction
//!   and its implementations
//! - [`compute`]: Inventory, selection, session, memory strategy, dispatch and profiling
//!
//! With the `opencl` cargo feature, `backend::OpenClBackend` drives a real
//! OpenCL runtime through the same trait.

#![warn(clippy::all)]

pub mod backend;
pub mod compute;
pub mod core;

#[cfg(test)]
pub(crate) mod test_support;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use edgecl::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{
        DeviceClass, DeviceInfo, DeviceType, HostPixels, PixelLayout, PlatformInfo,
    };

    // Configuration
    pub use crate::core::config::{DispatchConfig, ReportFormat};

    // Errors
    pub use crate::core::error::{ComputeError, ComputeResult, EdgeclError, EdgeclResult};

    // Backends
    pub use crate::backend::{ComputeBackend, HostBackend, HostDevice, HostPlatform};
    #[cfg(feature = "opencl")]
    pub use crate::backend::OpenClBackend;

    // Dispatch
    pub use crate::compute::{
        select_device, BufferReason, CapabilityInventory, ComputeSession, EdgeDetection,
        EdgeDetector, KernelSource, LaunchGeometry, MemoryPath, PathDecision, ProfilingReport,
        SessionState,
    };

    pub use image::DynamicImage;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
