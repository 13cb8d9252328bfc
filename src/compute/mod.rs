//! Compute-dispatch orchestration.
//!
//! Control flows through the submodules in order:
//! inventory → selector → session → strategy → dispatch → profiling.
//! [`EdgeDetector`] drives the whole sequence for one image.

pub mod detector;
pub mod dispatch;
pub mod inventory;
pub mod profiling;
pub mod selector;
pub mod session;
pub mod source;
pub mod strategy;

pub use detector::{EdgeDetection, EdgeDetector};
pub use dispatch::{DispatchOutput, KernelEvent, LaunchGeometry, BORDER_MARGIN};
pub use inventory::{CapabilityInventory, PlatformEntry};
pub use profiling::ProfilingReport;
pub use selector::select_device;
pub use session::{ComputeSession, SessionState};
pub use source::KernelSource;
pub use strategy::{BufferReason, MemoryPath, PathDecision};
