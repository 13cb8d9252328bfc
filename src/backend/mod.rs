//! Compute runtime abstraction.
//!
//! [`ComputeBackend`] exposes exactly the runtime operations the dispatch
//! layer needs. Implementations:
//!
//! - [`HostBackend`]: in-process emulation with a configurable device catalog
//! - `OpenClBackend`: the OpenCL runtime (cargo feature `opencl`)

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use host::{HostBackend, HostDevice, HostPlatform, LaunchRecord, LiveObjects};
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;

use crate::core::error::ComputeResult;
use crate::core::types::{
    ContextId, DeviceId, DeviceInfo, DeviceType, EventId, ImageDesc, KernelArg, KernelId,
    MemAccess, MemId, MemInit, PlatformId, PlatformInfo, ProgramId, QueueId,
};

/// Operations of a general-purpose parallel-compute runtime.
///
/// Creation calls hand out opaque handles. Objects created against one
/// context must only be combined with objects from the same context.
pub trait ComputeBackend {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Enumerate platforms in runtime order.
    fn platforms(&mut self) -> ComputeResult<Vec<PlatformInfo>>;

    /// Enumerate the devices of `platform` whose type intersects `mask`.
    fn devices(&mut self, platform: PlatformId, mask: DeviceType) -> ComputeResult<Vec<DeviceInfo>>;

    fn create_context(&mut self, device: DeviceId) -> ComputeResult<ContextId>;

    /// Compile `source` for `device`. Failures carry the build log.
    fn build_program(
        &mut self,
        context: ContextId,
        device: DeviceId,
        source: &str,
        options: &str,
    ) -> ComputeResult<ProgramId>;

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> ComputeResult<KernelId>;

    fn create_queue(
        &mut self,
        context: ContextId,
        device: DeviceId,
        profiling: bool,
    ) -> ComputeResult<QueueId>;

    fn create_image(
        &mut self,
        context: ContextId,
        access: MemAccess,
        desc: &ImageDesc,
        init: MemInit<'_>,
    ) -> ComputeResult<MemId>;

    fn create_buffer(
        &mut self,
        context: ContextId,
        access: MemAccess,
        size: usize,
        init: MemInit<'_>,
    ) -> ComputeResult<MemId>;

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: KernelArg) -> ComputeResult<()>;

    /// Enqueue a 2-D launch. `local` of `None` leaves the work-group size
    /// to the runtime.
    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        offset: [usize; 2],
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ComputeResult<EventId>;

    /// Blocking read of a whole 2-D image into `dst` (tightly packed rows).
    fn read_image(&mut self, queue: QueueId, image: MemId, dst: &mut [u8]) -> ComputeResult<()>;

    /// Blocking read of the first `dst.len()` bytes of a buffer.
    fn read_buffer(&mut self, queue: QueueId, buffer: MemId, dst: &mut [u8]) -> ComputeResult<()>;

    /// Command start and end timestamps in device nanoseconds.
    ///
    /// Fails with `EventNotComplete` if the command has not finished.
    fn event_timestamps(&mut self, event: EventId) -> ComputeResult<(u64, u64)>;

    fn release_mem(&mut self, mem: MemId);

    fn release_event(&mut self, event: EventId);

    fn release_kernel(&mut self, kernel: KernelId);

    fn release_program(&mut self, program: ProgramId);

    fn release_queue(&mut self, queue: QueueId);

    /// Destroy a context. Objects created against it must be released first.
    fn release_context(&mut self, context: ContextId);
}
