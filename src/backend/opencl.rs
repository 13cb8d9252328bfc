//! OpenCL runtime backend.
//!
//! Thin mapping of [`ComputeBackend`] onto `opencl3`. Runtime objects live in
//! per-kind tables keyed by the opaque handles handed to callers; releasing a
//! handle drops the `opencl3` wrapper, which releases the runtime object.
//!
//! # Feature Gate
//!
//! Only available when compiled with the `opencl` feature:
//! ```bash
//! cargo build --features opencl
//! ```

use crate::backend::ComputeBackend;
use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{
    CacheType, ChannelOrder, ContextId, DeviceId, DeviceInfo, DeviceType, EventId, ImageDesc,
    KernelArg, KernelId, LocalMemType, MemAccess, MemId, MemInit, PlatformId, PlatformInfo,
    ProgramId, QueueId,
};

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{Device, CL_GLOBAL, CL_LOCAL, CL_READ_ONLY_CACHE, CL_READ_WRITE_CACHE};
use opencl3::error_codes::{ClError, CL_PROFILING_INFO_NOT_AVAILABLE};
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{
    Buffer, ClMem, Image, CL_LUMINANCE, CL_MEM_COPY_HOST_PTR, CL_MEM_OBJECT_IMAGE2D,
    CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, CL_RGBA, CL_UNORM_INT8,
};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{
    cl_device_id, cl_image_desc, cl_image_format, cl_int, cl_mem_flags, cl_uint, CL_BLOCKING,
};

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;

enum ClMemObject {
    Image(Image, ImageDesc),
    Buffer(Buffer<u8>),
}

impl ClMemObject {
    fn raw(&self) -> opencl3::types::cl_mem {
        match self {
            ClMemObject::Image(image, _) => image.get(),
            ClMemObject::Buffer(buffer) => buffer.get(),
        }
    }
}

/// [`ComputeBackend`] over the installed OpenCL runtime.
///
/// `Debug` is implemented manually because the `opencl3` handle types don't
/// implement it.
pub struct OpenClBackend {
    next_handle: u64,
    platforms: HashMap<PlatformId, Platform>,
    devices: HashMap<DeviceId, cl_device_id>,
    contexts: HashMap<ContextId, Context>,
    programs: HashMap<ProgramId, Program>,
    kernels: HashMap<KernelId, Kernel>,
    queues: HashMap<QueueId, CommandQueue>,
    mems: HashMap<MemId, ClMemObject>,
    events: HashMap<EventId, Event>,
}

// SAFETY: OpenCL objects are thread-safe under OpenCL 1.2 (except kernels
// during set_arg/enqueue, which take `&mut self` here).
unsafe impl Send for OpenClBackend {}

impl std::fmt::Debug for OpenClBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClBackend")
            .field("platforms", &self.platforms.len())
            .field("contexts", &self.contexts.len())
            .field("live_mems", &self.mems.len())
            .finish_non_exhaustive()
    }
}

impl Default for OpenClBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn cl_message(e: ClError) -> String {
    format!("{e} ({})", e.0)
}

fn mem_flags(access: MemAccess) -> cl_mem_flags {
    match access {
        MemAccess::ReadOnly => CL_MEM_READ_ONLY,
        MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
        MemAccess::ReadWrite => CL_MEM_READ_WRITE,
    }
}

fn cache_type(raw: cl_uint) -> CacheType {
    match raw {
        CL_READ_ONLY_CACHE => CacheType::ReadOnly,
        CL_READ_WRITE_CACHE => CacheType::ReadWrite,
        _ => CacheType::None,
    }
}

fn local_mem_type(raw: cl_uint) -> LocalMemType {
    match raw {
        CL_LOCAL => LocalMemType::Local,
        CL_GLOBAL => LocalMemType::Global,
        _ => LocalMemType::None,
    }
}

fn device_info(id: DeviceId, device: &Device) -> Result<DeviceInfo, ClError> {
    Ok(DeviceInfo {
        id,
        name: device.name()?.trim().to_string(),
        vendor: device.vendor()?.trim().to_string(),
        device_type: DeviceType(device.dev_type()?),
        profile: device.profile()?,
        version: device.version()?,
        opencl_c_version: device.opencl_c_version()?,
        extensions: device.extensions()?,
        driver_version: device.driver_version()?,
        global_mem_size: device.global_mem_size()?,
        global_mem_cacheline_size: device.global_mem_cacheline_size()? as u32,
        global_mem_cache_type: cache_type(device.global_mem_cache_type()?),
        host_unified_memory: device.host_unified_memory()?,
        local_mem_size: device.local_mem_size()?,
        local_mem_type: local_mem_type(device.local_mem_type()?),
        max_compute_units: device.max_compute_units()? as u32,
        max_work_group_size: device.max_work_group_size()?,
        max_work_item_sizes: device.max_work_item_sizes()?,
        max_work_item_dimensions: device.max_work_item_dimensions()? as u32,
        image2d_max_width: device.image2d_max_width()?,
        image2d_max_height: device.image2d_max_height()?,
        image_support: device.image_support()?,
        profiling_timer_resolution: device.profiling_timer_resolution()? as u64,
        available: device.available()?,
    })
}

impl OpenClBackend {
    /// Create a backend. No runtime calls happen until discovery.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            platforms: HashMap::new(),
            devices: HashMap::new(),
            contexts: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            queues: HashMap::new(),
            mems: HashMap::new(),
            events: HashMap::new(),
        }
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn raw_device(&self, device: DeviceId) -> Option<cl_device_id> {
        self.devices.get(&device).copied()
    }

    fn device_name(&self, device: DeviceId) -> String {
        self.raw_device(device)
            .and_then(|id| Device::new(id).name().ok())
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| device.to_string())
    }

    fn queue(&self, queue: QueueId) -> ComputeResult<&CommandQueue> {
        self.queues
            .get(&queue)
            .ok_or_else(|| ComputeError::ReadBack(format!("unknown queue {queue}")))
    }
}

impl ComputeBackend for OpenClBackend {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&mut self) -> ComputeResult<Vec<PlatformInfo>> {
        let platforms = get_platforms()
            .map_err(|e| ComputeError::Discovery(format!("clGetPlatformIDs: {}", cl_message(e))))?;
        let mut infos = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let id = PlatformId(self.handle());
            let query = |e: ClError| ComputeError::Discovery(format!("clGetPlatformInfo: {}", cl_message(e)));
            infos.push(PlatformInfo {
                id,
                name: platform.name().map_err(query)?,
                vendor: platform.vendor().map_err(query)?,
                profile: platform.profile().map_err(query)?,
                version: platform.version().map_err(query)?,
                extensions: platform.extensions().map_err(query)?,
            });
            self.platforms.insert(id, platform);
        }
        Ok(infos)
    }

    fn devices(&mut self, platform: PlatformId, mask: DeviceType) -> ComputeResult<Vec<DeviceInfo>> {
        let raw_ids = self
            .platforms
            .get(&platform)
            .ok_or_else(|| ComputeError::Discovery(format!("unknown platform {platform}")))?
            .get_devices(mask.bits())
            .map_err(|e| ComputeError::Discovery(format!("clGetDeviceIDs: {}", cl_message(e))))?;

        let mut infos = Vec::with_capacity(raw_ids.len());
        for raw in raw_ids {
            let id = DeviceId(self.handle());
            let info = device_info(id, &Device::new(raw))
                .map_err(|e| ComputeError::Discovery(format!("clGetDeviceInfo: {}", cl_message(e))))?;
            self.devices.insert(id, raw);
            infos.push(info);
        }
        Ok(infos)
    }

    fn create_context(&mut self, device: DeviceId) -> ComputeResult<ContextId> {
        let raw = self.raw_device(device).ok_or_else(|| ComputeError::ContextCreation {
            device: device.to_string(),
            reason: "unknown device".to_string(),
        })?;
        let context = Context::from_device(&Device::new(raw)).map_err(|e| ComputeError::ContextCreation {
            device: self.device_name(device),
            reason: cl_message(e),
        })?;
        let id = ContextId(self.handle());
        self.contexts.insert(id, context);
        Ok(id)
    }

    fn build_program(
        &mut self,
        context: ContextId,
        device: DeviceId,
        source: &str,
        options: &str,
    ) -> ComputeResult<ProgramId> {
        let ctx = self.contexts.get(&context).ok_or_else(|| ComputeError::ProgramBuild {
            device: self.device_name(device),
            log: format!("unknown context {context}"),
        })?;
        // The error carries the build log.
        let program = Program::create_and_build_from_source(ctx, source, options).map_err(|log| {
            log::error!("Kernel build failed:\n{log}");
            ComputeError::ProgramBuild {
                device: self.device_name(device),
                log,
            }
        })?;
        let id = ProgramId(self.handle());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> ComputeResult<KernelId> {
        let not_found = || ComputeError::KernelNotFound {
            name: name.to_string(),
        };
        let program = self.programs.get(&program).ok_or_else(not_found)?;
        let kernel = Kernel::create(program, name).map_err(|_| not_found())?;
        let id = KernelId(self.handle());
        self.kernels.insert(id, kernel);
        Ok(id)
    }

    fn create_queue(
        &mut self,
        context: ContextId,
        device: DeviceId,
        profiling: bool,
    ) -> ComputeResult<QueueId> {
        let queue_error = |reason: String| ComputeError::QueueCreation {
            device: self.device_name(device),
            reason,
        };
        let ctx = self
            .contexts
            .get(&context)
            .ok_or_else(|| queue_error(format!("unknown context {context}")))?;
        let props = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        // OpenCL 1.2 entry point; some platforms lack clCreateCommandQueueWithProperties.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(ctx, props).map_err(|e| queue_error(cl_message(e)))?;
        let id = QueueId(self.handle());
        self.queues.insert(id, queue);
        Ok(id)
    }

    fn create_image(
        &mut self,
        context: ContextId,
        access: MemAccess,
        desc: &ImageDesc,
        init: MemInit<'_>,
    ) -> ComputeResult<MemId> {
        let ctx = self
            .contexts
            .get(&context)
            .ok_or_else(|| ComputeError::MemoryObject(format!("unknown context {context}")))?;
        // Zeroed images are copied from a zero-filled host block.
        let mut host = match init {
            MemInit::Host(bytes) if bytes.len() == desc.byte_len() => bytes.to_vec(),
            MemInit::Host(bytes) => {
                return Err(ComputeError::MemoryObject(format!(
                    "host data is {} bytes, image needs {}",
                    bytes.len(),
                    desc.byte_len()
                )))
            }
            MemInit::Zeroed => vec![0u8; desc.byte_len()],
        };
        let format = cl_image_format {
            image_channel_order: match desc.order {
                ChannelOrder::Rgba => CL_RGBA,
                ChannelOrder::Luminance => CL_LUMINANCE,
            },
            image_channel_data_type: CL_UNORM_INT8,
        };
        // SAFETY: all-zero is a valid cl_image_desc (null buffer, no mips).
        let mut cl_desc: cl_image_desc = unsafe { std::mem::zeroed() };
        cl_desc.image_type = CL_MEM_OBJECT_IMAGE2D;
        cl_desc.image_width = desc.width;
        cl_desc.image_height = desc.height;

        let image = unsafe {
            Image::create(
                ctx,
                mem_flags(access) | CL_MEM_COPY_HOST_PTR,
                &format,
                &cl_desc,
                host.as_mut_ptr() as *mut c_void,
            )
        }
        .map_err(|e| ComputeError::MemoryObject(format!("clCreateImage: {}", cl_message(e))))?;
        let id = MemId(self.handle());
        self.mems.insert(id, ClMemObject::Image(image, *desc));
        Ok(id)
    }

    fn create_buffer(
        &mut self,
        context: ContextId,
        access: MemAccess,
        size: usize,
        init: MemInit<'_>,
    ) -> ComputeResult<MemId> {
        let ctx = self
            .contexts
            .get(&context)
            .ok_or_else(|| ComputeError::MemoryObject(format!("unknown context {context}")))?;
        let mut host = match init {
            MemInit::Host(bytes) if bytes.len() == size => bytes.to_vec(),
            MemInit::Host(bytes) => {
                return Err(ComputeError::MemoryObject(format!(
                    "host data is {} bytes, buffer is {size}",
                    bytes.len()
                )))
            }
            MemInit::Zeroed => vec![0u8; size],
        };
        let buffer = unsafe {
            Buffer::<u8>::create(
                ctx,
                mem_flags(access) | CL_MEM_COPY_HOST_PTR,
                size,
                host.as_mut_ptr() as *mut c_void,
            )
        }
        .map_err(|e| ComputeError::MemoryObject(format!("clCreateBuffer: {}", cl_message(e))))?;
        let id = MemId(self.handle());
        self.mems.insert(id, ClMemObject::Buffer(buffer));
        Ok(id)
    }

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: KernelArg) -> ComputeResult<()> {
        let k = self
            .kernels
            .get(&kernel)
            .ok_or_else(|| ComputeError::KernelArgument(format!("unknown kernel {kernel}")))?;
        let result = match arg {
            KernelArg::Mem(mem) => {
                let raw = self
                    .mems
                    .get(&mem)
                    .ok_or_else(|| ComputeError::KernelArgument(format!("unknown {mem}")))?
                    .raw();
                unsafe { k.set_arg(index, &raw) }
            }
            KernelArg::Int(value) => {
                let value: cl_int = value;
                unsafe { k.set_arg(index, &value) }
            }
        };
        result.map_err(|e| ComputeError::KernelArgument(format!("clSetKernelArg({index}): {}", cl_message(e))))
    }

    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        offset: [usize; 2],
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ComputeResult<EventId> {
        let q = self
            .queues
            .get(&queue)
            .ok_or_else(|| ComputeError::Enqueue(format!("unknown queue {queue}")))?;
        let k = self
            .kernels
            .get(&kernel)
            .ok_or_else(|| ComputeError::Enqueue(format!("unknown kernel {kernel}")))?;
        let local_ptr = local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        let event = unsafe {
            q.enqueue_nd_range_kernel(k.get(), 2, offset.as_ptr(), global.as_ptr(), local_ptr, &[])
        }
        .map_err(|e| ComputeError::Enqueue(format!("clEnqueueNDRangeKernel: {}", cl_message(e))))?;
        let id = EventId(self.handle());
        self.events.insert(id, event);
        Ok(id)
    }

    fn read_image(&mut self, queue: QueueId, image: MemId, dst: &mut [u8]) -> ComputeResult<()> {
        let q = self.queue(queue)?;
        let (img, desc) = match self.mems.get(&image) {
            Some(ClMemObject::Image(img, desc)) => (img, desc),
            _ => return Err(ComputeError::ReadBack(format!("{image} is not an image"))),
        };
        if dst.len() != desc.byte_len() {
            return Err(ComputeError::ReadBack(format!(
                "host buffer is {} bytes, image is {}",
                dst.len(),
                desc.byte_len()
            )));
        }
        let origin = [0usize; 3];
        let region = [desc.width, desc.height, 1];
        unsafe {
            q.enqueue_read_image(
                img,
                CL_BLOCKING,
                origin.as_ptr(),
                region.as_ptr(),
                0,
                0,
                dst.as_mut_ptr() as *mut c_void,
                &[],
            )
        }
        .map_err(|e| ComputeError::ReadBack(format!("clEnqueueReadImage: {}", cl_message(e))))?;
        Ok(())
    }

    fn read_buffer(&mut self, queue: QueueId, buffer: MemId, dst: &mut [u8]) -> ComputeResult<()> {
        let q = self.queue(queue)?;
        let buf = match self.mems.get(&buffer) {
            Some(ClMemObject::Buffer(buf)) => buf,
            _ => return Err(ComputeError::ReadBack(format!("{buffer} is not a buffer"))),
        };
        unsafe { q.enqueue_read_buffer(buf, CL_BLOCKING, 0, dst, &[]) }
            .map_err(|e| ComputeError::ReadBack(format!("clEnqueueReadBuffer: {}", cl_message(e))))?;
        Ok(())
    }

    fn event_timestamps(&mut self, event: EventId) -> ComputeResult<(u64, u64)> {
        let ev = self.events.get(&event).ok_or_else(|| ComputeError::InvalidState {
            operation: "event_timestamps",
            state: format!("{event} released"),
        })?;
        let profiling = |e: ClError| {
            if e.0 == CL_PROFILING_INFO_NOT_AVAILABLE {
                ComputeError::EventNotComplete
            } else {
                ComputeError::ReadBack(format!("clGetEventProfilingInfo: {}", cl_message(e)))
            }
        };
        let start = ev.profiling_command_start().map_err(profiling)?;
        let end = ev.profiling_command_end().map_err(profiling)?;
        Ok((start, end))
    }

    fn release_mem(&mut self, mem: MemId) {
        self.mems.remove(&mem);
    }

    fn release_event(&mut self, event: EventId) {
        self.events.remove(&event);
    }

    fn release_kernel(&mut self, kernel: KernelId) {
        self.kernels.remove(&kernel);
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn release_queue(&mut self, queue: QueueId) {
        self.queues.remove(&queue);
    }

    fn release_context(&mut self, context: ContextId) {
        self.contexts.remove(&context);
    }
}
