//! In-process emulation of the compute runtime.
//!
//! The host backend mimics the behavior of an OpenCL implementation closely
//! enough to exercise the whole dispatch layer without a driver: a fixed
//! platform/device catalog, programs whose entry points are discovered from
//! source text, in-order command queues that only execute at a blocking read,
//! and profiling timestamps taken around each emulated kernel.
//!
//! The edge-detection entry points of `kernels/edgedetect.cl` are emulated
//! natively; work-items of a launch run in parallel on the rayon pool.

use crate::backend::ComputeBackend;
use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{
    CacheType, ContextId, DeviceId, DeviceInfo, DeviceType, EventId, ImageDesc,
    KernelArg, KernelId, LocalMemType, MemAccess, MemId, MemInit, PlatformId, PlatformInfo,
    ProgramId, QueueId,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// A device in the host catalog together with the failure modes it models.
#[derive(Debug, Clone)]
pub struct HostDevice {
    pub info: DeviceInfo,
    /// Whether context creation succeeds on this device.
    pub accepts_contexts: bool,
    /// Whether profiling-enabled queues can be created.
    pub supports_profiling: bool,
}

impl HostDevice {
    fn with_type(name: &str, device_type: DeviceType) -> Self {
        let units = rayon::current_num_threads() as u32;
        Self {
            info: DeviceInfo {
                id: DeviceId(0),
                name: name.to_string(),
                vendor: "edgecl".to_string(),
                device_type,
                profile: "FULL_PROFILE".to_string(),
                version: "OpenCL 1.2 host".to_string(),
                opencl_c_version: "OpenCL C 1.2".to_string(),
                extensions: String::new(),
                driver_version: crate::VERSION.to_string(),
                global_mem_size: 1 << 30,
                global_mem_cacheline_size: 64,
                global_mem_cache_type: CacheType::ReadWrite,
                host_unified_memory: true,
                local_mem_size: 32 * 1024,
                local_mem_type: LocalMemType::Global,
                max_compute_units: units.max(1),
                max_work_group_size: 1024,
                max_work_item_sizes: vec![1024, 1024, 1024],
                max_work_item_dimensions: 3,
                image2d_max_width: 16384,
                image2d_max_height: 16384,
                image_support: true,
                profiling_timer_resolution: 1,
                available: true,
            },
            accepts_contexts: true,
            supports_profiling: true,
        }
    }

    /// A CPU device with image support.
    pub fn cpu(name: &str) -> Self {
        Self::with_type(name, DeviceType::CPU)
    }

    /// A GPU device with image support.
    pub fn gpu(name: &str) -> Self {
        let mut device = Self::with_type(name, DeviceType::GPU);
        device.info.host_unified_memory = false;
        device.info.local_mem_type = LocalMemType::Local;
        device
    }

    pub fn without_image_support(mut self) -> Self {
        self.info.image_support = false;
        self
    }

    pub fn rejecting_contexts(mut self) -> Self {
        self.accepts_contexts = false;
        self.info.available = false;
        self
    }

    pub fn without_profiling(mut self) -> Self {
        self.supports_profiling = false;
        self
    }

    pub fn with_image_limits(mut self, width: usize, height: usize) -> Self {
        self.info.image2d_max_width = width;
        self.info.image2d_max_height = height;
        self
    }
}

/// A platform in the host catalog.
#[derive(Debug, Clone)]
pub struct HostPlatform {
    pub info: PlatformInfo,
    pub devices: Vec<HostDevice>,
}

impl HostPlatform {
    pub fn new(name: &str) -> Self {
        Self {
            info: PlatformInfo {
                id: PlatformId(0),
                name: name.to_string(),
                vendor: "edgecl".to_string(),
                profile: "FULL_PROFILE".to_string(),
                version: "OpenCL 1.2 host emulation".to_string(),
                extensions: String::new(),
            },
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: HostDevice) -> Self {
        self.devices.push(device);
        self
    }
}

/// One kernel launch as seen by the host backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: String,
    pub build_options: String,
    pub offset: [usize; 2],
    pub global: [usize; 2],
    pub local: Option<[usize; 2]>,
    /// Bound arguments in slot order.
    pub args: Vec<KernelArg>,
}

/// Live object counts of a [`HostBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub contexts: usize,
    pub programs: usize,
    pub kernels: usize,
    pub queues: usize,
    pub mems: usize,
    pub events: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Image,
    Buffer,
    Int,
}

/// Argument signature of the natively emulated entry points.
fn signature(kernel: &str) -> Option<&'static [ArgKind]> {
    match kernel {
        "edgeDetect" => Some(&[ArgKind::Image, ArgKind::Image]),
        "bufferEdgeDetect" => Some(&[ArgKind::Buffer, ArgKind::Buffer, ArgKind::Int]),
        _ => None,
    }
}

/// Collect `__kernel` entry point names from program source.
fn entry_points(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    for marker in ["__kernel", "kernel"] {
        let mut rest = source;
        while let Some(pos) = rest.find(marker) {
            let preceded_by_ident = rest[..pos]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
            rest = &rest[pos + marker.len()..];
            if preceded_by_ident {
                continue;
            }
            let Some(after) = rest.trim_start().strip_prefix("void") else {
                continue;
            };
            let name: String = after
                .trim_start()
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Value of `-D<name>=<n>` in a build option string.
fn define_value(options: &str, name: &str) -> Option<usize> {
    let prefix = format!("-D{name}=");
    options
        .split_whitespace()
        .find_map(|opt| opt.strip_prefix(prefix.as_str()))
        .and_then(|v| v.parse().ok())
}

struct HostProgram {
    context: ContextId,
    entry_points: Vec<String>,
    options: String,
}

struct HostKernel {
    context: ContextId,
    name: String,
    options: String,
    args: BTreeMap<u32, KernelArg>,
}

struct PendingLaunch {
    event: EventId,
    kernel: String,
    options: String,
    args: Vec<KernelArg>,
    offset: [usize; 2],
    global: [usize; 2],
}

struct HostQueue {
    context: ContextId,
    profiling: bool,
    pending: Vec<PendingLaunch>,
}

enum MemKind {
    Image(ImageDesc),
    Buffer,
}

struct HostMem {
    context: ContextId,
    kind: MemKind,
    bytes: Vec<u8>,
}

struct HostEvent {
    profiling: bool,
    timestamps: Option<(u64, u64)>,
}

/// In-process compute runtime.
pub struct HostBackend {
    platforms: Vec<HostPlatform>,
    next_handle: u64,
    contexts: HashMap<ContextId, DeviceId>,
    programs: HashMap<ProgramId, HostProgram>,
    kernels: HashMap<KernelId, HostKernel>,
    queues: HashMap<QueueId, HostQueue>,
    mems: HashMap<MemId, HostMem>,
    events: HashMap<EventId, HostEvent>,
    launches: Vec<LaunchRecord>,
    epoch: Instant,
}

impl std::fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBackend")
            .field("platforms", &self.platforms.len())
            .field("live_mems", &self.mems.len())
            .field("launches", &self.launches.len())
            .finish_non_exhaustive()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// One platform with a single image-capable CPU device.
    pub fn new() -> Self {
        Self::with_platforms(vec![
            HostPlatform::new("edgecl host").with_device(HostDevice::cpu("Host emulation CPU"))
        ])
    }

    /// A backend exposing exactly `platforms`, in order.
    ///
    /// Platform and device handles are assigned here.
    pub fn with_platforms(mut platforms: Vec<HostPlatform>) -> Self {
        let mut next_handle = 1;
        for platform in &mut platforms {
            platform.info.id = PlatformId(next_handle);
            next_handle += 1;
            for device in &mut platform.devices {
                device.info.id = DeviceId(next_handle);
                next_handle += 1;
            }
        }
        Self {
            platforms,
            next_handle,
            contexts: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            queues: HashMap::new(),
            mems: HashMap::new(),
            events: HashMap::new(),
            launches: Vec::new(),
            epoch: Instant::now(),
        }
    }

    /// Every launch enqueued so far, in enqueue order.
    pub fn launches(&self) -> &[LaunchRecord] {
        &self.launches
    }

    /// Number of memory objects not yet released.
    pub fn live_mem_count(&self) -> usize {
        self.mems.len()
    }

    /// Counts of every runtime object not yet released.
    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            contexts: self.contexts.len(),
            programs: self.programs.len(),
            kernels: self.kernels.len(),
            queues: self.queues.len(),
            mems: self.mems.len(),
            events: self.events.len(),
        }
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn device(&self, id: DeviceId) -> Option<&HostDevice> {
        self.platforms
            .iter()
            .flat_map(|p| p.devices.iter())
            .find(|d| d.info.id == id)
    }

    fn context_device(&self, context: ContextId) -> ComputeResult<&HostDevice> {
        self.contexts
            .get(&context)
            .and_then(|id| self.device(*id))
            .ok_or_else(|| ComputeError::MemoryObject(format!("unknown context {context}")))
    }

    /// Execute every pending launch on `queue` in enqueue order.
    fn flush(&mut self, queue: QueueId) -> ComputeResult<()> {
        let pending = match self.queues.get_mut(&queue) {
            Some(q) => std::mem::take(&mut q.pending),
            None => return Err(ComputeError::ReadBack(format!("unknown queue {queue}"))),
        };
        for launch in pending {
            let start = self.now_ns();
            self.execute(&launch)
                .map_err(|e| ComputeError::ReadBack(format!("kernel '{}' failed: {e}", launch.kernel)))?;
            let end = self.now_ns();
            if let Some(event) = self.events.get_mut(&launch.event) {
                event.timestamps = Some((start, end));
            }
        }
        Ok(())
    }

    fn mem_arg(&self, arg: &KernelArg) -> ComputeResult<&HostMem> {
        match arg {
            KernelArg::Mem(id) => self
                .mems
                .get(id)
                .ok_or_else(|| ComputeError::Enqueue(format!("{id} was released"))),
            KernelArg::Int(_) => Err(ComputeError::Enqueue("expected a memory object".to_string())),
        }
    }

    fn execute(&mut self, launch: &PendingLaunch) -> ComputeResult<()> {
        let [ox, oy] = launch.offset;
        let [gw, gh] = launch.global;
        let src = self.mem_arg(&launch.args[0])?;

        // Row width and source channel count of the launch.
        let (width, channels) = match (&src.kind, launch.kernel.as_str()) {
            (MemKind::Image(desc), "edgeDetect") => {
                if ox + gw + 1 > desc.width || oy + gh + 1 > desc.height {
                    return Err(ComputeError::Enqueue(
                        "source image smaller than launch range".to_string(),
                    ));
                }
                (desc.width, desc.order.channels())
            }
            (MemKind::Buffer, "bufferEdgeDetect") => {
                let width = match launch.args[2] {
                    KernelArg::Int(w) if w > 0 => w as usize,
                    _ => return Err(ComputeError::Enqueue("invalid row width".to_string())),
                };
                (width, define_value(&launch.options, "SRC_CHANNELS").unwrap_or(4))
            }
            _ => {
                return Err(ComputeError::Enqueue(format!(
                    "no host implementation of '{}' for this source object",
                    launch.kernel
                )))
            }
        };
        let bytes = &src.bytes;
        let last = ((oy + gh) * width + ox + gw + 1) * channels;
        if last > bytes.len() {
            return Err(ComputeError::Enqueue(
                "source object smaller than launch range".to_string(),
            ));
        }
        let lum = |x: usize, y: usize| sample(&bytes[(y * width + x) * channels..], channels);

        let rows: Vec<Vec<f32>> = (oy..oy + gh)
            .into_par_iter()
            .map(|y| {
                (ox..ox + gw)
                    .map(|x| {
                        sobel([
                            lum(x - 1, y - 1),
                            lum(x, y - 1),
                            lum(x + 1, y - 1),
                            lum(x - 1, y),
                            lum(x + 1, y),
                            lum(x - 1, y + 1),
                            lum(x, y + 1),
                            lum(x + 1, y + 1),
                        ])
                    })
                    .collect()
            })
            .collect();

        let dst_id = match launch.args[1] {
            KernelArg::Mem(id) => id,
            KernelArg::Int(_) => {
                return Err(ComputeError::Enqueue("expected a memory object".to_string()))
            }
        };
        let dst = self
            .mems
            .get_mut(&dst_id)
            .ok_or_else(|| ComputeError::Enqueue(format!("{dst_id} was released")))?;
        // Image destinations hold 8-bit normalized texels, buffers hold float4.
        let texel_bytes = match dst.kind {
            MemKind::Image(desc) => desc.bytes_per_pixel(),
            MemKind::Buffer => 16,
        };
        for (row, y) in rows.iter().zip(oy..) {
            for (m, x) in row.iter().zip(ox..) {
                let at = (y * width + x) * texel_bytes;
                match dst.kind {
                    MemKind::Image(_) => {
                        let v = (m * 255.0).round() as u8;
                        let texel = [v, v, v, 255];
                        dst.bytes[at..at + texel_bytes].copy_from_slice(&texel[..texel_bytes]);
                    }
                    MemKind::Buffer => {
                        let value = [*m, *m, *m, 1.0f32];
                        dst.bytes[at..at + 16].copy_from_slice(bytemuck::cast_slice(&value));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate a launch against the bound objects before queueing it.
    fn check_launch(
        &self,
        kernel: &HostKernel,
        args: &[KernelArg],
        offset: [usize; 2],
        global: [usize; 2],
    ) -> ComputeResult<()> {
        if global[0] == 0 || global[1] == 0 {
            return Err(ComputeError::Enqueue(format!(
                "invalid global work size {}x{}",
                global[0], global[1]
            )));
        }
        let (width, height) = match self.mem_arg(&args[1])? {
            HostMem {
                kind: MemKind::Image(desc),
                ..
            } => (desc.width, desc.height),
            HostMem { bytes, .. } => {
                let width = match args.get(2) {
                    Some(KernelArg::Int(w)) if *w > 0 => *w as usize,
                    _ => return Err(ComputeError::Enqueue("invalid row width".to_string())),
                };
                (width, bytes.len() / 16 / width)
            }
        };
        // The 3x3 neighbourhood of every work-item must stay inside the image.
        let inside = offset[0] >= 1
            && offset[1] >= 1
            && offset[0] + global[0] < width
            && offset[1] + global[1] < height;
        if !inside {
            return Err(ComputeError::Enqueue(format!(
                "launch offset {:?} extent {:?} samples outside {}x{} image for '{}'",
                offset, global, width, height, kernel.name
            )));
        }
        Ok(())
    }
}

/// Normalized luminance of the pixel starting at `px`.
fn sample(px: &[u8], channels: usize) -> f32 {
    if channels == 1 {
        px[0] as f32 / 255.0
    } else {
        (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0
    }
}

/// Sobel magnitude from the eight neighbours (row-major, centre omitted).
fn sobel(n: [f32; 8]) -> f32 {
    let [tl, tc, tr, ml, mr, bl, bc, br] = n;
    let gx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
    let gy = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
    ((gx * gx + gy * gy).sqrt() / 4.0).min(1.0)
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&mut self) -> ComputeResult<Vec<PlatformInfo>> {
        Ok(self.platforms.iter().map(|p| p.info.clone()).collect())
    }

    fn devices(&mut self, platform: PlatformId, mask: DeviceType) -> ComputeResult<Vec<DeviceInfo>> {
        let platform = self
            .platforms
            .iter()
            .find(|p| p.info.id == platform)
            .ok_or_else(|| ComputeError::Discovery(format!("unknown platform {platform}")))?;
        Ok(platform
            .devices
            .iter()
            .filter(|d| d.info.device_type.intersects(mask))
            .map(|d| d.info.clone())
            .collect())
    }

    fn create_context(&mut self, device: DeviceId) -> ComputeResult<ContextId> {
        let dev = self.device(device).ok_or_else(|| ComputeError::ContextCreation {
            device: device.to_string(),
            reason: "invalid device".to_string(),
        })?;
        if !dev.accepts_contexts {
            return Err(ComputeError::ContextCreation {
                device: dev.info.name.clone(),
                reason: "device not available".to_string(),
            });
        }
        let id = ContextId(self.handle());
        self.contexts.insert(id, device);
        Ok(id)
    }

    fn build_program(
        &mut self,
        context: ContextId,
        device: DeviceId,
        source: &str,
        options: &str,
    ) -> ComputeResult<ProgramId> {
        let build_error = |log: String| ComputeError::ProgramBuild {
            device: device.to_string(),
            log,
        };
        match self.contexts.get(&context) {
            Some(d) if *d == device => {}
            Some(_) => return Err(build_error(format!("{device} is not part of {context}"))),
            None => return Err(build_error(format!("unknown context {context}"))),
        }
        let errors: Vec<String> = source
            .lines()
            .enumerate()
            .filter(|(_, line)| line.trim_start().starts_with("#error"))
            .map(|(n, line)| format!("<source>:{}: error: {}", n + 1, line.trim()))
            .collect();
        if !errors.is_empty() {
            return Err(build_error(errors.join("\n")));
        }
        let entry_points = entry_points(source);
        if entry_points.is_empty() {
            return Err(build_error("no kernel entry points in source".to_string()));
        }
        let id = ProgramId(self.handle());
        self.programs.insert(
            id,
            HostProgram {
                context,
                entry_points,
                options: options.to_string(),
            },
        );
        Ok(id)
    }

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> ComputeResult<KernelId> {
        let prog = self
            .programs
            .get(&program)
            .filter(|p| p.entry_points.iter().any(|e| e == name))
            .ok_or_else(|| ComputeError::KernelNotFound {
                name: name.to_string(),
            })?;
        let kernel = HostKernel {
            context: prog.context,
            name: name.to_string(),
            options: prog.options.clone(),
            args: BTreeMap::new(),
        };
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
        let dev = match self.contexts.get(&context) {
            Some(d) if *d == device => self.device(device),
            _ => None,
        };
        let dev = dev.ok_or_else(|| ComputeError::QueueCreation {
            device: device.to_string(),
            reason: format!("{device} is not part of {context}"),
        })?;
        if profiling && !dev.supports_profiling {
            return Err(ComputeError::QueueCreation {
                device: dev.info.name.clone(),
                reason: "profiling not supported".to_string(),
            });
        }
        let id = QueueId(self.handle());
        self.queues.insert(
            id,
            HostQueue {
                context,
                profiling,
                pending: Vec::new(),
            },
        );
        Ok(id)
    }

    fn create_image(
        &mut self,
        context: ContextId,
        _access: MemAccess,
        desc: &ImageDesc,
        init: MemInit<'_>,
    ) -> ComputeResult<MemId> {
        let dev = &self.context_device(context)?.info;
        if !dev.image_support {
            return Err(ComputeError::MemoryObject(format!(
                "device '{}' does not support images",
                dev.name
            )));
        }
        if desc.width == 0
            || desc.height == 0
            || desc.width > dev.image2d_max_width
            || desc.height > dev.image2d_max_height
        {
            return Err(ComputeError::MemoryObject(format!(
                "invalid image size {}x{} (max {}x{})",
                desc.width, desc.height, dev.image2d_max_width, dev.image2d_max_height
            )));
        }
        let bytes = match init {
            MemInit::Host(host) if host.len() == desc.byte_len() => host.to_vec(),
            MemInit::Host(host) => {
                return Err(ComputeError::MemoryObject(format!(
                    "host data is {} bytes, image needs {}",
                    host.len(),
                    desc.byte_len()
                )))
            }
            MemInit::Zeroed => vec![0; desc.byte_len()],
        };
        let id = MemId(self.handle());
        self.mems.insert(
            id,
            HostMem {
                context,
                kind: MemKind::Image(*desc),
                bytes,
            },
        );
        Ok(id)
    }

    fn create_buffer(
        &mut self,
        context: ContextId,
        _access: MemAccess,
        size: usize,
        init: MemInit<'_>,
    ) -> ComputeResult<MemId> {
        let dev = &self.context_device(context)?.info;
        if size == 0 || size as u64 > dev.global_mem_size {
            return Err(ComputeError::MemoryObject(format!("invalid buffer size {size}")));
        }
        let bytes = match init {
            MemInit::Host(host) if host.len() == size => host.to_vec(),
            MemInit::Host(host) => {
                return Err(ComputeError::MemoryObject(format!(
                    "host data is {} bytes, buffer is {size}",
                    host.len()
                )))
            }
            MemInit::Zeroed => vec![0; size],
        };
        let id = MemId(self.handle());
        self.mems.insert(
            id,
            HostMem {
                context,
                kind: MemKind::Buffer,
                bytes,
            },
        );
        Ok(id)
    }

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: KernelArg) -> ComputeResult<()> {
        let k = self
            .kernels
            .get(&kernel)
            .ok_or_else(|| ComputeError::KernelArgument(format!("unknown kernel {kernel}")))?;
        let sig = signature(&k.name).ok_or_else(|| {
            ComputeError::KernelArgument(format!("no host implementation of '{}'", k.name))
        })?;
        let expected = sig.get(index as usize).ok_or_else(|| {
            ComputeError::KernelArgument(format!("'{}' has no argument {index}", k.name))
        })?;
        let actual = match arg {
            KernelArg::Int(_) => ArgKind::Int,
            KernelArg::Mem(id) => {
                let mem = self
                    .mems
                    .get(&id)
                    .ok_or_else(|| ComputeError::KernelArgument(format!("unknown {id}")))?;
                if mem.context != k.context {
                    return Err(ComputeError::KernelArgument(format!(
                        "{id} belongs to a different context"
                    )));
                }
                match mem.kind {
                    MemKind::Image(_) => ArgKind::Image,
                    MemKind::Buffer => ArgKind::Buffer,
                }
            }
        };
        if actual != *expected {
            return Err(ComputeError::KernelArgument(format!(
                "argument {index} of '{}' expects {:?}, got {:?}",
                k.name, expected, actual
            )));
        }
        if let Some(k) = self.kernels.get_mut(&kernel) {
            k.args.insert(index, arg);
        }
        Ok(())
    }

    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        offset: [usize; 2],
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ComputeResult<EventId> {
        let k = self
            .kernels
            .get(&kernel)
            .ok_or_else(|| ComputeError::Enqueue(format!("unknown kernel {kernel}")))?;
        let q = self
            .queues
            .get(&queue)
            .ok_or_else(|| ComputeError::Enqueue(format!("unknown queue {queue}")))?;
        if q.context != k.context {
            return Err(ComputeError::Enqueue(
                "kernel and queue belong to different contexts".to_string(),
            ));
        }
        let arity = signature(&k.name)
            .map(|s| s.len())
            .ok_or_else(|| ComputeError::Enqueue(format!("no host implementation of '{}'", k.name)))?;
        let args: Vec<KernelArg> = (0..arity as u32)
            .map(|i| {
                k.args.get(&i).copied().ok_or_else(|| {
                    ComputeError::Enqueue(format!("argument {i} of '{}' is not set", k.name))
                })
            })
            .collect::<ComputeResult<_>>()?;
        self.check_launch(k, &args, offset, global)?;

        let record = LaunchRecord {
            kernel: k.name.clone(),
            build_options: k.options.clone(),
            offset,
            global,
            local,
            args: args.clone(),
        };
        let launch_options = k.options.clone();
        let profiling = q.profiling;
        let event = EventId(self.handle());
        self.events.insert(
            event,
            HostEvent {
                profiling,
                timestamps: None,
            },
        );
        if let Some(q) = self.queues.get_mut(&queue) {
            q.pending.push(PendingLaunch {
                event,
                kernel: record.kernel.clone(),
                options: launch_options,
                args,
                offset,
                global,
            });
        }
        self.launches.push(record);
        Ok(event)
    }

    fn read_image(&mut self, queue: QueueId, image: MemId, dst: &mut [u8]) -> ComputeResult<()> {
        self.flush(queue)?;
        let context = self.queues.get(&queue).map(|q| q.context);
        let mem = self
            .mems
            .get(&image)
            .ok_or_else(|| ComputeError::ReadBack(format!("unknown {image}")))?;
        if Some(mem.context) != context {
            return Err(ComputeError::ReadBack(format!(
                "{image} belongs to a different context"
            )));
        }
        match mem.kind {
            MemKind::Image(desc) if desc.byte_len() == dst.len() => {
                dst.copy_from_slice(&mem.bytes);
                Ok(())
            }
            MemKind::Image(desc) => Err(ComputeError::ReadBack(format!(
                "host buffer is {} bytes, image is {}",
                dst.len(),
                desc.byte_len()
            ))),
            MemKind::Buffer => Err(ComputeError::ReadBack(format!("{image} is not an image"))),
        }
    }

    fn read_buffer(&mut self, queue: QueueId, buffer: MemId, dst: &mut [u8]) -> ComputeResult<()> {
        self.flush(queue)?;
        let context = self.queues.get(&queue).map(|q| q.context);
        let mem = self
            .mems
            .get(&buffer)
            .ok_or_else(|| ComputeError::ReadBack(format!("unknown {buffer}")))?;
        if Some(mem.context) != context {
            return Err(ComputeError::ReadBack(format!(
                "{buffer} belongs to a different context"
            )));
        }
        if !matches!(mem.kind, MemKind::Buffer) {
            return Err(ComputeError::ReadBack(format!("{buffer} is not a buffer")));
        }
        if dst.len() > mem.bytes.len() {
            return Err(ComputeError::ReadBack(format!(
                "read of {} bytes exceeds buffer size {}",
                dst.len(),
                mem.bytes.len()
            )));
        }
        dst.copy_from_slice(&mem.bytes[..dst.len()]);
        Ok(())
    }

    fn event_timestamps(&mut self, event: EventId) -> ComputeResult<(u64, u64)> {
        let ev = self
            .events
            .get(&event)
            .ok_or_else(|| ComputeError::InvalidState {
                operation: "event_timestamps",
                state: format!("{event} released"),
            })?;
        // A queue without profiling reports the same condition as an
        // unfinished command.
        match (ev.profiling, ev.timestamps) {
            (true, Some(ts)) => Ok(ts),
            _ => Err(ComputeError::EventNotComplete),
        }
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
