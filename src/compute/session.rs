//! Compute session: device, context, program and queue lifecycle.
//!
//! The runtime requires a strict call order (context before program, queue
//! before enqueue, completion before profiling). [`ComputeSession`] makes that
//! order explicit:
//!
//! ```text
//! Uninitialized → DeviceSelected → ContextReady → ProgramBuilt
//!               → QueueReady → Dispatched → ProfiledComplete
//! ```
//!
//! Every operation checks the current state and fails with
//! `ComputeError::InvalidState` when called out of order.

use crate::backend::ComputeBackend;
use crate::compute::dispatch::{self, DispatchOutput, KernelEvent};
use crate::compute::inventory::CapabilityInventory;
use crate::compute::profiling::{self, ProfilingReport};
use crate::compute::selector::select_device;
use crate::compute::source::KernelSource;
use crate::compute::strategy::MemoryPath;
use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{ContextId, DeviceInfo, DeviceType, HostPixels, ProgramId, QueueId};
use std::fmt;

/// Lifecycle state of a [`ComputeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized,
    DeviceSelected,
    ContextReady,
    ProgramBuilt,
    QueueReady,
    Dispatched,
    ProfiledComplete,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One device, one context, one program, one queue and one dispatch.
///
/// Dropping the session releases the queue, program and context it created,
/// in reverse creation order.
pub struct ComputeSession<'b> {
    backend: &'b mut dyn ComputeBackend,
    state: SessionState,
    device: Option<DeviceInfo>,
    context: Option<ContextId>,
    program: Option<ProgramId>,
    queue: Option<QueueId>,
}

impl fmt::Debug for ComputeSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeSession")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("device", &self.device.as_ref().map(|d| d.name.as_str()))
            .finish_non_exhaustive()
    }
}

impl<'b> ComputeSession<'b> {
    pub fn new(backend: &'b mut dyn ComputeBackend) -> Self {
        Self {
            backend,
            state: SessionState::Uninitialized,
            device: None,
            context: None,
            program: None,
            queue: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The selected device, once past `Uninitialized`.
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> ComputeResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ComputeError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn invalid(&self, operation: &'static str) -> ComputeError {
        ComputeError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Select a device of platform `platform_index`, preferring `wanted`.
    pub fn select_device(
        &mut self,
        inventory: &CapabilityInventory,
        platform_index: usize,
        wanted: DeviceType,
    ) -> ComputeResult<&DeviceInfo> {
        self.require("select_device", SessionState::Uninitialized)?;
        let entry = inventory.platform(platform_index)?;
        let device = select_device(&entry.devices, wanted)?.clone();
        log::info!(
            "Using device '{}' ({}) on platform '{}'",
            device.name,
            device.device_type,
            entry.platform.name
        );
        self.state = SessionState::DeviceSelected;
        Ok(&*self.device.insert(device))
    }

    pub fn create_context(&mut self) -> ComputeResult<ContextId> {
        self.require("create_context", SessionState::DeviceSelected)?;
        let device = self.device.as_ref().ok_or_else(|| self.invalid("create_context"))?;
        let context = self.backend.create_context(device.id)?;
        self.context = Some(context);
        self.state = SessionState::ContextReady;
        Ok(context)
    }

    /// Compile the kernel source for the selected device.
    ///
    /// A failed build is fatal; the build log is carried in the error.
    pub fn build_program(&mut self, source: &KernelSource, options: &str) -> ComputeResult<ProgramId> {
        self.require("build_program", SessionState::ContextReady)?;
        let (device, context) = match (&self.device, self.context) {
            (Some(d), Some(c)) => (d, c),
            _ => return Err(self.invalid("build_program")),
        };
        log::debug!("building {} with options '{}'", source.origin(), options);
        let program = self
            .backend
            .build_program(context, device.id, source.text(), options)
            .map_err(|e| match e {
                ComputeError::ProgramBuild { log, .. } => ComputeError::ProgramBuild {
                    device: device.name.clone(),
                    log,
                },
                other => other,
            })?;
        self.program = Some(program);
        self.state = SessionState::ProgramBuilt;
        Ok(program)
    }

    /// Create the command queue. Profiling is always enabled.
    pub fn create_queue(&mut self) -> ComputeResult<QueueId> {
        self.require("create_queue", SessionState::ProgramBuilt)?;
        let (device, context) = match (&self.device, self.context) {
            (Some(d), Some(c)) => (d.id, c),
            _ => return Err(self.invalid("create_queue")),
        };
        let queue = self.backend.create_queue(context, device, true)?;
        self.queue = Some(queue);
        self.state = SessionState::QueueReady;
        Ok(queue)
    }

    /// Stage `pixels`, launch the kernel of `path` and read the result back.
    pub fn dispatch(&mut self, pixels: &HostPixels<'_>, path: MemoryPath) -> ComputeResult<DispatchOutput> {
        self.require("dispatch", SessionState::QueueReady)?;
        let (context, program, queue) = match (self.context, self.program, self.queue) {
            (Some(c), Some(p), Some(q)) => (c, p, q),
            _ => return Err(self.invalid("dispatch")),
        };
        let output = dispatch::dispatch(&mut *self.backend, context, program, queue, pixels, path)?;
        self.state = SessionState::Dispatched;
        Ok(output)
    }

    /// Read the kernel's profiling timestamps, consuming its event.
    pub fn profile(&mut self, event: KernelEvent) -> ComputeResult<ProfilingReport> {
        self.require("profile", SessionState::Dispatched)?;
        let device = self.device.as_ref().ok_or_else(|| self.invalid("profile"))?;
        let report = profiling::report(&mut *self.backend, event, device)?;
        log::info!("{report}");
        self.state = SessionState::ProfiledComplete;
        Ok(report)
    }
}

impl Drop for ComputeSession<'_> {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            self.backend.release_queue(queue);
        }
        if let Some(program) = self.program.take() {
            self.backend.release_program(program);
        }
        if let Some(context) = self.context.take() {
            self.backend.release_context(context);
        }
    }
}
