//! Kernel latency from device-side profiling timestamps.

use crate::backend::ComputeBackend;
use crate::compute::dispatch::KernelEvent;
use crate::core::error::ComputeResult;
use crate::core::types::DeviceInfo;
use serde::Serialize;
use std::fmt;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Start/end timestamps of one kernel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfilingReport {
    pub start_ns: u64,
    pub end_ns: u64,
    /// Device timer resolution, in nanoseconds per tick.
    pub timer_resolution_ns: u64,
}

impl ProfilingReport {
    pub fn elapsed_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ns() as f64 / NANOS_PER_MILLI
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time: {:.3}ms, (res: {}ns)",
            self.elapsed_ms(),
            self.timer_resolution_ns
        )
    }
}

/// Read the timestamps of a completed kernel event and release it.
///
/// Fails with `EventNotComplete` if the command has not finished; the
/// blocking read-back of a dispatch guarantees completion.
pub fn report(
    backend: &mut dyn ComputeBackend,
    event: KernelEvent,
    device: &DeviceInfo,
) -> ComputeResult<ProfilingReport> {
    let timestamps = backend.event_timestamps(event.id());
    backend.release_event(event.id());
    let (start_ns, end_ns) = timestamps?;
    Ok(ProfilingReport {
        start_ns,
        end_ns,
        timer_resolution_ns: device.profiling_timer_resolution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::core::error::ComputeError;
    use crate::core::types::{DeviceType, ImageDesc, KernelArg, MemAccess, MemInit};

    #[test]
    fn test_elapsed_conversion() {
        let r = ProfilingReport {
            start_ns: 1_000,
            end_ns: 2_501_000,
            timer_resolution_ns: 1,
        };
        assert_eq!(r.elapsed_ns(), 2_500_000);
        assert!((r.elapsed_ms() - 2.5).abs() < 1e-9);
        assert_eq!(r.to_string(), "time: 2.500ms, (res: 1ns)");
    }

    #[test]
    fn test_elapsed_never_negative() {
        let r = ProfilingReport {
            start_ns: 10,
            end_ns: 5,
            timer_resolution_ns: 80,
        };
        assert_eq!(r.elapsed_ns(), 0);
        assert_eq!(r.elapsed_ms(), 0.0);
    }

    #[test]
    fn test_incomplete_event() {
        let mut backend = HostBackend::new();
        let platform = backend.platforms().unwrap()[0].id;
        let device = backend.devices(platform, DeviceType::ALL).unwrap().remove(0);
        let context = backend.create_context(device.id).unwrap();
        let source = crate::compute::KernelSource::bundled();
        let program = backend.build_program(context, device.id, source.text(), "").unwrap();
        let queue = backend.create_queue(context, device.id, true).unwrap();
        let kernel = backend.create_kernel(program, "edgeDetect").unwrap();
        let desc = ImageDesc::rgba8(3, 3);
        let src = backend
            .create_image(context, MemAccess::ReadOnly, &desc, MemInit::Zeroed)
            .unwrap();
        let dst = backend
            .create_image(context, MemAccess::WriteOnly, &desc, MemInit::Zeroed)
            .unwrap();
        backend.set_kernel_arg(kernel, 0, KernelArg::Mem(src)).unwrap();
        backend.set_kernel_arg(kernel, 1, KernelArg::Mem(dst)).unwrap();
        let event = backend.enqueue_kernel(queue, kernel, [1, 1], [1, 1], None).unwrap();

        // No blocking read has happened yet.
        let err = report(&mut backend, KernelEvent::new(event), &device).unwrap_err();
        assert_eq!(err, ComputeError::EventNotComplete);
        assert!(err.is_contract_violation());
    }
}
