//! Capability inventory: platforms and their devices, in runtime order.

use crate::backend::ComputeBackend;
use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{DeviceInfo, DeviceType, PlatformInfo};
use serde::Serialize;
use std::fmt;

/// One platform with the devices it reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformEntry {
    pub platform: PlatformInfo,
    pub devices: Vec<DeviceInfo>,
}

/// Read-only snapshot of every platform and device the runtime exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityInventory {
    pub platforms: Vec<PlatformEntry>,
}

impl CapabilityInventory {
    /// Enumerate all platforms, then the devices of each matching `mask`.
    ///
    /// Fails if the runtime reports no platforms or a device query fails.
    pub fn discover(backend: &mut dyn ComputeBackend, mask: DeviceType) -> ComputeResult<Self> {
        let platforms = backend.platforms()?;
        if platforms.is_empty() {
            return Err(ComputeError::Discovery(format!(
                "{} runtime reported no platforms",
                backend.name()
            )));
        }

        let mut entries = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let devices = backend.devices(platform.id, mask).map_err(|e| match e {
                ComputeError::Discovery(_) => e,
                other => ComputeError::Discovery(format!(
                    "device query on platform '{}' failed: {other}",
                    platform.name
                )),
            })?;
            log::debug!("platform '{}': {} device(s)", platform.name, devices.len());
            entries.push(PlatformEntry { platform, devices });
        }
        Ok(Self { platforms: entries })
    }

    /// The platform at `index` in enumeration order.
    pub fn platform(&self, index: usize) -> ComputeResult<&PlatformEntry> {
        self.platforms.get(index).ok_or_else(|| {
            ComputeError::Discovery(format!(
                "platform index {index} out of range ({} platform(s))",
                self.platforms.len()
            ))
        })
    }

    pub fn device_count(&self) -> usize {
        self.platforms.iter().map(|p| p.devices.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Emit the text report line by line at info level.
    pub fn log_report(&self) {
        for line in self.to_string().lines() {
            log::info!("{line}");
        }
    }
}

const INDENT: &str = "  ";

impl fmt::Display for CapabilityInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let i2 = INDENT.repeat(2);
        for entry in &self.platforms {
            let p = &entry.platform;
            writeln!(f, "Platform:    {}", p.name)?;
            writeln!(f, "{INDENT}Vendor:      {}", p.vendor)?;
            writeln!(f, "{INDENT}Profile:     {}", p.profile)?;
            writeln!(f, "{INDENT}Version:     {}", p.version)?;
            writeln!(f, "{INDENT}Extensions:  {}", p.extensions)?;

            for d in &entry.devices {
                writeln!(f, "{INDENT}Device:      {}", d.name)?;
                writeln!(f, "{i2}Vendor:      {}", d.vendor)?;
                writeln!(f, "{i2}Type:        {}", d.device_type)?;
                writeln!(f, "{i2}Profile:     {}", d.profile)?;
                writeln!(f, "{i2}Version:     {}", d.version)?;
                writeln!(f, "{i2}OpenCL:      {}", d.opencl_c_version)?;
                writeln!(f, "{i2}Extensions:  {}", d.extensions)?;
                writeln!(f, "{i2}Driver Ver:  {}", d.driver_version)?;
                writeln!(f, "{i2}Global Mem:  {}", d.global_mem_size)?;
                writeln!(f, "{i2}Cache Line:  {}", d.global_mem_cacheline_size)?;
                writeln!(f, "{i2}Cache Type:  {:?}", d.global_mem_cache_type)?;
                writeln!(f, "{i2}Unified:     {}", d.host_unified_memory)?;
                writeln!(f, "{i2}Local Mem:   {}", d.local_mem_size)?;
                writeln!(f, "{i2}Local Type:  {:?}", d.local_mem_type)?;
                writeln!(f, "{i2}Units:       {}", d.max_compute_units)?;
                writeln!(f, "{i2}Group Size:  {}", d.max_work_group_size)?;
                writeln!(f, "{i2}Item Size:   {:?}", d.max_work_item_sizes)?;
                writeln!(f, "{i2}Item Dim:    {}", d.max_work_item_dimensions)?;
                writeln!(f, "{i2}Img Width:   {}", d.image2d_max_width)?;
                writeln!(f, "{i2}Img Height:  {}", d.image2d_max_height)?;
                writeln!(f, "{i2}Images:      {}", d.image_support)?;
                writeln!(f, "{i2}Timer Res:   {}ns", d.profiling_timer_resolution)?;
            }
        }
        Ok(())
    }
}
