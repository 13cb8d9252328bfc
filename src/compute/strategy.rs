//! Memory object strategy: native 2-D images or flat buffers.
//!
//! Both paths share launch geometry and differ only in how the source and
//! destination objects are built, which entry point runs, which arguments
//! it takes and how the destination is read back.

use crate::backend::ComputeBackend;
use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{
    ContextId, DeviceInfo, HostPixels, ImageDesc, KernelArg, KernelId, MemAccess, MemId, MemInit,
    PixelLayout, QueueId,
};
use image::RgbaImage;
use serde::Serialize;
use std::fmt;

/// Channels per destination pixel on both paths.
pub const DEST_CHANNELS: usize = 4;

/// Bytes per channel of the buffer path's `float4` destination.
pub const BUFFER_BYTES_PER_CHANNEL: usize = std::mem::size_of::<f32>();

/// Which kind of memory object carries pixel data to and from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemoryPath {
    Image,
    Buffer,
}

/// Why the buffer path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferReason {
    /// The caller asked for buffers.
    Forced,
    /// The device has no native image support.
    NoImageSupport,
}

/// Outcome of the per-dispatch path decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathDecision {
    pub path: MemoryPath,
    /// Set only for the buffer path.
    pub reason: Option<BufferReason>,
}

/// Source and destination objects created for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedObjects {
    pub source: MemId,
    pub destination: MemId,
}

impl MemoryPath {
    /// Images are used only when the device supports them and buffers were
    /// not forced. The override can force buffers, never images.
    pub fn select(device: &DeviceInfo, force_buffer: bool) -> PathDecision {
        if device.image_support && !force_buffer {
            return PathDecision {
                path: MemoryPath::Image,
                reason: None,
            };
        }
        let reason = if force_buffer {
            BufferReason::Forced
        } else {
            log::warn!("No image support on device {}", device.name);
            BufferReason::NoImageSupport
        };
        PathDecision {
            path: MemoryPath::Buffer,
            reason: Some(reason),
        }
    }

    /// Entry point in the kernel source for this path.
    pub fn kernel_name(self) -> &'static str {
        match self {
            MemoryPath::Image => "edgeDetect",
            MemoryPath::Buffer => "bufferEdgeDetect",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MemoryPath::Image => "image",
            MemoryPath::Buffer => "buffer",
        }
    }

    /// Program build options. The buffer kernel addresses raw bytes and
    /// must know the source channel count.
    pub fn build_options(self, layout: PixelLayout) -> String {
        match self {
            MemoryPath::Image => String::new(),
            MemoryPath::Buffer => format!("-DSRC_CHANNELS={}", layout.channels()),
        }
    }

    /// Size in bytes of the destination object.
    pub fn destination_size(self, width: usize, height: usize) -> usize {
        match self {
            MemoryPath::Image => width * height * DEST_CHANNELS,
            MemoryPath::Buffer => width * height * DEST_CHANNELS * BUFFER_BYTES_PER_CHANNEL,
        }
    }

    /// Create the source object from host pixels and a zeroed destination.
    pub(crate) fn stage(
        self,
        backend: &mut dyn ComputeBackend,
        context: ContextId,
        pixels: &HostPixels<'_>,
    ) -> ComputeResult<StagedObjects> {
        let (width, height) = (pixels.width as usize, pixels.height as usize);
        let source = match self {
            MemoryPath::Image => {
                let desc = ImageDesc {
                    order: pixels.layout.channel_order(),
                    ..ImageDesc::rgba8(width, height)
                };
                backend.create_image(context, MemAccess::ReadOnly, &desc, MemInit::Host(pixels.bytes))?
            }
            MemoryPath::Buffer => backend.create_buffer(
                context,
                MemAccess::ReadOnly,
                pixels.bytes.len(),
                MemInit::Host(pixels.bytes),
            )?,
        };
        let destination = match self {
            MemoryPath::Image => backend.create_image(
                context,
                MemAccess::WriteOnly,
                &ImageDesc::rgba8(width, height),
                MemInit::Zeroed,
            ),
            MemoryPath::Buffer => backend.create_buffer(
                context,
                MemAccess::WriteOnly,
                self.destination_size(width, height),
                MemInit::Zeroed,
            ),
        };
        match destination {
            Ok(destination) => Ok(StagedObjects {
                source,
                destination,
            }),
            Err(e) => {
                backend.release_mem(source);
                Err(e)
            }
        }
    }

    /// Bind slot 0 = source, slot 1 = destination and, for buffers, slot 2 =
    /// row width in pixels.
    pub(crate) fn bind(
        self,
        backend: &mut dyn ComputeBackend,
        kernel: KernelId,
        objects: &StagedObjects,
        width: u32,
    ) -> ComputeResult<()> {
        backend.set_kernel_arg(kernel, 0, KernelArg::Mem(objects.source))?;
        backend.set_kernel_arg(kernel, 1, KernelArg::Mem(objects.destination))?;
        if self == MemoryPath::Buffer {
            let width = i32::try_from(width).map_err(|_| {
                ComputeError::KernelArgument(format!("row width {width} does not fit in an int"))
            })?;
            backend.set_kernel_arg(kernel, 2, KernelArg::Int(width))?;
        }
        log::debug!(
            "bound {} arguments: src {}, dst {}",
            self.name(),
            objects.source,
            objects.destination
        );
        Ok(())
    }

    /// Blocking read of the destination into a new RGBA8 image.
    pub(crate) fn read_back(
        self,
        backend: &mut dyn ComputeBackend,
        queue: QueueId,
        objects: &StagedObjects,
        width: u32,
        height: u32,
    ) -> ComputeResult<RgbaImage> {
        let texels = width as usize * height as usize * DEST_CHANNELS;
        let bytes = match self {
            MemoryPath::Image => {
                let mut bytes = vec![0u8; texels];
                backend.read_image(queue, objects.destination, &mut bytes)?;
                bytes
            }
            MemoryPath::Buffer => {
                let mut floats = vec![0f32; texels];
                backend.read_buffer(
                    queue,
                    objects.destination,
                    bytemuck::cast_slice_mut(&mut floats),
                )?;
                floats.iter().map(|v| unorm8(*v)).collect()
            }
        };
        RgbaImage::from_raw(width, height, bytes).ok_or_else(|| {
            ComputeError::ReadBack(format!("destination does not hold a {width}x{height} image"))
        })
    }

    pub(crate) fn release(self, backend: &mut dyn ComputeBackend, objects: &StagedObjects) {
        backend.release_mem(objects.source);
        backend.release_mem(objects.destination);
    }
}

impl fmt::Display for MemoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized float channel to 8 bits.
fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostDevice;
    use proptest::prelude::*;

    #[test]
    fn test_image_path_when_supported() {
        let device = HostDevice::cpu("c").info;
        let decision = MemoryPath::select(&device, false);
        assert_eq!(decision.path, MemoryPath::Image);
        assert_eq!(decision.reason, None);
        assert_eq!(decision.path.kernel_name(), "edgeDetect");
    }

    #[test]
    fn test_override_forces_buffer() {
        let device = HostDevice::cpu("c").info;
        let decision = MemoryPath::select(&device, true);
        assert_eq!(decision.path, MemoryPath::Buffer);
        assert_eq!(decision.reason, Some(BufferReason::Forced));
        assert_eq!(decision.path.kernel_name(), "bufferEdgeDetect");
    }

    #[test]
    fn test_missing_image_support_selects_buffer() {
        let device = HostDevice::cpu("c").without_image_support().info;
        let decision = MemoryPath::select(&device, false);
        assert_eq!(decision.path, MemoryPath::Buffer);
        assert_eq!(decision.reason, Some(BufferReason::NoImageSupport));
    }

    proptest! {
        #[test]
        fn prop_no_image_support_always_buffer(force in any::<bool>()) {
            let device = HostDevice::gpu("g").without_image_support().info;
            prop_assert_eq!(MemoryPath::select(&device, force).path, MemoryPath::Buffer);
        }
    }

    #[test]
    fn test_build_options() {
        assert_eq!(MemoryPath::Image.build_options(PixelLayout::Rgba8), "");
        assert_eq!(MemoryPath::Buffer.build_options(PixelLayout::Rgba8), "-DSRC_CHANNELS=4");
        assert_eq!(MemoryPath::Buffer.build_options(PixelLayout::Gray8), "-DSRC_CHANNELS=1");
    }

    #[test]
    fn test_destination_size() {
        assert_eq!(MemoryPath::Buffer.destination_size(4, 4), 4 * 4 * 4 * 4);
        assert_eq!(MemoryPath::Image.destination_size(4, 4), 4 * 4 * 4);
    }

    #[test]
    fn test_unorm8() {
        assert_eq!(unorm8(0.0), 0);
        assert_eq!(unorm8(1.0), 255);
        assert_eq!(unorm8(2.5), 255);
        assert_eq!(unorm8(-1.0), 0);
        assert_eq!(unorm8(0.5), 128);
    }
}
