//! Core value types shared by the compute layer and its backends.
//!
//! Runtime objects are referred to through opaque `u64` handles so that
//! backend-specific types never leak into orchestration code.

use crate::core::error::{ComputeError, ComputeResult};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Device class bitmask. Bit values match the OpenCL `cl_device_type` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub u64);

impl DeviceType {
    pub const DEFAULT: DeviceType = DeviceType(1 << 0);
    pub const CPU: DeviceType = DeviceType(1 << 1);
    pub const GPU: DeviceType = DeviceType(1 << 2);
    pub const ACCELERATOR: DeviceType = DeviceType(1 << 3);
    pub const CUSTOM: DeviceType = DeviceType(1 << 4);
    pub const ALL: DeviceType = DeviceType(0xFFFF_FFFF);

    /// Whether any bit is shared with `other`.
    pub fn intersects(self, other: DeviceType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

impl BitOr for DeviceType {
    type Output = DeviceType;

    fn bitor(self, rhs: DeviceType) -> DeviceType {
        DeviceType(self.0 | rhs.0)
    }
}

impl BitAnd for DeviceType {
    type Output = DeviceType;

    fn bitand(self, rhs: DeviceType) -> DeviceType {
        DeviceType(self.0 & rhs.0)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == DeviceType::ALL {
            return write!(f, "All");
        }
        let names = [
            (DeviceType::DEFAULT, "Default"),
            (DeviceType::CPU, "CPU"),
            (DeviceType::GPU, "GPU"),
            (DeviceType::ACCELERATOR, "Accelerator"),
            (DeviceType::CUSTOM, "Custom"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.intersects(*bit))
            .map(|(_, name)| *name)
            .collect();
        if parts.is_empty() {
            write!(f, "Unknown({:#x})", self.0)
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// Requested device class, as chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Cpu,
    Gpu,
}

impl DeviceClass {
    pub fn device_type(self) -> DeviceType {
        match self {
            DeviceClass::Cpu => DeviceType::CPU,
            DeviceClass::Gpu => DeviceType::GPU,
        }
    }
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// Opaque platform handle.
    PlatformId
);
handle!(
    /// Opaque device handle.
    DeviceId
);
handle!(
    /// Opaque context handle.
    ContextId
);
handle!(
    /// Opaque compiled program handle.
    ProgramId
);
handle!(
    /// Opaque kernel entry point handle.
    KernelId
);
handle!(
    /// Opaque command queue handle.
    QueueId
);
handle!(
    /// Opaque memory object handle (image or buffer).
    MemId
);
handle!(
    /// Opaque handle to one enqueued command.
    EventId
);

/// Descriptive attributes of a compute platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub id: PlatformId,
    pub name: String,
    pub vendor: String,
    pub profile: String,
    pub version: String,
    pub extensions: String,
}

/// Global memory cache kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheType {
    None,
    ReadOnly,
    ReadWrite,
}

/// Local memory kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalMemType {
    None,
    Local,
    Global,
}

/// Capability attributes of one device. Read-only after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub profile: String,
    pub version: String,
    pub opencl_c_version: String,
    pub extensions: String,
    pub driver_version: String,
    pub global_mem_size: u64,
    pub global_mem_cacheline_size: u32,
    pub global_mem_cache_type: CacheType,
    pub host_unified_memory: bool,
    pub local_mem_size: u64,
    pub local_mem_type: LocalMemType,
    pub max_compute_units: u32,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: Vec<usize>,
    pub max_work_item_dimensions: u32,
    pub image2d_max_width: usize,
    pub image2d_max_height: usize,
    pub image_support: bool,
    /// Smallest distinguishable profiling tick, in nanoseconds.
    pub profiling_timer_resolution: u64,
    pub available: bool,
}

/// Access flag of a memory object, from the kernel's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Initial contents of a newly created memory object.
#[derive(Debug, Clone, Copy)]
pub enum MemInit<'a> {
    /// Contents are copied from host bytes at creation; the caller keeps
    /// ownership of the host array.
    Host(&'a [u8]),
    /// Zero-filled device allocation.
    Zeroed,
}

/// Channel order of a 2-D image object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrder {
    Rgba,
    Luminance,
}

impl ChannelOrder {
    pub fn channels(self) -> usize {
        match self {
            ChannelOrder::Rgba => 4,
            ChannelOrder::Luminance => 1,
        }
    }
}

/// Per-channel data type of a 2-D image object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// 8-bit unsigned, normalized to [0, 1] when sampled.
    UnormInt8,
}

/// Geometry and pixel format of a 2-D image object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDesc {
    pub width: usize,
    pub height: usize,
    pub order: ChannelOrder,
    pub data_type: ChannelType,
}

impl ImageDesc {
    pub fn rgba8(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            order: ChannelOrder::Rgba,
            data_type: ChannelType::UnormInt8,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self.data_type {
            ChannelType::UnormInt8 => self.order.channels(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width * self.height * self.bytes_per_pixel()
    }
}

/// A value bound to a kernel argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Mem(MemId),
    Int(i32),
}

/// In-memory layout of host pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Packed 8-bit RGBA.
    Rgba8,
    /// Single-channel 8-bit grayscale.
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgba8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }

    /// Image channel order of a 2-D image holding this layout.
    pub fn channel_order(self) -> ChannelOrder {
        match self {
            PixelLayout::Rgba8 => ChannelOrder::Rgba,
            PixelLayout::Gray8 => ChannelOrder::Luminance,
        }
    }
}

/// Borrowed view of a decoded host image.
#[derive(Debug, Clone, Copy)]
pub struct HostPixels<'a> {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub bytes: &'a [u8],
}

impl<'a> HostPixels<'a> {
    /// Borrow the pixel bytes of a decoded image.
    ///
    /// Only packed RGBA8 and 8-bit grayscale can be marshaled into device
    /// memory; `path` names the dispatch path for the error message.
    pub fn from_image(image: &'a DynamicImage, path: &str) -> ComputeResult<Self> {
        let (layout, bytes): (PixelLayout, &[u8]) = match image {
            DynamicImage::ImageRgba8(buf) => (PixelLayout::Rgba8, buf.as_raw()),
            DynamicImage::ImageLuma8(buf) => (PixelLayout::Gray8, buf.as_raw()),
            other => {
                return Err(ComputeError::UnsupportedPixelFormat {
                    path: path.to_string(),
                    format: format!("{:?}", other.color()),
                })
            }
        };
        Ok(Self {
            width: image.width(),
            height: image.height(),
            layout,
            bytes,
        })
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.channels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage, RgbaImage};

    #[test]
    fn test_device_type_intersects() {
        let both = DeviceType::CPU | DeviceType::GPU;
        assert!(both.intersects(DeviceType::GPU));
        assert!(!DeviceType::CPU.intersects(DeviceType::GPU));
        assert!(DeviceType::ALL.intersects(DeviceType::ACCELERATOR));
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(DeviceType::GPU.to_string(), "GPU");
        assert_eq!((DeviceType::CPU | DeviceType::GPU).to_string(), "CPU|GPU");
        assert_eq!(DeviceType::ALL.to_string(), "All");
        assert_eq!(DeviceType(1 << 20).to_string(), "Unknown(0x100000)");
    }

    #[test]
    fn test_host_pixels_rgba_and_gray() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(3, 2));
        let px = HostPixels::from_image(&rgba, "buffer").unwrap();
        assert_eq!(px.layout, PixelLayout::Rgba8);
        assert_eq!(px.bytes.len(), 24);
        assert_eq!(px.stride(), 12);

        let gray = DynamicImage::ImageLuma8(GrayImage::new(3, 2));
        let px = HostPixels::from_image(&gray, "buffer").unwrap();
        assert_eq!(px.layout, PixelLayout::Gray8);
        assert_eq!(px.bytes.len(), 6);
    }

    #[test]
    fn test_host_pixels_rejects_rgb() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        let err = HostPixels::from_image(&rgb, "buffer").unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedPixelFormat { .. }));
        assert!(err.to_string().contains("Rgb8"));
    }

    #[test]
    fn test_image_desc_byte_len() {
        assert_eq!(ImageDesc::rgba8(4, 4).byte_len(), 64);
        let gray = ImageDesc {
            width: 4,
            height: 2,
            order: ChannelOrder::Luminance,
            data_type: ChannelType::UnormInt8,
        };
        assert_eq!(gray.byte_len(), 8);
    }
}
