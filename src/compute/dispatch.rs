//! Kernel dispatch: argument binding, launch geometry, enqueue and read-back.

use crate::backend::ComputeBackend;
use crate::compute::strategy::MemoryPath;
use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{ContextId, EventId, HostPixels, KernelId, ProgramId, QueueId};
use image::RgbaImage;
use serde::Serialize;

/// Pixels excluded on every edge; the kernel samples a 3x3 neighbourhood.
pub const BORDER_MARGIN: usize = 1;

/// Global offset and extent of a 2-D launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchGeometry {
    pub offset: [usize; 2],
    pub extent: [usize; 2],
}

impl LaunchGeometry {
    /// Launch covering everything except `margin` pixels on each edge.
    ///
    /// An image too small to leave at least one work-item per dimension is a
    /// kernel argument error; a degenerate launch is never produced.
    pub fn with_margin(width: usize, height: usize, margin: usize) -> ComputeResult<Self> {
        let inner = |len: usize| len.checked_sub(2 * margin).filter(|n| *n > 0);
        match (inner(width), inner(height)) {
            (Some(w), Some(h)) => Ok(Self {
                offset: [margin, margin],
                extent: [w, h],
            }),
            _ => Err(ComputeError::KernelArgument(format!(
                "{width}x{height} image leaves no pixels inside a {margin} pixel margin"
            ))),
        }
    }

    pub fn for_image(width: u32, height: u32) -> ComputeResult<Self> {
        Self::with_margin(width as usize, height as usize, BORDER_MARGIN)
    }

    pub fn work_items(&self) -> usize {
        self.extent[0] * self.extent[1]
    }
}

/// Handle to the kernel's enqueued command.
///
/// Consumed by the profiling reporter, which releases it.
#[must_use = "the kernel event must be handed to the profiling reporter"]
#[derive(Debug, PartialEq, Eq)]
pub struct KernelEvent {
    id: EventId,
}

impl KernelEvent {
    pub(crate) fn new(id: EventId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> EventId {
        self.id
    }
}

/// Result of one dispatch.
#[derive(Debug)]
pub struct DispatchOutput {
    /// Same dimensions as the source; border pixels stay zero.
    pub image: RgbaImage,
    pub event: KernelEvent,
    pub geometry: LaunchGeometry,
    pub kernel: &'static str,
}

/// Run the edge kernel of `path` over `pixels`.
///
/// Every failure is fatal for the dispatch. The kernel and memory objects
/// are released before returning; the kernel event is handed back for
/// profiling.
pub(crate) fn dispatch(
    backend: &mut dyn ComputeBackend,
    context: ContextId,
    program: ProgramId,
    queue: QueueId,
    pixels: &HostPixels<'_>,
    path: MemoryPath,
) -> ComputeResult<DispatchOutput> {
    let (width, height) = (pixels.width, pixels.height);
    let geometry = LaunchGeometry::for_image(width, height)?;

    let kernel_name = path.kernel_name();
    let kernel = backend.create_kernel(program, kernel_name)?;

    let result = launch(backend, kernel, context, queue, pixels, path, geometry);
    backend.release_kernel(kernel);

    let (image, event) = result?;
    Ok(DispatchOutput {
        image,
        event: KernelEvent::new(event),
        geometry,
        kernel: kernel_name,
    })
}

/// Stage, bind, enqueue and read back. Memory objects never outlive the call.
fn launch(
    backend: &mut dyn ComputeBackend,
    kernel: KernelId,
    context: ContextId,
    queue: QueueId,
    pixels: &HostPixels<'_>,
    path: MemoryPath,
    geometry: LaunchGeometry,
) -> ComputeResult<(RgbaImage, EventId)> {
    let (width, height) = (pixels.width, pixels.height);
    let kernel_name = path.kernel_name();
    let objects = path.stage(backend, context, pixels)?;
    let result = (|| -> ComputeResult<(RgbaImage, EventId)> {
        path.bind(backend, kernel, &objects, width)?;
        log::debug!(
            "enqueue {kernel_name}: offset {:?} extent {:?} ({} work-items)",
            geometry.offset,
            geometry.extent,
            geometry.work_items()
        );
        let event = backend.enqueue_kernel(queue, kernel, geometry.offset, geometry.extent, None)?;
        match path.read_back(backend, queue, &objects, width, height) {
            Ok(image) => Ok((image, event)),
            Err(e) => {
                backend.release_event(event);
                Err(e)
            }
        }
    })();
    path.release(backend, &objects);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostBackend, HostDevice, HostPlatform};
    use crate::core::types::DeviceType;
    use image::{DynamicImage, GrayImage, Rgba};
    use proptest::prelude::*;

    #[test]
    fn test_geometry_four_by_four() {
        let g = LaunchGeometry::for_image(4, 4).unwrap();
        assert_eq!(g.offset, [1, 1]);
        assert_eq!(g.extent, [2, 2]);
        assert_eq!(g.work_items(), 4);
    }

    #[test]
    fn test_geometry_too_small() {
        for (w, h) in [(2, 10), (10, 2), (1, 1), (0, 5)] {
            assert!(matches!(
                LaunchGeometry::for_image(w, h),
                Err(ComputeError::KernelArgument(_))
            ));
        }
    }

    proptest! {
        #[test]
        fn prop_geometry_excludes_margin(w in 3u32..4096, h in 3u32..4096) {
            let g = LaunchGeometry::for_image(w, h).unwrap();
            prop_assert_eq!(g.offset, [1, 1]);
            prop_assert_eq!(g.extent, [w as usize - 2, h as usize - 2]);
            prop_assert_eq!(g.offset[0] + g.extent[0] + BORDER_MARGIN, w as usize);
        }

        #[test]
        fn prop_wider_margin(w in 0usize..64, h in 0usize..64, margin in 1usize..5) {
            match LaunchGeometry::with_margin(w, h, margin) {
                Ok(g) => {
                    prop_assert_eq!(g.extent, [w - 2 * margin, h - 2 * margin]);
                    prop_assert!(g.work_items() > 0);
                }
                Err(_) => prop_assert!(w <= 2 * margin || h <= 2 * margin),
            }
        }
    }

    fn ready(backend: &mut HostBackend, options: &str) -> (ContextId, ProgramId, QueueId) {
        let platform = backend.platforms().unwrap()[0].id;
        let device = backend.devices(platform, DeviceType::ALL).unwrap()[0].id;
        let context = backend.create_context(device).unwrap();
        let source = crate::compute::KernelSource::bundled();
        let program = backend
            .build_program(context, device, source.text(), options)
            .unwrap();
        let queue = backend.create_queue(context, device, true).unwrap();
        (context, program, queue)
    }

    #[test]
    fn test_gray_buffer_dispatch_finds_edge() {
        let mut backend = HostBackend::new();
        let (context, program, queue) = ready(&mut backend, "-DSRC_CHANNELS=1");
        // Left half black, right half white.
        let gray = GrayImage::from_fn(6, 5, |x, _| image::Luma([if x < 3 { 0 } else { 255 }]));
        let image = DynamicImage::ImageLuma8(gray);
        let pixels = HostPixels::from_image(&image, "buffer").unwrap();

        let out = dispatch(&mut backend, context, program, queue, &pixels, MemoryPath::Buffer).unwrap();
        assert_eq!(out.kernel, "bufferEdgeDetect");
        assert_eq!(out.image.dimensions(), (6, 5));
        // Columns 2 and 3 straddle the edge; column 1 sees a flat field.
        assert_eq!(*out.image.get_pixel(2, 2), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.image.get_pixel(3, 2), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.image.get_pixel(1, 2), Rgba([0, 0, 0, 255]));
        assert_eq!(*out.image.get_pixel(0, 2), Rgba([0, 0, 0, 0]));
        assert_eq!(backend.live_mem_count(), 0);
        assert_eq!(backend.live_objects().kernels, 0);
        let _ = out.event;
    }

    #[test]
    fn test_too_small_fails_before_enqueue() {
        let mut backend = HostBackend::new();
        let (context, program, queue) = ready(&mut backend, "");
        let image = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));
        let pixels = HostPixels::from_image(&image, "image").unwrap();
        let err = dispatch(&mut backend, context, program, queue, &pixels, MemoryPath::Image).unwrap_err();
        assert!(matches!(err, ComputeError::KernelArgument(_)));
        assert!(backend.launches().is_empty());
        assert_eq!(backend.live_mem_count(), 0);
    }

    #[test]
    fn test_staging_failure_releases_kernel() {
        let mut backend = HostBackend::with_platforms(vec![HostPlatform::new("p")
            .with_device(HostDevice::cpu("plain").without_image_support())]);
        let (context, program, queue) = ready(&mut backend, "");
        let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let pixels = HostPixels::from_image(&image, "image").unwrap();
        let err = dispatch(&mut backend, context, program, queue, &pixels, MemoryPath::Image).unwrap_err();
        assert!(matches!(err, ComputeError::MemoryObject(_)));
        let live = backend.live_objects();
        assert_eq!((live.kernels, live.mems, live.events), (0, 0, 0));
        assert_eq!(live.programs, 1);
    }
}
