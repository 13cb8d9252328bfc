//! One-shot edge detection over a compute backend.

use crate::backend::ComputeBackend;
use crate::compute::dispatch::LaunchGeometry;
use crate::compute::inventory::CapabilityInventory;
use crate::compute::profiling::ProfilingReport;
use crate::compute::session::ComputeSession;
use crate::compute::source::KernelSource;
use crate::compute::strategy::{BufferReason, MemoryPath};
use crate::core::config::{DispatchConfig, ReportFormat};
use crate::core::error::{ComputeResult, EdgeclResult};
use crate::core::types::{DeviceInfo, DeviceType, HostPixels};
use image::{DynamicImage, RgbaImage};

/// Everything a run produced.
#[derive(Debug)]
pub struct EdgeDetection {
    /// Edge magnitudes, same size as the input. The 1-pixel border is zero.
    pub image: RgbaImage,
    pub profile: ProfilingReport,
    pub path: MemoryPath,
    pub reason: Option<BufferReason>,
    pub device: DeviceInfo,
    pub geometry: LaunchGeometry,
}

/// Runs the edge kernel on images using a configured backend.
///
/// # Example
///
/// ```rust,ignore
/// use edgecl::prelude::*;
///
/// let mut detector = EdgeDetector::new(HostBackend::new(), DispatchConfig::default())?;
/// let result = detector.run(&image::open("in.png")?)?;
/// println!("{}", result.profile);
/// ```
#[derive(Debug)]
pub struct EdgeDetector<B: ComputeBackend> {
    backend: B,
    config: DispatchConfig,
    source: KernelSource,
}

impl<B: ComputeBackend> EdgeDetector<B> {
    /// Create a detector, loading the kernel source named by `config`.
    pub fn new(backend: B, config: DispatchConfig) -> EdgeclResult<Self> {
        let source = KernelSource::resolve(config.kernel_path.as_deref())?;
        Ok(Self::with_source(backend, config, source))
    }

    pub fn with_source(backend: B, config: DispatchConfig, source: KernelSource) -> Self {
        Self {
            backend,
            config,
            source,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Snapshot of every platform and device of the backend.
    pub fn inventory(&mut self) -> ComputeResult<CapabilityInventory> {
        CapabilityInventory::discover(&mut self.backend, DeviceType::ALL)
    }

    /// Detect edges in `image`.
    ///
    /// The input must be 8-bit RGBA or 8-bit grayscale.
    pub fn run(&mut self, image: &DynamicImage) -> ComputeResult<EdgeDetection> {
        let inventory = self.inventory()?;
        match self.config.report_format {
            ReportFormat::Text => inventory.log_report(),
            ReportFormat::Json => match inventory.to_json() {
                Ok(json) => log::info!("{json}"),
                Err(e) => log::warn!("could not serialize device report: {e}"),
            },
        }

        let mut session = ComputeSession::new(&mut self.backend);
        let device = session
            .select_device(
                &inventory,
                self.config.platform_index,
                self.config.device_class.device_type(),
            )?
            .clone();
        let decision = MemoryPath::select(&device, self.config.force_buffer);
        log::info!("Using {} path", decision.path);

        session.create_context()?;
        let pixels = HostPixels::from_image(image, decision.path.name())?;
        session.build_program(&self.source, &decision.path.build_options(pixels.layout))?;
        session.create_queue()?;

        let output = session.dispatch(&pixels, decision.path)?;
        let profile = session.profile(output.event)?;

        Ok(EdgeDetection {
            image: output.image,
            profile,
            path: decision.path,
            reason: decision.reason,
            device,
            geometry: output.geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostBackend, HostDevice, HostPlatform, LiveObjects};
    use crate::core::error::ComputeError;
    use crate::test_support::capture_logs;
    use crate::core::types::{DeviceClass, KernelArg};
    use image::{Luma, Rgb, RgbImage, Rgba};
    use proptest::prelude::*;

    fn detector(platforms: Vec<HostPlatform>, config: DispatchConfig) -> EdgeDetector<HostBackend> {
        EdgeDetector::new(HostBackend::with_platforms(platforms), config).unwrap()
    }

    fn checkerboard(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        }))
    }

    fn assert_border_zero(image: &RgbaImage) {
        let (w, h) = image.dimensions();
        for (x, y, px) in image.enumerate_pixels() {
            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                assert_eq!(*px, Rgba([0, 0, 0, 0]), "border pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn test_image_path_four_by_four() {
        let mut d = EdgeDetector::new(HostBackend::new(), DispatchConfig::default()).unwrap();
        let result = d.run(&checkerboard(4, 4)).unwrap();

        assert_eq!(result.path, MemoryPath::Image);
        assert_eq!(result.reason, None);
        assert_eq!(result.image.dimensions(), (4, 4));
        assert_eq!(result.geometry.offset, [1, 1]);
        assert_eq!(result.geometry.extent, [2, 2]);
        assert_border_zero(&result.image);

        let launch = &d.backend().launches()[0];
        assert_eq!(launch.kernel, "edgeDetect");
        assert_eq!(launch.offset, [1, 1]);
        assert_eq!(launch.global, [2, 2]);
        assert_eq!(launch.local, None);
        assert_eq!(launch.args.len(), 2);
        assert_eq!(d.backend().live_mem_count(), 0);
    }

    #[test]
    fn test_forced_buffer_path() {
        let config = DispatchConfig::default().with_force_buffer(true);
        let mut d = EdgeDetector::new(HostBackend::new(), config).unwrap();
        let result = d.run(&checkerboard(4, 4)).unwrap();

        assert_eq!(result.path, MemoryPath::Buffer);
        assert_eq!(result.reason, Some(BufferReason::Forced));
        assert_border_zero(&result.image);

        let launch = &d.backend().launches()[0];
        assert_eq!(launch.kernel, "bufferEdgeDetect");
        assert_eq!(launch.args[2], KernelArg::Int(4));
        assert_eq!(launch.build_options, "-DSRC_CHANNELS=4");
    }

    #[test]
    fn test_no_image_support_falls_back_to_buffers() {
        let mut d = detector(
            vec![HostPlatform::new("p").with_device(HostDevice::cpu("plain").without_image_support())],
            DispatchConfig::default(),
        );
        let result = d.run(&checkerboard(6, 6)).unwrap();
        assert_eq!(result.path, MemoryPath::Buffer);
        assert_eq!(result.reason, Some(BufferReason::NoImageSupport));
        assert_eq!(d.backend().launches()[0].kernel, "bufferEdgeDetect");
    }

    fn no_image_warnings(records: &[(log::Level, String)]) -> usize {
        records
            .iter()
            .filter(|(level, msg)| {
                *level == log::Level::Warn && msg.starts_with("No image support on device")
            })
            .count()
    }

    #[test]
    fn test_no_image_support_warns_once() {
        let mut d = detector(
            vec![HostPlatform::new("p").with_device(HostDevice::cpu("plain").without_image_support())],
            DispatchConfig::default(),
        );
        let (result, records) = capture_logs(|| d.run(&checkerboard(6, 6)));
        assert_eq!(result.unwrap().path, MemoryPath::Buffer);
        assert_eq!(no_image_warnings(&records), 1);
        assert!(records
            .iter()
            .any(|(_, msg)| msg == "No image support on device plain"));
    }

    #[test]
    fn test_forced_buffer_does_not_warn() {
        let mut d = detector(
            vec![HostPlatform::new("p").with_device(HostDevice::cpu("plain").without_image_support())],
            DispatchConfig::default().with_force_buffer(true),
        );
        let (result, records) = capture_logs(|| d.run(&checkerboard(6, 6)));
        assert_eq!(result.unwrap().reason, Some(BufferReason::Forced));
        assert_eq!(no_image_warnings(&records), 0);
    }

    #[test]
    fn test_image_path_does_not_warn() {
        let mut d = EdgeDetector::new(HostBackend::new(), DispatchConfig::default()).unwrap();
        let (result, records) = capture_logs(|| d.run(&checkerboard(6, 6)));
        assert_eq!(result.unwrap().path, MemoryPath::Image);
        assert_eq!(no_image_warnings(&records), 0);
    }

    #[test]
    fn test_repeated_runs_release_everything() {
        let mut d = EdgeDetector::new(HostBackend::new(), DispatchConfig::default()).unwrap();
        let input = checkerboard(8, 8);
        for _ in 0..3 {
            d.run(&input).unwrap();
        }
        assert_eq!(d.backend().launches().len(), 3);
        assert_eq!(d.backend().live_objects(), LiveObjects::default());
    }

    #[test]
    fn test_failed_runs_release_everything() {
        let source = KernelSource::from_text("broken.cl", "#error does not compile\n");
        let mut d = EdgeDetector::with_source(HostBackend::new(), DispatchConfig::default(), source);
        assert!(d.run(&checkerboard(8, 8)).is_err());

        let mut tiny = EdgeDetector::new(HostBackend::new(), DispatchConfig::default()).unwrap();
        assert!(tiny.run(&checkerboard(2, 2)).is_err());

        assert_eq!(d.backend().live_objects(), LiveObjects::default());
        assert_eq!(tiny.backend().live_objects(), LiveObjects::default());
    }

    #[test]
    fn test_no_platforms_is_setup_failure() {
        let mut d = detector(Vec::new(), DispatchConfig::default());
        let err = d.run(&checkerboard(4, 4)).unwrap_err();
        assert!(matches!(err, ComputeError::Discovery(_)));
        assert!(err.is_setup_failure());
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_gpu_request_with_only_cpus() {
        let config = DispatchConfig::default().with_device_class(DeviceClass::Gpu);
        let mut d = detector(
            vec![HostPlatform::new("p")
                .with_device(HostDevice::cpu("cpu0"))
                .with_device(HostDevice::cpu("cpu1"))],
            config,
        );
        let result = d.run(&checkerboard(4, 4)).unwrap();
        assert_eq!(result.device.name, "cpu0");
    }

    #[test]
    fn test_gpu_selected_when_present() {
        let config = DispatchConfig::default().with_device_class(DeviceClass::Gpu);
        let mut d = detector(
            vec![HostPlatform::new("p")
                .with_device(HostDevice::cpu("cpu0"))
                .with_device(HostDevice::gpu("gpu0"))],
            config,
        );
        let result = d.run(&checkerboard(4, 4)).unwrap();
        assert_eq!(result.device.name, "gpu0");
    }

    #[test]
    fn test_platform_index_selects_platform() {
        let config = DispatchConfig {
            platform_index: 1,
            ..DispatchConfig::default()
        };
        let mut d = detector(
            vec![
                HostPlatform::new("a").with_device(HostDevice::cpu("a0")),
                HostPlatform::new("b").with_device(HostDevice::cpu("b0")),
            ],
            config,
        );
        assert_eq!(d.run(&checkerboard(4, 4)).unwrap().device.name, "b0");
    }

    #[test]
    fn test_rgb_input_rejected_on_both_paths() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])));
        for force in [false, true] {
            let config = DispatchConfig::default().with_force_buffer(force);
            let mut d = EdgeDetector::new(HostBackend::new(), config).unwrap();
            let err = d.run(&rgb).unwrap_err();
            assert!(matches!(err, ComputeError::UnsupportedPixelFormat { .. }));
            assert!(d.backend().launches().is_empty());
        }
    }

    #[test]
    fn test_grayscale_on_both_paths_agree() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_fn(8, 6, |x, _| {
            Luma([if x < 4 { 10 } else { 240 }])
        }));
        let mut image_path = EdgeDetector::new(HostBackend::new(), DispatchConfig::default()).unwrap();
        let mut buffer_path = EdgeDetector::new(
            HostBackend::new(),
            DispatchConfig::default().with_force_buffer(true),
        )
        .unwrap();
        let a = image_path.run(&gray).unwrap();
        let b = buffer_path.run(&gray).unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(buffer_path.backend().launches()[0].build_options, "-DSRC_CHANNELS=1");
    }

    #[test]
    fn test_tiny_image_is_argument_error() {
        let mut d = EdgeDetector::new(HostBackend::new(), DispatchConfig::default()).unwrap();
        let err = d.run(&checkerboard(2, 2)).unwrap_err();
        assert!(matches!(err, ComputeError::KernelArgument(_)));
    }

    #[test]
    fn test_broken_kernel_source() {
        let source = KernelSource::from_text("broken.cl", "#error does not compile\n");
        let mut d = EdgeDetector::with_source(HostBackend::new(), DispatchConfig::default(), source);
        let err = d.run(&checkerboard(4, 4)).unwrap_err();
        assert!(matches!(err, ComputeError::ProgramBuild { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_border_always_zero(w in 3u32..24, h in 3u32..24, seed in any::<u8>(), force in any::<bool>()) {
            let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
                let v = (x as u8).wrapping_mul(31) ^ (y as u8).wrapping_mul(17) ^ seed;
                Rgba([v, v.wrapping_add(40), v.wrapping_mul(3), 255])
            }));
            let config = DispatchConfig::default().with_force_buffer(force);
            let mut d = EdgeDetector::new(HostBackend::new(), config).unwrap();
            let result = d.run(&img).unwrap();
            prop_assert_eq!(result.image.dimensions(), (w, h));
            for (x, y, px) in result.image.enumerate_pixels() {
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    prop_assert_eq!(*px, Rgba([0, 0, 0, 0]));
                } else {
                    prop_assert_eq!(px.0[3], 255);
                }
            }
        }
    }
}
