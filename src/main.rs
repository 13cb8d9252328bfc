//! edgecl CLI - Sobel edge detection on a compute device
//!
//! Loads an image, runs the edge kernel on the selected device and writes the
//! result, printing the kernel's device-side execution time.

use anyhow::{bail, Context, Result};
use edgecl::prelude::*;
use image::ImageFormat;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Host,
    OpenCl,
}

#[derive(Debug)]
struct Options {
    src: PathBuf,
    dst: PathBuf,
    config: Option<PathBuf>,
    kernel: Option<PathBuf>,
    gpu: bool,
    buffer: bool,
    platform: Option<usize>,
    json_report: bool,
    backend: BackendKind,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("edgecl");

    if args.iter().skip(1).any(|a| a == "--help" || a == "-h") {
        print_usage(program);
        return;
    }

    let options = match parse_args(&args[1..]) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            print_usage(program);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&options) {
        eprintln!("Error: {e:#}");
        let setup = e
            .downcast_ref::<ComputeError>()
            .is_some_and(ComputeError::is_setup_failure);
        if setup && options.backend == BackendKind::OpenCl {
            eprintln!("Hint: check the OpenCL driver installation, or run with --backend host");
        }
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("Usage: {} --src <image> [options]", program);
    println!();
    println!("Options:");
    println!("  --src <path>        Input image (required)");
    println!("  --dst <path>        Output image (default: out.png)");
    println!("  --gpu               Prefer a GPU device (default: CPU)");
    println!("  --buffer            Use buffers even if the device supports images");
    println!("  --platform <n>      Platform index (default: 0)");
    println!("  --kernel <path>     Kernel source file (default: bundled)");
    println!("  --config <path>     TOML configuration file");
    println!("  --json-report       Log the device report as JSON");
    println!("  --backend <name>    host or opencl (default: opencl when built in)");
    println!("  --help              Show this help message");
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        src: PathBuf::new(),
        dst: PathBuf::from("out.png"),
        config: None,
        kernel: None,
        gpu: false,
        buffer: false,
        platform: None,
        json_report: false,
        backend: default_backend(),
    };
    let mut src = None;

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--src", Some(v)) => {
                src = Some(PathBuf::from(v));
                i += 2;
            }
            ("--dst", Some(v)) => {
                options.dst = PathBuf::from(v);
                i += 2;
            }
            ("--config", Some(v)) => {
                options.config = Some(PathBuf::from(v));
                i += 2;
            }
            ("--kernel", Some(v)) => {
                options.kernel = Some(PathBuf::from(v));
                i += 2;
            }
            ("--platform", Some(v)) => {
                let index = v
                    .parse()
                    .with_context(|| format!("invalid platform index '{v}'"))?;
                options.platform = Some(index);
                i += 2;
            }
            ("--backend", Some(v)) => {
                options.backend = match v.as_str() {
                    "host" => BackendKind::Host,
                    "opencl" => BackendKind::OpenCl,
                    other => bail!("unknown backend '{other}'"),
                };
                i += 2;
            }
            ("--gpu", _) => {
                options.gpu = true;
                i += 1;
            }
            ("--buffer", _) => {
                options.buffer = true;
                i += 1;
            }
            ("--json-report", _) => {
                options.json_report = true;
                i += 1;
            }
            (flag, _) => bail!("unknown or incomplete option '{flag}'"),
        }
    }

    options.src = src.context("--src is required")?;
    Ok(options)
}

fn default_backend() -> BackendKind {
    if cfg!(feature = "opencl") {
        BackendKind::OpenCl
    } else {
        BackendKind::Host
    }
}

/// File config first, then command-line flags on top.
fn build_config(options: &Options) -> Result<DispatchConfig> {
    let mut config = match &options.config {
        Some(path) => DispatchConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DispatchConfig::default(),
    };
    if options.gpu {
        config.device_class = DeviceClass::Gpu;
    }
    if options.buffer {
        config.force_buffer = true;
    }
    if let Some(index) = options.platform {
        config.platform_index = index;
    }
    if let Some(kernel) = &options.kernel {
        config.kernel_path = Some(kernel.clone());
    }
    if options.json_report {
        config.report_format = ReportFormat::Json;
    }
    Ok(config)
}

fn run(options: &Options) -> Result<()> {
    let config = build_config(options)?;

    let decoded = image::open(&options.src)
        .with_context(|| format!("failed to read image {}", options.src.display()))?;
    let input = if matches!(decoded, DynamicImage::ImageRgba8(_) | DynamicImage::ImageLuma8(_)) {
        decoded
    } else {
        log::debug!("converting {:?} input to RGBA8", decoded.color());
        DynamicImage::ImageRgba8(decoded.into_rgba8())
    };
    log::info!(
        "Loaded {} ({}x{})",
        options.src.display(),
        input.width(),
        input.height()
    );

    let result = match options.backend {
        BackendKind::Host => detect(HostBackend::new(), config, &input)?,
        BackendKind::OpenCl => detect(opencl_backend()?, config, &input)?,
    };

    save(&result.image, &options.dst)?;
    println!("{}", result.profile);
    Ok(())
}

fn detect<B: ComputeBackend>(
    backend: B,
    config: DispatchConfig,
    input: &DynamicImage,
) -> Result<EdgeDetection> {
    let mut detector = EdgeDetector::new(backend, config)?;
    Ok(detector.run(input)?)
}

#[cfg(feature = "opencl")]
fn opencl_backend() -> Result<edgecl::backend::OpenClBackend> {
    Ok(edgecl::backend::OpenClBackend::new())
}

#[cfg(not(feature = "opencl"))]
fn opencl_backend() -> Result<HostBackend> {
    bail!("edgecl was built without the `opencl` feature; use --backend host")
}

fn save(image: &image::RgbaImage, path: &Path) -> Result<()> {
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpeg") || e.eq_ignore_ascii_case("jpg"));
    let written = if is_jpeg {
        DynamicImage::ImageRgba8(image.clone())
            .into_rgb8()
            .save_with_format(path, ImageFormat::Jpeg)
    } else {
        image.save_with_format(path, ImageFormat::Png)
    };
    written.with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
