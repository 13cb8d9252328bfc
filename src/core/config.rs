//! Dispatch configuration.
//!
//! Values come from an optional TOML file; command-line flags are applied on
//! top by the binary.

use crate::core::error::EdgeclResult;
use crate::core::types::DeviceClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output format of the capability report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Caller-supplied configuration for one edge-detection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Preferred device class. Falls back to the first device if no device
    /// of this class exists.
    pub device_class: DeviceClass,
    /// Use flat buffers even when the device supports image objects.
    pub force_buffer: bool,
    /// Index into the enumerated platform list.
    pub platform_index: usize,
    /// Kernel source file. `None` uses the bundled kernel.
    pub kernel_path: Option<PathBuf>,
    pub report_format: ReportFormat,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::Cpu,
            force_buffer: false,
            platform_index: 0,
            kernel_path: None,
            report_format: ReportFormat::Text,
        }
    }
}

impl DispatchConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> EdgeclResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> EdgeclResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = class;
        self
    }

    pub fn with_force_buffer(mut self, force: bool) -> Self {
        self.force_buffer = force;
        self
    }

    pub fn with_kernel_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kernel_path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EdgeclError;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = DispatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.device_class, DeviceClass::Cpu);
        assert!(!config.force_buffer);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = DispatchConfig::from_toml_str(
            r#"
            device_class = "gpu"
            force_buffer = true
            platform_index = 1
            kernel_path = "kernels/edgedetect.cl"
            report_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.device_class, DeviceClass::Gpu);
        assert!(config.force_buffer);
        assert_eq!(config.platform_index, 1);
        assert_eq!(config.kernel_path, Some(PathBuf::from("kernels/edgedetect.cl")));
        assert_eq!(config.report_format, ReportFormat::Json);
    }

    #[test]
    fn test_invalid_device_class() {
        let err = DispatchConfig::from_toml_str("device_class = \"fpga\"").unwrap_err();
        assert!(matches!(err, EdgeclError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "force_buffer = true").unwrap();
        let config = DispatchConfig::load(file.path()).unwrap();
        assert!(config.force_buffer);
        assert_eq!(config.device_class, DeviceClass::Cpu);
    }
}
