//! Kernel source artifact.

use crate::core::error::EdgeclResult;
use std::path::Path;

/// Bundled copy of `kernels/edgedetect.cl`.
const BUNDLED_SOURCE: &str = include_str!("../../kernels/edgedetect.cl");

/// Conventional file name of the kernel artifact.
pub const KERNEL_FILE_NAME: &str = "edgedetect.cl";

/// Kernel source text, compiled at run time for the selected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    origin: String,
    text: String,
}

impl KernelSource {
    /// The kernel compiled into this binary.
    pub fn bundled() -> Self {
        Self {
            origin: format!("<bundled {KERNEL_FILE_NAME}>"),
            text: BUNDLED_SOURCE.to_string(),
        }
    }

    /// Read kernel source from disk.
    pub fn from_file(path: impl AsRef<Path>) -> EdgeclResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        log::debug!("loaded kernel source {} ({} bytes)", path.display(), text.len());
        Ok(Self {
            origin: path.display().to_string(),
            text,
        })
    }

    /// `from_file` when a path is given, the bundled kernel otherwise.
    pub fn resolve(path: Option<&Path>) -> EdgeclResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::bundled()),
        }
    }

    pub fn from_text(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }

    /// Where the text came from, for diagnostics.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EdgeclError;
    use std::io::Write;

    #[test]
    fn test_bundled_has_both_entry_points() {
        let source = KernelSource::bundled();
        assert!(source.text().contains("__kernel void edgeDetect("));
        assert!(source.text().contains("__kernel void bufferEdgeDetect("));
        assert!(source.origin().contains(KERNEL_FILE_NAME));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "__kernel void edgeDetect() {{}}").unwrap();
        let source = KernelSource::resolve(Some(file.path())).unwrap();
        assert_eq!(source.text(), "__kernel void edgeDetect() {}");
        assert_eq!(source.origin(), file.path().display().to_string());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = KernelSource::from_file(dir.path().join("missing.cl")).unwrap_err();
        assert!(matches!(err, EdgeclError::Io(_)));
    }
}
