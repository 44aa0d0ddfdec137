//! Raw binary images.

use crate::error::{Error, Result};
use crate::protocol::srec;
use log::debug;
use std::fs;
use std::path::Path;

/// A binary image and the name it was loaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    name: Option<String>,
    bytes: Vec<u8>,
}

impl BinaryImage {
    /// Read an image from disk.
    ///
    /// A missing or unreadable file is reported as [`Error::MissingInput`]
    /// naming the path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let bytes = fs::read(path).map_err(|source| Error::MissingInput {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            bytes,
        })
    }

    /// Wrap bytes that have no file name.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: None,
            bytes: bytes.into(),
        }
    }

    /// Set the source name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Source file name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Image contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the image already is S-record text.
    pub fn is_srec(&self) -> bool {
        srec::is_pre_encoded(&self.bytes)
    }

    /// S0 module name derived from the source name.
    pub fn module_name(&self) -> String {
        srec::module_name(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file_keeps_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u-boot.bin");
        fs::File::create(&path)
            .unwrap()
            .write_all(&[1, 2, 3, 4])
            .unwrap();

        let image = BinaryImage::from_file(&path).unwrap();
        assert_eq!(image.name(), Some("u-boot.bin"));
        assert_eq!(image.bytes(), &[1, 2, 3, 4]);
        assert_eq!(image.module_name(), "u-boot.srec");
        assert!(!image.is_srec());
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");

        match BinaryImage::from_file(&path) {
            Err(Error::MissingInput { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected MissingInput, got {other:?}"),
        }
    }

    #[test]
    fn test_from_bytes_uses_placeholder_name() {
        let image = BinaryImage::from_bytes(vec![0u8; 8]);
        assert_eq!(image.name(), None);
        assert_eq!(image.len(), 8);
        assert_eq!(image.module_name(), "ublDaVinci.srec");

        let named = image.with_name("app.srec");
        assert_eq!(named.module_name(), "app.srec");
    }

    #[test]
    fn test_detects_srec_input() {
        let image = BinaryImage::from_bytes(b"S0030000FC\nS7058108000071\n".to_vec());
        assert!(image.is_srec());
    }
}
