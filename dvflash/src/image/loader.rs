//! Loader images.
//!
//! The same UART loader image serves as first-stage loader (sent to the boot
//! ROM) and, for flash burns, as the second-stage loader written to flash.
//! One image exists per flash family.
//!
//! Loader images start with a 256-byte self-relocation stub that the boot ROM
//! transfer does not carry.

use crate::error::{Error, Result};
use crate::image::BinaryImage;
use crate::protocol::crc::Crc32;
use crate::protocol::srec::RELOCATION_STUB_LEN;
use crate::target::plan::FlashType;
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::fmt::Write as _;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Provides the loader image for a flash family.
pub trait LoaderSource {
    /// Return the loader image for `flash`, or [`Error::LoaderNotFound`].
    fn loader_image(&self, flash: FlashType) -> Result<BinaryImage>;
}

/// Loader images stored as files in one directory.
///
/// The directory holds `ubl_davinci_nor.bin` and `ubl_davinci_nand.bin`.
#[derive(Debug, Clone)]
pub struct LoaderDirectory {
    dir: PathBuf,
}

impl LoaderDirectory {
    /// Look up loaders in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory searched.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the loader for `flash`.
    pub fn path_for(&self, flash: FlashType) -> PathBuf {
        self.dir.join(flash.loader_file_name())
    }
}

impl LoaderSource for LoaderDirectory {
    fn loader_image(&self, flash: FlashType) -> Result<BinaryImage> {
        let path = self.path_for(flash);
        if !path.is_file() {
            return Err(Error::LoaderNotFound(flash));
        }

        debug!("Using {flash} loader: {}", path.display());
        let bytes = fs::read(&path).map_err(|source| Error::MissingInput { path, source })?;

        // Embedded loaders carry no module name of their own
        Ok(BinaryImage::from_bytes(bytes))
    }
}

/// First-stage loader prepared for the boot ROM.
#[derive(Debug, Clone)]
pub struct FirstStageLoader {
    bytes: Vec<u8>,
    crc: u32,
    length: u16,
}

impl FirstStageLoader {
    /// Strip the relocation stub and checksum the rest with `crc`.
    ///
    /// The remaining length must be a non-zero multiple of four and fit the
    /// four-digit length field of the boot header.
    pub fn new(image: &BinaryImage, crc: &Crc32) -> Result<Self> {
        let bytes = image
            .bytes()
            .get(RELOCATION_STUB_LEN..)
            .filter(|body| !body.is_empty())
            .ok_or_else(|| {
                Error::InvalidImage(format!(
                    "loader is {} bytes, expected more than {RELOCATION_STUB_LEN}",
                    image.len()
                ))
            })?
            .to_vec();

        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidImage(format!(
                "loader length {} is not a multiple of 4",
                bytes.len()
            )));
        }

        let length = u16::try_from(bytes.len()).map_err(|_| Error::FieldOverflow {
            field: "loader length",
            value: bytes.len() as u64,
            digits: 4,
        })?;

        let crc = crc.checksum(&bytes);
        debug!("First-stage loader: {length} bytes, CRC {crc:08X}");

        Ok(Self { bytes, crc, length })
    }

    /// Loader bytes without the relocation stub.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Loader-integrity CRC of [`Self::bytes`].
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Length in bytes.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Loader as the boot ROM reads it: each little-endian 32-bit word as
    /// eight upper-case hex digits.
    pub fn word_hex(&self) -> Result<String> {
        let mut out = String::with_capacity(self.bytes.len() * 2);
        let mut cursor = Cursor::new(&self.bytes);
        for _ in 0..self.bytes.len() / 4 {
            let word = cursor.read_u32::<LittleEndian>()?;
            // Writing to a String cannot fail
            let _ = write!(out, "{word:08X}");
        }
        Ok(out)
    }
}

/// Loader images held in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryLoaders(std::collections::HashMap<FlashType, Vec<u8>>);

#[cfg(test)]
impl MemoryLoaders {
    pub(crate) fn with(mut self, flash: FlashType, bytes: Vec<u8>) -> Self {
        self.0.insert(flash, bytes);
        self
    }
}

#[cfg(test)]
impl LoaderSource for MemoryLoaders {
    fn loader_image(&self, flash: FlashType) -> Result<BinaryImage> {
        self.0
            .get(&flash)
            .map(|b| BinaryImage::from_bytes(b.clone()))
            .ok_or(Error::LoaderNotFound(flash))
    }
}
