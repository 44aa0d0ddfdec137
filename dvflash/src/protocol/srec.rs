//! Motorola S-record encoding of binary images.
//!
//! The UART loader only accepts application and flash-loader images as
//! S-records. Binary input is framed as:
//!
//! ```text
//! S0 <len> 0000     <module name>  <sum>    header
//! S3 <len> <addr32> <16 data bytes> <sum>   data, repeated
//! S3 <len> <addr32> <1..15 bytes>  <sum>    remainder, if any
//! S7 05    <entry32>               <sum>    termination
//! ```
//!
//! `len` counts the address, payload and checksum bytes. `sum` is the one's
//! complement of the low byte of the sum of every byte after the type.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::{Error, Result};

/// Data bytes carried by a full S3 record.
pub const DATA_RECORD_LEN: usize = 16;

/// Bytes of self-relocation code at the start of some loader images.
pub const RELOCATION_STUB_LEN: usize = 256;

/// Maximum length of the S0 module name.
pub const MODULE_NAME_MAX: usize = 20;

/// Source name used when an image has no file name.
pub const DEFAULT_SOURCE_NAME: &str = "ublDaVinci.bin";

/// How a payload is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PayloadEncoding {
    /// S-records (passed through if the input already is one).
    #[default]
    SRecord,
    /// Bytes verbatim.
    Raw,
}

/// S-record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// S0 header with module name.
    Header,
    /// S3 data with 32-bit address.
    Data,
    /// S7 termination with 32-bit entry point.
    Termination,
}

impl RecordKind {
    /// Type tag as written on the line.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Header => "S0",
            Self::Data => "S3",
            Self::Termination => "S7",
        }
    }

    /// Width of the address field in bytes.
    pub fn address_len(self) -> usize {
        match self {
            Self::Header => 2,
            Self::Data | Self::Termination => 4,
        }
    }
}

/// One S-record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    kind: RecordKind,
    address: u32,
    payload: Vec<u8>,
}

impl Record {
    /// Header record carrying `name` at address zero.
    ///
    /// Names longer than [`MODULE_NAME_MAX`] bytes are truncated.
    pub fn header(name: &str) -> Self {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MODULE_NAME_MAX);
        Self {
            kind: RecordKind::Header,
            address: 0,
            payload: bytes[..len].to_vec(),
        }
    }

    /// Data record carrying at most [`DATA_RECORD_LEN`] bytes.
    pub fn data(address: u32, data: &[u8]) -> Result<Self> {
        if data.len() > DATA_RECORD_LEN {
            return Err(Error::InvalidImage(format!(
                "data record holds at most {DATA_RECORD_LEN} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self::data_chunk(address, data))
    }

    fn data_chunk(address: u32, data: &[u8]) -> Self {
        Self {
            kind: RecordKind::Data,
            address,
            payload: data.to_vec(),
        }
    }

    /// Termination record with the execution entry point.
    pub fn termination(entry: u32) -> Self {
        Self {
            kind: RecordKind::Termination,
            address: entry,
            payload: Vec::new(),
        }
    }

    /// Record type.
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Address field.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Byte count field: address + payload + checksum.
    #[allow(clippy::cast_possible_truncation)]
    pub fn byte_count(&self) -> u8 {
        // Payloads are at most 20 bytes, so this always fits
        (self.kind.address_len() + self.payload.len() + 1) as u8
    }

    fn address_bytes(&self) -> Vec<u8> {
        let bytes = self.address.to_be_bytes();
        bytes[4 - self.kind.address_len()..].to_vec()
    }

    /// One's complement of the byte sum of count, address and payload.
    pub fn checksum(&self) -> u8 {
        let sum = self
            .address_bytes()
            .iter()
            .chain(&self.payload)
            .fold(self.byte_count(), |acc, &b| acc.wrapping_add(b));
        !sum
    }

    /// Append the record, terminated by a line feed, to `out`.
    pub fn write_to(&self, out: &mut String) {
        out.push_str(self.kind.tag());
        // Writing to a String cannot fail
        let _ = write!(out, "{:02X}", self.byte_count());
        for b in self.address_bytes() {
            let _ = write!(out, "{b:02X}");
        }
        for b in &self.payload {
            let _ = write!(out, "{b:02X}");
        }
        let _ = write!(out, "{:02X}", self.checksum());
        out.push('\n');
    }
}

/// Module name for the S0 record: file stem plus `.srec`, cut to 20 bytes.
pub fn module_name(source: Option<&str>) -> String {
    let source = source.unwrap_or(DEFAULT_SOURCE_NAME);
    let path = Path::new(source);

    let base = if path.extension().is_some() {
        path.file_stem()
    } else {
        path.file_name()
    }
    .map_or_else(String::new, |s| s.to_string_lossy().into_owned());

    let mut name = format!("{base}.srec");
    if name.len() > MODULE_NAME_MAX {
        let mut cut = MODULE_NAME_MAX;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Build the records for `image` loaded at `start_address`.
///
/// With `strip_leading`, the first [`RELOCATION_STUB_LEN`] bytes are dropped
/// before framing.
pub fn records(image: &[u8], start_address: u32, strip_leading: bool, name: &str) -> Vec<Record> {
    let body = if strip_leading {
        image.get(RELOCATION_STUB_LEN..).unwrap_or_default()
    } else {
        image
    };

    let mut out = Vec::with_capacity(body.len() / DATA_RECORD_LEN + 3);
    out.push(Record::header(name));

    let mut address = start_address;
    for chunk in body.chunks(DATA_RECORD_LEN) {
        out.push(Record::data_chunk(address, chunk));
        // Chunk length is at most 16
        address = address.wrapping_add(chunk.len() as u32);
    }

    out.push(Record::termination(start_address));
    out
}

/// Encode `image` as S-record text.
pub fn encode(image: &[u8], start_address: u32, strip_leading: bool, name: &str) -> Vec<u8> {
    let records = records(image, start_address, strip_leading, name);
    let mut text = String::with_capacity(records.len() * (DATA_RECORD_LEN * 2 + 16));
    for record in &records {
        record.write_to(&mut text);
    }
    text.into_bytes()
}

/// Whether `source` already is S-record text.
///
/// Every line before the last must start with `S`; the last line is not
/// checked, so a truncated or unterminated final record is accepted. A line
/// feed after the last line does not start another line. Input with fewer
/// than two lines has nothing to check and counts as binary.
pub fn is_pre_encoded(source: &[u8]) -> bool {
    let mut lines: Vec<&[u8]> = source.split(|&b| b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    match lines.split_last() {
        Some((_, checked)) if !checked.is_empty() => {
            checked.iter().all(|line| line.first() == Some(&b'S'))
        },
        _ => false,
    }
}

/// Already-encoded input is sent unchanged.
pub fn decode_passthrough(source: &[u8]) -> Vec<u8> {
    source.to_vec()
}

/// Prepare a payload: pass S-records through, encode anything else.
pub fn prepare(image: &[u8], start_address: u32, strip_leading: bool, name: &str) -> Vec<u8> {
    if is_pre_encoded(image) {
        decode_passthrough(image)
    } else {
        encode(image, start_address, strip_leading, name)
    }
}
