//! Wire-level building blocks: checksums and record encoding.

pub mod crc;
pub mod srec;

pub use crc::{Crc32, CrcParams};
pub use srec::{PayloadEncoding, Record, RecordKind};
