//! Table-driven 32-bit CRC with configurable parameters.
//!
//! The same engine serves two purposes: it checksums the first-stage loader
//! before transmission, and its lookup table is sent to the boot ROM, which
//! uses it to validate the loader it receives.
//!
//! The register is updated `bytes_per_shift` bytes at a time, so the table
//! has `2^(8 * bytes_per_shift)` entries (256 or 65536).

/// Parameters of a CRC-32 variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcParams {
    /// Generator polynomial (bit 32 implied).
    pub poly: u32,
    /// Initial register value.
    pub init: u32,
    /// Value XORed into the final register.
    pub final_xor: u32,
    /// Process bits least-significant first.
    pub reflected: bool,
    /// Bytes consumed per table lookup (1 or 2).
    pub bytes_per_shift: u8,
}

impl CrcParams {
    /// Standard CRC-32 (Ethernet, zip).
    pub const STANDARD: Self = Self {
        poly: 0x04C1_1DB7,
        init: 0xFFFF_FFFF,
        final_xor: 0xFFFF_FFFF,
        reflected: true,
        bytes_per_shift: 1,
    };

    /// Variant the boot ROM uses to check the first-stage loader.
    ///
    /// The final register is not inverted, so results are the bitwise
    /// complement of [`CrcParams::STANDARD`].
    pub const LOADER: Self = Self {
        final_xor: 0x0000_0000,
        ..Self::STANDARD
    };

    /// Bytes per shift, clamped to 1 or 2.
    pub fn shift_bytes(&self) -> u32 {
        match self.bytes_per_shift {
            2 => 2,
            _ => 1,
        }
    }

    fn shift_bits(&self) -> u32 {
        self.shift_bytes() * 8
    }
}

/// A CRC-32 variant with its precomputed lookup table.
#[derive(Debug, Clone)]
pub struct Crc32 {
    params: CrcParams,
    table: Vec<u32>,
}

impl Crc32 {
    /// Build the lookup table for the given parameters.
    pub fn new(params: CrcParams) -> Self {
        let params = CrcParams {
            bytes_per_shift: params.shift_bytes() as u8,
            ..params
        };
        Self {
            table: build_table(&params),
            params,
        }
    }

    /// Standard CRC-32.
    pub fn standard() -> Self {
        Self::new(CrcParams::STANDARD)
    }

    /// Loader-integrity CRC.
    pub fn loader() -> Self {
        Self::new(CrcParams::LOADER)
    }

    /// Parameters used to build this table.
    pub fn params(&self) -> &CrcParams {
        &self.params
    }

    /// The lookup table.
    pub fn table(&self) -> &[u32] {
        &self.table
    }

    /// Compute the CRC of `data`.
    pub fn checksum(&self, data: &[u8]) -> u32 {
        checksum(&self.table, &self.params, data)
    }

    /// Table rendered as the boot ROM expects it: every entry as eight
    /// lower-case hex digits, no separators.
    pub fn table_hex(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::with_capacity(self.table.len() * 8);
        for entry in &self.table {
            // Writing to a String cannot fail
            let _ = write!(out, "{entry:08x}");
        }
        out
    }
}

/// Reverse the low `width` bits of `value` (1..=32); higher bits are dropped.
pub fn reflect(value: u32, width: u32) -> u32 {
    let width = width.clamp(1, 32);
    value.reverse_bits() >> (32 - width)
}

/// Build the lookup table for `params`.
pub fn build_table(params: &CrcParams) -> Vec<u32> {
    let bits = params.shift_bits();
    let len = 1u32 << bits;

    (0..len)
        .map(|symbol| {
            let seed = if params.reflected {
                reflect(symbol, bits)
            } else {
                symbol
            };

            let mut reg = seed << (32 - bits);
            for _ in 0..bits {
                reg = if reg & 0x8000_0000 != 0 {
                    (reg << 1) ^ params.poly
                } else {
                    reg << 1
                };
            }

            if params.reflected {
                reflect(reg, 32)
            } else {
                reg
            }
        })
        .collect()
}

/// Compute the CRC of `data` with a table built from the same `params`.
///
/// With two bytes per shift a trailing odd byte is not processed. Reflected
/// mode reads each 16-bit symbol little-endian, non-reflected big-endian.
pub fn checksum(table: &[u32], params: &CrcParams, data: &[u8]) -> u32 {
    let bits = params.shift_bits();
    let mask = (1u32 << bits) - 1;
    let mut crc = params.init;

    let index = |value: u32| value as usize;

    match (params.reflected, params.shift_bytes()) {
        (true, 2) => {
            for pair in data.chunks_exact(2) {
                let symbol = u32::from(u16::from_le_bytes([pair[0], pair[1]]));
                crc = (crc >> bits) ^ table[index((crc & mask) ^ symbol)];
            }
        },
        (true, _) => {
            for &byte in data {
                crc = (crc >> bits) ^ table[index((crc & mask) ^ u32::from(byte))];
            }
        },
        (false, 2) => {
            for pair in data.chunks_exact(2) {
                let symbol = u32::from(u16::from_be_bytes([pair[0], pair[1]]));
                crc = (crc << bits) ^ table[index(((crc >> (32 - bits)) & mask) ^ symbol)];
            }
        },
        (false, _) => {
            for &byte in data {
                crc = (crc << bits) ^ table[index(((crc >> (32 - bits)) & mask) ^ u32::from(byte))];
            }
        },
    }

    crc ^ params.final_xor
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_standard_check_value() {
        assert_eq!(Crc32::standard().checksum(CHECK), 0xCBF43926);
    }

    #[test]
    fn test_loader_variant_is_complement() {
        let standard = Crc32::standard();
        let loader = Crc32::loader();

        for data in [CHECK, b"".as_slice(), b"\x00\xff\x10", b"DM644x UBL"] {
            assert_eq!(loader.checksum(data), !standard.checksum(data));
        }
    }

    #[test]
    fn test_standard_table_entries() {
        let crc = Crc32::standard();
        assert_eq!(crc.table().len(), 256);
        assert_eq!(crc.table()[0], 0x0000_0000);
        assert_eq!(crc.table()[1], 0x7707_3096);
        assert_eq!(crc.table()[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_table_length_per_shift_width() {
        for reflected in [true, false] {
            let one = Crc32::new(CrcParams {
                reflected,
                ..CrcParams::STANDARD
            });
            let two = Crc32::new(CrcParams {
                reflected,
                bytes_per_shift: 2,
                ..CrcParams::STANDARD
            });
            assert_eq!(one.table().len(), 256);
            assert_eq!(two.table().len(), 65536);
        }
    }

    #[test]
    fn test_empty_input_returns_init_xor_final() {
        let variants = [
            CrcParams::STANDARD,
            CrcParams::LOADER,
            CrcParams {
                init: 0x1234_5678,
                final_xor: 0x0F0F_0F0F,
                reflected: false,
                bytes_per_shift: 2,
                ..CrcParams::STANDARD
            },
        ];

        for params in variants {
            let crc = Crc32::new(params);
            assert_eq!(crc.checksum(&[]), params.init ^ params.final_xor);
        }
    }

    #[test]
    fn test_invalid_shift_width_clamps_to_one() {
        let crc = Crc32::new(CrcParams {
            bytes_per_shift: 7,
            ..CrcParams::STANDARD
        });
        assert_eq!(crc.params().bytes_per_shift, 1);
        assert_eq!(crc.table().len(), 256);
        assert_eq!(crc.checksum(CHECK), 0xCBF43926);
    }

    #[test]
    fn test_two_byte_shift_matches_single_byte() {
        let data = b"12345678";

        for reflected in [true, false] {
            let narrow = Crc32::new(CrcParams {
                reflected,
                ..CrcParams::STANDARD
            });
            let wide = Crc32::new(CrcParams {
                reflected,
                bytes_per_shift: 2,
                ..CrcParams::STANDARD
            });
            assert_eq!(wide.checksum(data), narrow.checksum(data));
        }
    }

    #[test]
    fn test_non_reflected_check_value() {
        // CRC-32/BZIP2
        let crc = Crc32::new(CrcParams {
            reflected: false,
            ..CrcParams::STANDARD
        });
        assert_eq!(crc.checksum(CHECK), 0xFC891918);
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(0b0001, 4), 0b1000);
        assert_eq!(reflect(0x01, 8), 0x80);
        assert_eq!(reflect(0x0000_0001, 32), 0x8000_0000);
        assert_eq!(reflect(0xF0, 4), 0x0);
        assert_eq!(reflect(0x1, 1), 0x1);
    }

    #[test]
    fn test_table_hex_format() {
        let crc = Crc32::loader();
        let hex = crc.table_hex();
        assert_eq!(hex.len(), 256 * 8);
        assert!(hex.starts_with("0000000077073096"));
        assert!(hex.ends_with("2d02ef8d"));
    }
}
