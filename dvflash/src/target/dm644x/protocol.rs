//! DM644x UART boot protocol: tokens and header frames.
//!
//! The device announces what it wants with eight-byte, NUL-terminated
//! tokens. The host answers with an ASCII header frame and then the payload.
//!
//! ```text
//! Boot ROM header (28 bytes):
//! +-----------+----------+--------+--------+--------+
//! | "    ACK\0" |  CRC   | Length |  Exec  | "0000" |
//! |     8     |    8     |   4    |   4    |   4    |
//! +-----------+----------+--------+--------+--------+
//!
//! Loader command (16 bytes):
//! +-----------+----------+
//! | "    CMD\0" |  Magic   |
//! |     8     |    8     |
//! +-----------+----------+
//!
//! Image header (36 bytes):
//! +-----------+----------+----------+----------+--------+
//! | "    ACK\0" |  Magic   |  Exec    |  Size    | "0000" |
//! |     8     |    8     |    8     |    8     |   4    |
//! +-----------+----------+----------+----------+--------+
//! ```
//!
//! Numeric fields are upper-case ASCII hex.

use crate::target::plan::MagicNumber;
use std::fmt;

/// Length of every token.
pub const TOKEN_LEN: usize = 8;

/// Longest line the token reader accumulates before comparing.
pub const MAX_LINE_LEN: usize = 255;

/// Fixed padding that ends every header.
pub const PADDING: &[u8] = b"0000";

/// Boot-mode report when the board is strapped for UART boot.
pub const BOOT_MODE_UART: &[u8] = b"PSPBootMode = UART";

/// Boot-mode report for any flash boot mode.
pub const BOOT_MODE_FLASH: &[u8] = b"PSPBootMode = N";

/// Tokens exchanged with the boot ROM and the UART loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Boot ROM requests a loader.
    BootMe,
    /// UART loader is ready for a command.
    BootPsp,
    /// Host header follows.
    Ack,
    /// Device is ready for the payload.
    Begin,
    /// Device finished a step.
    Done,
    /// UART loader requests the application.
    SendApp,
    /// UART loader requests the flash loader.
    SendUbl,
    /// Host command word follows.
    Cmd,
}

impl Token {
    /// Bytes on the wire, including the trailing NUL.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::BootMe => b" BOOTME\0",
            Self::BootPsp => b"BOOTPSP\0",
            Self::Ack => b"    ACK\0",
            Self::Begin => b"  BEGIN\0",
            Self::Done => b"   DONE\0",
            Self::SendApp => b"SENDAPP\0",
            Self::SendUbl => b"SENDUBL\0",
            Self::Cmd => b"    CMD\0",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = String::from_utf8_lossy(self.as_bytes());
        write!(f, "{}", text.trim_matches(|c| c == ' ' || c == '\0'))
    }
}

/// Result of comparing one device line against an expected and an alternate
/// pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch {
    /// The expected pattern was seen.
    Expected,
    /// The alternate pattern was seen.
    Alternate,
    /// Neither pattern; keep reading.
    Other,
}

/// Classify `line`.
///
/// The alternate pattern takes precedence; when it equals the expected one,
/// seeing it counts as success.
pub fn classify(line: &[u8], expected: &[u8], alternate: &[u8]) -> LineMatch {
    if contains(line, alternate) {
        if expected == alternate {
            LineMatch::Expected
        } else {
            LineMatch::Alternate
        }
    } else if contains(line, expected) {
        LineMatch::Expected
    } else {
        LineMatch::Other
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Header answering `BOOTME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootHeader {
    /// Loader-integrity CRC of the loader.
    pub crc: u32,
    /// Loader length in bytes.
    pub length: u16,
    /// Loader entry point.
    pub exec: u16,
}

impl BootHeader {
    /// Build the frame bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(Token::Ack.as_bytes());
        buf.extend_from_slice(format!("{:08X}{:04X}{:04X}", self.crc, self.length, self.exec).as_bytes());
        buf.extend_from_slice(PADDING);
        buf
    }
}

/// Command word answering `BOOTPSP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command to run.
    pub magic: MagicNumber,
}

impl CommandFrame {
    /// Build the frame bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(Token::Cmd.as_bytes());
        buf.extend_from_slice(self.magic.to_string().as_bytes());
        buf
    }
}

/// Header answering `SENDAPP` or `SENDUBL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Image word.
    pub magic: MagicNumber,
    /// Entry point.
    pub exec: u32,
    /// Payload size in bytes.
    pub size: u32,
}

impl ImageHeader {
    /// Build the frame bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(Token::Ack.as_bytes());
        buf.extend_from_slice(format!("{}{:08X}{:08X}", self.magic, self.exec, self.size).as_bytes());
        buf.extend_from_slice(PADDING);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_eight_bytes() {
        let all = [
            Token::BootMe,
            Token::BootPsp,
            Token::Ack,
            Token::Begin,
            Token::Done,
            Token::SendApp,
            Token::SendUbl,
            Token::Cmd,
        ];
        for token in all {
            assert_eq!(token.as_bytes().len(), TOKEN_LEN, "{token}");
            assert_eq!(token.as_bytes()[TOKEN_LEN - 1], 0);
        }
        assert_eq!(Token::BootMe.to_string(), "BOOTME");
    }

    #[test]
    fn test_boot_header() {
        let frame = BootHeader {
            crc: 0x1234_ABCD,
            length: 0x3800,
            exec: 0x29E8,
        }
        .build();

        assert_eq!(frame.len(), 28);
        assert_eq!(frame, b"    ACK\x001234ABCD380029E80000");
    }

    #[test]
    fn test_command_frame() {
        let frame = CommandFrame {
            magic: MagicNumber::NorGlobalErase,
        }
        .build();
        assert_eq!(frame, b"    CMD\0A1ACEDAA");
    }

    #[test]
    fn test_image_header() {
        let frame = ImageHeader {
            magic: MagicNumber::Safe,
            exec: 0x8108_0000,
            size: 40,
        }
        .build();

        assert_eq!(frame.len(), 36);
        assert_eq!(frame, b"    ACK\0A1ACED0081080000000000280000");
    }

    #[test]
    fn test_classify() {
        let done = Token::Done.as_bytes();
        let psp = Token::BootPsp.as_bytes();

        assert_eq!(classify(b"   DONE\0", done, psp), LineMatch::Expected);
        assert_eq!(classify(b"BOOTPSP\0", done, psp), LineMatch::Alternate);
        assert_eq!(classify(b"BOOTPSP\0", psp, psp), LineMatch::Expected);
        assert_eq!(classify(b"DM644x UBL\0", done, psp), LineMatch::Other);
        assert_eq!(classify(b"xx   DONE\0", done, psp), LineMatch::Expected);
        assert_eq!(
            classify(b"PSPBootMode = NOR", BOOT_MODE_UART, BOOT_MODE_FLASH),
            LineMatch::Alternate
        );
    }
}
