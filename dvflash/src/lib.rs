//! # dvflash
//!
//! A library for serial booting and flash programming of DM644x-class SoCs.
//!
//! The chip's mask ROM accepts a first-stage loader over UART. That loader
//! then accepts a command word and, depending on the command, a second-stage
//! flash loader and an application image. This crate provides the host side:
//!
//! - A configurable table-driven CRC-32 engine ([`protocol::crc`])
//! - A Motorola S-record encoder ([`protocol::srec`])
//! - The token/frame handshake sequencer ([`target::dm644x`])
//! - A serial transport abstraction ([`port`])
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for plan types
//!
//! ## Example
//!
//! ```rust,no_run
//! use dvflash::{BinaryImage, CommandPlan, FlashCommand, LoaderDirectory, RunContext};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = BinaryImage::from_file("u-boot.bin")?;
//!     let plan = CommandPlan::new(FlashCommand::Boot).with_application(app);
//!     let ctx = RunContext::prepare(plan, &LoaderDirectory::new("loaders"))?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = dvflash::NativePort::open_simple("/dev/ttyS0", 115200)?;
//!         let mut flasher = dvflash::Dm644xFlasher::new(port).with_verbose(true);
//!         flasher.run(&ctx)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

/// Cooperative cancellation handle shared between the worker and its controller.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    image::{BinaryImage, FirstStageLoader, LoaderDirectory, LoaderSource},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        crc::{Crc32, CrcParams},
        srec::{PayloadEncoding, Record, RecordKind},
    },
    target::{
        dm644x::{Dm644xFlasher, FlashJob, RunOutcome, Token, Wait},
        plan::{
            BinaryFormat, CommandPlan, FlashCommand, FlashType, MagicNumber, Payload, RunContext,
            Sequence,
        },
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_default_false() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();

        other.cancel();
        assert!(token.is_cancelled());
    }
}
