//! Error types for dvflash.
//!
//! Only conditions that end a run are errors. A wrong or late token from the
//! device is an expected outcome of the handshake and restarts the affected
//! phase instead (see [`crate::target::dm644x`]).

use crate::target::plan::FlashType;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for dvflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for dvflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An input file is absent or unreadable.
    #[error("Missing input {}: {source}", path.display())]
    MissingInput {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// No loader image is available for the flash family.
    #[error("No embedded loader image for {0} flash")]
    LoaderNotFound(FlashType),

    /// An image cannot be framed for transfer.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A value does not fit its fixed-width hex field.
    #[error("{field} {value:#x} does not fit in {digits} hex digits")]
    FieldOverflow {
        /// Header field name.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Width of the field.
        digits: usize,
    },

    /// The command plan is inconsistent.
    #[error("Invalid command plan: {0}")]
    InvalidPlan(String),

    /// The device never confirmed that the application started.
    #[error("Final DONE not returned, command failed on the device")]
    FinalConfirmation,

    /// The device is not in UART boot mode and the operator declined to continue.
    #[error("Device is not in UART boot mode")]
    BootModeRejected,

    /// The operator cancelled the run.
    #[error("Operation cancelled")]
    Cancelled,

    /// Worker thread failure.
    #[error("Worker thread panicked")]
    WorkerPanicked,
}

impl Error {
    /// Whether this error came from operator cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
