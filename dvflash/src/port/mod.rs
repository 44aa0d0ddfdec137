//! Transport abstraction for the serial boot channel.
//!
//! The handshake only needs three capabilities from the channel: read one
//! byte with a bounded timeout, write bytes, and discard whatever is waiting
//! in the input buffer. The `Port` trait captures exactly that on top of
//! `Read + Write`, so the sequencer runs unchanged against a real serial port
//! or a scripted fake.
//!
//! ```text
//! +------------------+
//! | Handshake Layer  |
//! | (dm644x flasher) |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port Trait    |
//! +--------+---------+
//!          |
//!    +-----+------+
//!    v            v
//! serialport   ScriptedPort
//!  (native)     (tests)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use dvflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> dvflash::Result<()> {
//!     port.discard_input()?;
//!     port.write_all_bytes(b"    CMD\0")?;
//!
//!     if let Some(byte) = port.read_byte()? {
//!         println!("Received: {byte:#04x}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rate used by the DM644x boot ROM and UART loader.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default read timeout, short enough to observe cancellation promptly.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyS0" or "COM1").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte-oriented, possibly lossy channel to the device.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Drop everything waiting in the input buffer.
    fn discard_input(&mut self) -> Result<()>;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;

    /// Read a single byte.
    ///
    /// Returns `Ok(None)` when the read timed out without data, so callers
    /// can check for cancellation and try again.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
