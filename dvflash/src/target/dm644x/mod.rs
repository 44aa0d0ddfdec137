//! TI DM644x (DaVinci) serial boot and flash programming.
//!
//! The mask ROM accepts a first-stage UART loader; the loader then runs one
//! command (boot, restore, burn or erase) driven by the same token protocol.

pub mod flasher;
pub mod protocol;

pub use flasher::{ConfirmFn, DEFAULT_CHUNK_SIZE, Dm644xFlasher, FlashJob, ProgressFn, RunOutcome, Wait};
pub use protocol::{LineMatch, Token};
