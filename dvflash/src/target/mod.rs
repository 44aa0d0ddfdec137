//! Target support.
//!
//! - [`plan`]: what the operator asked for, and the prepared run context
//! - [`dm644x`]: tokens, frames and the handshake sequencer for DM644x

pub mod dm644x;
pub mod plan;
