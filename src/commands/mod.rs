//! Command handlers for SKSTACK adaptors
//!
//! This module provides the command interface used by the driver: a
//! correlated send/reply core and typed wrappers for each wire command.

mod base;
mod device;

pub use base::{CommandHandler, SharedTransport, DELIVERY_FAILED};
pub use device::{datagram_frame, SECURITY_LEVEL};
