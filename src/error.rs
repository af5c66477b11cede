//! Error types for the Wi-SUN adaptor driver

use thiserror::Error;

/// `FAIL` reason the adaptor reports when no PANA session is established
pub const NO_SESSION_REASON: u8 = 10;

/// The main error type for adaptor operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid parameter provided (raised before any I/O)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation attempted in the wrong driver or socket state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The adaptor rejected a command with `FAIL`
    #[error("Command error: adaptor replied '{}'", reason_message(.reason))]
    Command {
        /// Reason code following `FAIL ER`, if any
        reason: Option<u8>,
    },

    /// Timeout waiting for a reply or notification
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Another datagram is already in flight somewhere in the driver
    #[error("Sending in progress")]
    SendInProgress,

    /// The adaptor reported that the UDP transmission failed
    #[error("UDP transmission failed")]
    TransmissionFailed,

    /// No handle in the port table for the given port
    #[error("No handle bound to port {0}")]
    NoHandle(u16),

    /// Protocol errors (malformed or unexpected replies)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serial port errors
    #[cfg(feature = "serial")]
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport is not open
    #[error("Not connected")]
    NotConnected,
}

fn reason_message(reason: &Option<u8>) -> &'static str {
    match reason {
        Some(4) => "unsupported command",
        Some(5) => "incorrect command",
        Some(6) => "incorrect range",
        Some(9) => "uart error",
        Some(NO_SESSION_REASON) => "failed to get result",
        _ => "unknown error",
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a command error from an optional `FAIL` reason
    pub fn command(reason: Option<u8>) -> Self {
        Error::Command { reason }
    }

    /// True if this is the `FAIL ER10` the adaptor answers to `SKTERM`
    /// when no session exists
    pub fn is_no_session(&self) -> bool {
        matches!(self, Error::Command { reason: Some(NO_SESSION_REASON) })
    }
}
