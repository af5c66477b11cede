//! wsun-adaptor - Rust driver for serial-attached Wi-SUN adaptors
//!
//! This library provides an async interface to radio adaptors running the
//! SKSTACK IP firmware (e.g. ROHM BP35A1). It joins a PANA-authenticated
//! session with a coordinator and exchanges datagrams through it.
//!
//! # Serial Example
//!
//! ```no_run
//! use wsun_adaptor::{Config, Credentials, WsunAdaptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wsun_adaptor::Error> {
//!     let adaptor = WsunAdaptor::serial(Config::new("/dev/ttyUSB0"));
//!     let credentials = Credentials::new("00112233445566778899AABBCCDDEEFF", "PASSWORD1234");
//!
//!     // Scan for a coordinator and join it
//!     let Some(pan) = adaptor.open(&credentials, None).await? else {
//!         println!("No PAN found");
//!         return Ok(());
//!     };
//!     println!("Joined PAN {:04X} on channel {}", pan.pan_id, pan.channel);
//!
//!     // ECHONET Lite over UDP port 3610
//!     let socket = adaptor.create_socket().await;
//!     socket.bind(3610).await?;
//!     let mut messages = socket.messages();
//!     socket.send(&[0x10, 0x81, 0x00, 0x01], 3610, &pan.addr).await?;
//!     if let Ok(message) = messages.recv().await {
//!         println!("{} bytes from {}", message.size, message.address);
//!     }
//!
//!     adaptor.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Skipping the scan
//!
//! A coordinator found earlier can be joined directly:
//!
//! ```no_run
//! use wsun_adaptor::{Config, Credentials, PanCache, WsunAdaptor};
//!
//! # async fn run() -> Result<(), wsun_adaptor::Error> {
//! let adaptor = WsunAdaptor::serial(Config::default());
//! let credentials = Credentials::new("00112233445566778899AABBCCDDEEFF", "PASSWORD1234");
//! let cache = PanCache::new(0x21, 0x8888, "123ABC456DEF7890");
//! adaptor.open(&credentials, Some(&cache)).await?;
//! # Ok(())
//! # }
//! ```

mod adaptor;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod hub;
pub mod pandesc;
pub mod parsing;
pub mod portmap;
pub mod reader;
pub mod retry;
pub mod socket;
pub mod types;

#[cfg(test)]
mod mock;

pub use adaptor::WsunAdaptor;
pub use config::Config;
#[cfg(feature = "serial")]
pub use connection::SerialTransport;
pub use connection::Transport;
pub use error::Error;
pub use events::{EventDispatcher, EventType, Subscription, WsunEvent};
pub use hub::SessionSignal;
pub use portmap::PortTable;
pub use socket::AdaptorSocket;
pub use types::{
    is_valid_cache, Credentials, Datagram, DriverState, PanCache, PanDescriptor, SocketMessage,
};

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;
