//! Data types shared across the driver

use crate::error::Error;
use crate::parsing::is_mac;
use crate::Result;

/// Lowest channel number the adaptor accepts (0x21)
pub const MIN_CHANNEL: u8 = 33;

/// Highest channel number the adaptor accepts (0x3c)
pub const MAX_CHANNEL: u8 = 60;

/// Route-B authentication credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Route-B ID, exactly 32 characters
    pub id: String,
    /// Route-B password, 1 to 32 characters
    pub password: String,
}

impl Credentials {
    /// Create a new credential pair
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
        }
    }

    /// Check the shape of the credentials
    pub fn validate(&self) -> Result<()> {
        if self.id.chars().count() != 32 {
            return Err(Error::validation("Wsun ID must be 32 characters"));
        }
        let len = self.password.chars().count();
        if !(1..=32).contains(&len) {
            return Err(Error::validation("Wsun password must be 1 <= and <= 32"));
        }
        Ok(())
    }
}

/// Minimal coordinator reference that lets `open` skip the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanCache {
    /// Channel number
    pub channel: u8,
    /// PAN ID; wider than 16 bits so out-of-range values can be rejected
    pub pan_id: u32,
    /// Coordinator MAC address, 16 hex digits
    pub addr: String,
}

impl PanCache {
    /// Create a new cache record
    pub fn new(channel: u8, pan_id: u32, addr: impl Into<String>) -> Self {
        Self {
            channel,
            pan_id,
            addr: addr.into(),
        }
    }

    /// True if every field is within the range the adaptor accepts
    pub fn is_valid(&self) -> bool {
        is_valid_cache(self)
    }
}

/// True if `cache` has a channel in [33, 60], a 16-bit PAN ID and a MAC
/// address
pub fn is_valid_cache(cache: &PanCache) -> bool {
    (MIN_CHANNEL..=MAX_CHANNEL).contains(&cache.channel)
        && cache.pan_id <= 0xFFFF
        && is_mac(&cache.addr)
}

/// Description of a discovered (or cached) PAN coordinator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanDescriptor {
    /// Channel number
    pub channel: u8,
    /// PAN ID
    pub pan_id: u16,
    /// Coordinator MAC address
    pub addr: String,
    /// Channel page (absent for cached descriptors)
    pub page: Option<u8>,
    /// Link quality indicator (absent for cached descriptors)
    pub lqi: Option<u8>,
    /// Pairing ID (absent for cached descriptors)
    pub pair_id: Option<String>,
}

impl TryFrom<&PanCache> for PanDescriptor {
    type Error = Error;

    fn try_from(cache: &PanCache) -> Result<Self> {
        if !cache.is_valid() {
            return Err(Error::validation("Specified cache is invalid"));
        }
        let pan_id = u16::try_from(cache.pan_id)
            .map_err(|_| Error::validation("The PAN ID must be >= 0 and <= 0xffff"))?;
        Ok(Self {
            channel: cache.channel,
            pan_id,
            addr: cache.addr.clone(),
            page: None,
            lqi: None,
            pair_id: None,
        })
    }
}

/// A datagram received from the adaptor (`ERXUDP`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender IPv6 address
    pub sender: String,
    /// Destination IPv6 address
    pub dest: String,
    /// Remote port
    pub remote_port: u16,
    /// Local port
    pub local_port: u16,
    /// Sender link-layer address
    pub sender_lla: String,
    /// Whether the frame was received encrypted
    pub secured: bool,
    /// Length the adaptor declared; trusted as-is
    pub declared_length: usize,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// A message surfaced by a bound [`AdaptorSocket`](crate::AdaptorSocket)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketMessage {
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Sender address
    pub address: String,
    /// The datagram's local-port field, as the adaptor frames it
    pub port: u16,
    /// Declared payload length
    pub size: usize,
}

impl From<Datagram> for SocketMessage {
    fn from(datagram: Datagram) -> Self {
        Self {
            payload: datagram.payload,
            address: datagram.sender,
            port: datagram.local_port,
            size: datagram.declared_length,
        }
    }
}

/// Connection state of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    /// No session; the transport is closed
    #[default]
    Closed,
    /// A PANA session is established
    Online,
}
