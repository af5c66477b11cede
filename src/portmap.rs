//! The adaptor's UDP port table (`SKTABLE E`)

use crate::config::UDP_TABLE_SIZE;

/// Ports the adaptor has open, in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortTable {
    ports: Vec<u16>,
}

impl PortTable {
    /// Build a table from a list of ports, keeping at most
    /// [`UDP_TABLE_SIZE`] entries
    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: ports.into_iter().take(UDP_TABLE_SIZE).collect(),
        }
    }

    /// 1-based handle of `port`, if the adaptor has it open
    pub fn handle(&self, port: u16) -> Option<u8> {
        self.ports
            .iter()
            .position(|&p| p == port)
            .and_then(|i| u8::try_from(i + 1).ok())
    }

    /// The ports in table order
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// True if the table holds no ports
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// Collects the number lines that follow `EPORT`
#[derive(Debug, Default)]
pub struct PortTableReader {
    ports: Vec<u16>,
}

impl PortTableReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of a new dump
    pub fn begin(&mut self) {
        self.ports.clear();
    }

    /// Offer one number line; kept if it is a port and the table has room
    pub fn push(&mut self, value: Option<u64>) {
        let Some(port) = value.and_then(|v| u16::try_from(v).ok()) else {
            tracing::debug!(?value, "ignoring out-of-range port table entry");
            return;
        };
        if self.ports.len() < UDP_TABLE_SIZE {
            self.ports.push(port);
        }
    }

    /// The table collected so far
    pub fn finish(&self) -> PortTable {
        PortTable::from_ports(self.ports.iter().copied())
    }
}
