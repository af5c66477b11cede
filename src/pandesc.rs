//! Reassembly of `EPANDESC` dumps into [`PanDescriptor`] records

use crate::types::PanDescriptor;

/// A PAN descriptor under construction.
///
/// Fields are filled from `Key:Value` parameter lines; the record is valid
/// once all six are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanDescriptorBuilder {
    channel: Option<u8>,
    page: Option<u8>,
    pan_id: Option<u16>,
    addr: Option<String>,
    lqi: Option<u8>,
    pair_id: Option<String>,
}

impl PanDescriptorBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every field
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True once every field is set
    pub fn is_valid(&self) -> bool {
        self.channel.is_some()
            && self.page.is_some()
            && self.pan_id.is_some()
            && self.addr.is_some()
            && self.lqi.is_some()
            && self.pair_id.is_some()
    }

    /// Set the channel from its hex text; unparsable input leaves it unset
    pub fn set_channel(&mut self, value: &str) {
        if let Ok(channel) = u8::from_str_radix(value, 16) {
            self.channel = Some(channel);
        }
    }

    /// Set the channel page from its hex text
    pub fn set_page(&mut self, value: &str) {
        if let Ok(page) = u8::from_str_radix(value, 16) {
            self.page = Some(page);
        }
    }

    /// Set the PAN ID from its hex text
    pub fn set_pan_id(&mut self, value: &str) {
        if let Ok(pan_id) = u16::from_str_radix(value, 16) {
            self.pan_id = Some(pan_id);
        }
    }

    /// Set the coordinator address
    pub fn set_addr(&mut self, value: &str) {
        self.addr = Some(value.to_string());
    }

    /// Set the link quality indicator from its hex text
    pub fn set_lqi(&mut self, value: &str) {
        if let Ok(lqi) = u8::from_str_radix(value, 16) {
            self.lqi = Some(lqi);
        }
    }

    /// Set the pairing ID
    pub fn set_pair_id(&mut self, value: &str) {
        self.pair_id = Some(value.to_string());
    }

    /// Copy the record out and reset, if it is complete
    pub fn take(&mut self) -> Option<PanDescriptor> {
        if !self.is_valid() {
            return None;
        }
        let built = std::mem::take(self);
        Some(PanDescriptor {
            channel: built.channel?,
            pan_id: built.pan_id?,
            addr: built.addr?,
            page: built.page,
            lqi: built.lqi,
            pair_id: built.pair_id,
        })
    }
}

/// Feeds parameter lines into a [`PanDescriptorBuilder`]
#[derive(Debug, Default)]
pub struct PanDescriptorAssembler {
    current: PanDescriptorBuilder,
}

impl PanDescriptorAssembler {
    /// Create an assembler with nothing in progress
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the record in progress
    pub fn reset(&mut self) {
        self.current.reset();
    }

    /// Apply one `Key:Value` parameter.
    ///
    /// Returns the finished descriptor when this parameter completes it.
    /// Unknown keys and malformed lines discard the record in progress.
    pub fn feed(&mut self, param: &str) -> Option<PanDescriptor> {
        let mut parts = param.split(':');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            self.reset();
            return None;
        };

        match key {
            "Channel" => self.current.set_channel(value),
            "Channel Page" => self.current.set_page(value),
            "Pan ID" => self.current.set_pan_id(value),
            "Addr" => self.current.set_addr(value),
            "LQI" => self.current.set_lqi(value),
            "PairID" => self.current.set_pair_id(value),
            _ => {
                tracing::debug!(key, "unknown descriptor key, discarding record");
                self.reset();
                return None;
            }
        }

        let descriptor = self.current.take()?;
        tracing::debug!(?descriptor, "PAN descriptor assembled");
        Some(descriptor)
    }

    /// True if nothing has been collected since the last reset
    pub fn is_empty(&self) -> bool {
        self.current == PanDescriptorBuilder::default()
    }
}
