//! Driver configuration

use std::time::Duration;

/// Largest datagram payload the adaptor accepts, in bytes
pub const MAX_DGRAM_SIZE: usize = 1024;

/// Number of entries in the adaptor's UDP port table
pub const UDP_TABLE_SIZE: usize = 6;

/// Default serial device path
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Configuration for a [`WsunAdaptor`](crate::WsunAdaptor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Serial device the adaptor is attached to
    pub device: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Budget for a single command reply (`OK`/`FAIL`)
    pub command_timeout: Duration,
    /// Budget for the session-ended notification after `SKTERM`
    pub term_timeout: Duration,
    /// Scan duration handed to the active scan while connecting
    pub scan_duration: Duration,
    /// Multiplier applied to the scan duration to get the scan timeout.
    ///
    /// The adaptor sweeps every channel for the requested duration, so the
    /// default is the channel count plus one.
    pub scan_timeout_factor: u32,
    /// Budget for the PANA join to settle
    pub connection_timeout: Duration,
    /// Base delay between send retries
    pub retry_delay: Duration,
    /// Poll interval while a closing socket waits for its in-flight send
    pub socket_close_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: Duration::from_secs(3),
            term_timeout: Duration::from_secs(10),
            scan_duration: Duration::from_secs(60),
            scan_timeout_factor: 33,
            connection_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
            socket_close_poll: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Default configuration for the given serial device
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Short timeouts and an unscaled scan timeout, for driving a simulated
    /// adaptor
    pub fn testing() -> Self {
        Self {
            command_timeout: Duration::from_millis(200),
            term_timeout: Duration::from_millis(200),
            scan_duration: Duration::from_millis(500),
            scan_timeout_factor: 1,
            connection_timeout: Duration::from_millis(500),
            retry_delay: Duration::from_millis(10),
            socket_close_poll: Duration::from_millis(10),
            ..Self::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the scan duration and the factor used to derive its timeout
    pub fn with_scan(mut self, duration: Duration, timeout_factor: u32) -> Self {
        self.scan_duration = duration;
        self.scan_timeout_factor = timeout_factor;
        self
    }

    /// Set the join timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the termination timeout
    pub fn with_term_timeout(mut self, timeout: Duration) -> Self {
        self.term_timeout = timeout;
        self
    }

    /// Timeout for a scan of the given duration
    pub fn scan_timeout(&self, duration: Duration) -> Duration {
        duration.saturating_mul(self.scan_timeout_factor.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.command_timeout, Duration::from_secs(3));
        assert_eq!(config.scan_timeout_factor, 33);
    }

    #[test]
    fn test_scan_timeout_scaling() {
        let config = Config::default();
        assert_eq!(
            config.scan_timeout(Duration::from_secs(2)),
            Duration::from_secs(66)
        );

        let config = Config::testing();
        assert_eq!(
            config.scan_timeout(Duration::from_millis(500)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::new("/dev/ttyACM0")
            .with_baud_rate(9600)
            .with_command_timeout(Duration::from_millis(50))
            .with_scan(Duration::from_secs(1), 2)
            .with_term_timeout(Duration::from_millis(70))
            .with_connection_timeout(Duration::from_secs(5));
        assert_eq!(config.device, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.command_timeout, Duration::from_millis(50));
        assert_eq!(config.scan_timeout(config.scan_duration), Duration::from_secs(2));
        assert_eq!(config.term_timeout, Duration::from_millis(70));
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }
}
