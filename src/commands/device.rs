//! Typed adaptor commands

use std::time::Duration;

use super::CommandHandler;
use crate::parsing::{duration2msec, msec2duration, num2hex};
use crate::Error;
use crate::Result;

/// Security level used for every outbound datagram (encrypted if possible)
pub const SECURITY_LEVEL: u8 = 2;

/// Active scan with information element
const SCAN_MODE_ACTIVE: u8 = 2;

/// Build the `SKSENDTO` frame for `payload`.
///
/// The payload follows the header as raw bytes with no terminator.
pub fn datagram_frame(handle: u8, ipv6: &str, port: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let header = format!(
        "SKSENDTO {} {} {} {} {} ",
        handle,
        ipv6,
        num2hex(port as u64, 2)?,
        SECURITY_LEVEL,
        num2hex(payload.len() as u64, 2)?,
    );
    let mut frame = header.into_bytes();
    frame.extend_from_slice(payload);
    Ok(frame)
}

impl CommandHandler {
    /// Set the Route-B ID (`SKSETRBID`)
    pub async fn set_id(&self, id: &str) -> Result<()> {
        self.send(format!("SKSETRBID {}\r\n", id).as_bytes())
            .await
            .map(|_| ())
    }

    /// Set the Route-B password (`SKSETPWD`)
    pub async fn set_password(&self, password: &str) -> Result<()> {
        let len = num2hex(password.len() as u64, 1)?;
        self.send(format!("SKSETPWD {} {}\r\n", len, password).as_bytes())
            .await
            .map(|_| ())
    }

    /// Write the channel register (S02)
    pub async fn set_channel(&self, channel: u8) -> Result<()> {
        let value = num2hex(channel as u64, 1)?;
        self.send(format!("SKSREG S02 {}\r\n", value).as_bytes())
            .await
            .map(|_| ())
    }

    /// Write the PAN ID register (S03)
    pub async fn set_pan_id(&self, pan_id: u16) -> Result<()> {
        let value = num2hex(pan_id as u64, 2)?;
        self.send(format!("SKSREG S03 {}\r\n", value).as_bytes())
            .await
            .map(|_| ())
    }

    /// Turn off command echo (SFE)
    pub async fn disable_echo(&self) -> Result<()> {
        self.send(b"SKSREG SFE 0\r\n").await.map(|_| ())
    }

    /// Read the reply-format register; true when ASCII replies are on
    pub async fn read_ascii_mode(&self) -> Result<bool> {
        match self.send(b"ROPT\r").await? {
            Some(mode) => Ok(mode & 1 != 0),
            None => Err(Error::protocol("ROPT reply carries no mode")),
        }
    }

    /// Switch the adaptor to ASCII replies for received datagrams
    pub async fn write_ascii_mode(&self) -> Result<()> {
        self.send(b"WOPT 01\r").await.map(|_| ())
    }

    /// Register a neighbor so it can be joined without a scan
    pub async fn add_neighbor(&self, ipv6: &str, mac: &str) -> Result<()> {
        self.send(format!("SKADDNBR {} {}\r\n", ipv6, mac).as_bytes())
            .await
            .map(|_| ())
    }

    /// Ask for the bound-port table; the ports arrive as number lines
    /// before the `OK`
    pub async fn read_port_table_command(&self) -> Result<()> {
        self.send(b"SKTABLE E\r\n").await.map(|_| ())
    }

    /// Start an active scan over `channel_mask`.
    ///
    /// Returns the per-channel duration the adaptor will actually use.
    pub async fn scan(&self, duration: Duration, channel_mask: u32) -> Result<Duration> {
        let code = msec2duration(duration.as_millis().min(u64::MAX as u128) as u64);
        let mask = num2hex(channel_mask as u64, 4)?;
        tracing::debug!(%mask, code, "starting active scan");
        self.send(format!("SKSCAN {} {} {:X}\r\n", SCAN_MODE_ACTIVE, mask, code).as_bytes())
            .await?;
        Ok(Duration::from_millis(duration2msec(code)))
    }

    /// Start the PANA join with the coordinator at `ipv6`
    pub async fn join(&self, ipv6: &str) -> Result<()> {
        self.send(format!("SKJOIN {}\r\n", ipv6).as_bytes())
            .await
            .map(|_| ())
    }

    /// Ask the adaptor to end the PANA session
    pub async fn terminate(&self) -> Result<()> {
        self.send(b"SKTERM\r\n").await.map(|_| ())
    }
}
