//! Base command handler implementation

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::connection::Transport;
use crate::events::*;
use crate::hub::SENDER_ATTR;
use crate::Error;
use crate::Result;

/// Delivery status the adaptor reports for a failed transmission
pub const DELIVERY_FAILED: u8 = 1;

/// Shared handle to the transport
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

fn printable(command: &[u8]) -> String {
    String::from_utf8_lossy(command)
        .trim_end_matches(&['\r', '\n'][..])
        .to_string()
}

/// Command handler for adaptor operations.
///
/// Every command is answered by exactly one `OK` or `FAIL`. The reply wait
/// is armed before the command is written, so a fast adaptor cannot slip
/// its answer in ahead of the listener.
pub struct CommandHandler {
    /// Transport the commands are written to
    transport: SharedTransport,
    /// Internal event dispatcher fed by the line reader
    dispatcher: Arc<EventDispatcher>,
    /// Budget for a single reply
    timeout: Duration,
}

impl CommandHandler {
    /// Create a new command handler
    pub fn new(
        transport: SharedTransport,
        dispatcher: Arc<EventDispatcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            timeout,
        }
    }

    /// Write raw bytes without waiting for anything
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut transport = self.transport.lock().await;
        if !transport.is_open() {
            return Err(Error::NotConnected);
        }
        transport.write(data).await
    }

    /// Send a command and wait for its `OK`/`FAIL`.
    ///
    /// Returns the mode carried by `OK`, if any.
    pub async fn send(&self, command: &[u8]) -> Result<Option<u32>> {
        tracing::debug!(command = %printable(command), "tx");
        let wait = self
            .dispatcher
            .prepare_wait(&[EventType::Ok, EventType::Fail], HashMap::new());
        self.write(command).await?;

        match wait.wait(self.timeout).await {
            Some(event) => match event.payload {
                EventPayload::Ok { mode } => Ok(mode),
                EventPayload::Fail { reason } => {
                    let err = Error::command(reason);
                    tracing::debug!(command = %printable(command), "{}", err);
                    Err(err)
                }
                other => Err(Error::protocol(format!("unexpected reply {:?}", other))),
            },
            None => {
                tracing::error!(command = %printable(command), "command timeout");
                Err(Error::timeout("command reply"))
            }
        }
    }

    /// Send a datagram command and check its delivery status.
    ///
    /// The adaptor acknowledges `SKSENDTO` with `OK` even when the radio
    /// transmission fails; the failure shows up as `EVENT 21` from `ipv6`
    /// with status 1, which arrives before the `OK`.
    pub async fn send_to(&self, data: &[u8], ipv6: &str) -> Result<()> {
        let status: Arc<StdMutex<Option<u8>>> = Arc::new(StdMutex::new(None));

        let mut filters = HashMap::new();
        filters.insert(SENDER_ATTR.to_string(), ipv6.to_string());
        let seen = status.clone();
        let subscription = self
            .dispatcher
            .subscribe(EventType::DeliveryStatus, filters, move |event| {
                if let EventPayload::Notification { param, .. } = event.payload {
                    if let Ok(mut slot) = seen.lock() {
                        if slot.is_none() {
                            *slot = param;
                        }
                    }
                }
            })
            .await;

        let result = self.send(data).await;
        subscription.unsubscribe();
        result?;

        let status = status.lock().map(|slot| *slot).unwrap_or(None);
        if status == Some(DELIVERY_FAILED) {
            tracing::info!(ipv6, "udp transmission failed");
            return Err(Error::TransmissionFailed);
        }
        Ok(())
    }

    /// Resolve a MAC address to its link-local IPv6 address (`SKLL64`)
    pub async fn lookup(&self, mac: &str) -> Result<String> {
        let command = format!("SKLL64 {}\r\n", mac);
        tracing::debug!(command = %printable(command.as_bytes()), "tx");
        let wait = self
            .dispatcher
            .prepare_wait(&[EventType::Ipv6, EventType::Fail], HashMap::new());
        self.write(command.as_bytes()).await?;

        match wait.wait(self.timeout).await {
            Some(event) => match event.payload {
                EventPayload::Ipv6(address) => {
                    tracing::debug!(mac, %address, "SKLL64 resolved");
                    Ok(address)
                }
                EventPayload::Fail { reason } => {
                    tracing::debug!(mac, ?reason, "SKLL64 failed");
                    Err(Error::command(reason))
                }
                other => Err(Error::protocol(format!("unexpected reply {:?}", other))),
            },
            None => {
                tracing::error!(mac, "address resolution timeout");
                Err(Error::timeout("address resolution"))
            }
        }
    }
}
