//! Datagram sockets bound to the adaptor's UDP ports

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;

use crate::config::MAX_DGRAM_SIZE;
use crate::events::{EventCallback, EventPayload, Subscription};
use crate::parsing::{is_ipv6, is_mac};
use crate::retry::{retry, RetryPolicy};
use crate::types::SocketMessage;
use crate::Error;
use crate::Result;

/// Retries of a socket send while another datagram is in flight
const SEND_RETRIES: u32 = 3;

/// Back-off multiplier between socket send retries
const SEND_RETRY_FACTOR: u32 = 2;

/// Driver capabilities a socket relies on
#[async_trait]
pub trait AdaptorLink: Send + Sync {
    /// True while a PANA session is up
    async fn is_online(&self) -> bool;

    /// Send one datagram through the driver's single-flight path
    async fn send_datagram(&self, payload: &[u8], port: u16, address: &str) -> Result<()>;

    /// Deliver datagrams whose remote port is `port` to `callback`
    async fn subscribe_datagrams(&self, port: u16, callback: EventCallback) -> Subscription;

    /// Remove the socket from the driver's registry
    async fn deregister_socket(&self, id: u64);
}

fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(Error::validation("The port must be 1 <= and <= 0xffff"));
    }
    Ok(())
}

/// Counts one send in flight for as long as it lives
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A datagram endpoint on the adaptor.
///
/// Created by [`WsunAdaptor::create_socket`](crate::WsunAdaptor::create_socket).
pub struct AdaptorSocket {
    id: u64,
    link: Weak<dyn AdaptorLink>,
    binding: Mutex<Option<(u16, Subscription)>>,
    /// Sends started on this socket and not yet finished
    in_flight: AtomicUsize,
    closing: AtomicBool,
    messages: broadcast::Sender<SocketMessage>,
    retry_delay: Duration,
    close_poll: Duration,
}

impl AdaptorSocket {
    pub(crate) fn new(
        id: u64,
        link: Weak<dyn AdaptorLink>,
        retry_delay: Duration,
        close_poll: Duration,
    ) -> Self {
        let (messages, _) = broadcast::channel(64);
        Self {
            id,
            link,
            binding: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            messages,
            retry_delay,
            close_poll,
        }
    }

    /// Registry id of this socket
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The bound port, if any
    pub async fn local_port(&self) -> Option<u16> {
        self.binding.lock().await.as_ref().map(|(port, _)| *port)
    }

    /// True while any send is in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    fn cannot_send(&self) -> Error {
        tracing::error!(socket = self.id, "send on a closing socket or offline adaptor");
        Error::invalid_state("Invalid state")
    }

    /// Listen for datagrams addressed to `port`
    pub async fn bind(&self, port: u16) -> Result<()> {
        tracing::debug!(socket = self.id, port, "bind");
        validate_port(port)?;

        let mut binding = self.binding.lock().await;
        if binding.is_some() {
            return Err(Error::invalid_state("Already listening the port"));
        }
        let link = self
            .link
            .upgrade()
            .ok_or_else(|| Error::invalid_state("adaptor is gone"))?;

        let messages = self.messages.clone();
        let callback: EventCallback = Box::new(move |event| {
            if let EventPayload::Datagram(datagram) = event.payload {
                let _ = messages.send(SocketMessage::from(datagram));
            }
        });
        let subscription = link.subscribe_datagrams(port, callback).await;
        *binding = Some((port, subscription));
        Ok(())
    }

    /// Send `payload` to `port` at `address` (MAC or IPv6).
    ///
    /// Waits out other sockets' datagrams by retrying.
    pub async fn send(&self, payload: &[u8], port: u16, address: &str) -> Result<()> {
        validate_port(port)?;
        if !is_mac(address) && !is_ipv6(address) {
            return Err(Error::validation(format!(
                "{} must be ipv6 or mac address",
                address
            )));
        }
        if payload.len() > MAX_DGRAM_SIZE {
            return Err(Error::validation(format!(
                "Size of dgram is too large, {}",
                payload.len()
            )));
        }

        let link = match self.link.upgrade() {
            Some(link) if !self.closing.load(Ordering::SeqCst) => link,
            _ => return Err(self.cannot_send()),
        };
        if !link.is_online().await {
            return Err(self.cannot_send());
        }

        let _busy = BusyGuard::enter(&self.in_flight);
        retry(
            RetryPolicy::new(SEND_RETRIES, self.retry_delay, SEND_RETRY_FACTOR),
            |e| matches!(e, Error::SendInProgress),
            || link.send_datagram(payload, port, address),
        )
        .await
    }

    /// Stop listening and leave the driver's registry.
    ///
    /// Completes only after every in-flight send has finished.
    pub async fn close(&self) {
        tracing::debug!(socket = self.id, "close");
        self.closing.store(true, Ordering::SeqCst);
        while self.is_busy() {
            tracing::info!(socket = self.id, "closing socket is pending");
            tokio::time::sleep(self.close_poll).await;
        }

        if let Some((_, subscription)) = self.binding.lock().await.take() {
            subscription.unsubscribe();
        }
        if let Some(link) = self.link.upgrade() {
            link.deregister_socket(self.id).await;
        }
        self.closing.store(false, Ordering::SeqCst);
    }

    /// Receiver for inbound messages
    pub fn messages(&self) -> broadcast::Receiver<SocketMessage> {
        self.messages.subscribe()
    }

    /// Stream of inbound messages
    pub fn message_stream(&self) -> impl Stream<Item = SocketMessage> + Unpin {
        BroadcastStream::new(self.messages.subscribe())
            .filter_map(|result| std::future::ready(result.ok()))
    }
}

impl std::fmt::Debug for AdaptorSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptorSocket")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .field("closing", &self.closing.load(Ordering::SeqCst))
            .finish()
    }
}
