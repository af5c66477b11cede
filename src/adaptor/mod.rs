//! Wi-SUN adaptor driver: session lifecycle and datagram send

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::commands::{datagram_frame, CommandHandler, SharedTransport};
use crate::config::{Config, MAX_DGRAM_SIZE};
use crate::connection::Transport;
use crate::events::*;
use crate::hub::{DispatchHub, SessionSignal};
use crate::parsing::{hex_encode, is_ipv6, is_mac};
use crate::portmap::{PortTable, PortTableReader};
use crate::reader::LineReader;
use crate::retry::{retry, RetryPolicy};
use crate::socket::{AdaptorLink, AdaptorSocket};
use crate::types::{Credentials, DriverState, PanCache, PanDescriptor, MAX_CHANNEL, MIN_CHANNEL};
use crate::Error;
use crate::Result;

#[cfg(feature = "serial")]
mod serial;

/// Retries of a datagram whose delivery the adaptor reported as failed
const TRANSMISSION_RETRIES: u32 = 3;

/// Channel mask covering every channel
const ALL_CHANNELS: u32 = 0xFFFF_FFFF;

/// Releases the driver-wide single-flight flag on every exit path
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Driver internals shared with sockets and background tasks
struct AdaptorInner {
    config: Config,
    transport: SharedTransport,
    /// Internal event bus fed by the line reader
    dispatcher: Arc<EventDispatcher>,
    hub: Arc<DispatchHub>,
    reader: Arc<LineReader>,
    commands: CommandHandler,
    state: RwLock<DriverState>,
    port_table: RwLock<PortTable>,
    sockets: Mutex<Vec<Arc<AdaptorSocket>>>,
    next_socket_id: AtomicU64,
    /// Set while a datagram is in flight anywhere in the driver
    sending: AtomicBool,
    /// Serializes open and close
    lifecycle: Mutex<()>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

/// Driver for a serial-attached Wi-SUN adaptor (SKSTACK IP)
#[derive(Clone)]
pub struct WsunAdaptor {
    inner: Arc<AdaptorInner>,
}

impl WsunAdaptor {
    /// Create a driver over `transport`; nothing is opened until [`open`](Self::open)
    pub fn new(transport: impl Transport + 'static, config: Config) -> Self {
        let transport: Box<dyn Transport> = Box::new(transport);
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        let dispatcher = Arc::new(EventDispatcher::new());
        let hub = Arc::new(DispatchHub::new(Arc::new(EventDispatcher::new())));
        let reader = Arc::new(LineReader::new(dispatcher.clone(), hub.clone()));
        let commands =
            CommandHandler::new(transport.clone(), dispatcher.clone(), config.command_timeout);

        Self {
            inner: Arc::new(AdaptorInner {
                config,
                transport,
                dispatcher,
                hub,
                reader,
                commands,
                state: RwLock::new(DriverState::Closed),
                port_table: RwLock::new(PortTable::default()),
                sockets: Mutex::new(Vec::new()),
                next_socket_id: AtomicU64::new(1),
                sending: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
                read_task: Mutex::new(None),
            }),
        }
    }

    /// Bring the adaptor up and join a coordinator.
    ///
    /// With a `cache` the scan is skipped and the cached coordinator is
    /// joined directly. Returns the joined coordinator, or `None` if no PAN
    /// was found or every join was rejected.
    pub async fn open(
        &self,
        credentials: &Credentials,
        cache: Option<&PanCache>,
    ) -> Result<Option<PanDescriptor>> {
        tracing::debug!("open");
        credentials.validate()?;
        let cached = cache.map(PanDescriptor::try_from).transpose()?;

        let _lifecycle = self.inner.lifecycle.lock().await;
        if *self.inner.state.read().await != DriverState::Closed {
            return Err(Error::invalid_state("adaptor is already open"));
        }

        match self.inner.start(credentials, cached).await {
            Ok(Some(descriptor)) => {
                *self.inner.state.write().await = DriverState::Online;
                tracing::info!(
                    channel = descriptor.channel,
                    pan_id = descriptor.pan_id,
                    addr = %descriptor.addr,
                    "adaptor online"
                );
                Ok(Some(descriptor))
            }
            Ok(None) => {
                self.inner.cleanup().await;
                Ok(None)
            }
            Err(e) => {
                tracing::error!("open failed: {}", e);
                self.inner.cleanup().await;
                Err(e)
            }
        }
    }

    /// End the session and release the transport.
    ///
    /// Open sockets are closed first. Termination problems are logged,
    /// never returned; the driver always ends up closed.
    pub async fn close(&self) -> Result<()> {
        tracing::debug!("close");
        let _lifecycle = self.inner.lifecycle.lock().await;
        if *self.inner.state.read().await == DriverState::Closed {
            return Ok(());
        }

        let sockets: Vec<Arc<AdaptorSocket>> = self.inner.sockets.lock().await.clone();
        for socket in sockets {
            socket.close().await;
        }

        if let Err(e) = self.inner.terminate().await {
            tracing::info!("found an issue while closing: {}", e);
        }
        self.inner.cleanup().await;
        *self.inner.state.write().await = DriverState::Closed;
        Ok(())
    }

    /// True while a PANA session is up
    pub async fn is_online(&self) -> bool {
        *self.inner.state.read().await == DriverState::Online
    }

    /// Current driver state
    pub async fn state(&self) -> DriverState {
        *self.inner.state.read().await
    }

    /// Create a socket registered with this driver
    pub async fn create_socket(&self) -> Arc<AdaptorSocket> {
        let id = self.inner.next_socket_id.fetch_add(1, Ordering::SeqCst);
        let link: Arc<dyn AdaptorLink> = self.inner.clone();
        let socket = Arc::new(AdaptorSocket::new(
            id,
            Arc::downgrade(&link),
            self.inner.config.retry_delay,
            self.inner.config.socket_close_poll,
        ));
        self.inner.sockets.lock().await.push(socket.clone());
        socket
    }

    /// Remove a socket from the registry; closing a socket does this itself
    pub async fn delete_socket(&self, socket: &AdaptorSocket) {
        self.inner.deregister_socket(socket.id()).await;
    }

    /// Number of registered sockets
    pub async fn socket_count(&self) -> usize {
        self.inner.sockets.lock().await.len()
    }

    /// Send one datagram; fails with [`Error::SendInProgress`] if another
    /// is in flight
    pub async fn send_datagram(&self, payload: &[u8], port: u16, address: &str) -> Result<()> {
        self.inner.send_datagram(payload, port, address).await
    }

    /// Subscribe to forwarded events (datagrams and session notifications)
    pub async fn subscribe<F>(
        &self,
        event_type: EventType,
        filters: HashMap<String, String>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(WsunEvent) + Send + Sync + 'static,
    {
        self.inner
            .hub
            .dispatcher()
            .subscribe(event_type, filters, callback)
            .await
    }

    /// Stream of forwarded events
    pub fn event_stream(&self) -> impl Stream<Item = WsunEvent> + Unpin {
        self.inner.hub.event_stream()
    }

    /// Stream of session lifecycle signals
    pub fn signals(&self) -> impl Stream<Item = SessionSignal> + Unpin {
        self.inner.hub.signals()
    }

    /// The port table read while opening
    pub async fn port_table(&self) -> PortTable {
        self.inner.port_table.read().await.clone()
    }

    /// The driver's configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl AdaptorInner {
    /// Everything `open` does after validation
    async fn start(
        &self,
        credentials: &Credentials,
        cached: Option<PanDescriptor>,
    ) -> Result<Option<PanDescriptor>> {
        self.hub.attach();
        self.attach_reader().await;

        {
            let mut transport = self.transport.lock().await;
            transport.open().await?;
            transport.flush().await?;
        }
        self.commands.disable_echo().await?;
        if !self.commands.read_ascii_mode().await? {
            self.commands.write_ascii_mode().await?;
        }
        self.read_port_table().await?;
        self.connect(credentials, cached).await
    }

    /// Route transport bytes through one read task so lines are handled in
    /// wire order
    async fn attach_reader(&self) {
        self.reader.reset().await;
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.transport
            .lock()
            .await
            .set_reader(Box::new(move |data| {
                let _ = tx.send(data);
            }));

        let reader = self.reader.clone();
        let task = tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if let Err(e) = reader.handle_rx(data).await {
                    tracing::error!("Error handling adaptor output: {}", e);
                }
            }
        });
        if let Some(old) = self.read_task.lock().await.replace(task) {
            old.abort();
        }
    }

    async fn read_port_table(&self) -> Result<()> {
        let table = Arc::new(StdMutex::new(PortTableReader::new()));

        let begin = table.clone();
        let begin_sub = self
            .dispatcher
            .subscribe(EventType::PortTableBegin, HashMap::new(), move |_| {
                if let Ok(mut table) = begin.lock() {
                    table.begin();
                }
            })
            .await;
        let numbers = table.clone();
        let number_sub = self
            .dispatcher
            .subscribe(EventType::Number, HashMap::new(), move |event| {
                if let EventPayload::Number(value) = event.payload {
                    if let Ok(mut table) = numbers.lock() {
                        table.push(value);
                    }
                }
            })
            .await;

        let result = self.commands.read_port_table_command().await;
        begin_sub.unsubscribe();
        number_sub.unsubscribe();
        if let Err(e) = result {
            tracing::error!("reading port table failed: {}", e);
            return Err(e);
        }

        let ports = table
            .lock()
            .map(|table| table.finish())
            .map_err(|_| Error::protocol("port table reader poisoned"))?;
        tracing::debug!(ports = ?ports.ports(), "port table");
        *self.port_table.write().await = ports;
        Ok(())
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        cached: Option<PanDescriptor>,
    ) -> Result<Option<PanDescriptor>> {
        self.commands.set_id(&credentials.id).await?;
        self.commands.set_password(&credentials.password).await?;

        let candidates = match cached {
            Some(descriptor) => {
                let ipv6 = self.commands.lookup(&descriptor.addr).await?;
                self.commands.add_neighbor(&ipv6, &descriptor.addr).await?;
                vec![descriptor]
            }
            None => {
                let found = self.scan(self.config.scan_duration, ALL_CHANNELS).await?;
                if found.is_empty() {
                    tracing::info!("No PAN found");
                    return Ok(None);
                }
                found
            }
        };

        for descriptor in candidates {
            if self
                .join(&descriptor.addr, descriptor.channel, u32::from(descriptor.pan_id))
                .await?
            {
                return Ok(Some(descriptor));
            }
        }
        Ok(None)
    }

    /// Active scan; collects descriptors until the scan-complete notification
    async fn scan(&self, duration: Duration, channel_mask: u32) -> Result<Vec<PanDescriptor>> {
        let mut collector = self.dispatcher.prepare_wait(
            &[EventType::PanDescriptor, EventType::ScanComplete],
            HashMap::new(),
        );
        let per_channel = self.commands.scan(duration, channel_mask).await?;
        tracing::debug!(?per_channel, "scanning");

        let deadline = tokio::time::Instant::now() + self.config.scan_timeout(duration);
        let mut descriptors = Vec::new();
        loop {
            match collector.next_until(deadline).await {
                Some(WsunEvent {
                    payload: EventPayload::PanDescriptor(descriptor),
                    ..
                }) => {
                    tracing::debug!(?descriptor, "PAN descriptor");
                    descriptors.push(descriptor);
                }
                Some(_) => {
                    tracing::info!(found = descriptors.len(), "PAN scan complete");
                    return Ok(descriptors);
                }
                None => {
                    tracing::error!("Timeout while scanning PAN");
                    return Err(Error::timeout("PAN scan"));
                }
            }
        }
    }

    /// PANA join; `Ok(false)` when the coordinator rejects us
    async fn join(&self, addr: &str, channel: u8, pan_id: u32) -> Result<bool> {
        tracing::debug!(addr, channel, pan_id, "join");
        if !is_mac(addr) {
            return Err(Error::validation(format!("The '{}' must be mac address", addr)));
        }
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(Error::validation("The channel must be >= 0x21 and <= 0x3c"));
        }
        let pan_id = u16::try_from(pan_id)
            .map_err(|_| Error::validation("The PAN ID must be >= 0 and <= 0xffff"))?;

        self.commands.set_channel(channel).await?;
        self.commands.set_pan_id(pan_id).await?;
        let ipv6 = self.commands.lookup(addr).await?;

        let outcome = self.dispatcher.prepare_wait(
            &[EventType::JoinFailed, EventType::SessionEstablished],
            HashMap::new(),
        );
        self.commands.join(&ipv6).await?;

        match outcome.wait(self.config.connection_timeout).await {
            Some(event) if event.event_type == EventType::SessionEstablished => {
                tracing::info!("A PANA connection established successfully");
                Ok(true)
            }
            Some(_) => {
                tracing::info!("Failed making a PANA connection");
                Ok(false)
            }
            None => {
                tracing::error!("Timeout while making a PANA connection");
                Err(Error::timeout("PANA connection"))
            }
        }
    }

    /// `SKTERM`, then wait for the session to end
    async fn terminate(&self) -> Result<()> {
        let ended = self.dispatcher.prepare_wait(
            &[EventType::SessionEnded, EventType::SessionError],
            HashMap::new(),
        );
        match self.commands.terminate().await {
            Ok(()) => {}
            Err(e) if e.is_no_session() => {
                tracing::info!("no PANA session to terminate");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match ended.wait(self.config.term_timeout).await {
            Some(event) => {
                tracing::debug!(event_type = ?event.event_type, "session terminated");
                Ok(())
            }
            None => Err(Error::timeout("termination")),
        }
    }

    /// Close the transport and drop every listener
    async fn cleanup(&self) {
        self.hub.detach().await;
        if let Err(e) = self.transport.lock().await.close().await {
            tracing::warn!("closing transport failed: {}", e);
        }
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        self.dispatcher.clear().await;
        self.reader.reset().await;
    }

    async fn send_datagram(&self, payload: &[u8], port: u16, address: &str) -> Result<()> {
        tracing::debug!(port, address, payload = %hex_encode(payload), "send datagram");
        if payload.len() > MAX_DGRAM_SIZE {
            return Err(Error::validation(format!(
                "Size of dgram is too large, {}",
                payload.len()
            )));
        }
        if port == 0 {
            return Err(Error::validation("The port must be 1 <= and <= 0xffff"));
        }
        if *self.state.read().await != DriverState::Online {
            return Err(Error::invalid_state("adaptor is not online"));
        }
        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sending in progress");
            return Err(Error::SendInProgress);
        }
        let _flight = FlightGuard(&self.sending);

        let ipv6 = if is_mac(address) {
            self.commands.lookup(address).await?
        } else if is_ipv6(address) {
            address.to_string()
        } else {
            return Err(Error::validation(format!(
                "'{}' must be ipv6 or mac address",
                address
            )));
        };
        let handle = self
            .port_table
            .read()
            .await
            .handle(port)
            .ok_or(Error::NoHandle(port))?;
        let frame = datagram_frame(handle, &ipv6, port, payload)?;

        retry(
            RetryPolicy::new(TRANSMISSION_RETRIES, self.config.retry_delay, 1),
            |e| matches!(e, Error::TransmissionFailed),
            || self.commands.send_to(&frame, &ipv6),
        )
        .await
        .map_err(|e| {
            tracing::error!("senddgram: {}", e);
            e
        })
    }
}

#[async_trait]
impl AdaptorLink for AdaptorInner {
    async fn is_online(&self) -> bool {
        *self.state.read().await == DriverState::Online
    }

    async fn send_datagram(&self, payload: &[u8], port: u16, address: &str) -> Result<()> {
        AdaptorInner::send_datagram(self, payload, port, address).await
    }

    async fn subscribe_datagrams(&self, port: u16, callback: EventCallback) -> Subscription {
        self.hub.subscribe_datagrams(port, callback).await
    }

    async fn deregister_socket(&self, id: u64) {
        self.sockets.lock().await.retain(|s| s.id() != id);
    }
}
