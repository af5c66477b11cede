//! Event system for the adaptor line protocol
//!
//! The reader emits events as lines are classified. Users can subscribe to
//! specific event types with optional attribute filtering, or arm a
//! single-shot [`PendingWait`] before issuing a command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::Instant;

use crate::types::{Datagram, PanDescriptor};

/// Event types produced by the line reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Command replies
    Ok,
    Fail,

    // Bare value lines
    Param,
    Number,
    Ipv6,

    // Multi-line dump markers
    PanDescBegin,
    PortTableBegin,

    // Assembled records
    PanDescriptor,
    Datagram,

    // EVENT notifications
    BeaconReceived,
    DeliveryStatus,
    ScanComplete,
    JoinFailed,
    SessionEstablished,
    SessionEnding,
    SessionEnded,
    SessionError,
    SessionTimeout,
    RestrictionStarted,
    RestrictionEnded,
}

impl EventType {
    /// Map an `EVENT` code to its event type
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x20 => Some(EventType::BeaconReceived),
            0x21 => Some(EventType::DeliveryStatus),
            0x22 => Some(EventType::ScanComplete),
            0x24 => Some(EventType::JoinFailed),
            0x25 => Some(EventType::SessionEstablished),
            0x26 => Some(EventType::SessionEnding),
            0x27 => Some(EventType::SessionEnded),
            0x28 => Some(EventType::SessionError),
            0x29 => Some(EventType::SessionTimeout),
            0x32 => Some(EventType::RestrictionStarted),
            0x33 => Some(EventType::RestrictionEnded),
            _ => None,
        }
    }

    /// The `EVENT` code of this type, if it is a notification
    pub fn code(&self) -> Option<u8> {
        match self {
            EventType::BeaconReceived => Some(0x20),
            EventType::DeliveryStatus => Some(0x21),
            EventType::ScanComplete => Some(0x22),
            EventType::JoinFailed => Some(0x24),
            EventType::SessionEstablished => Some(0x25),
            EventType::SessionEnding => Some(0x26),
            EventType::SessionEnded => Some(0x27),
            EventType::SessionError => Some(0x28),
            EventType::SessionTimeout => Some(0x29),
            EventType::RestrictionStarted => Some(0x32),
            EventType::RestrictionEnded => Some(0x33),
            _ => None,
        }
    }
}

/// Payload data for events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// No payload
    None,
    /// `Key:Value` text of a descriptor parameter, indentation removed
    Param(String),
    /// Decimal number line; `None` when it does not fit a `u64`
    Number(Option<u64>),
    /// IPv6 address line
    Ipv6(String),
    /// `OK` reply with optional mode
    Ok { mode: Option<u32> },
    /// `FAIL` reply with optional reason
    Fail { reason: Option<u8> },
    /// `EVENT` notification
    Notification {
        /// Address of the node that raised the notification
        sender: String,
        /// Optional parameter (delivery status uses 0 for success, 1 for failure)
        param: Option<u8>,
    },
    /// Received datagram
    Datagram(Datagram),
    /// Assembled PAN descriptor
    PanDescriptor(PanDescriptor),
}

/// An event emitted by the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsunEvent {
    /// Event type
    pub event_type: EventType,
    /// Event payload
    pub payload: EventPayload,
    /// Filterable attributes
    pub attributes: HashMap<String, String>,
}

impl WsunEvent {
    /// Create a new event
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_type,
            payload,
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute to the event
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Create an OK event
    pub fn ok(mode: Option<u32>) -> Self {
        Self::new(EventType::Ok, EventPayload::Ok { mode })
    }

    /// Create a FAIL event
    pub fn fail(reason: Option<u8>) -> Self {
        Self::new(EventType::Fail, EventPayload::Fail { reason })
    }

    /// Check if this event matches the given filters
    pub fn matches_filters(&self, filters: &HashMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(k, v)| self.attributes.get(k) == Some(v))
    }
}

/// Subscription handle returned when subscribing to events
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    unsubscribe_tx: mpsc::UnboundedSender<u64>,
}

impl Subscription {
    /// Unsubscribe from events; takes effect before the next emit
    pub fn unsubscribe(self) {
        let _ = self.unsubscribe_tx.send(self.id);
    }
}

/// Callback type for event subscriptions
pub type EventCallback = Box<dyn Fn(WsunEvent) + Send + Sync>;

struct SubscriptionEntry {
    id: u64,
    event_type: EventType,
    filters: HashMap<String, String>,
    callback: EventCallback,
}

/// A single-shot wait armed before the command that triggers it is written.
///
/// Dropping the wait detaches it; events emitted afterwards are not observed.
pub struct PendingWait {
    rx: broadcast::Receiver<WsunEvent>,
    event_types: Vec<EventType>,
    filters: HashMap<String, String>,
}

impl PendingWait {
    fn accepts(&self, event: &WsunEvent) -> bool {
        self.event_types.contains(&event.event_type) && event.matches_filters(&self.filters)
    }

    /// Next matching event, or `None` once the dispatcher is gone
    pub async fn next(&mut self) -> Option<WsunEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event wait lagged behind the reader");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event, giving up at `deadline`
    pub async fn next_until(&mut self, deadline: Instant) -> Option<WsunEvent> {
        tokio::time::timeout_at(deadline, self.next())
            .await
            .ok()
            .flatten()
    }

    /// Consume the wait, resolving with the first matching event within `timeout`
    pub async fn wait(mut self, timeout: Duration) -> Option<WsunEvent> {
        tokio::time::timeout(timeout, self.next())
            .await
            .ok()
            .flatten()
    }
}

/// Event dispatcher for managing subscriptions and event distribution
pub struct EventDispatcher {
    subscriptions: Arc<RwLock<Vec<SubscriptionEntry>>>,
    next_id: AtomicU64,
    broadcast_tx: broadcast::Sender<WsunEvent>,
    unsubscribe_tx: mpsc::UnboundedSender<u64>,
    unsubscribe_rx: Mutex<mpsc::UnboundedReceiver<u64>>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::unbounded_channel();

        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            broadcast_tx,
            unsubscribe_tx,
            unsubscribe_rx: Mutex::new(unsubscribe_rx),
        }
    }

    /// Subscribe to events of a specific type
    pub async fn subscribe<F>(
        &self,
        event_type: EventType,
        filters: HashMap<String, String>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(WsunEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let entry = SubscriptionEntry {
            id,
            event_type,
            filters,
            callback: Box::new(callback),
        };

        self.subscriptions.write().await.push(entry);

        Subscription {
            id,
            unsubscribe_tx: self.unsubscribe_tx.clone(),
        }
    }

    async fn drain_unsubscribed(&self) {
        let ids: Vec<u64> = {
            let mut rx = self.unsubscribe_rx.lock().await;
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        if !ids.is_empty() {
            self.subscriptions
                .write()
                .await
                .retain(|s| !ids.contains(&s.id));
        }
    }

    /// Emit an event to all matching subscribers
    pub async fn emit(&self, event: WsunEvent) {
        self.drain_unsubscribed().await;

        let subs = self.subscriptions.read().await;
        for sub in subs.iter() {
            if sub.event_type == event.event_type && event.matches_filters(&sub.filters) {
                (sub.callback)(event.clone());
            }
        }
        drop(subs);

        // Also broadcast for pending waits and streams
        let _ = self.broadcast_tx.send(event);
    }

    /// Arm a single-shot wait for any of `event_types`
    pub fn prepare_wait(
        &self,
        event_types: &[EventType],
        filters: HashMap<String, String>,
    ) -> PendingWait {
        PendingWait {
            rx: self.broadcast_tx.subscribe(),
            event_types: event_types.to_vec(),
            filters,
        }
    }

    /// Drop every callback subscription
    pub async fn clear(&self) {
        self.drain_unsubscribed().await;
        self.subscriptions.write().await.clear();
    }

    /// Number of live callback subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.drain_unsubscribed().await;
        self.subscriptions.read().await.len()
    }

    /// Get a broadcast receiver for events
    pub fn receiver(&self) -> broadcast::Receiver<WsunEvent> {
        self.broadcast_tx.subscribe()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
