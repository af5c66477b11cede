//! Fan-out of inbound datagrams and session notifications to the outside

use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

use crate::events::{EventDispatcher, EventType, Subscription, WsunEvent};

/// Attribute carrying a datagram's remote port, in decimal
pub const REMOTE_PORT_ATTR: &str = "rport";

/// Attribute carrying the address that raised an event
pub const SENDER_ATTR: &str = "sender";

/// PANA session lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSignal {
    /// A PANA session was established (`EVENT 25`)
    Established,
    /// The coordinator asked to end the session (`EVENT 26`)
    Ending,
    /// The session ended (`EVENT 27`)
    Ended,
    /// The session ended with an error (`EVENT 28`)
    Error,
    /// The session timed out (`EVENT 29`)
    Timeout,
    /// ARIB STD-T108 transmission restriction started (`EVENT 32`)
    RestrictionStarted,
    /// ARIB STD-T108 transmission restriction ended (`EVENT 33`)
    RestrictionEnded,
}

impl TryFrom<EventType> for SessionSignal {
    type Error = EventType;

    fn try_from(event_type: EventType) -> Result<Self, EventType> {
        match event_type {
            EventType::SessionEstablished => Ok(SessionSignal::Established),
            EventType::SessionEnding => Ok(SessionSignal::Ending),
            EventType::SessionEnded => Ok(SessionSignal::Ended),
            EventType::SessionError => Ok(SessionSignal::Error),
            EventType::SessionTimeout => Ok(SessionSignal::Timeout),
            EventType::RestrictionStarted => Ok(SessionSignal::RestrictionStarted),
            EventType::RestrictionEnded => Ok(SessionSignal::RestrictionEnded),
            other => Err(other),
        }
    }
}

fn is_forwarded(event_type: EventType) -> bool {
    event_type == EventType::Datagram || SessionSignal::try_from(event_type).is_ok()
}

/// Republishes selected reader events on the external dispatcher.
///
/// Forwarding only happens while the hub is attached to an open session.
pub struct DispatchHub {
    external: Arc<EventDispatcher>,
    attached: AtomicBool,
}

impl DispatchHub {
    /// Create a detached hub publishing on `external`
    pub fn new(external: Arc<EventDispatcher>) -> Self {
        Self {
            external,
            attached: AtomicBool::new(false),
        }
    }

    /// Start forwarding
    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    /// Stop forwarding and drop every external subscription
    pub async fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
        self.external.clear().await;
    }

    /// True while forwarding
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Offer a reader event; datagrams and session notifications go out
    pub async fn forward(&self, event: &WsunEvent) {
        if !self.is_attached() || !is_forwarded(event.event_type) {
            return;
        }
        if let Ok(signal) = SessionSignal::try_from(event.event_type) {
            tracing::info!(?signal, "session notification");
        }
        self.external.emit(event.clone()).await;
    }

    /// Subscribe to datagrams whose remote port is `port`
    pub async fn subscribe_datagrams<F>(&self, port: u16, callback: F) -> Subscription
    where
        F: Fn(WsunEvent) + Send + Sync + 'static,
    {
        let mut filters = HashMap::new();
        filters.insert(REMOTE_PORT_ATTR.to_string(), port.to_string());
        self.external
            .subscribe(EventType::Datagram, filters, callback)
            .await
    }

    /// The external dispatcher
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.external
    }

    /// Stream of every forwarded event
    pub fn event_stream(&self) -> impl Stream<Item = WsunEvent> + Unpin {
        BroadcastStream::new(self.external.receiver())
            .filter_map(|result| std::future::ready(result.ok()))
    }

    /// Stream of session lifecycle signals
    pub fn signals(&self) -> impl Stream<Item = SessionSignal> + Unpin {
        BroadcastStream::new(self.external.receiver()).filter_map(|result| {
            std::future::ready(
                result
                    .ok()
                    .and_then(|event| SessionSignal::try_from(event.event_type).ok()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use crate::types::Datagram;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn datagram_event(remote_port: u16) -> WsunEvent {
        let datagram = Datagram {
            sender: "FE80:0000:0000:0000:103A:BC45:6DEF:7890".to_string(),
            dest: "FE80:0000:0000:0000:0000:0000:0000:0001".to_string(),
            remote_port,
            local_port: 0x0E1A,
            sender_lla: "123ABC456DEF7890".to_string(),
            secured: true,
            declared_length: 1,
            payload: vec![0x42],
        };
        WsunEvent::new(EventType::Datagram, EventPayload::Datagram(datagram))
            .with_attribute(REMOTE_PORT_ATTR, remote_port.to_string())
    }

    fn session_event(event_type: EventType) -> WsunEvent {
        WsunEvent::new(
            event_type,
            EventPayload::Notification {
                sender: "FE80:0000:0000:0000:103A:BC45:6DEF:7890".to_string(),
                param: None,
            },
        )
    }

    #[test]
    fn test_signal_mapping() {
        assert_eq!(
            SessionSignal::try_from(EventType::SessionEstablished),
            Ok(SessionSignal::Established)
        );
        assert_eq!(
            SessionSignal::try_from(EventType::RestrictionEnded),
            Ok(SessionSignal::RestrictionEnded)
        );
        assert!(SessionSignal::try_from(EventType::ScanComplete).is_err());
        assert!(SessionSignal::try_from(EventType::JoinFailed).is_err());
    }

    #[tokio::test]
    async fn test_detached_hub_forwards_nothing() {
        let hub = DispatchHub::new(Arc::new(EventDispatcher::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = hub
            .subscribe_datagrams(3610, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        hub.forward(&datagram_event(3610)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        hub.attach();
        hub.forward(&datagram_event(3610)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_datagram_port_filter() {
        let hub = DispatchHub::new(Arc::new(EventDispatcher::new()));
        hub.attach();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = hub
            .subscribe_datagrams(3610, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        hub.forward(&datagram_event(716)).await;
        hub.forward(&datagram_event(3610)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_signals_stream() {
        let hub = DispatchHub::new(Arc::new(EventDispatcher::new()));
        hub.attach();
        let mut signals = hub.signals();

        hub.forward(&session_event(EventType::ScanComplete)).await;
        hub.forward(&datagram_event(3610)).await;
        hub.forward(&session_event(EventType::SessionEnded)).await;

        let signal = tokio::time::timeout(Duration::from_millis(100), signals.next())
            .await
            .unwrap();
        assert_eq!(signal, Some(SessionSignal::Ended));
    }

    #[tokio::test]
    async fn test_detach_clears_subscriptions() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let hub = DispatchHub::new(dispatcher.clone());
        hub.attach();
        let _sub = hub.subscribe_datagrams(3610, |_| {}).await;
        assert_eq!(dispatcher.subscription_count().await, 1);

        hub.detach().await;
        assert!(!hub.is_attached());
        assert_eq!(dispatcher.subscription_count().await, 0);
    }
}
