//! Line reader for the adaptor's text protocol
//!
//! Raw transport bytes are split into lines, each line is classified into a
//! [`WsunEvent`] and emitted on the internal dispatcher.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::events::*;
use crate::hub::{DispatchHub, REMOTE_PORT_ATTR, SENDER_ATTR};
use crate::pandesc::PanDescriptorAssembler;
use crate::parsing::*;
use crate::types::Datagram;
use crate::{Error, Result};

/// Longest unterminated line kept before the buffer is discarded
pub const MAX_LINE_LEN: usize = 8192;

fn is_line_end(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

fn parse_fail_reason(token: &str) -> Option<u8> {
    let code = token.strip_prefix("ER").unwrap_or(token);
    code.parse().ok()
}

fn parse_notification(tokens: &[&str]) -> Option<WsunEvent> {
    if tokens.len() < 3 {
        tracing::debug!(?tokens, "short EVENT line");
        return None;
    }
    let Ok(code) = u8::from_str_radix(tokens[1], 16) else {
        tracing::debug!(code = tokens[1], "unparsable EVENT code");
        return None;
    };
    let sender = tokens[2];

    let (event_type, param) = match EventType::from_code(code) {
        Some(EventType::DeliveryStatus) => {
            if tokens.len() != 4 {
                tracing::warn!(?tokens, "erroneous EVENT 21 received");
                return None;
            }
            let param = u8::from_str_radix(tokens[3], 16).ok();
            tracing::debug!(sender, ?param, "delivery status");
            (EventType::DeliveryStatus, param)
        }
        Some(event_type) => {
            tracing::debug!(code, sender, "EVENT received");
            (event_type, None)
        }
        None => {
            tracing::debug!(code, sender, "ignoring EVENT");
            return None;
        }
    };

    Some(
        WsunEvent::new(
            event_type,
            EventPayload::Notification {
                sender: sender.to_string(),
                param,
            },
        )
        .with_attribute(SENDER_ATTR, sender),
    )
}

fn datagram_from_tokens(tokens: &[&str]) -> Result<Datagram> {
    let port = |s: &str| {
        u16::from_str_radix(s, 16).map_err(|_| Error::protocol(format!("bad port '{}'", s)))
    };
    let secured: u8 = tokens[6]
        .parse()
        .map_err(|_| Error::protocol("bad secured flag"))?;
    let declared_length = usize::from_str_radix(tokens[7], 16)
        .map_err(|_| Error::protocol("bad datagram length"))?;

    Ok(Datagram {
        sender: tokens[1].to_string(),
        dest: tokens[2].to_string(),
        remote_port: port(tokens[3])?,
        local_port: port(tokens[4])?,
        sender_lla: tokens[5].to_string(),
        secured: secured != 0,
        declared_length,
        payload: hex_decode(tokens[8])?,
    })
}

fn parse_datagram(tokens: &[&str]) -> Option<WsunEvent> {
    if tokens.len() != 9 {
        tracing::warn!(count = tokens.len(), "ERXUDP with unexpected token count");
        return None;
    }
    let parsed = datagram_from_tokens(tokens);

    match parsed {
        Ok(datagram) => {
            let rport = datagram.remote_port.to_string();
            let sender = datagram.sender.clone();
            Some(
                WsunEvent::new(EventType::Datagram, EventPayload::Datagram(datagram))
                    .with_attribute(REMOTE_PORT_ATTR, rport)
                    .with_attribute(SENDER_ATTR, sender),
            )
        }
        Err(e) => {
            tracing::warn!("dropping ERXUDP: {}", e);
            None
        }
    }
}

/// Classify one line. Returns `None` for lines outside the grammar.
///
/// The grammars overlap, so the checks run in a fixed order: descriptor
/// parameter, decimal number, IPv6 address, then keyword lines.
pub fn classify(line: &str) -> Option<WsunEvent> {
    if is_pandesc_param(line) {
        let param = line[2..].to_string();
        return Some(WsunEvent::new(EventType::Param, EventPayload::Param(param)));
    }
    if is_number(line) {
        let value = line.parse::<u64>().ok();
        if value.is_none() {
            tracing::debug!(line, "number out of range");
        }
        return Some(WsunEvent::new(EventType::Number, EventPayload::Number(value)));
    }
    if is_ipv6(line) {
        return Some(WsunEvent::new(
            EventType::Ipv6,
            EventPayload::Ipv6(line.to_string()),
        ));
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.first().copied()? {
        "OK" => {
            let mode = tokens.get(1).and_then(|m| u32::from_str_radix(m, 16).ok());
            Some(WsunEvent::ok(mode))
        }
        "FAIL" => {
            let reason = tokens.get(1).and_then(|r| parse_fail_reason(r));
            tracing::info!(?reason, "command fail received");
            Some(WsunEvent::fail(reason))
        }
        "EVENT" => parse_notification(&tokens),
        "ERXUDP" => parse_datagram(&tokens),
        "EPANDESC" => Some(WsunEvent::new(EventType::PanDescBegin, EventPayload::None)),
        "EPORT" => Some(WsunEvent::new(EventType::PortTableBegin, EventPayload::None)),
        _ => None,
    }
}

/// Line reader that splits incoming bytes and emits events
pub struct LineReader {
    /// Internal event dispatcher
    dispatcher: Arc<EventDispatcher>,
    /// Forwarding to external subscribers
    hub: Arc<DispatchHub>,
    /// Descriptor being built from an `EPANDESC` dump
    assembler: Mutex<PanDescriptorAssembler>,
    /// Bytes received since the last line end
    buffer: Mutex<BytesMut>,
}

impl LineReader {
    /// Create a new line reader
    pub fn new(dispatcher: Arc<EventDispatcher>, hub: Arc<DispatchHub>) -> Self {
        Self {
            dispatcher,
            hub,
            assembler: Mutex::new(PanDescriptorAssembler::new()),
            buffer: Mutex::new(BytesMut::with_capacity(1024)),
        }
    }

    /// Drop any partial line and descriptor
    pub async fn reset(&self) {
        self.buffer.lock().await.clear();
        self.assembler.lock().await.reset();
    }

    /// Handle received bytes
    pub async fn handle_rx(&self, data: Vec<u8>) -> Result<()> {
        let lines = {
            let mut buffer = self.buffer.lock().await;
            buffer.extend_from_slice(&data);

            let mut lines = Vec::new();
            while let Some(end) = buffer.iter().position(|&b| is_line_end(b)) {
                let line = buffer.split_to(end);
                let skip = buffer.iter().take_while(|&&b| is_line_end(b)).count();
                buffer.advance(skip);
                if !line.is_empty() {
                    lines.push(String::from_utf8_lossy(&line).into_owned());
                }
            }

            if buffer.len() > MAX_LINE_LEN {
                tracing::warn!(len = buffer.len(), "discarding unterminated input");
                buffer.clear();
            }
            lines
        };

        for line in lines {
            self.handle_line(&line).await;
        }
        Ok(())
    }

    /// Classify and emit a single line
    pub async fn handle_line(&self, line: &str) {
        tracing::debug!(line, "rx");
        let Some(event) = classify(line) else {
            return;
        };

        let descriptor = {
            let mut assembler = self.assembler.lock().await;
            match &event.payload {
                EventPayload::Param(param) => assembler.feed(param),
                _ => {
                    if matches!(
                        event.event_type,
                        EventType::PanDescBegin | EventType::Number | EventType::Ipv6
                    ) {
                        assembler.reset();
                    }
                    None
                }
            }
        };

        self.dispatcher.emit(event.clone()).await;
        self.hub.forward(&event).await;

        if let Some(descriptor) = descriptor {
            let event = WsunEvent::new(
                EventType::PanDescriptor,
                EventPayload::PanDescriptor(descriptor),
            );
            self.dispatcher.emit(event).await;
        }
    }
}
