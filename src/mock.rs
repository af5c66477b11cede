//! Scripted adaptor for tests.
//!
//! [`MockTransport`] answers every command the driver writes the way an
//! SKSTACK adaptor would, delivering replies through the reader callback.
//! [`MockHandle`] inspects what was written and injects unsolicited lines.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::commands::CommandHandler;
use crate::connection::{DataCallback, Transport};
use crate::error::Error;
use crate::events::EventDispatcher;
use crate::hub::DispatchHub;
use crate::reader::LineReader;
use crate::Result;

/// Coordinator the simulated scan finds
pub const COORDINATOR_MAC: &str = "123ABC456DEF7890";
/// Its link-local address
pub const COORDINATOR_IPV6: &str = "FE80:0000:0000:0000:103A:BC45:6DEF:7890";
/// Second coordinator reported when [`MockBehavior::extra_pan`] is set
pub const SECOND_COORDINATOR_MAC: &str = "123ABC456DEF7891";
/// Its link-local address
pub const SECOND_COORDINATOR_IPV6: &str = "FE80:0000:0000:0000:103A:BC45:6DEF:7891";
/// Ports the simulated adaptor reports in its port table
pub const OPEN_PORTS: [u16; 6] = [3610, 716, 0, 0, 0, 0];

/// How the simulated adaptor misbehaves
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Scan completes without finding a coordinator
    pub no_pan: bool,
    /// Scan also finds [`SECOND_COORDINATOR_MAC`] on channel 0x22
    pub extra_pan: bool,
    /// `SKSCAN` is acknowledged but the scan never completes
    pub silent_scan: bool,
    /// `SKJOIN` ends with `EVENT 24`
    pub reject_join: bool,
    /// Only the first `SKJOIN` ends with `EVENT 24`
    pub reject_first_join: bool,
    /// `SKJOIN` is acknowledged but the join never settles
    pub silent_join: bool,
    /// `SKTERM` answers `FAIL ER10`
    pub no_session_on_term: bool,
    /// `SKTERM` is acknowledged but never ends the session
    pub silent_term: bool,
    /// No replies at all
    pub silent: bool,
    /// `ROPT` reports ASCII mode already set
    pub ascii_mode: bool,
    /// Number of `SKSENDTO`s answered with a failed delivery status
    pub udp_failures: usize,
    /// Commands starting with this prefix answer `FAIL ER05`
    pub fail_command: Option<&'static str>,
}

#[derive(Default)]
struct MockState {
    behavior: MockBehavior,
    callback: Option<DataCallback>,
    open: bool,
    open_count: usize,
    close_count: usize,
    flush_count: usize,
    written: Vec<String>,
}

impl MockState {
    fn deliver(&self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        if let Some(cb) = self.callback.as_ref() {
            let mut bytes = lines.join("\r\n").into_bytes();
            bytes.extend_from_slice(b"\r\n");
            cb(bytes);
        }
    }
}

/// Link-local address an adaptor derives from a MAC address
pub fn link_local(mac: &str) -> Option<String> {
    if !crate::parsing::is_mac(mac) {
        return None;
    }
    let first = u8::from_str_radix(&mac[..2], 16).ok()? ^ 0x02;
    let iid = format!("{:02X}{}", first, mac[2..].to_ascii_uppercase());
    let groups: Vec<&str> = (0..4).map(|i| &iid[i * 4..i * 4 + 4]).collect();
    Some(format!("FE80:0000:0000:0000:{}", groups.join(":")))
}

fn pandesc(channel: u8, pan_id: u16, ipv6: &str, mac: &str) -> Vec<String> {
    let params = [
        format!("Channel:{:02X}", channel),
        "Channel Page:09".to_string(),
        format!("Pan ID:{:04X}", pan_id),
        format!("Addr:{}", mac),
        "LQI:E1".to_string(),
        "PairID:00112233".to_string(),
    ];
    let mut lines = vec![format!("EVENT 20 {}", ipv6), "EPANDESC".to_string()];
    lines.extend(params.into_iter().map(|p| format!("  {}", p)));
    lines
}

fn replies(behavior: &mut MockBehavior, written: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(written);
    let command = text.trim_end_matches(&['\r', '\n'][..]);
    let tokens: Vec<&str> = command.split(' ').collect();
    let ok = || "OK".to_string();

    if behavior.silent {
        return vec![];
    }
    if let Some(prefix) = behavior.fail_command {
        if command.starts_with(prefix) {
            return vec!["FAIL ER05".to_string()];
        }
    }

    match tokens[0] {
        "SKSREG" | "SKSETRBID" | "SKSETPWD" | "SKADDNBR" => vec![ok()],
        "ROPT" => vec![if behavior.ascii_mode { "OK 01" } else { "OK 00" }.to_string()],
        "WOPT" => {
            behavior.ascii_mode = true;
            vec![ok()]
        }
        "SKTABLE" => {
            let mut lines = vec!["EPORT".to_string()];
            lines.extend(OPEN_PORTS.iter().map(|p| p.to_string()));
            lines.push(String::new());
            lines.push(ok());
            lines
        }
        "SKLL64" => match tokens.get(1).and_then(|mac| link_local(mac)) {
            Some(ipv6) => vec![ipv6],
            None => vec!["FAIL ER06".to_string()],
        },
        "SKSCAN" => {
            let mut lines = vec![ok()];
            if behavior.silent_scan {
                return lines;
            }
            if !behavior.no_pan {
                lines.extend(pandesc(0x21, 0x8888, COORDINATOR_IPV6, COORDINATOR_MAC));
                if behavior.extra_pan {
                    lines.extend(pandesc(
                        0x22,
                        0x9999,
                        SECOND_COORDINATOR_IPV6,
                        SECOND_COORDINATOR_MAC,
                    ));
                }
            }
            lines.push("EVENT 22 FE80:0000:0000:0000:021D:1290:0003:C890".to_string());
            lines
        }
        "SKJOIN" => {
            let target = tokens.get(1).copied().unwrap_or_default();
            if behavior.silent_join {
                return vec![ok()];
            }
            let rejected = behavior.reject_join || behavior.reject_first_join;
            behavior.reject_first_join = false;
            let code = if rejected { 24 } else { 25 };
            vec![ok(), format!("EVENT {} {}", code, target)]
        }
        "SKSENDTO" => {
            let dest = tokens.get(2).copied().unwrap_or_default();
            let status = if behavior.udp_failures > 0 {
                behavior.udp_failures -= 1;
                "01"
            } else {
                "00"
            };
            vec![format!("EVENT 21 {} {}", dest, status), ok()]
        }
        "SKTERM" => {
            if behavior.no_session_on_term {
                vec!["FAIL ER10".to_string()]
            } else if behavior.silent_term {
                vec![ok()]
            } else {
                vec![ok(), format!("EVENT 27 {}", COORDINATOR_IPV6)]
            }
        }
        _ => vec!["FAIL ER04".to_string()],
    }
}

/// A transport that behaves like an attached adaptor
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Inspection and injection handle for a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a well-behaved adaptor
    pub fn new() -> (Self, MockHandle) {
        Self::with_behavior(MockBehavior::default())
    }

    /// Create an adaptor with the given quirks
    pub fn with_behavior(behavior: MockBehavior) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            behavior,
            ..MockState::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.open = true;
        state.open_count += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(Error::NotConnected);
        }
        state.flush_count += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.open = false;
        state.close_count += 1;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(Error::NotConnected);
        }
        let text = String::from_utf8_lossy(data);
        state.written.push(text.trim_end_matches(&['\r', '\n'][..]).to_string());
        let lines = replies(&mut state.behavior, data);
        state.deliver(&lines);
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn set_reader(&mut self, callback: DataCallback) {
        lock(&self.state).callback = Some(callback);
    }
}

impl MockHandle {
    /// Every command written so far, line terminators removed
    pub fn written(&self) -> Vec<String> {
        lock(&self.state).written.clone()
    }

    /// Number of written commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.state)
            .written
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Deliver an unsolicited line to the driver
    pub fn inject(&self, line: &str) {
        lock(&self.state).deliver(&[line.to_string()]);
    }

    /// Change the adaptor's behavior mid-test
    pub fn set_behavior(&self, behavior: MockBehavior) {
        lock(&self.state).behavior = behavior;
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Number of times the transport was opened
    pub fn open_count(&self) -> usize {
        lock(&self.state).open_count
    }

    /// Number of times the transport was closed
    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    /// Number of times the transport was flushed
    pub fn flush_count(&self) -> usize {
        lock(&self.state).flush_count
    }
}

/// A command handler wired to a simulated adaptor through a reader task,
/// the way the driver wires it
pub async fn command_handler(behavior: MockBehavior) -> (CommandHandler, MockHandle) {
    let (mut transport, handle) = MockTransport::with_behavior(behavior);
    let dispatcher = Arc::new(EventDispatcher::new());
    let hub = Arc::new(DispatchHub::new(Arc::new(EventDispatcher::new())));
    let reader = Arc::new(LineReader::new(dispatcher.clone(), hub));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
    transport.set_reader(Box::new(move |data| {
        let _ = tx.send(data);
    }));
    let _ = transport.open().await;
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let _ = reader.handle_rx(data).await;
        }
    });

    let transport: Box<dyn Transport> = Box::new(transport);
    (
        CommandHandler::new(
            Arc::new(tokio::sync::Mutex::new(transport)),
            dispatcher,
            Duration::from_millis(100),
        ),
        handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_local() {
        assert_eq!(link_local(COORDINATOR_MAC).as_deref(), Some(COORDINATOR_IPV6));
        assert_eq!(
            link_local(SECOND_COORDINATOR_MAC).as_deref(),
            Some(SECOND_COORDINATOR_IPV6)
        );
        assert_eq!(link_local("nope"), None);
    }

    #[test]
    fn test_scripted_replies() {
        let mut behavior = MockBehavior::default();
        assert_eq!(replies(&mut behavior, b"SKSREG SFE 0\r\n"), vec!["OK"]);
        assert_eq!(replies(&mut behavior, b"ROPT\r"), vec!["OK 00"]);
        replies(&mut behavior, b"WOPT 01\r");
        assert_eq!(replies(&mut behavior, b"ROPT\r"), vec!["OK 01"]);
        assert_eq!(replies(&mut behavior, b"SKVER\r\n"), vec!["FAIL ER04"]);
    }

    #[tokio::test]
    async fn test_write_requires_open() {
        let (mut transport, handle) = MockTransport::new();
        assert!(transport.write(b"SKTERM\r\n").await.is_err());
        transport.open().await.unwrap();
        transport.write(b"SKTERM\r\n").await.unwrap();
        assert_eq!(handle.written(), vec!["SKTERM"]);
    }
}
