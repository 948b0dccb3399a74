//! In-process gateway double.
//!
//! [`MemoryConnector`] hands out [`MemoryTransport`]s and keeps a
//! [`MemoryGateway`] for each, through which a test (or a demo) plays the
//! gateway: it emits events and inspects what the client sent. Every
//! open, send and disconnect across all links is recorded in one journal
//! so teardown ordering can be asserted.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ConnectionError;
use crate::protocol::{Instruction, Status};
use crate::transport::{Transport, TransportChannel, TransportConnector, TransportEvent};

/// One recorded transport operation. `link` is the index of the tunnel in
/// opening order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Open { link: usize },
    Send { link: usize, instruction: Instruction },
    Disconnect { link: usize },
}

type Journal = Arc<Mutex<Vec<JournalEntry>>>;

#[derive(Debug, Default)]
struct LinkState {
    closed: bool,
}

// ── MemoryConnector ──────────────────────────────────────────────

#[derive(Default)]
struct ConnectorState {
    gateways: Vec<MemoryGateway>,
    refuse_next: Option<ConnectionError>,
}

/// Connector whose tunnels live in memory.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    journal: Journal,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail synchronously with `error`.
    pub fn refuse_next(&self, error: ConnectionError) {
        self.state.lock().refuse_next = Some(error);
    }

    /// Gateway side of every tunnel opened so far, in order.
    pub fn gateways(&self) -> Vec<MemoryGateway> {
        self.state.lock().gateways.clone()
    }

    /// Gateway side of the most recently opened tunnel.
    pub fn last(&self) -> Option<MemoryGateway> {
        self.state.lock().gateways.last().cloned()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }
}

impl TransportConnector for MemoryConnector {
    fn open(&self, url: &Url) -> Result<TransportChannel, ConnectionError> {
        let mut state = self.state.lock();
        if let Some(error) = state.refuse_next.take() {
            return Err(error);
        }

        let link = state.gateways.len();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(LinkState::default()));

        self.journal.lock().push(JournalEntry::Open { link });
        state.gateways.push(MemoryGateway {
            link,
            url: url.clone(),
            events: event_tx,
            state: Arc::clone(&shared),
            journal: Arc::clone(&self.journal),
        });

        Ok(TransportChannel {
            transport: Box::new(MemoryTransport {
                link,
                state: shared,
                journal: Arc::clone(&self.journal),
            }),
            events: event_rx,
        })
    }
}

// ── MemoryGateway ────────────────────────────────────────────────

/// The gateway end of one in-memory tunnel.
#[derive(Clone)]
pub struct MemoryGateway {
    link: usize,
    url: Url,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<Mutex<LinkState>>,
    journal: Journal,
}

impl MemoryGateway {
    /// URL the client asked for.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deliver an event. Returns `false` if the client side is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn open(&self, uuid: &str) -> bool {
        self.emit(TransportEvent::Opened {
            uuid: uuid.to_string(),
        })
    }

    pub fn instruction(&self, instruction: Instruction) -> bool {
        self.emit(TransportEvent::Instruction(instruction))
    }

    pub fn fail(&self, status: Status, message: &str) -> bool {
        self.emit(TransportEvent::Failed(ConnectionError::transport(
            status, message,
        )))
    }

    /// Instructions the client sent on this link, in order.
    pub fn sent(&self) -> Vec<Instruction> {
        self.journal
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Send { link, instruction } if *link == self.link => {
                    Some(instruction.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of times the client called `disconnect` on this link.
    pub fn disconnect_calls(&self) -> usize {
        self.journal
            .lock()
            .iter()
            .filter(|entry| matches!(entry, JournalEntry::Disconnect { link } if *link == self.link))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

// ── MemoryTransport ──────────────────────────────────────────────

/// Client end of one in-memory tunnel.
pub struct MemoryTransport {
    link: usize,
    state: Arc<Mutex<LinkState>>,
    journal: Journal,
}

impl Transport for MemoryTransport {
    fn send(&self, instruction: Instruction) -> Result<(), ConnectionError> {
        if self.state.lock().closed {
            return Err(ConnectionError::transport(
                Status::ResourceClosed,
                "tunnel is closed",
            ));
        }
        self.journal.lock().push(JournalEntry::Send {
            link: self.link,
            instruction,
        });
        Ok(())
    }

    // Every call is journaled, repeated ones included, so callers can be
    // checked for double teardown.
    fn disconnect(&mut self) {
        self.journal
            .lock()
            .push(JournalEntry::Disconnect { link: self.link });
        self.state.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("ws://gw/tunnel").unwrap()
    }

    #[test]
    fn records_sends_and_disconnects() {
        let connector = MemoryConnector::new();
        let mut channel = connector.open(&url()).unwrap();
        channel.transport.send(Instruction::bare("nop")).unwrap();
        channel.transport.disconnect();
        assert!(channel.transport.send(Instruction::bare("nop")).is_err());

        let gateway = connector.last().unwrap();
        assert_eq!(gateway.sent(), vec![Instruction::bare("nop")]);
        assert_eq!(gateway.disconnect_calls(), 1);
        assert!(gateway.is_closed());
        assert_eq!(
            connector.journal(),
            vec![
                JournalEntry::Open { link: 0 },
                JournalEntry::Send {
                    link: 0,
                    instruction: Instruction::bare("nop")
                },
                JournalEntry::Disconnect { link: 0 },
            ]
        );
    }

    #[test]
    fn emit_fails_once_client_dropped() {
        let connector = MemoryConnector::new();
        let channel = connector.open(&url()).unwrap();
        let gateway = connector.last().unwrap();
        assert!(gateway.open("abc"));
        drop(channel);
        assert!(!gateway.open("abc"));
    }

    #[test]
    fn refuse_next_fails_once() {
        let connector = MemoryConnector::new();
        connector.refuse_next(ConnectionError::transport(Status::ServerBusy, "busy"));
        assert!(connector.open(&url()).is_err());
        assert!(connector.open(&url()).is_ok());
        assert_eq!(connector.gateways().len(), 1);
    }
}
