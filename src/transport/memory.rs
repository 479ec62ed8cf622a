//! In-process transport.
//!
//! [`MemoryTransport`] records every link it opens and every frame written to
//! it, and lets the holder of the paired [`MemoryRemote`] play the server:
//! inject lifecycle events, inspect sent frames, observe closes.
//!
//! ```ignore
//! let (transport, remote) = MemoryTransport::pair();
//! let channel = ReconnectingChannel::new(config, Box::new(transport));
//! let link = remote.last_link().unwrap();
//! channel.handle_transport_event(link, TransportEvent::Open);
//! assert_eq!(remote.sent_envelopes(link).len(), 1); // hello
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use super::{Link, LinkId, Transport, TransportEvent, TransportEvents};
use crate::channel::ChannelError;
use crate::envelope::Envelope;

/// Everything known about one opened link.
#[derive(Debug, Clone)]
struct LinkRecord {
    id: LinkId,
    endpoint: String,
    sent: Vec<String>,
    closed: bool,
    events: TransportEvents,
}

#[derive(Debug, Default)]
struct MemoryState {
    links: Vec<LinkRecord>,
    /// When set, writes fail as if the socket had died underneath.
    fail_writes: bool,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport half handed to the channel.
#[derive(Debug)]
pub struct MemoryTransport {
    state: SharedState,
}

/// Server-side view of a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: SharedState,
}

impl MemoryTransport {
    /// Create a transport and its remote control.
    #[must_use]
    pub fn pair() -> (Self, MemoryRemote) {
        let state = SharedState::default();
        (
            Self {
                state: Arc::clone(&state),
            },
            MemoryRemote { state },
        )
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, endpoint: &str, link: LinkId, events: TransportEvents) -> Box<dyn Link> {
        lock(&self.state).links.push(LinkRecord {
            id: link,
            endpoint: endpoint.to_string(),
            sent: Vec::new(),
            closed: false,
            events,
        });
        Box::new(MemoryLink {
            id: link,
            state: Arc::clone(&self.state),
        })
    }
}

/// Link handle returned by [`MemoryTransport::open`].
#[derive(Debug)]
struct MemoryLink {
    id: LinkId,
    state: SharedState,
}

impl Link for MemoryLink {
    fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        let mut state = lock(&self.state);
        let fail_writes = state.fail_writes;
        let Some(record) = state.links.iter_mut().find(|l| l.id == self.id) else {
            return Err(ChannelError::SendFailed(format!("{} unknown", self.id)));
        };
        if record.closed {
            return Err(ChannelError::SendFailed(format!("{} is closed", self.id)));
        }
        if fail_writes {
            return Err(ChannelError::SendFailed(format!("{} write failed", self.id)));
        }
        record.sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(record) = lock(&self.state).links.iter_mut().find(|l| l.id == self.id) {
            record.closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.state)
            .links
            .iter()
            .find(|l| l.id == self.id)
            .map_or(true, |l| l.closed)
    }
}

impl MemoryRemote {
    /// Number of links opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        lock(&self.state).links.len()
    }

    /// Ids of all opened links, oldest first.
    #[must_use]
    pub fn links(&self) -> Vec<LinkId> {
        lock(&self.state).links.iter().map(|l| l.id).collect()
    }

    /// Most recently opened link.
    #[must_use]
    pub fn last_link(&self) -> Option<LinkId> {
        lock(&self.state).links.last().map(|l| l.id)
    }

    /// Endpoint a link was opened against.
    #[must_use]
    pub fn endpoint(&self, link: LinkId) -> Option<String> {
        self.record(link).map(|l| l.endpoint)
    }

    /// Raw frames written to `link`, in order.
    #[must_use]
    pub fn sent(&self, link: LinkId) -> Vec<String> {
        self.record(link).map(|l| l.sent).unwrap_or_default()
    }

    /// Frames written to `link`, decoded. Undecodable frames are skipped.
    #[must_use]
    pub fn sent_envelopes(&self, link: LinkId) -> Vec<Envelope> {
        self.sent(link)
            .iter()
            .filter_map(|text| Envelope::decode(text).ok())
            .collect()
    }

    /// Frames written across every link, in link order.
    #[must_use]
    pub fn all_sent(&self) -> Vec<String> {
        lock(&self.state)
            .links
            .iter()
            .flat_map(|l| l.sent.iter().cloned())
            .collect()
    }

    /// Whether the channel closed `link` (or it was never opened).
    #[must_use]
    pub fn is_closed(&self, link: LinkId) -> bool {
        self.record(link).map_or(true, |l| l.closed)
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Push a lifecycle event into the channel's queue, as a real transport would.
    ///
    /// Returns `false` if the link is unknown or the queue has been dropped.
    pub fn emit(&self, link: LinkId, event: TransportEvent) -> bool {
        let Some(record) = self.record(link) else {
            return false;
        };
        if matches!(event, TransportEvent::Close { .. }) {
            if let Some(l) = lock(&self.state).links.iter_mut().find(|l| l.id == link) {
                l.closed = true;
            }
        }
        record.events.send((link, event)).is_ok()
    }

    fn record(&self, link: LinkId) -> Option<LinkRecord> {
        lock(&self.state).links.iter().find(|l| l.id == link).cloned()
    }
}
