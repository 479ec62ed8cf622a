//! Transport primitive abstraction.
//!
//! A [`Transport`] opens links to a fixed endpoint. Each link is identified by
//! a [`LinkId`] and reports its lifecycle as [`TransportEvent`]s pushed into a
//! shared event queue:
//!
//! ```text
//! Transport::open(endpoint, link, events) ──► Box<dyn Link>
//!                                               │
//!        events ◄── (link, Open | Message | Close | Error)
//! ```
//!
//! The channel hands the receiving end of the queue to its driver, so every
//! lifecycle callback runs on the driver's logical thread. Tagging events with
//! the link id lets the channel ignore anything a superseded link reports.
//!
//! Two implementations ship with the crate:
//!
//! - [`ws::WsTransport`] - tokio-tungstenite WebSocket client
//! - [`memory::MemoryTransport`] - in-process transport for tests and embedding

pub mod memory;
pub mod ws;

use std::fmt;

use tokio::sync::mpsc;

use crate::channel::ChannelError;

/// Identifies one physical connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Lifecycle event reported by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Open,
    /// A text frame was received.
    Message(String),
    /// Connection closed (possibly by the remote, possibly never opened).
    Close {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
    /// A transport or protocol error occurred.
    Error(String),
}

/// Sending half of the transport event queue.
pub type TransportEvents = mpsc::UnboundedSender<(LinkId, TransportEvent)>;

/// Receiving half of the transport event queue.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<(LinkId, TransportEvent)>;

/// Factory for links to an endpoint.
///
/// `open` must not block: connection setup happens in the background and is
/// reported through `events`.
pub trait Transport: Send {
    /// Start opening a new link.
    fn open(&mut self, endpoint: &str, link: LinkId, events: TransportEvents) -> Box<dyn Link>;
}

/// One live (or closing) connection.
pub trait Link: Send {
    /// Queue a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::SendFailed` if the link can no longer accept writes.
    fn send_text(&mut self, text: &str) -> Result<(), ChannelError>;

    /// Begin closing the link. Idempotent.
    fn close(&mut self);

    /// Whether the link has finished or been asked to close.
    fn is_closed(&self) -> bool;
}
