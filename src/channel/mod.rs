//! Reconnecting publish/subscribe channel.
//!
//! This module provides [`ReconnectingChannel`], a heartbeat-monitored wrapper
//! around one [`Transport`](crate::transport::Transport) link at a time that
//! multiplexes typed messages over it and reconnects after a close.
//!
//! # Architecture
//!
//! ```text
//! ReconnectingChannel (cloneable handle)
//!     │
//!     ├── ChannelInner (Arc<Mutex<..>>)
//!     │   ├── current link + LinkId
//!     │   ├── ChannelState + reconnect_pending + disconnected
//!     │   ├── SubscriptionRegistry   (Tag -> [Subscription])
//!     │   └── TimerTable             (heartbeat, reconnect, grace, user)
//!     │
//!     └── driver::run  (tokio task)
//!         ├── transport events  ──► handle_transport_event
//!         └── next_deadline()   ──► fire_due
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let channel = ReconnectingChannel::new(config, Box::new(WsTransport::new()));
//! channel.subscribe(Tag::IotData, |event| {
//!     if let ChannelEvent::Message(Envelope::IotData { data }) = event {
//!         log::info!("{data:?}");
//!     }
//! });
//! tokio::spawn(driver::run(channel.clone()));
//! ```
//!
//! # State Machine
//!
//! `Connecting -> Open -> Closed -> Connecting`. A manual `connect()` while
//! open passes through `Closed` first, so subscribers of
//! [`Tag::Connected`](crate::envelope::Tag::Connected) always see strictly
//! alternating `true` / `false`. After [`ReconnectingChannel::disconnect`],
//! `Closed` is terminal.

pub mod driver;
pub mod reconnecting;
pub mod registry;
pub mod timers;

use std::fmt;
use std::time::Duration;

use crate::constants;
use crate::envelope::{DecodeError, Envelope};

/// Configuration for a channel instance.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Full endpoint URL, e.g. `ws://localhost:8000/ws`.
    pub endpoint: String,
    /// Identifier sent in the `hello` handshake.
    pub client_name: String,
    /// Interval between heartbeat pings while open.
    pub heartbeat_interval: Duration,
    /// Delay before the reconnect attempt after a close.
    pub reconnect_delay: Duration,
    /// How long an erroring link may stay unclosed before the channel closes it.
    pub error_close_grace: Duration,
}

impl ChannelConfig {
    /// Configuration for `endpoint` with default timings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_name: constants::DEFAULT_CLIENT_NAME.to_string(),
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            reconnect_delay: constants::RECONNECT_DELAY,
            error_close_grace: constants::ERROR_CLOSE_GRACE,
        }
    }
}

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// A link has been opened and is not yet established.
    #[default]
    Connecting,
    /// Established; sends are written to the link.
    Open,
    /// No usable link. Recoverable unless the channel was disconnected.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Local fault reported to subscribers of the `error` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// An inbound frame could not be decoded. The connection stays open.
    Decode(DecodeError),
    /// The transport reported an error.
    Transport(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{e}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
        }
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connectivity changed. Delivered under [`Tag::Connected`](crate::envelope::Tag::Connected).
    Connected(bool),
    /// A decoded inbound message, delivered under its own tag.
    Message(Envelope),
    /// A local fault, delivered under [`Tag::Error`](crate::envelope::Tag::Error).
    Fault(Fault),
}

/// Errors that can occur during channel operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is not open; nothing was written.
    NotConnected,
    /// The link refused the write.
    SendFailed(String),
    /// The envelope could not be serialized.
    Encode(String),
    /// The channel has been shut down with `disconnect()`.
    Disconnected,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Channel is not connected"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::Encode(msg) => write!(f, "Encode failed: {msg}"),
            Self::Disconnected => write!(f, "Channel has been disconnected"),
        }
    }
}

impl std::error::Error for ChannelError {}

// Re-exports
pub use reconnecting::{ReconnectingChannel, WeakChannel};
pub use registry::{Subscription, SubscriptionRegistry};
pub use timers::{TimerId, TimerTable};
