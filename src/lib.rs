//! Sensorlink - telemetry and command channel for IoT sensor boards.
//!
//! This crate provides a reconnecting WebSocket pub/sub channel between a
//! dashboard and an IoT relay server, plus the relay itself and a terminal
//! dashboard built on top of the channel.
//!
//! # Architecture
//!
//! - **Channel** - Reconnecting pub/sub client with heartbeat, owns all state
//! - **Transport** - Socket adapter the channel drives (WebSocket or in-memory)
//! - **Command** - LED/servo commands correlated with their acknowledgments
//! - **Relay** - WebSocket server that acks commands and broadcasts telemetry
//! - **Dashboard** - Terminal view adapter over the channel
//!
//! # Modules
//!
//! - [`channel`] - Reconnecting channel, registry, timers and driver
//! - [`envelope`] - Wire message types
//! - [`command`] - Command/acknowledgment correlation
//! - [`relay`] - Relay server and telemetry simulator
//! - [`config`] - Configuration loading/saving

pub mod channel;
pub mod command;
pub mod config;
pub mod constants;
pub mod dashboard;
pub mod env;
pub mod envelope;
pub mod history;
pub mod relay;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use channel::{ChannelConfig, ChannelError, ChannelEvent, ChannelState, Fault, ReconnectingChannel};
pub use command::{Command, CommandOutcome, PendingCommand, ServoAngle};
pub use config::Config;
pub use envelope::{DecodeError, Envelope, Tag, Telemetry};
pub use relay::{RelayConfig, RelayHandle, RelayServer};
pub use telemetry::{Metric, TelemetryHistory};
