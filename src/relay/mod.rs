//! Relay server: the backend side of the channel contract.
//!
//! Accepts dashboard WebSocket connections on one path, greets each client,
//! pings it periodically, answers `hello`, acknowledges actuator commands and
//! fans telemetry out to every open connection.
//!
//! # Architecture
//!
//! ```text
//! RelayServer::run
//!     └── accept loop ──► serve_client (one task per connection)
//!                              ├── inbound frames  ──► respond() ──► sink
//!                              ├── outbound queue  ◄── RelayHandle::broadcast
//!                              └── ping interval
//! ```
//!
//! Shutdown is cooperative through a [`CancellationToken`]: the accept loop
//! stops and every client task sends a close frame and exits.

pub mod simulator;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::command::{Command, ServoAngle};
use crate::constants;
use crate::envelope::{now_millis, DecodeError, Envelope, Telemetry};

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address, e.g. `0.0.0.0:8000`.
    pub bind: String,
    /// Only upgrades on this path are accepted.
    pub endpoint_path: String,
    /// Interval between server pings to each client.
    pub ping_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: constants::DEFAULT_BIND.to_string(),
            endpoint_path: constants::DEFAULT_ENDPOINT_PATH.to_string(),
            ping_interval: constants::RELAY_PING_INTERVAL,
        }
    }
}

/// Callback invoked for every actuator command before it is acknowledged.
pub type CommandHook = Arc<dyn Fn(Command) + Send + Sync>;

type ClientMap = Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>>;

/// Cloneable handle for pushing data to connected clients.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    clients: ClientMap,
    local_addr: SocketAddr,
}

impl RelayHandle {
    fn clients(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<String>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `iot_data` to every open client. Returns how many were reached.
    pub fn broadcast(&self, data: Telemetry) -> usize {
        let Some(text) = encode(&Envelope::IotData { data }) else {
            return 0;
        };
        self.clients()
            .values()
            .filter(|tx| tx.send(text.clone()).is_ok())
            .count()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// WebSocket relay server.
pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
    handle: RelayHandle,
    hook: Option<CommandHook>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("handle", &self.handle)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl RelayServer {
    /// Bind the listen socket.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read local address")?;
        info!("[relay] Listening on ws://{local_addr}{}", config.endpoint_path);

        Ok(Self {
            listener,
            config,
            handle: RelayHandle {
                clients: ClientMap::default(),
                local_addr,
            },
            hook: None,
        })
    }

    /// Handle for broadcasting and inspecting clients.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Install the command hook, replacing any previous one.
    pub fn on_command(&mut self, hook: impl Fn(Command) + Send + Sync + 'static) {
        self.hook = Some(Arc::new(hook));
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                result = self.listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("[relay] Accept error: {e}");
                        continue;
                    }
                },
                () = shutdown.cancelled() => {
                    debug!("[relay] Accept loop stopping");
                    break;
                }
            };

            tokio::spawn(serve_client(
                stream,
                peer,
                self.config.clone(),
                self.handle.clone(),
                self.hook.clone(),
                shutdown.child_token(),
            ));
        }
        Ok(())
    }
}

fn encode(envelope: &Envelope) -> Option<String> {
    match envelope.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("[relay] Failed to encode `{}`: {e}", envelope.tag());
            None
        }
    }
}

/// Reply for one inbound client frame, if any.
fn respond(text: &str, hook: Option<&CommandHook>) -> Option<Envelope> {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e @ (DecodeError::InvalidJson(_) | DecodeError::Malformed { .. })) => {
            warn!("[relay] Error processing client message: {e}");
            return Some(Envelope::Error {
                message: constants::RELAY_PROCESSING_ERROR.to_string(),
            });
        }
        Err(e) => {
            debug!("[relay] Unknown message type: {e}");
            return None;
        }
    };

    match envelope {
        Envelope::Hello { client, .. } => {
            debug!("[relay] Hello from {client}");
            Some(Envelope::HelloResponse {
                message: constants::RELAY_HELLO_REPLY.to_string(),
                timestamp: now_millis(),
            })
        }
        Envelope::Ping { timestamp } => Some(Envelope::pong_for(timestamp)),
        Envelope::Pong { .. } => {
            debug!("[relay] Received pong response from client");
            None
        }
        Envelope::LedControl { state } => {
            if let Some(hook) = hook {
                hook(Command::Led { on: state != 0 });
            }
            Some(Envelope::LedControlAck {
                success: true,
                state: Some(state),
            })
        }
        Envelope::ServoControl { angle } => {
            if let Some(hook) = hook {
                hook(Command::Servo {
                    angle: ServoAngle(angle),
                });
            }
            Some(Envelope::ServoControlAck {
                success: true,
                angle: Some(angle),
            })
        }
        other => {
            debug!("[relay] Unknown message type: {}", other.tag());
            None
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    config: RelayConfig,
    handle: RelayHandle,
    hook: Option<CommandHook>,
    shutdown: CancellationToken,
) {
    let path = config.endpoint_path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut not_found = ErrorResponse::new(Some("Not Found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("[relay] Handshake with {peer} failed: {e}");
            return;
        }
    };
    let (mut sink, mut frames) = ws.split();

    let id = Uuid::new_v4();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    handle.clients().insert(id, tx);
    info!("[relay] Client {id} connected from {peer}");

    let greeting = Envelope::Connection {
        message: constants::RELAY_GREETING.to_string(),
    };
    if let Some(text) = encode(&greeting) {
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!("[relay] Greeting to {id} failed: {e}");
        }
    }

    let start = tokio::time::Instant::now() + config.ping_interval;
    let mut ping = tokio::time::interval_at(start, config.ping_interval);

    loop {
        let reply = tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => respond(&text, hook.as_ref()),
                Some(Ok(Message::Binary(data))) => respond(&String::from_utf8_lossy(&data), hook.as_ref()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    warn!("[relay] WebSocket error from {id}: {e}");
                    break;
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("[relay] Send to {id} failed: {e}");
                    break;
                }
                None
            }
            _ = ping.tick() => Some(Envelope::ping()),
            () = shutdown.cancelled() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("[relay] Close frame to {id} not sent: {e}");
                }
                break;
            }
        };

        if let Some(text) = reply.as_ref().and_then(encode) {
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!("[relay] Send to {id} failed: {e}");
                break;
            }
        }
    }

    handle.clients().remove(&id);
    info!("[relay] Client {id} disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_gets_response() {
        let reply = respond(r#"{"type":"hello","client":"dash","timestamp":1}"#, None);
        let Some(Envelope::HelloResponse { message, .. }) = reply else {
            panic!("expected hello_response, got {reply:?}");
        };
        assert_eq!(message, "Hello from IoT server");
    }

    #[test]
    fn test_led_ack_echoes_state_and_calls_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: CommandHook = Arc::new(move |cmd| sink.lock().unwrap().push(cmd));

        let reply = respond(r#"{"type":"led_control","state":1}"#, Some(&hook));
        assert_eq!(
            reply,
            Some(Envelope::LedControlAck {
                success: true,
                state: Some(1)
            })
        );
        assert_eq!(*seen.lock().unwrap(), vec![Command::Led { on: true }]);
    }

    #[test]
    fn test_servo_auto_acked_unchanged() {
        let reply = respond(r#"{"type":"servo_control","angle":181}"#, None);
        assert_eq!(
            reply,
            Some(Envelope::ServoControlAck {
                success: true,
                angle: Some(181)
            })
        );
    }

    #[test]
    fn test_bad_json_gets_error() {
        assert_eq!(
            respond("{oops", None),
            Some(Envelope::Error {
                message: "Error processing message".into()
            })
        );
    }

    #[test]
    fn test_unknown_and_pong_are_silent() {
        assert_eq!(respond(r#"{"type":"firmware_update"}"#, None), None);
        assert_eq!(respond(r#"{"state":1}"#, None), None);
        assert_eq!(respond(r#"{"type":"pong","timestamp":5}"#, None), None);
    }

    #[test]
    fn test_client_ping_answered_with_pong() {
        let reply = respond(r#"{"type":"ping","timestamp":42}"#, None);
        assert!(matches!(
            reply,
            Some(Envelope::Pong {
                client_timestamp: Some(42),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = RelayServer::bind(RelayConfig {
            bind: "127.0.0.1:0".into(),
            ..RelayConfig::default()
        })
        .await
        .unwrap();
        let handle = server.handle();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.client_count(), 0);
    }
}
