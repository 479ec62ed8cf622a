//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves, plus [`WsTransport`], the [`Transport`] used against
//! a real relay. All WebSocket client code in the crate goes through this
//! module rather than `tokio-tungstenite` directly.
//!
//! # Threading Model
//!
//! Each [`WsTransport::open`] spawns one tokio task on the runtime captured at
//! construction. The task connects, then `select!`s between incoming frames
//! and outgoing commands from the [`WsLink`] handle. Every lifecycle change is
//! pushed into the channel's event queue tagged with the link id.
//!
//! An error is always terminal for a link: the task reports `Error` followed by
//! `Close { code: 1006 }` and exits.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use super::{Link, LinkId, Transport, TransportEvent, TransportEvents};
use crate::channel::ChannelError;

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Abnormal closure code used when the stream ends without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Control frames are answered by tungstenite and skipped here.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                )) => continue,
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL.
///
/// Returns split (writer, reader) halves for independent use in
/// `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

/// Outgoing command from a [`WsLink`] to its connection task.
#[derive(Debug)]
enum WsOutgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Initiate a graceful close.
    Close,
}

/// [`Transport`] backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsTransport {
    runtime: tokio::runtime::Handle,
}

impl WsTransport {
    /// Create a transport that spawns connection tasks on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(tokio::runtime::Handle::current())
    }

    /// Create a transport that spawns connection tasks on `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, endpoint: &str, link: LinkId, events: TransportEvents) -> Box<dyn Link> {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let task = self.runtime.spawn(run_link(
            endpoint.to_string(),
            link,
            events,
            send_rx,
            Arc::clone(&closed),
        ));

        Box::new(WsLink {
            link,
            send_tx,
            closed,
            task,
        })
    }
}

/// Handle to one WebSocket connection task.
#[derive(Debug)]
pub struct WsLink {
    link: LinkId,
    send_tx: mpsc::UnboundedSender<WsOutgoing>,
    closed: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl Link for WsLink {
    fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::SendFailed(format!("{} is closed", self.link)));
        }
        self.send_tx
            .send(WsOutgoing::Text(text.to_string()))
            .map_err(|_| ChannelError::SendFailed(format!("{} task has exited", self.link)))
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.send_tx.send(WsOutgoing::Close).is_err() {
            // Task already gone; nothing left to close.
            self.task.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

/// Emit an event for `link`, ignoring a dropped receiver (channel shut down).
fn emit(events: &TransportEvents, link: LinkId, event: TransportEvent) {
    if events.send((link, event)).is_err() {
        log::debug!("[ws] Event queue closed, dropping event for {link}");
    }
}

/// Run a single WebSocket connection until it closes.
///
/// Reads frames from the WebSocket and pushes events into `events`. Listens
/// on `send_rx` for outgoing frames from the channel. Exits when the
/// connection closes or an unrecoverable error occurs.
async fn run_link(
    url: String,
    link: LinkId,
    events: TransportEvents,
    mut send_rx: mpsc::UnboundedReceiver<WsOutgoing>,
    closed: Arc<AtomicBool>,
) {
    log::debug!("[ws] {link} connecting to {url}");

    let (mut writer, mut reader) = match connect(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            closed.store(true, Ordering::SeqCst);
            emit(&events, link, TransportEvent::Error(format!("{e:#}")));
            emit(
                &events,
                link,
                TransportEvent::Close {
                    code: ABNORMAL_CLOSE,
                    reason: "connect failed".to_string(),
                },
            );
            return;
        }
    };

    emit(&events, link, TransportEvent::Open);

    let terminal = loop {
        tokio::select! {
            // Incoming WebSocket frame
            frame = reader.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        emit(&events, link, TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        // Frames are JSON; tolerate servers that send it as binary.
                        let text = String::from_utf8_lossy(&data).into_owned();
                        emit(&events, link, TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        break vec![TransportEvent::Close { code, reason }];
                    }
                    Some(Err(e)) => {
                        break vec![
                            TransportEvent::Error(format!("{e:#}")),
                            TransportEvent::Close { code: ABNORMAL_CLOSE, reason: "read error".to_string() },
                        ];
                    }
                    None => {
                        break vec![TransportEvent::Close {
                            code: ABNORMAL_CLOSE,
                            reason: "stream ended".to_string(),
                        }];
                    }
                }
            }
            // Outgoing frame from the channel
            outgoing = send_rx.recv() => {
                match outgoing {
                    Some(WsOutgoing::Text(text)) => {
                        if let Err(e) = writer.send_text(&text).await {
                            break vec![
                                TransportEvent::Error(format!("{e:#}")),
                                TransportEvent::Close { code: ABNORMAL_CLOSE, reason: "write error".to_string() },
                            ];
                        }
                    }
                    Some(WsOutgoing::Close) | None => {
                        if let Err(e) = writer.send_close().await {
                            log::debug!("[ws] {link} close frame not sent: {e:#}");
                        }
                        break vec![TransportEvent::Close {
                            code: 1000,
                            reason: "client requested close".to_string(),
                        }];
                    }
                }
            }
        }
    };

    closed.store(true, Ordering::SeqCst);
    for event in terminal {
        emit(&events, link, event);
    }
    log::debug!("[ws] {link} finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://example.com"),
            "wss://example.com"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:8000"),
            "ws://localhost:8000"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_ws_passthrough() {
        assert_eq!(
            http_to_ws_scheme("ws://localhost:8000/ws"),
            "ws://localhost:8000/ws"
        );
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_unreachable_reports_error_then_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new();
        let link = transport.open("ws://127.0.0.1:1/ws", LinkId(3), tx);

        let (id, first) = rx.recv().await.expect("error event");
        assert_eq!(id, LinkId(3));
        assert!(matches!(first, TransportEvent::Error(_)));

        let (_, second) = rx.recv().await.expect("close event");
        assert!(matches!(second, TransportEvent::Close { code: 1006, .. }));
        assert!(link.is_closed());
    }
}
