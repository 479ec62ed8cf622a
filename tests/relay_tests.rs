//! End-to-end tests for the relay over real sockets.
//!
//! Each test binds a relay on an ephemeral port and talks to it either with a
//! raw tungstenite client or with a `ReconnectingChannel` over `WsTransport`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use sensorlink::channel::{driver, ChannelConfig, ChannelEvent, ReconnectingChannel};
use sensorlink::command::{Command, CommandOutcome, ServoAngle};
use sensorlink::envelope::{Envelope, Tag, Telemetry};
use sensorlink::relay::{RelayConfig, RelayHandle, RelayServer};
use sensorlink::transport::ws::WsTransport;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    handle: RelayHandle,
    commands: Arc<Mutex<Vec<Command>>>,
    shutdown: CancellationToken,
}

impl TestRelay {
    async fn start() -> Self {
        let mut server = RelayServer::bind(RelayConfig {
            bind: "127.0.0.1:0".into(),
            ..RelayConfig::default()
        })
        .await
        .unwrap();

        let commands = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&commands);
        server.on_command(move |command| sink.lock().unwrap().push(command));

        let handle = server.handle();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        Self {
            handle,
            commands,
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.handle.local_addr())
    }

    async fn wait_for_clients(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.handle.client_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("clients did not register");
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn next_envelope(ws: &mut Client) -> Envelope {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return Envelope::decode(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut Client, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}

fn reading(id: i64) -> Telemetry {
    Telemetry {
        id,
        temperature: 23.4,
        humidity: 51.0,
        pressure: 1009.8,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_raw_client_protocol() {
    let relay = TestRelay::start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(relay.url("/ws")).await.unwrap();

    assert_eq!(
        next_envelope(&mut ws).await,
        Envelope::Connection {
            message: "Connected to IoT WebSocket server".into()
        }
    );

    send_json(&mut ws, r#"{"type":"hello","client":"test","timestamp":1}"#).await;
    match next_envelope(&mut ws).await {
        Envelope::HelloResponse { message, timestamp } => {
            assert_eq!(message, "Hello from IoT server");
            assert!(timestamp > 0);
        }
        other => panic!("expected hello_response, got {other:?}"),
    }

    send_json(&mut ws, "{definitely not json").await;
    assert_eq!(
        next_envelope(&mut ws).await,
        Envelope::Error {
            message: "Error processing message".into()
        }
    );

    send_json(&mut ws, r#"{"type":"servo_control","angle":181}"#).await;
    assert_eq!(
        next_envelope(&mut ws).await,
        Envelope::ServoControlAck {
            success: true,
            angle: Some(181)
        }
    );
    assert_eq!(
        *relay.commands.lock().unwrap(),
        vec![Command::Servo {
            angle: ServoAngle::AUTO
        }]
    );
}

#[tokio::test]
async fn test_wrong_path_rejected() {
    let relay = TestRelay::start().await;
    match tokio_tungstenite::connect_async(relay.url("/nope")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("upgrade on the wrong path succeeded"),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let relay = TestRelay::start().await;
    let (mut a, _) = tokio_tungstenite::connect_async(relay.url("/ws")).await.unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(relay.url("/ws")).await.unwrap();
    next_envelope(&mut a).await;
    next_envelope(&mut b).await;
    relay.wait_for_clients(2).await;

    assert_eq!(relay.handle.broadcast(reading(9)), 2);

    for ws in [&mut a, &mut b] {
        match next_envelope(ws).await {
            Envelope::IotData { data } => assert_eq!(data.id, 9),
            other => panic!("expected iot_data, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_channel_end_to_end() {
    let relay = TestRelay::start().await;
    let channel = ReconnectingChannel::new(
        ChannelConfig::new(relay.url("/ws")),
        Box::new(WsTransport::new()),
    );

    let (open_tx, mut open_rx) = watch::channel(false);
    channel.subscribe(Tag::Connected, move |event| {
        if let ChannelEvent::Connected(open) = event {
            open_tx.send_replace(*open);
        }
    });
    let (greeting_tx, mut greetings) = mpsc::unbounded_channel();
    channel.subscribe(Tag::HelloResponse, move |event| {
        let _ = greeting_tx.send(event.clone());
    });
    let (data_tx, mut data) = mpsc::unbounded_channel();
    channel.subscribe(Tag::IotData, move |event| {
        let _ = data_tx.send(event.clone());
    });

    let driver = driver::spawn(channel.clone());
    tokio::time::timeout(WAIT, open_rx.wait_for(|open| *open))
        .await
        .unwrap()
        .unwrap();

    let greeting = tokio::time::timeout(WAIT, greetings.recv()).await.unwrap();
    assert!(matches!(
        greeting,
        Some(ChannelEvent::Message(Envelope::HelloResponse { .. }))
    ));

    let outcome = channel
        .send_command(Command::Led { on: true }, Duration::from_secs(3))
        .await;
    assert_eq!(
        outcome,
        CommandOutcome::Acknowledged {
            success: true,
            value: Some(1)
        }
    );

    let outcome = channel
        .send_command(
            Command::Servo {
                angle: ServoAngle(45),
            },
            Duration::from_secs(3),
        )
        .await;
    assert_eq!(outcome.confirmed_value(), Some(45));
    assert_eq!(
        *relay.commands.lock().unwrap(),
        vec![
            Command::Led { on: true },
            Command::Servo {
                angle: ServoAngle(45)
            }
        ]
    );

    relay.wait_for_clients(1).await;
    relay.handle.broadcast(reading(3));
    match tokio::time::timeout(WAIT, data.recv()).await.unwrap() {
        Some(ChannelEvent::Message(Envelope::IotData { data })) => assert_eq!(data.id, 3),
        other => panic!("expected iot_data, got {other:?}"),
    }

    channel.disconnect();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
}
