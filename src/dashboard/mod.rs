//! Terminal dashboard.
//!
//! Live telemetry charts plus LED and servo controls over a
//! [`ReconnectingChannel`].
//!
//! # Architecture
//!
//! ```text
//! channel driver ──ChannelEvent──> DashboardState <──actions── key input
//!                                        │
//!                                        └──> view::render (every UI tick)
//! ```
//!
//! The UI loop runs on the calling thread and polls crossterm for input; the
//! channel driver runs on the tokio runtime. Both sides share the state
//! behind a mutex that is never held across a channel call.

pub mod guard;
pub mod input;
pub mod state;
pub mod view;

use std::io::stdout;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use crossterm::event::{self, Event};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::runtime::Runtime;

use crate::channel::{driver, ReconnectingChannel};
use crate::command::{Command, PendingCommand};
use crate::config::Config;
use crate::constants::UI_TICK;
use crate::envelope::Tag;
use crate::history::HistoryClient;
use crate::transport::ws::WsTransport;

pub use guard::TerminalGuard;
pub use input::{key_to_action, DashboardAction};
pub use state::{ConnectionStatus, DashboardState, LedPanel, ServoPanel};

/// Dashboard state shared between the UI loop and channel callbacks.
pub type SharedState = Arc<Mutex<DashboardState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, DashboardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Route channel events the dashboard cares about into `state`.
pub fn attach(channel: &ReconnectingChannel, state: &SharedState) {
    for tag in [Tag::Connected, Tag::IotData, Tag::Error] {
        let state = Arc::clone(state);
        channel.subscribe(tag, move |event| lock(&state).apply_event(event));
    }
}

/// Apply `action` to `state`, sending a command over `channel` if it calls
/// for one.
///
/// The command's outcome is folded back into `state` when it resolves.
pub fn dispatch(
    channel: &ReconnectingChannel,
    state: &SharedState,
    action: DashboardAction,
    ack_timeout: Duration,
) -> Option<PendingCommand> {
    let command = {
        let mut s = lock(state);
        match action {
            DashboardAction::ToggleLed => s.begin_led_toggle(),
            DashboardAction::NudgeServo(steps) => {
                s.nudge_servo(steps);
                None
            }
            DashboardAction::ServoAuto => {
                s.select_servo_auto();
                None
            }
            DashboardAction::SetServo => s.begin_servo_set(),
            DashboardAction::Quit => {
                s.should_quit = true;
                None
            }
        }
    }?;

    let state = Arc::clone(state);
    Some(channel.request(command, ack_timeout, move |outcome| {
        let mut s = lock(&state);
        match command {
            Command::Led { .. } => s.apply_led_outcome(outcome),
            Command::Servo { .. } => s.apply_servo_outcome(outcome),
        }
    }))
}

/// Run the dashboard until the user quits.
///
/// Blocks the calling thread; network work happens on `runtime`.
pub fn run(config: &Config, runtime: &Runtime) -> Result<()> {
    let state: SharedState = Arc::new(Mutex::new(DashboardState::new(config.history_limit)));

    let history_base = config.history_base();
    let fetched = runtime.block_on(async {
        HistoryClient::new(&history_base)?
            .fetch_recent(config.history_limit)
            .await
    });
    match fetched {
        Ok(readings) => {
            log::info!("Loaded {} historical readings from {history_base}", readings.len());
            lock(&state).history.seed(readings);
        }
        Err(e) => log::warn!("Could not load history from {history_base}: {e:#}"),
    }

    let channel = {
        let _enter = runtime.enter();
        ReconnectingChannel::new(config.channel_config(), Box::new(WsTransport::new()))
    };
    attach(&channel, &state);
    let driver = runtime.spawn(driver::run(channel.clone()));
    log::info!("Dashboard connecting to {}", channel.endpoint());

    let result = run_ui(&channel, &state, config.ack_timeout());

    channel.disconnect();
    driver.abort();
    result
}

fn run_ui(channel: &ReconnectingChannel, state: &SharedState, ack_timeout: Duration) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    loop {
        terminal.draw(|f| view::render(f, &lock(state), Utc::now()))?;

        if event::poll(UI_TICK)? {
            if let Event::Key(key) = event::read()? {
                if let Some(action) = key_to_action(&key) {
                    dispatch(channel, state, action, ack_timeout);
                }
            }
        }

        if lock(state).should_quit {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, ChannelState};
    use crate::envelope::Envelope;
    use crate::transport::memory::{MemoryRemote, MemoryTransport};
    use crate::transport::TransportEvent;
    use tokio::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn setup() -> (ReconnectingChannel, MemoryRemote, SharedState) {
        let (transport, remote) = MemoryTransport::pair();
        let channel =
            ReconnectingChannel::new(ChannelConfig::new("ws://relay.test/ws"), Box::new(transport));
        let state = Arc::new(Mutex::new(DashboardState::new(50)));
        attach(&channel, &state);
        (channel, remote, state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_updates_status() {
        let (channel, _remote, state) = setup();
        let link = channel.current_link().unwrap();
        channel.handle_transport_event(link, TransportEvent::Open);
        assert_eq!(lock(&state).status, ConnectionStatus::Connected);

        channel.handle_transport_event(
            link,
            TransportEvent::Close {
                code: 1006,
                reason: String::new(),
            },
        );
        assert_eq!(lock(&state).status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_led_toggle_roundtrip() {
        let (channel, remote, state) = setup();
        let link = channel.current_link().unwrap();
        channel.handle_transport_event(link, TransportEvent::Open);

        let pending = dispatch(&channel, &state, DashboardAction::ToggleLed, TIMEOUT).unwrap();
        assert!(lock(&state).led.busy);
        assert!(remote
            .sent_envelopes(link)
            .contains(&Envelope::LedControl { state: 1 }));

        channel.handle_transport_event(
            link,
            TransportEvent::Message(r#"{"type":"led_control_ack","success":true,"state":1}"#.into()),
        );
        assert!(pending.is_resolved());
        let s = lock(&state);
        assert!(s.led.on);
        assert!(!s.led.busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_servo_timeout_clears_busy() {
        let (channel, _remote, state) = setup();
        let link = channel.current_link().unwrap();
        channel.handle_transport_event(link, TransportEvent::Open);
        let t0 = Instant::now();

        dispatch(&channel, &state, DashboardAction::NudgeServo(2), TIMEOUT);
        dispatch(&channel, &state, DashboardAction::SetServo, TIMEOUT).unwrap();
        assert!(lock(&state).servo.busy);

        channel.fire_due(t0 + TIMEOUT);
        let s = lock(&state);
        assert!(!s.servo.busy);
        assert_eq!(s.servo.current, 90);
        assert_eq!(s.servo.target, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_and_local_actions_send_nothing() {
        let (channel, remote, state) = setup();
        let link = channel.current_link().unwrap();
        channel.handle_transport_event(link, TransportEvent::Open);
        let before = remote.sent(link).len();

        assert!(dispatch(&channel, &state, DashboardAction::ServoAuto, TIMEOUT).is_none());
        assert!(dispatch(&channel, &state, DashboardAction::Quit, TIMEOUT).is_none());
        assert!(lock(&state).should_quit);
        assert_eq!(remote.sent(link).len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_not_sent_before_open() {
        let (channel, remote, state) = setup();

        assert!(dispatch(&channel, &state, DashboardAction::ToggleLed, TIMEOUT).is_none());
        dispatch(&channel, &state, DashboardAction::NudgeServo(1), TIMEOUT);
        assert!(dispatch(&channel, &state, DashboardAction::SetServo, TIMEOUT).is_none());

        let s = lock(&state);
        assert!(!s.led.busy);
        assert!(!s.servo.busy);
        assert!(remote.all_sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_dashboard_connected() {
        let (channel, _remote, state) = setup();
        let link = channel.current_link().unwrap();
        channel.handle_transport_event(link, TransportEvent::Open);

        channel.handle_transport_event(link, TransportEvent::Message("{not json".into()));
        channel.handle_transport_event(
            link,
            TransportEvent::Message(
                r#"{"type":"iot_data","data":{"id":8,"temperature":22.0,"humidity":41.0,"pressure":1010.0,"timestamp":"2026-10-19T12:00:00Z"}}"#
                    .into(),
            ),
        );

        assert_eq!(channel.state(), ChannelState::Open);
        let s = lock(&state);
        assert_eq!(s.status, ConnectionStatus::Connected);
        assert_eq!(s.history.len(), 1);
        assert!(s.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_reaches_history() {
        let (channel, _remote, state) = setup();
        let link = channel.current_link().unwrap();
        channel.handle_transport_event(link, TransportEvent::Open);
        channel.handle_transport_event(
            link,
            TransportEvent::Message(
                r#"{"type":"iot_data","data":{"id":7,"temperature":21.5,"humidity":40.0,"pressure":1011.2,"timestamp":"2026-10-19T12:00:00Z"}}"#
                    .into(),
            ),
        );
        let s = lock(&state);
        assert_eq!(s.history.latest().map(|r| r.id), Some(7));
        assert!(s.last_error.is_none());
    }
}
