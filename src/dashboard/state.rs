//! Dashboard view model.
//!
//! Pure state: channel events and command outcomes are folded in here, and
//! key handlers return the [`Command`] to send (if any). Nothing in this
//! module touches the channel or the terminal.

use crate::channel::{ChannelEvent, Fault};
use crate::command::{Command, CommandOutcome, ServoAngle};
use crate::constants::{SERVO_MAX_ANGLE, SERVO_STEP};
use crate::envelope::Envelope;
use crate::telemetry::TelemetryHistory;

/// Connectivity shown in the status banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No open event seen yet.
    #[default]
    Connecting,
    /// The channel is open.
    Connected,
    /// The channel closed or its transport failed.
    Disconnected,
}

/// LED control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedPanel {
    /// Last state confirmed by the device.
    pub on: bool,
    /// A command is awaiting its outcome.
    pub busy: bool,
}

/// Servo control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoPanel {
    /// Angle the user has selected.
    pub target: i32,
    /// Last angle confirmed by the device.
    pub current: i32,
    /// A command is awaiting its outcome.
    pub busy: bool,
    /// The device confirmed auto mode.
    pub auto: bool,
}

impl Default for ServoPanel {
    fn default() -> Self {
        Self {
            target: 90,
            current: 90,
            busy: false,
            auto: false,
        }
    }
}

impl ServoPanel {
    /// Whether the "set" action is available.
    #[must_use]
    pub fn can_set(&self) -> bool {
        !self.busy && self.target != self.current
    }
}

/// Everything the dashboard renders.
#[derive(Debug, Clone)]
pub struct DashboardState {
    /// Connectivity banner.
    pub status: ConnectionStatus,
    /// Recent readings, newest first.
    pub history: TelemetryHistory,
    /// LED panel.
    pub led: LedPanel,
    /// Servo panel.
    pub servo: ServoPanel,
    /// Most recent error text, cleared on reconnect.
    pub last_error: Option<String>,
    /// Most recent command result, for the footer.
    pub last_outcome: Option<String>,
    /// The user asked to quit.
    pub should_quit: bool,
}

impl DashboardState {
    /// Fresh state keeping at most `history_limit` readings.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            status: ConnectionStatus::default(),
            history: TelemetryHistory::new(history_limit),
            led: LedPanel::default(),
            servo: ServoPanel::default(),
            last_error: None,
            last_outcome: None,
            should_quit: false,
        }
    }

    /// Fold one channel event into the state.
    pub fn apply_event(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connected(true) => {
                self.status = ConnectionStatus::Connected;
                self.last_error = None;
            }
            ChannelEvent::Connected(false) => self.status = ConnectionStatus::Disconnected,
            ChannelEvent::Message(Envelope::IotData { data }) => self.history.record(data.clone()),
            ChannelEvent::Message(Envelope::Error { message }) => {
                self.last_error = Some(message.clone());
            }
            ChannelEvent::Message(_) => {}
            ChannelEvent::Fault(fault) => {
                // A bad frame leaves the link open.
                if matches!(fault, Fault::Transport(_)) {
                    self.status = ConnectionStatus::Disconnected;
                }
                self.last_error = Some(fault.to_string());
            }
        }
    }

    /// Whether device controls are usable.
    #[must_use]
    pub fn controls_enabled(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Start an LED toggle. Returns `None` while disconnected or while a
    /// previous command is pending.
    pub fn begin_led_toggle(&mut self) -> Option<Command> {
        if !self.controls_enabled() || self.led.busy {
            return None;
        }
        self.led.busy = true;
        Some(Command::Led { on: !self.led.on })
    }

    /// Apply the outcome of an LED command.
    pub fn apply_led_outcome(&mut self, outcome: CommandOutcome) {
        self.led.busy = false;
        if let Some(state) = outcome.confirmed_value() {
            self.led.on = state != 0;
        }
        self.last_outcome = Some(format!("LED: {outcome}"));
    }

    /// Move the servo target by `steps` increments, leaving auto if selected.
    pub fn nudge_servo(&mut self, steps: i32) {
        let base = if ServoAngle(self.servo.target).is_auto() {
            if self.servo.auto {
                90
            } else {
                self.servo.current
            }
        } else {
            self.servo.target
        };
        self.servo.target = (base + steps * SERVO_STEP).clamp(0, SERVO_MAX_ANGLE);
    }

    /// Select auto mode as the servo target.
    pub fn select_servo_auto(&mut self) {
        self.servo.target = ServoAngle::AUTO.0;
    }

    /// Start a servo move. Returns `None` while disconnected, while busy, or
    /// if nothing would change.
    pub fn begin_servo_set(&mut self) -> Option<Command> {
        if !self.controls_enabled() || !self.servo.can_set() {
            return None;
        }
        self.servo.busy = true;
        Some(Command::Servo {
            angle: ServoAngle(self.servo.target),
        })
    }

    /// Apply the outcome of a servo command.
    pub fn apply_servo_outcome(&mut self, outcome: CommandOutcome) {
        self.servo.busy = false;
        if let Some(angle) = outcome.confirmed_value() {
            self.servo.current = angle;
            self.servo.auto = ServoAngle(angle).is_auto();
        }
        self.last_outcome = Some(format!("Servo: {outcome}"));
    }
}
