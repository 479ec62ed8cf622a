//! Actuator commands and acknowledgment correlation.
//!
//! A command is written once and answered by at most one ack of a matching
//! tag. [`ReconnectingChannel::request`] wires up the one-shot pattern:
//!
//! 1. subscribe a one-shot handler to the ack tag,
//! 2. arm a timeout on the channel's timer table,
//! 3. write the command.
//!
//! Whichever of "matching ack" and "timeout" happens first resolves the
//! command; the other becomes a no-op. Acks carry no correlation id, so two
//! commands of the same kind in flight will both resolve on the first ack.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::channel::{ChannelEvent, ReconnectingChannel, Subscription, TimerId, WeakChannel};
use crate::constants::{SERVO_AUTO_ANGLE, SERVO_MAX_ANGLE};
use crate::envelope::{Envelope, Tag};

/// Servo target angle. Not clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServoAngle(pub i32);

impl ServoAngle {
    /// Sentinel that switches the device to automatic sweeping.
    pub const AUTO: Self = Self(SERVO_AUTO_ANGLE);

    /// Whether this is the auto sentinel.
    #[must_use]
    pub fn is_auto(self) -> bool {
        self == Self::AUTO
    }

    /// Whether this is a manual angle the device can hold (0-180).
    #[must_use]
    pub fn is_manual(self) -> bool {
        (0..=SERVO_MAX_ANGLE).contains(&self.0)
    }
}

impl fmt::Display for ServoAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto() {
            write!(f, "auto")
        } else {
            write!(f, "{}°", self.0)
        }
    }
}

impl std::str::FromStr for ServoAngle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::AUTO);
        }
        s.parse::<i32>()
            .map(Self)
            .map_err(|e| format!("expected an angle or `auto`, got `{s}`: {e}"))
    }
}

/// A command that expects exactly one acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch the LED.
    Led {
        /// Desired state.
        on: bool,
    },
    /// Move the servo (or enable auto mode).
    Servo {
        /// Target angle.
        angle: ServoAngle,
    },
}

impl Command {
    /// Wire form of this command.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        match *self {
            Self::Led { on } => Envelope::LedControl { state: u8::from(on) },
            Self::Servo { angle } => Envelope::ServoControl { angle: angle.0 },
        }
    }

    /// Tag of the acknowledgment that answers this command.
    #[must_use]
    pub fn ack_tag(&self) -> Tag {
        match self {
            Self::Led { .. } => Tag::LedControlAck,
            Self::Servo { .. } => Tag::ServoControlAck,
        }
    }

    /// Outcome carried by `envelope`, if it acknowledges this kind of command.
    #[must_use]
    pub fn match_ack(&self, envelope: &Envelope) -> Option<CommandOutcome> {
        match (self, envelope) {
            (Self::Led { .. }, Envelope::LedControlAck { success, state }) => {
                Some(CommandOutcome::Acknowledged {
                    success: *success,
                    value: state.map(i32::from),
                })
            }
            (Self::Servo { .. }, Envelope::ServoControlAck { success, angle }) => {
                Some(CommandOutcome::Acknowledged {
                    success: *success,
                    value: *angle,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Led { on: true } => write!(f, "LED on"),
            Self::Led { on: false } => write!(f, "LED off"),
            Self::Servo { angle } => write!(f, "servo {angle}"),
        }
    }
}

/// How a command was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The server answered. `success: false` is a real answer, not a timeout.
    Acknowledged {
        /// Whether the device applied the command.
        success: bool,
        /// Echoed state (LED: 0/1) or angle.
        value: Option<i32>,
    },
    /// No acknowledgment arrived in time.
    Unconfirmed,
}

impl CommandOutcome {
    /// Whether the server confirmed success.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Acknowledged { success: true, .. })
    }

    /// Value the server confirmed, if it confirmed success.
    #[must_use]
    pub fn confirmed_value(&self) -> Option<i32> {
        match self {
            Self::Acknowledged {
                success: true,
                value,
            } => *value,
            _ => None,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged {
                success: true,
                value: Some(v),
            } => write!(f, "acknowledged ({v})"),
            Self::Acknowledged { success: true, .. } => write!(f, "acknowledged"),
            Self::Acknowledged { success: false, .. } => write!(f, "rejected by device"),
            Self::Unconfirmed => write!(f, "unconfirmed"),
        }
    }
}

type Resolver = Box<dyn FnOnce(CommandOutcome) + Send>;

/// Shared state of one in-flight command.
struct Correlation {
    command: Command,
    channel: WeakChannel,
    resolver: Mutex<Option<Resolver>>,
    subscription: Mutex<Option<Subscription>>,
    timer: Mutex<Option<TimerId>>,
}

impl Correlation {
    /// Resolve once. Returns `false` if already resolved.
    fn resolve(&self, outcome: CommandOutcome) -> bool {
        let Some(resolver) = self
            .resolver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(channel) = self.channel.upgrade() {
            if let Some(subscription) = subscription {
                channel.off(&self.command.ack_tag(), &subscription);
            }
            if let Some(timer) = timer {
                channel.cancel_timer(timer);
            }
        }

        resolver(outcome);
        true
    }
}

/// Handle to an in-flight command.
pub struct PendingCommand {
    shared: Arc<Correlation>,
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("command", &self.shared.command)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl PendingCommand {
    /// The command being awaited.
    #[must_use]
    pub fn command(&self) -> Command {
        self.shared.command
    }

    /// Whether the command has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.shared
            .resolver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl ReconnectingChannel {
    /// Send `command` and resolve `on_resolved` exactly once.
    ///
    /// Resolves with the first matching ack, or with
    /// [`CommandOutcome::Unconfirmed`] after `timeout`. A command that cannot
    /// be written (channel not open) is not retried; it resolves unconfirmed
    /// when the timeout fires.
    pub fn request(
        &self,
        command: Command,
        timeout: Duration,
        on_resolved: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> PendingCommand {
        let shared = Arc::new(Correlation {
            command,
            channel: self.downgrade(),
            resolver: Mutex::new(Some(Box::new(on_resolved))),
            subscription: Mutex::new(None),
            timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let subscription = Subscription::new(move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let ChannelEvent::Message(envelope) = event else {
                return;
            };
            if let Some(outcome) = shared.command.match_ack(envelope) {
                if shared.resolve(outcome) {
                    log::info!("[command] {} {outcome}", shared.command);
                } else {
                    log::debug!("[command] Late ack for {} ignored", shared.command);
                }
            }
        });
        *shared
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription.clone());
        self.on(command.ack_tag(), subscription);

        let on_timeout = Arc::clone(&shared);
        let timer = self.schedule_once(timeout, move || {
            if on_timeout.resolve(CommandOutcome::Unconfirmed) {
                log::warn!(
                    "[command] No ack for {} within {}s",
                    on_timeout.command,
                    timeout.as_secs_f32()
                );
            }
        });
        *shared.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);

        log::debug!("[command] Sending {command}");
        if self.send(&command.envelope()).is_err() {
            log::debug!("[command] {command} not sent, will resolve unconfirmed");
        }

        PendingCommand { shared }
    }

    /// Send `command` and wait for its outcome.
    ///
    /// Requires a running [`driver`](crate::channel::driver) to deliver the ack
    /// or fire the timeout.
    pub async fn send_command(&self, command: Command, timeout: Duration) -> CommandOutcome {
        let (tx, rx) = oneshot::channel();
        let _pending = self.request(command, timeout, move |outcome| {
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or(CommandOutcome::Unconfirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::TransportEvent;
    use tokio::time::Instant;

    #[test]
    fn test_led_command_shape() {
        assert_eq!(
            Command::Led { on: true }.envelope(),
            Envelope::LedControl { state: 1 }
        );
        assert_eq!(
            Command::Led { on: false }.envelope(),
            Envelope::LedControl { state: 0 }
        );
        assert_eq!(Command::Led { on: true }.ack_tag(), Tag::LedControlAck);
    }

    #[test]
    fn test_servo_auto_passes_through() {
        let cmd = Command::Servo {
            angle: ServoAngle::AUTO,
        };
        assert_eq!(cmd.envelope(), Envelope::ServoControl { angle: 181 });
        assert_eq!(cmd.ack_tag(), Tag::ServoControlAck);
        assert_eq!(cmd.to_string(), "servo auto");
    }

    #[test]
    fn test_servo_angle_parse() {
        assert_eq!("auto".parse::<ServoAngle>(), Ok(ServoAngle::AUTO));
        assert_eq!("90".parse::<ServoAngle>(), Ok(ServoAngle(90)));
        assert!("left".parse::<ServoAngle>().is_err());
        assert!(ServoAngle(180).is_manual());
        assert!(!ServoAngle(181).is_manual());
    }

    #[test]
    fn test_match_ack_ignores_other_kind() {
        let led = Command::Led { on: true };
        let servo_ack = Envelope::ServoControlAck {
            success: true,
            angle: Some(90),
        };
        assert_eq!(led.match_ack(&servo_ack), None);
        assert_eq!(
            led.match_ack(&Envelope::LedControlAck {
                success: false,
                state: None
            }),
            Some(CommandOutcome::Acknowledged {
                success: false,
                value: None
            })
        );
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = CommandOutcome::Acknowledged {
            success: true,
            value: Some(1),
        };
        let rejected = CommandOutcome::Acknowledged {
            success: false,
            value: Some(1),
        };
        assert!(ok.is_confirmed());
        assert_eq!(ok.confirmed_value(), Some(1));
        assert!(!rejected.is_confirmed());
        assert_eq!(rejected.confirmed_value(), None);
        assert_eq!(CommandOutcome::Unconfirmed.to_string(), "unconfirmed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_while_disconnected_resolves_unconfirmed() {
        let (transport, remote) = MemoryTransport::pair();
        let channel =
            ReconnectingChannel::new(ChannelConfig::new("ws://relay.test/ws"), Box::new(transport));
        let t0 = Instant::now();
        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);

        let pending = channel.request(Command::Led { on: true }, Duration::from_secs(3), move |o| {
            *sink.lock().unwrap() = Some(o);
        });

        assert!(remote.all_sent().is_empty());
        channel.fire_due(t0 + Duration::from_secs(3));
        assert_eq!(*outcome.lock().unwrap(), Some(CommandOutcome::Unconfirmed));
        assert!(pending.is_resolved());
        assert_eq!(channel.subscriber_count(&Tag::LedControlAck), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_with_driver() {
        let (transport, remote) = MemoryTransport::pair();
        let channel =
            ReconnectingChannel::new(ChannelConfig::new("ws://relay.test/ws"), Box::new(transport));
        let driver = crate::channel::driver::spawn(channel.clone());
        let link = remote.last_link().unwrap();
        remote.emit(link, TransportEvent::Open);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let responder = {
            let remote = remote.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                remote.emit(
                    link,
                    TransportEvent::Message(
                        r#"{"type":"servo_control_ack","success":true,"angle":90}"#.into(),
                    ),
                );
            })
        };

        let outcome = channel
            .send_command(
                Command::Servo {
                    angle: ServoAngle(90),
                },
                Duration::from_secs(3),
            )
            .await;
        assert_eq!(
            outcome,
            CommandOutcome::Acknowledged {
                success: true,
                value: Some(90)
            }
        );
        assert!(remote
            .sent_envelopes(link)
            .contains(&Envelope::ServoControl { angle: 90 }));

        responder.await.unwrap();
        channel.disconnect();
        driver.await.unwrap();
    }
}
