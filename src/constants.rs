//! Application-wide constants for sensorlink.
//!
//! This module centralizes the protocol timings and defaults shared by the
//! channel, the relay and the dashboard. Constants are grouped by domain.
//!
//! # Categories
//!
//! - **Channel**: Heartbeat, reconnect and acknowledgment timing
//! - **Relay**: Server defaults and simulator timing
//! - **Telemetry**: History size and chart window
//! - **UI**: Dashboard refresh and control steps

use std::time::Duration;

// ============================================================================
// Channel
// ============================================================================

/// Interval between heartbeat pings while the channel is open.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the single reconnect attempt after a close.
///
/// Fixed, not exponential: the relay is expected on a local network and a
/// steady retry cadence is easier to reason about from the dashboard.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long a link may stay silent after reporting an error before the
/// channel closes it locally.
pub const ERROR_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// How long a command waits for its acknowledgment.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Client identifier sent in the handshake.
pub const DEFAULT_CLIENT_NAME: &str = "sensorlink-dashboard";

/// Default relay address for development.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";

/// WebSocket path on the relay.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";

/// Servo angle that switches the device to automatic sweeping.
pub const SERVO_AUTO_ANGLE: i32 = 181;

// ============================================================================
// Relay
// ============================================================================

/// Default listen address for `sensorlink serve`.
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Interval between server-initiated pings to each client.
pub const RELAY_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between simulated readings.
pub const SIMULATE_INTERVAL: Duration = Duration::from_secs(2);

/// Greeting sent to every accepted client.
pub const RELAY_GREETING: &str = "Connected to IoT WebSocket server";

/// Reply text for a client `hello`.
pub const RELAY_HELLO_REPLY: &str = "Hello from IoT server";

/// Error text for frames the relay cannot process.
pub const RELAY_PROCESSING_ERROR: &str = "Error processing message";

// ============================================================================
// Telemetry
// ============================================================================

/// Maximum number of readings kept in memory.
pub const HISTORY_LIMIT: usize = 50;

/// Span of the sliding chart window.
pub const CHART_WINDOW: Duration = Duration::from_secs(3 * 60);

/// How far past "now" the chart window extends, to tolerate clock skew.
pub const CHART_LEAD: Duration = Duration::from_secs(5);

/// HTTP client request timeout for the history fetch.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// UI
// ============================================================================

/// How long the dashboard waits for input before redrawing.
pub const UI_TICK: Duration = Duration::from_millis(250);

/// Degrees the servo target moves per arrow key press.
pub const SERVO_STEP: i32 = 5;

/// Highest manual servo angle.
pub const SERVO_MAX_ANGLE: i32 = 180;

/// How long the one-shot `led` / `servo` commands wait for the channel to open.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_angle_is_outside_manual_range() {
        assert!(SERVO_AUTO_ANGLE > SERVO_MAX_ANGLE);
    }

    #[test]
    fn test_grace_is_shorter_than_reconnect() {
        assert!(ERROR_CLOSE_GRACE < RECONNECT_DELAY);
    }
}
