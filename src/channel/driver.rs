//! Async driver for a [`ReconnectingChannel`].
//!
//! The driver is the channel's single logical thread. It pulls transport
//! events off the queue and fires timers when their deadline passes:
//!
//! ```text
//! loop {
//!     select! {
//!         (link, event) = events.recv()   => channel.handle_transport_event(link, event)
//!         _ = sleep_until(next_deadline)  => channel.fire_due(now)
//!         _ = wake.notified()             => {} // timers changed, recompute deadline
//!     }
//! }
//! ```
//!
//! It exits once the channel has been disconnected and every remaining timer
//! (for example a pending command timeout) has fired.

use std::future;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::ReconnectingChannel;

/// Drive `channel` until it is disconnected and idle.
///
/// Only one driver per channel: a second call returns immediately.
pub async fn run(channel: ReconnectingChannel) {
    let Some(mut events) = channel.take_event_receiver() else {
        log::warn!("[driver] Event queue already taken, driver not started");
        return;
    };
    let wake = channel.wake_handle();

    log::debug!("[driver] Started for {}", channel.endpoint());
    loop {
        if channel.is_finished() {
            break;
        }
        let deadline = channel.next_deadline();

        tokio::select! {
            event = events.recv() => match event {
                Some((link, event)) => channel.handle_transport_event(link, event),
                // The channel owns a sender, so this only happens once it is gone.
                None => break,
            },
            () = sleep_until(deadline) => {
                channel.fire_due(Instant::now());
            }
            () = wake.notified() => {}
        }
    }
    log::debug!("[driver] Stopped");
}

/// Spawn [`run`] on the current runtime.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn(channel: ReconnectingChannel) -> JoinHandle<()> {
    tokio::spawn(run(channel))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
