//! The reconnecting channel core.
//!
//! All state lives in [`ChannelInner`] behind one mutex. Every entry point
//! (transport event, timer expiry, user call) runs its state transition to
//! completion under the lock and returns the deliveries it produced. The
//! handle then releases the lock and invokes subscribers.
//!
//! # Deadlock Prevention
//!
//! Subscribers may call back into the channel (`send`, `on`, `off`,
//! `disconnect`, `schedule_once`) from inside their callback. This works
//! because no callback ever runs while `ChannelInner` is locked. Before each
//! invocation the handle re-locks briefly to confirm the subscription is still
//! registered and the channel is not disconnected, so an `off()` or
//! `disconnect()` issued by an earlier subscriber in the same batch takes
//! effect immediately.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::registry::{Subscription, SubscriptionRegistry};
use super::timers::{TimerId, TimerTable};
use super::{ChannelConfig, ChannelError, ChannelEvent, ChannelState, Fault};
use crate::envelope::{Envelope, Tag};
use crate::transport::{
    Link, LinkId, Transport, TransportEvent, TransportEventReceiver, TransportEvents,
};

/// What a channel timer does when it expires.
enum TimerAction {
    /// Send a ping and re-arm.
    Heartbeat,
    /// Reopen after a close.
    Reconnect,
    /// Force-close a link that reported an error but never closed.
    ErrorGrace(LinkId),
    /// User callback registered with `schedule_once`.
    Callback(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heartbeat => write!(f, "Heartbeat"),
            Self::Reconnect => write!(f, "Reconnect"),
            Self::ErrorGrace(link) => write!(f, "ErrorGrace({link})"),
            Self::Callback(_) => write!(f, "Callback"),
        }
    }
}

/// The link currently owned by the channel.
struct ActiveLink {
    id: LinkId,
    handle: Box<dyn Link>,
}

/// One event bound for a snapshot of subscribers.
struct Delivery {
    tag: Tag,
    event: ChannelEvent,
    subscribers: Vec<Subscription>,
}

/// Mutable channel state. Only ever touched under the handle's mutex.
struct ChannelInner {
    config: ChannelConfig,
    transport: Box<dyn Transport>,
    link: Option<ActiveLink>,
    next_link: u64,
    state: ChannelState,
    registry: SubscriptionRegistry,
    timers: TimerTable<TimerAction>,
    heartbeat: Option<TimerId>,
    reconnect: Option<TimerId>,
    error_grace: Option<TimerId>,
    /// A reconnect timer is armed. At most one at a time.
    reconnect_pending: bool,
    /// `disconnect()` was called. Terminal.
    disconnected: bool,
    events_tx: TransportEvents,
    events_rx: Option<TransportEventReceiver>,
}

/// Cloneable handle to a reconnecting channel.
///
/// Clones share the same connection, subscriptions and timers.
#[derive(Clone)]
pub struct ReconnectingChannel {
    inner: Arc<Mutex<ChannelInner>>,
    wake: Arc<Notify>,
}

/// Non-owning handle, used by callbacks that must not keep the channel alive.
#[derive(Clone, Debug)]
pub struct WeakChannel {
    inner: Weak<Mutex<ChannelInner>>,
    wake: Weak<Notify>,
}

impl WeakChannel {
    /// Recover a strong handle if the channel still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<ReconnectingChannel> {
        Some(ReconnectingChannel {
            inner: self.inner.upgrade()?,
            wake: self.wake.upgrade()?,
        })
    }
}

impl fmt::Debug for ChannelInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInner")
            .field("endpoint", &self.config.endpoint)
            .field("link", &self.link.as_ref().map(|l| l.id))
            .field("state", &self.state)
            .field("reconnect_pending", &self.reconnect_pending)
            .field("disconnected", &self.disconnected)
            .field("registry", &self.registry)
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ReconnectingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingChannel")
            .field("inner", &*self.lock())
            .finish()
    }
}

impl ReconnectingChannel {
    /// Create a channel and immediately start connecting.
    ///
    /// The returned channel is in [`ChannelState::Connecting`]. Nothing
    /// progresses until transport events are fed in, normally by
    /// [`driver::run`](super::driver::run).
    pub fn new(config: ChannelConfig, transport: Box<dyn Transport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                config,
                transport,
                link: None,
                next_link: 0,
                state: ChannelState::Connecting,
                registry: SubscriptionRegistry::new(),
                timers: TimerTable::new(),
                heartbeat: None,
                reconnect: None,
                error_grace: None,
                reconnect_pending: false,
                disconnected: false,
                events_tx,
                events_rx: Some(events_rx),
            })),
            wake: Arc::new(Notify::new()),
        };
        channel.connect();
        channel
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-owning handle to this channel.
    #[must_use]
    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
            wake: Arc::downgrade(&self.wake),
        }
    }

    /// Open a fresh link, replacing the current one.
    ///
    /// Cancels any pending reconnect. If the channel is open, subscribers see
    /// `Connected(false)` before the new attempt starts. Refused with a warning
    /// after [`disconnect`](Self::disconnect).
    pub fn connect(&self) {
        let deliveries = {
            let mut inner = self.lock();
            let mut out = Vec::new();
            inner.connect(&mut out);
            out
        };
        self.deliver(deliveries);
        self.wake.notify_one();
    }

    /// Feed one lifecycle event reported by a link.
    ///
    /// Events from any link other than the current one are ignored.
    pub fn handle_transport_event(&self, link: LinkId, event: TransportEvent) {
        let deliveries = {
            let mut inner = self.lock();
            if inner.disconnected {
                debug!("[channel] Ignoring {event:?} from {link} after disconnect");
                return;
            }
            if !inner.is_current(link) {
                debug!("[channel] Ignoring {event:?} from superseded {link}");
                return;
            }
            let mut out = Vec::new();
            match event {
                TransportEvent::Open => inner.on_open(&mut out),
                TransportEvent::Message(text) => inner.on_message(&text, &mut out),
                TransportEvent::Close { code, reason } => inner.on_close(code, &reason, &mut out),
                TransportEvent::Error(message) => inner.on_error(message, &mut out),
            }
            out
        };
        self.deliver(deliveries);
        self.wake.notify_one();
    }

    /// Encode and write `envelope` if the channel is open.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] when not open,
    /// [`ChannelError::Disconnected`] after `disconnect()`, or the link's
    /// write error. Nothing is queued for later; callers may ignore the error.
    pub fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        let result = {
            let mut inner = self.lock();
            if inner.disconnected {
                Err(ChannelError::Disconnected)
            } else {
                inner.write(envelope)
            }
        };
        if let Err(e) = &result {
            warn!("[channel] Dropping outgoing `{}`: {e}", envelope.tag());
        }
        result
    }

    /// Register `subscription` for `tag`.
    pub fn on(&self, tag: Tag, subscription: Subscription) {
        self.lock().registry.on(tag, subscription);
    }

    /// Unregister `subscription` from `tag`. Returns `true` if it was registered.
    pub fn off(&self, tag: &Tag, subscription: &Subscription) -> bool {
        self.lock().registry.off(tag, subscription)
    }

    /// Register `callback` for `tag` and return its subscription handle.
    pub fn subscribe(
        &self,
        tag: Tag,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let subscription = Subscription::new(callback);
        self.on(tag, subscription.clone());
        subscription
    }

    /// Number of subscribers registered for `tag`.
    #[must_use]
    pub fn subscriber_count(&self, tag: &Tag) -> usize {
        self.lock().registry.count(tag)
    }

    /// Shut the channel down for good.
    ///
    /// Closes the link, cancels every channel timer and suppresses all further
    /// events and reconnects. User timers scheduled with
    /// [`schedule_once`](Self::schedule_once) still fire so pending commands
    /// can resolve.
    pub fn disconnect(&self) {
        {
            let mut inner = self.lock();
            if inner.disconnected {
                return;
            }
            inner.disconnected = true;
            inner.reconnect_pending = false;
            inner.stop_heartbeat();
            inner.cancel_reconnect();
            inner.cancel_error_grace();
            if let Some(mut link) = inner.link.take() {
                link.handle.close();
            }
            inner.state = ChannelState::Closed;
            info!("[channel] Disconnected from {}", inner.config.endpoint);
        }
        self.wake.notify_one();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Whether `disconnect()` has been called.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }

    /// Whether a reconnect attempt is scheduled.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect_pending
    }

    /// Id of the link currently owned by the channel.
    #[must_use]
    pub fn current_link(&self) -> Option<LinkId> {
        self.lock().link.as_ref().map(|l| l.id)
    }

    /// Endpoint this channel connects to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.lock().config.endpoint.clone()
    }

    /// Run `callback` once after `delay`, on the channel's timer table.
    ///
    /// The callback runs without the channel lock held.
    pub fn schedule_once(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerId {
        let id = self
            .lock()
            .timers
            .schedule(Instant::now() + delay, TimerAction::Callback(Box::new(callback)));
        self.wake.notify_one();
        id
    }

    /// Cancel a timer. Returns `true` if it had not fired yet.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let cancelled = self.lock().timers.cancel(id);
        if cancelled {
            self.wake.notify_one();
        }
        cancelled
    }

    /// Earliest pending timer deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().timers.next_deadline()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// Whether the channel is disconnected and nothing is left to fire.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let inner = self.lock();
        inner.disconnected && inner.timers.is_empty()
    }

    /// Run every timer due at `now`. Returns how many fired.
    pub fn fire_due(&self, now: Instant) -> usize {
        let (deliveries, callbacks, fired) = {
            let mut inner = self.lock();
            let due = inner.timers.take_due(now);
            let fired = due.len();
            let mut out = Vec::new();
            let mut callbacks = Vec::new();
            for (id, action) in due {
                match action {
                    TimerAction::Heartbeat => inner.on_heartbeat(id, now),
                    TimerAction::Reconnect => inner.on_reconnect_timer(id, &mut out),
                    TimerAction::ErrorGrace(link) => inner.on_error_grace(id, link, &mut out),
                    TimerAction::Callback(callback) => callbacks.push(callback),
                }
            }
            (out, callbacks, fired)
        };
        self.deliver(deliveries);
        for callback in callbacks {
            callback();
        }
        if fired > 0 {
            self.wake.notify_one();
        }
        fired
    }

    /// Take the transport event queue. Only the first call returns it.
    pub fn take_event_receiver(&self) -> Option<TransportEventReceiver> {
        self.lock().events_rx.take()
    }

    /// Notification raised whenever timers or state change.
    pub(crate) fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Invoke subscribers for collected deliveries. Must not hold the lock.
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            for subscription in &delivery.subscribers {
                let still_wanted = {
                    let inner = self.lock();
                    !inner.disconnected && inner.registry.contains(&delivery.tag, subscription)
                };
                if still_wanted {
                    subscription.call(&delivery.event);
                }
            }
        }
    }
}

impl ChannelInner {
    fn is_current(&self, link: LinkId) -> bool {
        self.link.as_ref().is_some_and(|l| l.id == link)
    }

    /// Queue `event` for the current subscribers of `tag`.
    fn emit(&self, out: &mut Vec<Delivery>, tag: Tag, event: ChannelEvent) {
        if self.disconnected {
            return;
        }
        let subscribers = self.registry.subscribers(&tag);
        if subscribers.is_empty() {
            debug!("[channel] No subscribers for `{tag}`, dropping event");
            return;
        }
        out.push(Delivery {
            tag,
            event,
            subscribers,
        });
    }

    fn write(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotConnected);
        }
        let Some(link) = self.link.as_mut() else {
            return Err(ChannelError::NotConnected);
        };
        let text = envelope
            .encode()
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        link.handle.send_text(&text)
    }

    fn connect(&mut self, out: &mut Vec<Delivery>) {
        if self.disconnected {
            warn!("[channel] connect() after disconnect() ignored");
            return;
        }
        self.cancel_reconnect();
        self.reconnect_pending = false;
        if self.state == ChannelState::Open {
            self.enter_closed(out);
        }
        if let Some(mut old) = self.link.take() {
            if !old.handle.is_closed() {
                debug!("[channel] Closing {} before reconnecting", old.id);
                old.handle.close();
            }
        }
        self.cancel_error_grace();

        self.next_link += 1;
        let id = LinkId(self.next_link);
        self.state = ChannelState::Connecting;
        info!("[channel] Connecting to {} ({id})", self.config.endpoint);
        let handle = self
            .transport
            .open(&self.config.endpoint, id, self.events_tx.clone());
        self.link = Some(ActiveLink { id, handle });
    }

    fn on_open(&mut self, out: &mut Vec<Delivery>) {
        if self.state == ChannelState::Open {
            debug!("[channel] Duplicate open ignored");
            return;
        }
        self.state = ChannelState::Open;
        info!("[channel] Connected to {}", self.config.endpoint);
        self.emit(out, Tag::Connected, ChannelEvent::Connected(true));

        let hello = Envelope::hello(self.config.client_name.clone());
        if let Err(e) = self.write(&hello) {
            warn!("[channel] Handshake not sent: {e}");
        }
        self.start_heartbeat(Instant::now());
    }

    fn on_message(&mut self, text: &str, out: &mut Vec<Delivery>) {
        match Envelope::decode(text) {
            Err(e) => {
                warn!("[channel] Dropping undecodable frame: {e}");
                self.emit(out, Tag::Error, ChannelEvent::Fault(Fault::Decode(e)));
            }
            Ok(Envelope::Ping { timestamp }) => {
                if self.state == ChannelState::Open {
                    if let Err(e) = self.write(&Envelope::pong_for(timestamp)) {
                        warn!("[channel] Pong not sent: {e}");
                    }
                }
            }
            Ok(envelope) => {
                let tag = envelope.tag();
                self.emit(out, tag, ChannelEvent::Message(envelope));
            }
        }
    }

    fn on_close(&mut self, code: u16, reason: &str, out: &mut Vec<Delivery>) {
        info!("[channel] Connection closed ({code}: {reason})");
        self.link = None;
        self.cancel_error_grace();
        self.enter_closed(out);
        self.schedule_reconnect();
    }

    fn on_error(&mut self, message: String, out: &mut Vec<Delivery>) {
        warn!("[channel] Transport error: {message}");
        self.emit(out, Tag::Error, ChannelEvent::Fault(Fault::Transport(message)));
        if self.error_grace.is_none() {
            if let Some(link) = &self.link {
                let fire_at = Instant::now() + self.config.error_close_grace;
                self.error_grace = Some(
                    self.timers
                        .schedule(fire_at, TimerAction::ErrorGrace(link.id)),
                );
            }
        }
    }

    /// Move to `Closed`, stop the heartbeat, and notify if we were open.
    fn enter_closed(&mut self, out: &mut Vec<Delivery>) {
        let was_open = self.state == ChannelState::Open;
        self.state = ChannelState::Closed;
        self.stop_heartbeat();
        if was_open {
            self.emit(out, Tag::Connected, ChannelEvent::Connected(false));
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.disconnected || self.reconnect_pending {
            return;
        }
        self.reconnect_pending = true;
        let fire_at = Instant::now() + self.config.reconnect_delay;
        self.reconnect = Some(self.timers.schedule(fire_at, TimerAction::Reconnect));
        info!(
            "[channel] Reconnecting in {}s",
            self.config.reconnect_delay.as_secs_f32()
        );
    }

    fn start_heartbeat(&mut self, now: Instant) {
        self.stop_heartbeat();
        let fire_at = now + self.config.heartbeat_interval;
        self.heartbeat = Some(self.timers.schedule(fire_at, TimerAction::Heartbeat));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(id) = self.heartbeat.take() {
            self.timers.cancel(id);
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(id) = self.reconnect.take() {
            self.timers.cancel(id);
        }
    }

    fn cancel_error_grace(&mut self) {
        if let Some(id) = self.error_grace.take() {
            self.timers.cancel(id);
        }
    }

    fn on_heartbeat(&mut self, id: TimerId, now: Instant) {
        if self.heartbeat != Some(id) {
            return;
        }
        self.heartbeat = None;
        if self.state != ChannelState::Open {
            return;
        }
        if let Err(e) = self.write(&Envelope::ping()) {
            warn!("[channel] Heartbeat ping not sent: {e}");
        }
        self.start_heartbeat(now);
    }

    fn on_reconnect_timer(&mut self, id: TimerId, out: &mut Vec<Delivery>) {
        if self.reconnect != Some(id) {
            return;
        }
        self.reconnect = None;
        self.reconnect_pending = false;
        if self.disconnected {
            return;
        }
        self.connect(out);
    }

    fn on_error_grace(&mut self, id: TimerId, link: LinkId, out: &mut Vec<Delivery>) {
        if self.error_grace != Some(id) {
            return;
        }
        self.error_grace = None;
        if !self.is_current(link) {
            return;
        }
        warn!("[channel] {link} errored without closing, closing it locally");
        if let Some(mut active) = self.link.take() {
            active.handle.close();
        }
        self.enter_closed(out);
        self.schedule_reconnect();
    }
}
