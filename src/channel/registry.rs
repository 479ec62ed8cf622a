//! Typed publish/subscribe registry.
//!
//! Maps a [`Tag`] to an ordered list of [`Subscription`]s. Registration order
//! is dispatch order. A subscription is identified by its id, so clones of one
//! `Subscription` are the same subscription and can be used to unregister it.
//!
//! The registry itself never invokes callbacks. The channel snapshots the
//! subscriber list under its lock and calls them after releasing it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::ChannelEvent;
use crate::envelope::Tag;

/// Source of subscription ids, unique across every channel in the process.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Callback type stored in a subscription.
pub type Callback = dyn Fn(&ChannelEvent) + Send + Sync;

/// A subscriber callback with a stable identity.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    callback: Arc<Callback>,
}

impl Subscription {
    /// Wrap `callback` in a new subscription.
    pub fn new(callback: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            callback: Arc::new(callback),
        }
    }

    /// Process-unique id of this subscription.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn call(&self, event: &ChannelEvent) {
        (self.callback)(event);
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Tag to subscribers mapping owned by one channel.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<Tag, Vec<Subscription>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("tag_count", &self.subscriptions.len())
            .field("total_subscriptions", &self.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `subscription` to the list for `tag`.
    ///
    /// Registering the same subscription twice makes it fire twice.
    pub fn on(&mut self, tag: Tag, subscription: Subscription) {
        self.subscriptions.entry(tag).or_default().push(subscription);
    }

    /// Remove the first registration of `subscription` under `tag`.
    ///
    /// Returns `true` if something was removed. Unknown tags and
    /// subscriptions are a no-op.
    pub fn off(&mut self, tag: &Tag, subscription: &Subscription) -> bool {
        let Some(list) = self.subscriptions.get_mut(tag) else {
            return false;
        };
        let Some(pos) = list.iter().position(|s| s == subscription) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.subscriptions.remove(tag);
        }
        true
    }

    /// Snapshot of the subscribers for `tag`, in registration order.
    #[must_use]
    pub fn subscribers(&self, tag: &Tag) -> Vec<Subscription> {
        self.subscriptions.get(tag).cloned().unwrap_or_default()
    }

    /// Whether `subscription` is currently registered under `tag`.
    #[must_use]
    pub fn contains(&self, tag: &Tag, subscription: &Subscription) -> bool {
        self.subscriptions
            .get(tag)
            .is_some_and(|list| list.contains(subscription))
    }

    /// Number of subscribers for `tag`.
    #[must_use]
    pub fn count(&self, tag: &Tag) -> usize {
        self.subscriptions.get(tag).map_or(0, Vec::len)
    }

    /// Total registrations across all tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Tags that currently have at least one subscriber.
    #[must_use]
    pub fn tags(&self) -> Vec<Tag> {
        self.subscriptions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Subscription {
        let log = Arc::clone(log);
        Subscription::new(move |_| log.lock().unwrap().push(name))
    }

    #[test]
    fn test_dispatch_order_is_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.on(Tag::IotData, recorder(&log, "first"));
        registry.on(Tag::IotData, recorder(&log, "second"));

        for sub in registry.subscribers(&Tag::IotData) {
            sub.call(&ChannelEvent::Connected(true));
        }
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_off_by_clone_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        let sub = recorder(&log, "a");
        registry.on(Tag::Pong, sub.clone());

        assert!(registry.contains(&Tag::Pong, &sub));
        assert!(registry.off(&Tag::Pong, &sub.clone()));
        assert!(!registry.contains(&Tag::Pong, &sub));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_off_unknown_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        let registered = recorder(&log, "a");
        let stranger = recorder(&log, "b");
        registry.on(Tag::Error, registered);

        assert!(!registry.off(&Tag::Error, &stranger));
        assert!(!registry.off(&Tag::Hello, &stranger));
        assert_eq!(registry.count(&Tag::Error), 1);
    }

    #[test]
    fn test_same_subscription_on_two_tags_is_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        let sub = recorder(&log, "a");
        registry.on(Tag::LedControlAck, sub.clone());
        registry.on(Tag::ServoControlAck, sub.clone());

        registry.off(&Tag::LedControlAck, &sub);
        assert!(registry.contains(&Tag::ServoControlAck, &sub));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tags(), vec![Tag::ServoControlAck]);
    }

    #[test]
    fn test_duplicate_registration_removed_one_at_a_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        let sub = recorder(&log, "a");
        registry.on(Tag::Connected, sub.clone());
        registry.on(Tag::Connected, sub.clone());

        assert!(registry.off(&Tag::Connected, &sub));
        assert_eq!(registry.count(&Tag::Connected), 1);
    }

    #[test]
    fn test_unknown_tags_are_distinct_keys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.on(Tag::Unknown("a".into()), recorder(&log, "a"));

        assert_eq!(registry.count(&Tag::Unknown("a".into())), 1);
        assert_eq!(registry.count(&Tag::Unknown("b".into())), 0);
    }
}
