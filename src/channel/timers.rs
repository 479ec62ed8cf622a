//! Deadline-based one-shot timers owned by a channel.
//!
//! Timers are plain entries in a table: `schedule` records a deadline,
//! `cancel` removes the entry, and the owner asks for everything that is due
//! with [`TimerTable::take_due`]. Nothing runs in the background, so a
//! cancelled timer can never fire late and tests can advance time by simply
//! passing a later `now`.
//!
//! Periodic behavior (the heartbeat) is built by rescheduling from the action
//! handler.

use std::fmt;

use tokio::time::Instant;

/// Handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer_{}", self.0)
    }
}

/// A single timer entry in the table.
struct TimerEntry<A> {
    id: TimerId,
    /// When this timer should fire.
    fire_at: Instant,
    /// What to do when it fires.
    action: A,
}

/// Table of pending one-shot timers carrying actions of type `A`.
pub struct TimerTable<A> {
    /// Pending timers, unordered.
    entries: Vec<TimerEntry<A>>,
    /// Counter for generating unique timer IDs.
    next_id: u64,
}

impl<A> Default for TimerTable<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<A> fmt::Debug for TimerTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTable")
            .field("pending", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<A> TimerTable<A> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to fire at `fire_at`.
    pub fn schedule(&mut self, fire_at: Instant, action: A) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(TimerEntry {
            id,
            fire_at,
            action,
        });
        id
    }

    /// Remove a pending timer. Returns `true` if it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.fire_at).min()
    }

    /// Remove and return every timer due at `now`, earliest first.
    ///
    /// Timers sharing a deadline come out in scheduling order.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerId, A)> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].fire_at <= now {
                due.push(self.entries.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|e| (e.fire_at, e.id));
        due.into_iter().map(|e| (e.id, e.action)).collect()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
