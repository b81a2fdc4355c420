//! Per-actor command cooldowns.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::interpreter::context::ActorId;

#[derive(Debug, Clone, Copy)]
struct CooldownEntry {
    last_used: Instant,
    window: Duration,
}

impl CooldownEntry {
    fn expires_at(&self) -> Instant {
        self.last_used + self.window
    }
}

/// Last-use timestamps keyed by `(command, actor)`.
///
/// Expired entries are never consulted again; they are only swept to bound
/// memory once the tracker grows past its capacity.
#[derive(Debug)]
pub struct CooldownTracker {
    entries: Mutex<HashMap<(String, ActorId), CooldownEntry>>,
    capacity: usize,
}

impl CooldownTracker {
    /// Tracker that sweeps expired entries once it holds more than `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Time left before `actor` may run `command` again, if any.
    pub fn remaining(&self, command: &str, actor: &ActorId, window: Duration) -> Option<Duration> {
        let entries = self.entries.lock();
        let entry = entries.get(&(command.to_string(), actor.clone()))?;
        let elapsed = entry.last_used.elapsed();
        (elapsed < window).then(|| window - elapsed)
    }

    /// Record a use now.
    pub fn record(&self, command: &str, actor: &ActorId, window: Duration) {
        let mut entries = self.entries.lock();
        entries.insert(
            (command.to_string(), actor.clone()),
            CooldownEntry {
                last_used: Instant::now(),
                window,
            },
        );
        if entries.len() > self.capacity {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at() > now);
            tracing::debug!(removed = before - entries.len(), "swept expired cooldowns");
        }
    }

    /// Forget a single entry.
    pub fn reset(&self, command: &str, actor: &ActorId) -> bool {
        self.entries
            .lock()
            .remove(&(command.to_string(), actor.clone()))
            .is_some()
    }

    /// Number of tracked entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_blocks_then_expires() {
        let tracker = CooldownTracker::new(16);
        let actor = ActorId::new("a");
        let window = Duration::from_millis(50);

        assert!(tracker.remaining("ping", &actor, window).is_none());
        tracker.record("ping", &actor, window);
        let remaining = tracker.remaining("ping", &actor, window).unwrap();
        assert!(remaining > Duration::ZERO && remaining <= window);

        std::thread::sleep(Duration::from_millis(70));
        assert!(tracker.remaining("ping", &actor, window).is_none());
    }

    #[test]
    fn actors_and_commands_are_independent() {
        let tracker = CooldownTracker::new(16);
        let window = Duration::from_secs(60);
        tracker.record("ping", &ActorId::new("a"), window);
        assert!(tracker.remaining("ping", &ActorId::new("b"), window).is_none());
        assert!(tracker.remaining("pong", &ActorId::new("a"), window).is_none());
    }

    #[test]
    fn sweep_keeps_live_entries() {
        let tracker = CooldownTracker::new(2);
        tracker.record("a", &ActorId::new("1"), Duration::ZERO);
        tracker.record("b", &ActorId::new("1"), Duration::ZERO);
        tracker.record("c", &ActorId::new("1"), Duration::from_secs(60));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.reset("c", &ActorId::new("1")));
    }
}
