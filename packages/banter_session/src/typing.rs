//! Per-room typing debounce tracker.
//!
//! Each (room, user) is either absent or active with a deadline. A fresh
//! typing signal (re)starts the countdown in place — no flicker; an explicit
//! stop or the deadline passing clears the entry. The session loop drives
//! expiry from [`TypingTracker::next_deadline`], so no timer outlives its
//! room or the session.

use tokio::time::{Duration, Instant};

#[derive(Debug)]
struct TypingEntry {
    user_id: String,
    display_name: String,
    deadline: Instant,
}

/// Typing state for one room. Entries keep activation order.
#[derive(Debug)]
pub struct TypingTracker {
    ttl: Duration,
    entries: Vec<TypingEntry>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Vec::new(),
        }
    }

    /// Apply a typing signal. Returns `true` if the active set changed
    /// (an entry appeared or disappeared — deadline refreshes alone don't
    /// count).
    pub fn signal(
        &mut self,
        user_id: &str,
        display_name: &str,
        is_typing: bool,
        now: Instant,
    ) -> bool {
        let position = self.entries.iter().position(|e| e.user_id == user_id);
        match (is_typing, position) {
            (true, Some(at)) => {
                self.entries[at].deadline = now + self.ttl;
                false
            }
            (true, None) => {
                self.entries.push(TypingEntry {
                    user_id: user_id.to_string(),
                    display_name: display_name.to_string(),
                    deadline: now + self.ttl,
                });
                true
            }
            (false, Some(at)) => {
                self.entries.remove(at);
                true
            }
            (false, None) => false,
        }
    }

    /// Drop entries whose deadline has passed. Returns `true` if any were
    /// removed.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.deadline > now);
        self.entries.len() != before
    }

    /// The earliest pending deadline, if anyone is typing.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Display names of currently active typists, in activation order.
    pub fn active_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.display_name.clone()).collect()
    }

    /// Drop everything. Returns `true` if the set was non-empty.
    pub fn clear(&mut self) -> bool {
        let was_active = !self.entries.is_empty();
        self.entries.clear();
        was_active
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let mut tracker = TypingTracker::new(TTL);
        let start = Instant::now();
        assert!(tracker.signal("u1", "Alice", true, start));
        assert_eq!(tracker.active_names(), vec!["Alice"]);

        assert!(!tracker.expire(start + Duration::from_millis(2999)));
        assert!(tracker.expire(start + TTL));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_signal_restarts_countdown() {
        let mut tracker = TypingTracker::new(TTL);
        let start = Instant::now();
        tracker.signal("u1", "Alice", true, start);

        // Re-signal at 2.9s: deadline moves, no set change reported
        let resignal = start + Duration::from_millis(2900);
        assert!(!tracker.signal("u1", "Alice", true, resignal));

        // Past the original 3s mark the entry is still active
        assert!(!tracker.expire(start + Duration::from_millis(3100)));
        assert_eq!(tracker.active_names(), vec!["Alice"]);

        // ...and gone 3s after the re-signal
        assert!(tracker.expire(resignal + TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_clears_entry() {
        let mut tracker = TypingTracker::new(TTL);
        let now = Instant::now();
        tracker.signal("u1", "Alice", true, now);
        assert!(tracker.signal("u1", "Alice", false, now));
        assert!(tracker.is_empty());
        // Stop for an absent user is a no-op
        assert!(!tracker.signal("u1", "Alice", false, now));
    }

    #[tokio::test(start_paused = true)]
    async fn names_keep_activation_order() {
        let mut tracker = TypingTracker::new(TTL);
        let now = Instant::now();
        tracker.signal("u1", "Alice", true, now);
        tracker.signal("u2", "Bob", true, now + Duration::from_millis(100));
        // Refresh doesn't reorder
        tracker.signal("u1", "Alice", true, now + Duration::from_millis(200));
        assert_eq!(tracker.active_names(), vec!["Alice", "Bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn next_deadline_is_earliest() {
        let mut tracker = TypingTracker::new(TTL);
        let now = Instant::now();
        assert!(tracker.next_deadline().is_none());

        tracker.signal("u1", "Alice", true, now);
        tracker.signal("u2", "Bob", true, now + Duration::from_secs(1));
        assert_eq!(tracker.next_deadline(), Some(now + TTL));

        // Expiring Alice leaves Bob's later deadline
        assert!(tracker.expire(now + TTL));
        assert_eq!(
            tracker.next_deadline(),
            Some(now + Duration::from_secs(1) + TTL)
        );
        assert_eq!(tracker.active_names(), vec!["Bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_reports_whether_anyone_was_typing() {
        let mut tracker = TypingTracker::new(TTL);
        assert!(!tracker.clear());
        tracker.signal("u1", "Alice", true, Instant::now());
        assert!(tracker.clear());
        assert!(tracker.is_empty());
    }
}
