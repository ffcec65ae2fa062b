// Checkpoint tracker - debounced cursor acknowledgment
//
// The server hands us a resume cursor (`next`) with every frame. We owe it
// an acknowledgment so a reconnect can resume instead of resyncing, but we
// do not owe it one per frame: acks are debounced and best-effort. A failed
// ack never discards ingested entries and never blocks ingestion; it is
// simply retried at the same interval.
//
// State Diagram:
//
//   [Idle] ──observe(new id)──▶ [PendingAck] ──timer──▶ ack in flight
//     ▲                              ▲    │
//     │            failure / newer id│    │success, nothing newer
//     └──────────────────────────────┘◀───┘
//
// The tracker itself is a synchronous state machine; the controller owns
// the actual debounce timer and the ack request task.

use std::time::Duration;

/// Default debounce before acknowledging the latest cursor.
pub const DEFAULT_ACK_DEBOUNCE: Duration = Duration::from_millis(500);

/// Acknowledgment state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckState {
    #[default]
    Idle,
    PendingAck,
}

/// Tracks the last durably-acknowledged cursor and what still needs
/// acknowledging. Invariant: `last_accepted <= pending`, and the state is
/// `Idle` exactly when the two are equal.
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    state: AckState,
    last_accepted: u64,
    pending: u64,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AckState {
        self.state
    }

    /// Highest cursor confirmed to the transport.
    pub fn last_accepted(&self) -> u64 {
        self.last_accepted
    }

    /// Highest cursor seen, acknowledged or not.
    pub fn pending_ack(&self) -> u64 {
        self.pending
    }

    /// A frame arrived carrying cursor `id`. Returns true when the caller
    /// should start the debounce timer (first unacknowledged cursor while
    /// idle); while already pending, the cursor just ratchets up.
    pub fn observe(&mut self, id: u64) -> bool {
        self.pending = self.pending.max(id);
        if self.state == AckState::Idle && self.pending > self.last_accepted {
            self.state = AckState::PendingAck;
            return true;
        }
        false
    }

    /// The debounce timer fired: returns the cursor to acknowledge, or
    /// `None` if there is nothing outstanding (stale timer).
    pub fn begin_ack(&self) -> Option<u64> {
        match self.state {
            AckState::PendingAck => Some(self.pending),
            AckState::Idle => None,
        }
    }

    /// The ack for `id` succeeded. Returns true when a newer cursor arrived
    /// in the meantime and the caller should re-arm the timer.
    pub fn on_ack_success(&mut self, id: u64) -> bool {
        self.last_accepted = self.last_accepted.max(id);
        if self.pending > self.last_accepted {
            // Newer frames raced the in-flight ack
            self.state = AckState::PendingAck;
            true
        } else {
            self.state = AckState::Idle;
            false
        }
    }

    /// The ack failed (transport error or non-2xx). The cursor stays
    /// pending; caller re-arms the timer and we retry indefinitely.
    pub fn on_ack_failure(&mut self) -> bool {
        self.state = AckState::PendingAck;
        true
    }

    /// Session teardown: both counters return to 0 so a re-enable starts a
    /// full resync.
    pub fn reset(&mut self) {
        self.state = AckState::Idle;
        self.last_accepted = 0;
        self.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle_at_zero() {
        let tracker = CheckpointTracker::new();
        assert_eq!(tracker.state(), AckState::Idle);
        assert_eq!(tracker.last_accepted(), 0);
        assert_eq!(tracker.pending_ack(), 0);
        assert_eq!(tracker.begin_ack(), None);
    }

    #[test]
    fn test_first_observation_requests_timer() {
        let mut tracker = CheckpointTracker::new();
        assert!(tracker.observe(5));
        assert_eq!(tracker.state(), AckState::PendingAck);

        // Further cursors ratchet without a second timer
        assert!(!tracker.observe(9));
        assert_eq!(tracker.pending_ack(), 9);
    }

    #[test]
    fn test_pending_is_monotonic() {
        let mut tracker = CheckpointTracker::new();
        tracker.observe(9);
        tracker.observe(4); // out-of-order cursor does not lower pending
        assert_eq!(tracker.pending_ack(), 9);
    }

    #[test]
    fn test_successful_ack_returns_to_idle() {
        let mut tracker = CheckpointTracker::new();
        tracker.observe(5);
        let id = tracker.begin_ack().unwrap();
        assert_eq!(id, 5);
        assert!(!tracker.on_ack_success(id));
        assert_eq!(tracker.state(), AckState::Idle);
        assert_eq!(tracker.last_accepted(), 5);
    }

    #[test]
    fn test_newer_cursor_during_inflight_ack_rearms() {
        let mut tracker = CheckpointTracker::new();
        tracker.observe(5);
        let id = tracker.begin_ack().unwrap();
        tracker.observe(8); // arrives while the ack request is in flight
        assert!(tracker.on_ack_success(id));
        assert_eq!(tracker.state(), AckState::PendingAck);
        assert_eq!(tracker.begin_ack(), Some(8));
    }

    #[test]
    fn test_failed_ack_retries_without_losing_cursor() {
        let mut tracker = CheckpointTracker::new();
        tracker.observe(5);
        assert!(tracker.on_ack_failure());
        assert_eq!(tracker.begin_ack(), Some(5));
        assert_eq!(tracker.last_accepted(), 0);
    }

    #[test]
    fn test_observing_already_accepted_cursor_stays_idle() {
        let mut tracker = CheckpointTracker::new();
        tracker.observe(5);
        tracker.on_ack_success(5);
        // Redelivery of an old cursor should not schedule an ack
        assert!(!tracker.observe(5));
        assert_eq!(tracker.state(), AckState::Idle);
    }

    #[test]
    fn test_reset_zeroes_both_counters() {
        let mut tracker = CheckpointTracker::new();
        tracker.observe(42);
        tracker.on_ack_success(42);
        tracker.reset();
        assert_eq!(tracker.last_accepted(), 0);
        assert_eq!(tracker.pending_ack(), 0);
        assert_eq!(tracker.state(), AckState::Idle);
    }
}
