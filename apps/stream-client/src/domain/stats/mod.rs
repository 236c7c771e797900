//! Client Statistics
//!
//! Running counters maintained by the processing stage. Readers always get
//! a `Copy` snapshot taken under the lock, never a live reference, so a
//! frame's count, byte total and timestamp are observed together.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Point-in-time copy of a client's statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Whether the last lifecycle event reported a live connection.
    pub connected: bool,
    /// Number of frames received.
    pub total_received: u64,
    /// Sum of processed frame lengths. Frames dropped at a full inbound
    /// channel are counted in `dropped_bytes` instead.
    pub total_bytes: u64,
    /// When the most recent frame was processed.
    pub last_received: Option<DateTime<Utc>>,
    /// Frames read off the socket but discarded before processing.
    pub dropped_frames: u64,
    /// Bytes in those discarded frames.
    pub dropped_bytes: u64,
}

/// Shared statistics block.
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: RwLock<Stats>,
}

impl StatsTracker {
    /// Create a tracker with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a consistent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Stats {
        *self.inner.read()
    }

    /// Current connection flag.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    /// Record one received frame of `len` bytes.
    pub fn record_frame(&self, len: usize, at: DateTime<Utc>) {
        let len = u64::try_from(len).unwrap_or(u64::MAX);
        let mut stats = self.inner.write();
        stats.total_received = stats.total_received.saturating_add(1);
        stats.total_bytes = stats.total_bytes.saturating_add(len);
        stats.last_received = Some(at);
    }

    /// Record frames the connection loop could not hand over.
    pub fn record_dropped(&self, frames: u64, bytes: u64) {
        let mut stats = self.inner.write();
        stats.dropped_frames = stats.dropped_frames.saturating_add(frames);
        stats.dropped_bytes = stats.dropped_bytes.saturating_add(bytes);
    }

    /// Update the connection flag, returning the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        std::mem::replace(&mut self.inner.write().connected, connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let tracker = StatsTracker::new();
        assert_eq!(tracker.snapshot(), Stats::default());
        assert!(!tracker.is_connected());
    }

    #[test]
    fn record_frame_updates_all_counters() {
        let tracker = StatsTracker::new();
        let at = Utc::now();

        tracker.record_frame(10, at);
        tracker.record_frame(5, at);

        let stats = tracker.snapshot();
        assert_eq!(stats.total_received, 2);
        assert_eq!(stats.total_bytes, 15);
        assert_eq!(stats.last_received, Some(at));
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let tracker = StatsTracker::new();
        let before = tracker.snapshot();

        tracker.record_frame(3, Utc::now());

        assert_eq!(before.total_received, 0);
        assert_eq!(tracker.snapshot().total_received, 1);
    }

    #[test]
    fn set_connected_returns_previous() {
        let tracker = StatsTracker::new();
        assert!(!tracker.set_connected(true));
        assert!(tracker.set_connected(false));
        assert!(!tracker.is_connected());
    }

    #[test]
    fn dropped_frames_are_kept_apart_from_totals() {
        let tracker = StatsTracker::new();
        tracker.record_frame(4, Utc::now());
        tracker.record_dropped(2, 9);
        tracker.record_dropped(1, 3);

        let stats = tracker.snapshot();
        assert_eq!(stats.total_received, 1);
        assert_eq!(stats.total_bytes, 4);
        assert_eq!(stats.dropped_frames, 3);
        assert_eq!(stats.dropped_bytes, 12);
    }
}
