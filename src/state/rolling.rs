use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::sample::Sample;

/// Time-bounded buffer of recent samples for graphing
///
/// Entries are kept in sequence order and evicted oldest-first purely by
/// age, so memory stays proportional to `window / interval` no matter
/// how long the session runs.
#[derive(Debug, Clone)]
pub struct RollingStore {
    samples: VecDeque<Sample>,
    window: Duration,
}

impl RollingStore {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Append a sample and evict everything older than the window
    pub fn push(&mut self, sample: Sample) {
        self.push_at(sample, Instant::now());
    }

    /// Like [`push`](Self::push) with an explicit notion of "now"
    pub fn push_at(&mut self, sample: Sample, now: Instant) {
        self.samples.push_back(sample);
        self.evict(now);
    }

    /// Copy of the retained samples, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.snapshot_at(Instant::now())
    }

    /// Copy of the samples inside the window ending at `now`
    ///
    /// Filters rather than evicts, so a reader never sees an entry the
    /// next push would drop.
    pub fn snapshot_at(&self, now: Instant) -> Vec<Sample> {
        let cutoff = now.checked_sub(self.window);
        self.samples
            .iter()
            .filter(|s| cutoff.is_none_or(|c| s.sent_at >= c))
            .cloned()
            .collect()
    }

    /// Change the retention window; eviction applies from the next push
    pub fn reconfigure_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Reset for a fresh session
    pub fn reset(&mut self, window: Duration) {
        self.samples.clear();
        self.window = window;
    }

    fn evict(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.samples.front().is_some_and(|s| s.sent_at < cutoff) {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProbeOutcome;

    fn sample(seq: u64) -> Sample {
        Sample::now(seq, ProbeOutcome::success(seq as f64))
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_evicts_old_entries() {
        let mut store = RollingStore::new(Duration::from_secs(30));

        for seq in 0..40 {
            store.push(sample(seq));
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // Last push happened at t=39 so entries from t>=9 survive
        assert_eq!(store.len(), 31);
        assert_eq!(store.iter().next().unwrap().sequence, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_respects_window_without_push() {
        let mut store = RollingStore::new(Duration::from_secs(10));
        store.push(sample(0));
        tokio::time::advance(Duration::from_secs(5)).await;
        store.push(sample(1));
        tokio::time::advance(Duration::from_secs(7)).await;

        let now = Instant::now();
        let snapshot = store.snapshot_at(now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].sequence, 1);
        assert!(snapshot.iter().all(|s| s.sent_at >= now - Duration::from_secs(10)));
        // Nothing evicted until the next push
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_window_evicts_on_next_push() {
        let mut store = RollingStore::new(Duration::from_secs(30));
        for seq in 0..20 {
            store.push(sample(seq));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(store.len(), 20);

        store.reconfigure_window(Duration::from_secs(10));
        store.push(sample(20));

        let now = Instant::now();
        assert!(store.iter().all(|s| s.sent_at >= now - Duration::from_secs(10)));
        assert_eq!(store.iter().next().unwrap().sequence, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_idempotent() {
        let mut store = RollingStore::new(Duration::from_secs(30));
        store.push(sample(0));
        store.push(sample(1));
        assert_eq!(store.snapshot(), store.snapshot());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_bounded_by_window() {
        let mut store = RollingStore::new(Duration::from_secs(2));
        for seq in 0..10_000 {
            store.push(sample(seq));
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(store.len() <= 21);
    }
}
