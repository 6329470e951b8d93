//! Incremental latency and loss statistics.
//!
//! Session-level figures are folded in one sample at a time and never
//! retain history. Windowed figures are recomputed on demand from the
//! samples the [`RollingStore`] still holds, so raw samples are stored
//! exactly once.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::quality::Quality;
use super::rolling::RollingStore;
use super::sample::{ProbeOutcome, Sample};

/// Point-in-time statistics over a set of samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub count: u64,
    pub success_count: u64,
    /// Timeouts, unreachables and transport errors combined
    pub loss_count: u64,
    pub timeout_count: u64,
    pub unreachable_count: u64,
    pub error_count: u64,
    /// RTT figures cover successes only and are absent without any
    pub min_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    pub mean_rtt: Option<f64>,
    /// Population standard deviation of successful RTTs
    pub stddev_rtt: Option<f64>,
    /// Mean absolute difference between consecutive successful RTTs
    pub jitter: Option<f64>,
    pub last_rtt: Option<f64>,
    pub loss_rate_percent: f64,
    pub quality: Quality,
}

/// Running accumulator behind [`AggregateStats`]
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: u64,
    success_count: u64,
    timeout_count: u64,
    unreachable_count: u64,
    error_count: u64,

    min_rtt: f64,
    max_rtt: f64,
    sum_rtt: f64,

    // Welford's online algorithm for variance
    welford_mean: f64,
    m2: f64,

    jitter_sum: f64,
    jitter_pairs: u64,
    /// Previous RTT if the previous sample was a success
    prev_success_rtt: Option<f64>,

    last_outcome: Option<ProbeOutcome>,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            success_count: 0,
            timeout_count: 0,
            unreachable_count: 0,
            error_count: 0,
            min_rtt: f64::INFINITY,
            max_rtt: f64::NEG_INFINITY,
            sum_rtt: 0.0,
            welford_mean: 0.0,
            m2: 0.0,
            jitter_sum: 0.0,
            jitter_pairs: 0,
            prev_success_rtt: None,
            last_outcome: None,
        }
    }

    /// Fold one outcome into the running figures
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        self.count += 1;

        match outcome {
            ProbeOutcome::Success { rtt_ms } => {
                let rtt = *rtt_ms;
                self.success_count += 1;
                self.min_rtt = self.min_rtt.min(rtt);
                self.max_rtt = self.max_rtt.max(rtt);
                self.sum_rtt += rtt;

                let delta = rtt - self.welford_mean;
                self.welford_mean += delta / self.success_count as f64;
                let delta2 = rtt - self.welford_mean;
                self.m2 += delta * delta2;

                if let Some(prev) = self.prev_success_rtt {
                    self.jitter_sum += (rtt - prev).abs();
                    self.jitter_pairs += 1;
                }
                self.prev_success_rtt = Some(rtt);
            }
            lossy => {
                match lossy {
                    ProbeOutcome::Timeout => self.timeout_count += 1,
                    ProbeOutcome::Unreachable => self.unreachable_count += 1,
                    _ => self.error_count += 1,
                }
                // Any loss breaks the run of consecutive successes
                self.prev_success_rtt = None;
            }
        }

        self.last_outcome = Some(outcome.clone());
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> AggregateStats {
        let loss_count = self.timeout_count + self.unreachable_count + self.error_count;
        let has_rtt = self.success_count > 0;

        let mean_rtt = has_rtt.then(|| self.sum_rtt / self.success_count as f64);
        // Floating point summation can land a hair outside [min, max]
        let mean_rtt = mean_rtt.map(|m| m.clamp(self.min_rtt, self.max_rtt));

        AggregateStats {
            count: self.count,
            success_count: self.success_count,
            loss_count,
            timeout_count: self.timeout_count,
            unreachable_count: self.unreachable_count,
            error_count: self.error_count,
            min_rtt: has_rtt.then_some(self.min_rtt),
            max_rtt: has_rtt.then_some(self.max_rtt),
            mean_rtt,
            stddev_rtt: has_rtt.then(|| (self.m2 / self.success_count as f64).max(0.0).sqrt()),
            jitter: (self.jitter_pairs > 0).then(|| self.jitter_sum / self.jitter_pairs as f64),
            last_rtt: self.last_outcome.as_ref().and_then(ProbeOutcome::rtt_ms),
            loss_rate_percent: if self.count == 0 {
                0.0
            } else {
                loss_count as f64 / self.count as f64 * 100.0
            },
            quality: Quality::from_outcome(self.last_outcome.as_ref()),
        }
    }
}

impl AggregateStats {
    /// Compute statistics over an ordered run of samples
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let mut running = RunningStats::new();
        for sample in samples {
            running.record(&sample.outcome);
        }
        running.snapshot()
    }
}

/// Session-level statistics plus the span used for windowed figures
#[derive(Debug, Clone)]
pub struct Aggregator {
    session: RunningStats,
    stats_window: Duration,
    last_sequence: Option<u64>,
}

impl Aggregator {
    pub fn new(stats_window: Duration) -> Self {
        Self {
            session: RunningStats::new(),
            stats_window,
            last_sequence: None,
        }
    }

    /// Fold a sample into the session totals
    ///
    /// Callers feed samples in increasing sequence order; anything at or
    /// below the last ingested sequence is a duplicate and is ignored.
    pub fn ingest(&mut self, sample: &Sample) {
        if self
            .last_sequence
            .is_some_and(|last| sample.sequence <= last)
        {
            tracing::warn!(
                sequence = sample.sequence,
                last = ?self.last_sequence,
                "Ignoring out-of-order sample"
            );
            return;
        }
        self.last_sequence = Some(sample.sequence);
        self.session.record(&sample.outcome);
    }

    /// Session-wide statistics
    pub fn snapshot(&self) -> AggregateStats {
        self.session.snapshot()
    }

    /// Statistics over the rolling store's samples inside the stats window
    pub fn window_snapshot(&self, rolling: &RollingStore, now: Instant) -> AggregateStats {
        let cutoff = now.checked_sub(self.stats_window);
        AggregateStats::from_samples(
            rolling
                .iter()
                .filter(|s| cutoff.is_none_or(|c| s.sent_at >= c) && s.sent_at <= now),
        )
    }

    pub fn stats_window(&self) -> Duration {
        self.stats_window
    }

    pub fn set_stats_window(&mut self, window: Duration) {
        self.stats_window = window;
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Drop all totals for a fresh session
    pub fn reset(&mut self, stats_window: Duration) {
        *self = Self::new(stats_window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn feed(outcomes: &[ProbeOutcome]) -> AggregateStats {
        let mut aggregator = Aggregator::new(Duration::from_secs(10));
        for (seq, outcome) in outcomes.iter().enumerate() {
            aggregator.ingest(&Sample::now(seq as u64, outcome.clone()));
        }
        aggregator.snapshot()
    }

    #[test]
    fn test_empty_stats() {
        let stats = Aggregator::new(Duration::from_secs(10)).snapshot();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.loss_rate_percent, 0.0);
        assert!(stats.min_rtt.is_none());
        assert!(stats.mean_rtt.is_none());
        assert!(stats.max_rtt.is_none());
        assert!(stats.jitter.is_none());
        assert_eq!(stats.quality, Quality::Idle);
    }

    #[test]
    fn test_reference_sequence() {
        let stats = feed(&[
            ProbeOutcome::success(10.0),
            ProbeOutcome::success(20.0),
            ProbeOutcome::Timeout,
            ProbeOutcome::success(15.0),
        ]);

        assert_eq!(stats.count, 4);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.loss_count, 1);
        assert_eq!(stats.min_rtt, Some(10.0));
        assert_eq!(stats.max_rtt, Some(20.0));
        assert_eq!(stats.mean_rtt, Some(15.0));
        assert_eq!(stats.loss_rate_percent, 25.0);
        // Only 10 -> 20 is consecutive; the timeout breaks 20 -> 15
        assert_eq!(stats.jitter, Some(10.0));
        assert_eq!(stats.last_rtt, Some(15.0));
        assert_eq!(stats.quality, Quality::Excellent);
    }

    #[test]
    fn test_all_loss_kinds_count_as_loss() {
        let stats = feed(&[
            ProbeOutcome::Timeout,
            ProbeOutcome::Unreachable,
            ProbeOutcome::transport_error("socket closed"),
        ]);

        assert_eq!(stats.loss_count, 3);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.unreachable_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.loss_rate_percent, 100.0);
        assert!(stats.mean_rtt.is_none());
        assert_eq!(stats.quality, Quality::ConnectionIssue);
    }

    #[test]
    fn test_unreachable_breaks_jitter_run() {
        let stats = feed(&[
            ProbeOutcome::success(10.0),
            ProbeOutcome::Unreachable,
            ProbeOutcome::success(90.0),
            ProbeOutcome::success(100.0),
        ]);
        assert_eq!(stats.jitter, Some(10.0));
    }

    #[test]
    fn test_jitter_running_mean() {
        let stats = feed(&[
            ProbeOutcome::success(10.0),
            ProbeOutcome::success(14.0),
            ProbeOutcome::success(12.0),
        ]);
        // |14-10| = 4, |12-14| = 2
        assert_eq!(stats.jitter, Some(3.0));
    }

    #[test]
    fn test_stddev_welford() {
        let stats = feed(&[
            ProbeOutcome::success(10.0),
            ProbeOutcome::success(20.0),
            ProbeOutcome::success(30.0),
        ]);
        let stddev = stats.stddev_rtt.unwrap();
        assert!((stddev - 8.1649).abs() < 0.001);
    }

    #[test]
    fn test_duplicate_sequence_ignored() {
        let mut aggregator = Aggregator::new(Duration::from_secs(10));
        aggregator.ingest(&Sample::now(0, ProbeOutcome::success(5.0)));
        aggregator.ingest(&Sample::now(0, ProbeOutcome::Timeout));
        assert_eq!(aggregator.snapshot().count, 1);
        assert_eq!(aggregator.last_sequence(), Some(0));
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut aggregator = Aggregator::new(Duration::from_secs(10));
        aggregator.ingest(&Sample::now(0, ProbeOutcome::success(5.0)));
        aggregator.ingest(&Sample::now(1, ProbeOutcome::Timeout));
        assert_eq!(aggregator.snapshot(), aggregator.snapshot());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_snapshot_uses_stats_window() {
        let mut rolling = RollingStore::new(Duration::from_secs(30));
        let aggregator = Aggregator::new(Duration::from_secs(5));

        rolling.push(Sample::now(0, ProbeOutcome::success(100.0)));
        tokio::time::advance(Duration::from_secs(10)).await;
        rolling.push(Sample::now(1, ProbeOutcome::success(10.0)));
        rolling.push(Sample::now(2, ProbeOutcome::Timeout));

        let window = aggregator.window_snapshot(&rolling, Instant::now());
        assert_eq!(window.count, 2);
        assert_eq!(window.max_rtt, Some(10.0));
        assert_eq!(window.loss_rate_percent, 50.0);
    }

    fn outcome_strategy() -> impl Strategy<Value = ProbeOutcome> {
        prop_oneof![
            4 => (0.0f64..2000.0).prop_map(ProbeOutcome::success),
            1 => Just(ProbeOutcome::Timeout),
            1 => Just(ProbeOutcome::Unreachable),
            1 => "[a-z]{1,8}".prop_map(|reason: String| ProbeOutcome::transport_error(reason)),
        ]
    }

    proptest! {
        #[test]
        fn prop_count_identity(outcomes in prop::collection::vec(outcome_strategy(), 0..200)) {
            let stats = feed(&outcomes);
            prop_assert_eq!(stats.count, outcomes.len() as u64);
            prop_assert_eq!(stats.count, stats.success_count + stats.loss_count);
            prop_assert_eq!(
                stats.loss_count,
                stats.timeout_count + stats.unreachable_count + stats.error_count
            );
            prop_assert!((0.0..=100.0).contains(&stats.loss_rate_percent));
        }

        #[test]
        fn prop_mean_between_min_and_max(outcomes in prop::collection::vec(outcome_strategy(), 0..200)) {
            let stats = feed(&outcomes);
            if stats.success_count > 0 {
                let (min, mean, max) = (
                    stats.min_rtt.unwrap(),
                    stats.mean_rtt.unwrap(),
                    stats.max_rtt.unwrap(),
                );
                prop_assert!(min <= mean && mean <= max);
            } else {
                prop_assert!(stats.min_rtt.is_none());
                prop_assert!(stats.mean_rtt.is_none());
                prop_assert!(stats.max_rtt.is_none());
            }
        }

        #[test]
        fn prop_incremental_matches_batch(outcomes in prop::collection::vec(outcome_strategy(), 0..100)) {
            let samples: Vec<Sample> = outcomes
                .iter()
                .enumerate()
                .map(|(seq, o)| Sample::now(seq as u64, o.clone()))
                .collect();
            let batch = AggregateStats::from_samples(&samples);
            prop_assert_eq!(batch, feed(&outcomes));
        }
    }
}
