use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How a single probe attempt resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Matching echo reply arrived before the timeout
    Success { rtt_ms: f64 },
    /// No matching reply within the timeout
    Timeout,
    /// The network reported the destination unreachable
    Unreachable,
    /// Socket, permission or resolution failure
    TransportError { reason: String },
}

impl ProbeOutcome {
    pub fn success(rtt_ms: f64) -> Self {
        Self::Success {
            rtt_ms: rtt_ms.max(0.0),
        }
    }

    pub fn transport_error(reason: impl Into<String>) -> Self {
        Self::TransportError {
            reason: reason.into(),
        }
    }

    /// Round-trip time, present only for `Success`
    pub fn rtt_ms(&self) -> Option<f64> {
        match self {
            Self::Success { rtt_ms } => Some(*rtt_ms),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short label used in exports and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::TransportError { .. } => "error",
        }
    }
}

/// One resolved probe attempt
///
/// Created once when the attempt resolves and never mutated afterwards.
/// The aggregator and the rolling store each keep their own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Assigned at send time, strictly increasing within a session
    pub sequence: u64,
    /// Monotonic send time, used for window eviction
    pub sent_at: Instant,
    /// Wall-clock send time, used for export
    pub timestamp: DateTime<Utc>,
    pub outcome: ProbeOutcome,
}

impl Sample {
    pub fn new(sequence: u64, sent_at: Instant, timestamp: DateTime<Utc>, outcome: ProbeOutcome) -> Self {
        Self {
            sequence,
            sent_at,
            timestamp,
            outcome,
        }
    }

    /// Sample stamped with the current time (tests and synthetic feeds)
    pub fn now(sequence: u64, outcome: ProbeOutcome) -> Self {
        Self::new(sequence, Instant::now(), Utc::now(), outcome)
    }

    /// Convert into a serializable record relative to the session start
    pub fn to_record(&self, session_start: Instant) -> SampleRecord {
        SampleRecord {
            sequence: self.sequence,
            timestamp: self.timestamp,
            elapsed_secs: self.sent_at.saturating_duration_since(session_start).as_secs_f64(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Serializable form of a [`Sample`] for export and later import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Seconds between session start and this probe's transmission
    pub elapsed_secs: f64,
    pub outcome: ProbeOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rtt_only_on_success() {
        assert_eq!(ProbeOutcome::success(12.5).rtt_ms(), Some(12.5));
        assert_eq!(ProbeOutcome::Timeout.rtt_ms(), None);
        assert_eq!(ProbeOutcome::Unreachable.rtt_ms(), None);
        assert_eq!(ProbeOutcome::transport_error("denied").rtt_ms(), None);
    }

    #[test]
    fn test_negative_rtt_clamped() {
        assert_eq!(ProbeOutcome::success(-0.5).rtt_ms(), Some(0.0));
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_string(&ProbeOutcome::success(3.0)).unwrap();
        assert_eq!(json, r#"{"kind":"success","rtt_ms":3.0}"#);

        let json = serde_json::to_string(&ProbeOutcome::transport_error("no route")).unwrap();
        assert_eq!(json, r#"{"kind":"transport_error","reason":"no route"}"#);

        let back: ProbeOutcome = serde_json::from_str(r#"{"kind":"timeout"}"#).unwrap();
        assert_eq!(back, ProbeOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_elapsed_from_session_start() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(1500)).await;
        let sample = Sample::now(7, ProbeOutcome::Timeout);

        let record = sample.to_record(start);
        assert_eq!(record.sequence, 7);
        assert!((record.elapsed_secs - 1.5).abs() < 1e-9);
        assert_eq!(record.outcome, ProbeOutcome::Timeout);
    }
}
