use serde::{Deserialize, Serialize};

use super::sample::ProbeOutcome;

/// Coarse connection quality derived from the most recent outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// No samples yet
    #[default]
    Idle,
    Excellent,
    Good,
    Fair,
    Poor,
    /// Latest probe was lost
    ConnectionIssue,
}

impl Quality {
    /// Classify a round-trip time in milliseconds
    pub fn from_rtt(rtt_ms: f64) -> Self {
        if rtt_ms < 50.0 {
            Self::Excellent
        } else if rtt_ms < 100.0 {
            Self::Good
        } else if rtt_ms < 200.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn from_outcome(outcome: Option<&ProbeOutcome>) -> Self {
        match outcome {
            None => Self::Idle,
            Some(ProbeOutcome::Success { rtt_ms }) => Self::from_rtt(*rtt_ms),
            Some(_) => Self::ConnectionIssue,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
            Self::ConnectionIssue => "Connection Issue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(Quality::from_rtt(0.0), Quality::Excellent);
        assert_eq!(Quality::from_rtt(49.9), Quality::Excellent);
        assert_eq!(Quality::from_rtt(50.0), Quality::Good);
        assert_eq!(Quality::from_rtt(99.9), Quality::Good);
        assert_eq!(Quality::from_rtt(100.0), Quality::Fair);
        assert_eq!(Quality::from_rtt(199.9), Quality::Fair);
        assert_eq!(Quality::from_rtt(200.0), Quality::Poor);
    }

    #[test]
    fn test_loss_is_connection_issue() {
        assert_eq!(Quality::from_outcome(None), Quality::Idle);
        assert_eq!(
            Quality::from_outcome(Some(&ProbeOutcome::Timeout)),
            Quality::ConnectionIssue
        );
        assert_eq!(
            Quality::from_outcome(Some(&ProbeOutcome::transport_error("x"))),
            Quality::ConnectionIssue
        );
        assert_eq!(
            Quality::from_outcome(Some(&ProbeOutcome::success(20.0))),
            Quality::Excellent
        );
    }
}
