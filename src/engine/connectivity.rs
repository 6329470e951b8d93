use std::time::Duration;

use crate::probe::ProbeTransport;
use crate::state::ProbeOutcome;

/// Well-known hosts tried by the connectivity check, in order
pub const DEFAULT_CHECK_HOSTS: &[&str] = &["8.8.8.8", "1.1.1.1", "google.com"];

/// Per-host timeout for the connectivity check
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of probing a list of reference hosts
#[derive(Debug, Clone, PartialEq)]
pub enum Connectivity {
    /// First host that answered and its round-trip time
    Reachable { host: String, rtt_ms: f64 },
    /// Every host failed; each entry is the host and its outcome
    Unreachable { attempts: Vec<(String, ProbeOutcome)> },
}

impl Connectivity {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable { .. })
    }
}

/// Probe `hosts` one at a time and stop at the first answer
pub async fn check_connectivity<T: ProbeTransport>(transport: &T, hosts: &[&str], timeout: Duration) -> Connectivity {
    let mut attempts = Vec::with_capacity(hosts.len());

    for host in hosts {
        let outcome = transport.send(host, timeout).await;
        if let Some(rtt_ms) = outcome.rtt_ms() {
            tracing::info!(host, rtt_ms, "connectivity check passed");
            return Connectivity::Reachable {
                host: host.to_string(),
                rtt_ms,
            };
        }
        tracing::debug!(host, outcome = outcome.label(), "connectivity check host failed");
        attempts.push((host.to_string(), outcome));
    }

    Connectivity::Unreachable { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct OnlyAnswers {
        host: &'static str,
        asked: Mutex<Vec<String>>,
    }

    impl ProbeTransport for OnlyAnswers {
        async fn send(&self, target: &str, _timeout: Duration) -> ProbeOutcome {
            self.asked.lock().push(target.to_string());
            if target == self.host {
                ProbeOutcome::success(12.0)
            } else {
                ProbeOutcome::Timeout
            }
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_answer() {
        let transport = OnlyAnswers {
            host: "1.1.1.1",
            asked: Mutex::new(Vec::new()),
        };
        let result = check_connectivity(&transport, DEFAULT_CHECK_HOSTS, DEFAULT_CHECK_TIMEOUT).await;
        assert_eq!(
            result,
            Connectivity::Reachable {
                host: "1.1.1.1".into(),
                rtt_ms: 12.0
            }
        );
        assert_eq!(*transport.asked.lock(), vec!["8.8.8.8", "1.1.1.1"]);
    }

    #[tokio::test]
    async fn test_all_fail() {
        let transport = OnlyAnswers {
            host: "none",
            asked: Mutex::new(Vec::new()),
        };
        let result = check_connectivity(&transport, DEFAULT_CHECK_HOSTS, DEFAULT_CHECK_TIMEOUT).await;
        assert!(!result.is_reachable());
        let Connectivity::Unreachable { attempts } = result else {
            panic!("expected unreachable");
        };
        assert_eq!(attempts.len(), 3);
    }
}
