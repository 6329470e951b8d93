use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default target host
pub const DEFAULT_HOST: &str = "google.com";
/// Default probe interval in seconds
pub const DEFAULT_INTERVAL_SECS: f64 = 1.0;
/// Default per-probe timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 5.0;
/// Default rolling (graph) window in seconds
pub const DEFAULT_WINDOW_SECS: f64 = 30.0;
/// Default windowed-statistics span in seconds
pub const DEFAULT_STATS_WINDOW_SECS: f64 = 10.0;
/// Default number of probes allowed to await a reply at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;
/// Default ICMP payload size (standard ping)
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;

/// Smallest accepted probe interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on concurrently outstanding probes
pub const MAX_IN_FLIGHT_LIMIT: usize = 64;
/// Longest accepted interval, timeout, window or session duration
pub const MAX_SPAN: Duration = Duration::from_secs(24 * 60 * 60);
/// Largest payload that fits a 1500-byte MTU without fragmentation
pub const MAX_PAYLOAD_SIZE: usize = 1472;

/// Which address family to use when a host resolves to both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Prefer IPv4, fall back to IPv6
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Whether an address satisfies this preference
    pub fn accepts(&self, addr: IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Ipv4 => addr.is_ipv4(),
            Self::Ipv6 => addr.is_ipv6(),
        }
    }

    /// Pick an address from a resolver answer (IPv4 first for `Any`)
    pub fn pick(&self, addrs: &[IpAddr]) -> Option<IpAddr> {
        match self {
            Self::Any => addrs.iter().find(|a| a.is_ipv4()).or_else(|| addrs.first()).copied(),
            _ => addrs.iter().find(|a| self.accepts(**a)).copied(),
        }
    }
}

/// Raw session parameters as supplied by a settings surface (CLI, prefs file, UI)
///
/// Times are float seconds. Nothing here is trusted until it has been
/// converted into a [`SessionConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub interval: f64,
    pub timeout: f64,
    pub window: f64,
    pub stats_window: f64,
    pub max_in_flight: usize,
    pub count: Option<u64>,
    pub duration: Option<f64>,
    pub payload_size: usize,
    pub family: AddressFamily,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            interval: DEFAULT_INTERVAL_SECS,
            timeout: DEFAULT_TIMEOUT_SECS,
            window: DEFAULT_WINDOW_SECS,
            stats_window: DEFAULT_STATS_WINDOW_SECS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            count: None,
            duration: None,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            family: AddressFamily::Any,
        }
    }
}

/// Validated, immutable session configuration
///
/// Reconfiguration swaps the whole value; probes keep the snapshot they
/// were issued with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Target host name or address literal
    pub host: String,
    /// Interval between probe attempts
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Hard upper bound on the wait for one reply
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// How far back the rolling store retains samples
    #[serde(with = "duration_serde")]
    pub window: Duration,
    /// Span used for windowed statistics
    #[serde(with = "duration_serde")]
    pub stats_window: Duration,
    /// Maximum number of probes awaiting resolution at once
    pub max_in_flight: usize,
    /// Stop after this many probes (None = unbounded)
    pub count: Option<u64>,
    /// Stop after this much time (None = unbounded)
    #[serde(with = "option_duration_serde")]
    pub duration: Option<Duration>,
    /// ICMP payload bytes per echo request
    pub payload_size: usize,
    pub family: AddressFamily,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // Defaults are known-valid
        Self {
            host: DEFAULT_HOST.to_string(),
            interval: Duration::from_secs_f64(DEFAULT_INTERVAL_SECS),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            window: Duration::from_secs_f64(DEFAULT_WINDOW_SECS),
            stats_window: Duration::from_secs_f64(DEFAULT_STATS_WINDOW_SECS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            count: None,
            duration: None,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            family: AddressFamily::Any,
        }
    }
}

impl SessionConfig {
    /// Re-check invariants of an already-built config
    ///
    /// Fields are public, so the controller validates again before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::new("host", "must not be empty"));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::new("interval", "must be positive"));
        }
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::new(
                "interval",
                format!("must be at least {}ms", MIN_INTERVAL.as_millis()),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::new("timeout", "must be positive"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::new("window", "must be positive"));
        }
        if self.stats_window.is_zero() {
            return Err(ConfigError::new("stats_window", "must be positive"));
        }
        for (field, value) in [
            ("interval", self.interval),
            ("timeout", self.timeout),
            ("window", self.window),
            ("stats_window", self.stats_window),
        ] {
            check_span(field, value)?;
        }
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(ConfigError::new(
                "max_in_flight",
                format!("must be between 1 and {}", MAX_IN_FLIGHT_LIMIT),
            ));
        }
        if self.count == Some(0) {
            return Err(ConfigError::new("count", "must be at least 1 when set"));
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::new("duration", "must be positive when set"));
        }
        if let Some(duration) = self.duration {
            check_span("duration", duration)?;
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::new(
                "payload_size",
                format!("cannot exceed {} bytes", MAX_PAYLOAD_SIZE),
            ));
        }
        Ok(())
    }
}

impl TryFrom<Settings> for SessionConfig {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let config = Self {
            host: settings.host.trim().to_string(),
            interval: seconds("interval", settings.interval)?,
            timeout: seconds("timeout", settings.timeout)?,
            window: seconds("window", settings.window)?,
            stats_window: seconds("stats_window", settings.stats_window)?,
            max_in_flight: settings.max_in_flight,
            count: settings.count,
            duration: settings
                .duration
                .map(|d| seconds("duration", d))
                .transpose()?,
            payload_size: settings.payload_size,
            family: settings.family,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&SessionConfig> for Settings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            host: config.host.clone(),
            interval: config.interval.as_secs_f64(),
            timeout: config.timeout.as_secs_f64(),
            window: config.window.as_secs_f64(),
            stats_window: config.stats_window.as_secs_f64(),
            max_in_flight: config.max_in_flight,
            count: config.count,
            duration: config.duration.map(|d| d.as_secs_f64()),
            payload_size: config.payload_size,
            family: config.family,
        }
    }
}

fn check_span(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value > MAX_SPAN {
        return Err(ConfigError::new(
            field,
            format!("cannot exceed {}s", MAX_SPAN.as_secs()),
        ));
    }
    Ok(())
}

/// Convert float seconds, rejecting values `Duration` cannot hold
fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::new(field, "must be a finite number of seconds"));
    }
    if value <= 0.0 {
        return Err(ConfigError::new(field, "must be positive"));
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::new(field, e.to_string()))
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> Vec<IpAddr> {
        vec!["2001:db8::1".parse().unwrap(), "192.0.2.1".parse().unwrap()]
    }

    #[test]
    fn test_family_pick() {
        let addrs = addrs();
        assert_eq!(AddressFamily::Any.pick(&addrs), Some(addrs[1]));
        assert_eq!(AddressFamily::Ipv4.pick(&addrs), Some(addrs[1]));
        assert_eq!(AddressFamily::Ipv6.pick(&addrs), Some(addrs[0]));
        assert_eq!(AddressFamily::Ipv4.pick(&addrs[..1]), None);
        assert_eq!(AddressFamily::Any.pick(&addrs[..1]), Some(addrs[0]));
        assert_eq!(AddressFamily::Any.pick(&[]), None);
    }

    #[test]
    fn test_default_settings_convert() {
        let config = SessionConfig::try_from(Settings::default()).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_sub_second_interval_accepted() {
        let settings = Settings {
            interval: 0.1,
            ..Settings::default()
        };
        let config = SessionConfig::try_from(settings).unwrap();
        assert_eq!(config.interval, Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_empty_host() {
        let settings = Settings {
            host: "   ".into(),
            ..Settings::default()
        };
        let err = SessionConfig::try_from(settings).unwrap_err();
        assert_eq!(err.field, "host");
    }

    #[test]
    fn test_rejects_non_positive_interval_and_timeout() {
        for interval in [0.0, -1.0, f64::NAN] {
            let settings = Settings {
                interval,
                ..Settings::default()
            };
            assert_eq!(SessionConfig::try_from(settings).unwrap_err().field, "interval");
        }

        let settings = Settings {
            timeout: 0.0,
            ..Settings::default()
        };
        assert_eq!(SessionConfig::try_from(settings).unwrap_err().field, "timeout");
    }

    #[test]
    fn test_rejects_in_flight_out_of_range() {
        for max_in_flight in [0, MAX_IN_FLIGHT_LIMIT + 1] {
            let settings = Settings {
                max_in_flight,
                ..Settings::default()
            };
            assert_eq!(
                SessionConfig::try_from(settings).unwrap_err().field,
                "max_in_flight"
            );
        }
    }

    #[test]
    fn test_rejects_zero_duration_and_count() {
        let settings = Settings {
            duration: Some(0.0),
            ..Settings::default()
        };
        assert_eq!(SessionConfig::try_from(settings).unwrap_err().field, "duration");

        let settings = Settings {
            count: Some(0),
            ..Settings::default()
        };
        assert_eq!(SessionConfig::try_from(settings).unwrap_err().field, "count");
    }

    #[test]
    fn test_rejects_oversized_spans() {
        let huge = Settings {
            interval: 1e19,
            ..Settings::default()
        };
        assert_eq!(SessionConfig::try_from(huge).unwrap_err().field, "interval");

        let over_a_day = MAX_SPAN.as_secs_f64() + 1.0;
        let cases: [(&str, fn(&mut Settings, f64)); 4] = [
            ("timeout", |s, v| s.timeout = v),
            ("window", |s, v| s.window = v),
            ("stats_window", |s, v| s.stats_window = v),
            ("duration", |s, v| s.duration = Some(v)),
        ];
        for (field, set) in cases {
            let mut settings = Settings::default();
            set(&mut settings, over_a_day);
            assert_eq!(SessionConfig::try_from(settings).unwrap_err().field, field);
        }

        let config = SessionConfig {
            interval: MAX_SPAN,
            timeout: MAX_SPAN,
            window: MAX_SPAN,
            stats_window: MAX_SPAN,
            duration: Some(MAX_SPAN),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_catches_hand_built_config() {
        let config = SessionConfig {
            timeout: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "timeout");
    }

    #[test]
    fn test_config_json_uses_seconds() {
        let config = SessionConfig {
            interval: Duration::from_millis(250),
            duration: Some(Duration::from_secs(60)),
            ..SessionConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["interval"], 0.25);
        assert_eq!(json["duration"], 60.0);

        let restored: SessionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_settings_from_config_keeps_values() {
        let config = SessionConfig {
            host: "1.1.1.1".into(),
            count: Some(10),
            ..SessionConfig::default()
        };
        let settings = Settings::from(&config);
        assert_eq!(settings.host, "1.1.1.1");
        assert_eq!(settings.count, Some(10));
        assert_eq!(settings.interval, 1.0);
    }
}
