use thiserror::Error;

/// A session parameter was rejected before the session started
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ConfigError {
    /// Name of the offending field, as it appears in `Settings`
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Lifecycle misuse or configuration failure reported by `SessionController`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_field() {
        let err = ConfigError::new("interval", "must be positive");
        assert_eq!(err.to_string(), "invalid interval: must be positive");
    }

    #[test]
    fn test_session_error_wraps_config() {
        let err: SessionError = ConfigError::new("host", "must not be empty").into();
        assert!(matches!(err, SessionError::Config(ref c) if c.field == "host"));
        assert_eq!(err.to_string(), "invalid host: must not be empty");
    }
}
