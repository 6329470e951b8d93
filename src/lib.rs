// Public API - measurement engine, data types and export functions
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod probe;
pub mod state;

// Command-line collaborator support
pub mod cli;
pub mod logging;
pub mod prefs;

pub use config::{AddressFamily, SessionConfig, Settings};
pub use error::{ConfigError, SessionError};
pub use probe::{IcmpTransport, ProbeTransport};
pub use state::{AggregateStats, ProbeOutcome, Sample, SessionController, SessionHandle, SessionState};
