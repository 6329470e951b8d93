pub mod csv;
pub mod json;
pub mod report;

pub use csv::*;
pub use json::*;
pub use report::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::state::{AggregateStats, SampleRecord};

/// Serializable copy of a session for export and later import
///
/// Samples are those the rolling store still held at export time;
/// statistics cover the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
    pub config: SessionConfig,
    pub stats: AggregateStats,
    pub window_stats: AggregateStats,
    #[serde(default)]
    pub skipped_ticks: u64,
    pub samples: Vec<SampleRecord>,
}

impl SessionExport {
    /// Seconds between session start and export
    pub fn duration_secs(&self) -> f64 {
        (self.exported_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}
