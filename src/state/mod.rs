pub mod aggregate;
pub mod quality;
pub mod rolling;
pub mod sample;
pub mod session;

pub use aggregate::{AggregateStats, Aggregator, RunningStats};
pub use quality::Quality;
pub use rolling::RollingStore;
pub use sample::{ProbeOutcome, Sample, SampleRecord};
pub use session::{SessionController, SessionHandle, SessionState};
