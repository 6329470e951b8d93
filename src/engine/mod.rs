pub mod connectivity;
pub mod ingest;
pub mod pending;
pub mod prober;
pub mod receiver;

pub use connectivity::{Connectivity, check_connectivity};
pub use ingest::{IngestSinks, Reorder, run_ingest};
pub use prober::{Prober, ProberExit, ProberStats};
