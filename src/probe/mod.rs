pub mod correlate;
pub mod icmp;
pub mod socket;
pub mod transport;

pub use correlate::*;
pub use icmp::*;
pub use socket::*;
pub use transport::{IcmpTransport, ProbeTransport};
