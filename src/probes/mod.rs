//! Baseline measurement implementations over plain TCP and HTTPS.
//!
//! These are the transports the `mpbench` binary wires into the
//! scheduler: a TCP connect latency probe, a per-address-family TCP
//! reachability probe, and an HTTPS bulk download. Multipath-capable
//! transports (QUIC, MPTCP) live outside this crate and plug in through
//! the same [`crate::measurement::Measurement`] contract.

pub mod download;
pub mod tcp;

pub use download::HttpDownloadTest;
pub use tcp::{AddressFamily, TcpLatencyProbe, TcpReachabilityProbe};
