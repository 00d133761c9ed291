//! Result data structures for benchmark output.
//!
//! [`BenchmarkReport`] is the immutable artifact of a run: connectivity
//! history, location trace, per-test outcomes, byte counters, and
//! timestamps. It implements `Serialize` for JSON output; persisting or
//! uploading it is the job of an external collaborator -- the scheduler
//! only fills in the fields.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{MultipathService, ServerCandidate};
use crate::connectivity::ConnectivityEvent;
use crate::measurement::TestOutcome;
use crate::scheduler::AbortReason;

/// One GPS fix from an external location source.
#[derive(Debug, Clone, Serialize)]
pub struct LocationSample {
    pub lon: f64,
    pub lat: f64,
    pub accuracy_m: f64,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub timestamp: DateTime<Utc>,
}

/// Byte counters per interface class at one point in time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InterfaceCounters {
    pub wifi_bytes_sent: u64,
    pub wifi_bytes_received: u64,
    pub cell_bytes_sent: u64,
    pub cell_bytes_received: u64,
}

impl InterfaceCounters {
    /// Traffic accounted between an earlier snapshot and this one.
    pub fn delta_since(&self, start: &InterfaceCounters) -> InterfaceCounters {
        InterfaceCounters {
            wifi_bytes_sent: self
                .wifi_bytes_sent
                .saturating_sub(start.wifi_bytes_sent),
            wifi_bytes_received: self
                .wifi_bytes_received
                .saturating_sub(start.wifi_bytes_received),
            cell_bytes_sent: self
                .cell_bytes_sent
                .saturating_sub(start.cell_bytes_sent),
            cell_bytes_received: self
                .cell_bytes_received
                .saturating_sub(start.cell_bytes_received),
        }
    }
}

/// Source of interface byte counters, snapshotted at run start and end.
pub trait ByteCounters: Send + Sync {
    fn snapshot(&self) -> InterfaceCounters;
}

/// Counter source for hosts without per-interface accounting.
pub struct NullCounters;

impl ByteCounters for NullCounters {
    fn snapshot(&self) -> InterfaceCounters {
        InterfaceCounters::default()
    }
}

/// Complete results from a benchmark run.
///
/// Always produced, even for a run aborted after the probe phases.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// Timestamp when the run started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the run entered finalization.
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// The server every test was pointed at.
    pub server: ServerCandidate,
    /// Median latency of the selected server; absent when no candidate
    /// qualified and the run continued degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_median_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_std_deviation_ms: Option<f64>,
    pub multipath_service: MultipathService,
    /// Why the run ended early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortReason>,
    /// Connectivity history of the run, in arrival order.
    pub connectivity: Vec<ConnectivityEvent>,
    /// Location trace supplied by the external location source.
    pub locations: Vec<LocationSample>,
    /// Interface traffic deltas over the run.
    pub interfaces: InterfaceCounters,
    /// Per-test outcomes in execution order.
    pub outcomes: Vec<TestOutcome>,
}

impl BenchmarkReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }
}
