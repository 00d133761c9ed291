//! The uniform contract every benchmark test implements.
//!
//! The scheduler drives all tests -- latency probes aside -- through the
//! [`Measurement`] trait and never looks inside them. Transports (plain
//! TCP, QUIC, MPTCP, ...) live behind this boundary; the crate's own
//! baseline implementations are in [`crate::probes`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ServerCandidate;
use crate::scheduler::AbortReason;

/// The closed set of test kinds the scheduler knows how to report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    LatencyProbe,
    Reachability,
    BulkDownload,
    ThroughputStream,
    PerfTest,
}

impl TestKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TestKind::LatencyProbe => "latency probe",
            TestKind::Reachability => "reachability probe",
            TestKind::BulkDownload => "bulk download",
            TestKind::ThroughputStream => "throughput stream",
            TestKind::PerfTest => "perf test",
        }
    }
}

/// The recorded result of one executed test.
///
/// Outcomes are appended in execution order and their `index` is aligned
/// with that order. The `aborted` tag is applied at finalize time to the
/// last outcome of an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub index: usize,
    pub kind: TestKind,
    pub description: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortReason>,
}

/// One unit of benchmark work with a start/stop/result lifecycle.
///
/// `run` drives the test and returns once it has finished or was stopped;
/// `wait_until_done` joins any remaining teardown. `stop` is advisory and
/// idempotent: it must cause in-flight work to terminate soon, but
/// callers do not get a bounded cancellation latency. Implementations use
/// interior mutability; the scheduler only ever holds shared references.
#[async_trait]
pub trait Measurement: Send + Sync {
    fn kind(&self) -> TestKind;

    /// Human-readable one-liner for progress displays and the report.
    fn describe(&self) -> String;

    /// Point the test at the selected server. Called once, during
    /// assembly, before `run`.
    fn configure(&self, server: &ServerCandidate);

    async fn run(&self);

    async fn wait_until_done(&self);

    fn stop(&self);

    fn succeeded(&self) -> bool;

    fn short_summary(&self) -> Option<String>;

    /// Settle time the scheduler waits after this test before starting
    /// the next one.
    fn estimated_wait(&self) -> Duration {
        Duration::ZERO
    }

    /// Rough run duration, used for progress ETA hints.
    fn estimated_run(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Assemble the outcome recorded for this test at position `index`.
    fn result(&self, index: usize) -> TestOutcome {
        TestOutcome {
            index,
            kind: self.kind(),
            description: self.describe(),
            succeeded: self.succeeded(),
            short_summary: self.short_summary(),
            aborted: None,
        }
    }
}
