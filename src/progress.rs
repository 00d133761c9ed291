//! Progress event types and callback interface.
//!
//! Defines the events emitted by the scheduler for display and
//! persistence collaborators, and the callback trait for receiving them.

use std::time::Duration;

use log::info;

use crate::measurement::TestOutcome;
use crate::report::BenchmarkReport;
use crate::scheduler::Phase;

/// Progress events emitted during a benchmark run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run moved to a new phase.
    PhaseChanged(Phase),
    /// Overall completion after a finished unit of work.
    Progress {
        /// Monotonically increasing fraction of the total test count.
        fraction: f64,
        /// Rough remaining time, when the scheduler can estimate it.
        eta: Option<Duration>,
    },
    /// A test was dispatched.
    TestStarted { index: usize, description: String },
    /// A test finished and its outcome was recorded.
    TestFinished { index: usize, outcome: TestOutcome },
    /// The run finalized; the report is ready for persistence.
    RunComplete(Box<BenchmarkReport>),
}

/// Callback interface for progress updates.
///
/// Called from the scheduler's control loop: implementations must not
/// block, or they stall the run they are observing.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Callback that drops every event.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Callback that narrates the run through the `log` crate; used by the
/// CLI.
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::PhaseChanged(phase) => info!("phase: {phase}"),
            ProgressEvent::Progress { fraction, eta } => match eta {
                Some(eta) => info!(
                    "progress: {:.0}% (about {}s left)",
                    fraction * 100.0,
                    eta.as_secs()
                ),
                None => info!("progress: {:.0}%", fraction * 100.0),
            },
            ProgressEvent::TestStarted { index, description } => {
                info!("test {index}: {description}")
            }
            ProgressEvent::TestFinished { index, outcome } => {
                let status = if outcome.succeeded { "ok" } else { "failed" };
                match outcome.short_summary {
                    Some(summary) => {
                        info!("test {index} {status}: {summary}")
                    }
                    None => info!("test {index} {status}"),
                }
            }
            ProgressEvent::RunComplete(report) => {
                info!("run complete: {} outcomes", report.outcomes.len())
            }
        }
    }
}
