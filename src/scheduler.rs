//! The four-phase test scheduler.
//!
//! Drives a run through latency probing, reachability probing, test-set
//! assembly, and sequential execution, then finalizes the report. All
//! interruption sources (connectivity changes, backgrounding, user stop)
//! post [`ControlSignal`]s into a single channel owned by the scheduler's
//! control loop; nothing outside that loop ever touches the run state or
//! the connectivity history. The loop checks the abort flag immediately
//! before each dispatch, so a new test is never started after an abort --
//! the in-flight one is asked to stop and its outcome is the last
//! recorded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::aggregator::ResultAggregator;
use crate::config::{MultipathService, RunConfig, ServerCandidate};
use crate::connectivity::{is_abort_worthy, ConnectivityEvent, ConnectivityMonitor};
use crate::errors::{ConfigError, InternalStateViolation};
use crate::latency::{LatencyEstimate, LatencyEstimator, LatencyProbe};
use crate::measurement::{Measurement, TestKind, TestOutcome};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::reachability::{
    assemble_tests, eligible_groups, GroupedTests, ReachabilityOutcome,
};
use crate::report::{BenchmarkReport, ByteCounters, LocationSample};
use crate::stats;

/// Capacity of the control channel. Signal sources never block; a full
/// channel drops the signal with a warning.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// The run's phase. Transitions happen only inside the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LatencyProbe,
    ReachabilityProbe,
    Assembling,
    Executing,
    Finalizing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::LatencyProbe => "latency probing",
            Phase::ReachabilityProbe => "reachability probing",
            Phase::Assembling => "assembling test list",
            Phase::Executing => "executing tests",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
        };
        f.write_str(label)
    }
}

/// Why a run ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    UserInterrupted,
    NetworkChanged,
    Backgrounded,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AbortReason::UserInterrupted => "user interrupted",
            AbortReason::NetworkChanged => "network change",
            AbortReason::Backgrounded => "backgrounded",
        };
        f.write_str(label)
    }
}

/// Signals posted into the scheduler's control loop.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// The platform reported a connectivity change.
    Connectivity(ConnectivityEvent),
    /// The application entered the background.
    Backgrounded,
    /// The user asked to stop the run.
    StopRequested,
    /// A new GPS fix for the report's location trace.
    Location(LocationSample),
}

/// Cloneable entry point for signal sources. Posting never blocks.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<ControlSignal>,
}

impl SchedulerHandle {
    pub fn post(&self, signal: ControlSignal) {
        if let Err(err) = self.tx.try_send(signal) {
            warn!("control signal dropped: {err}");
        }
    }

    pub fn notify_connectivity(&self, event: ConnectivityEvent) {
        self.post(ControlSignal::Connectivity(event));
    }

    pub fn notify_backgrounded(&self) {
        self.post(ControlSignal::Backgrounded);
    }

    pub fn request_stop(&self) {
        self.post(ControlSignal::StopRequested);
    }

    pub fn push_location(&self, sample: LocationSample) {
        self.post(ControlSignal::Location(sample));
    }
}

/// Mutable state of a run. Owned by the scheduler; transitions are the
/// only mutation path.
#[derive(Debug)]
pub struct RunState {
    pub phase: Phase,
    pub current_index: Option<usize>,
    pub abort: Option<AbortReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            current_index: None,
            abort: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// The three phase-2 probes, one per reachability question.
pub struct ReachabilityProbes {
    pub ipv4: Arc<dyn Measurement>,
    pub ipv6: Arc<dyn Measurement>,
    pub multipath: Arc<dyn Measurement>,
}

/// Everything a run may execute, grouped before gating. Built by the
/// caller; owned by the scheduler for the run's lifetime.
pub struct TestPlan {
    pub latency_probes: Vec<Arc<dyn LatencyProbe>>,
    pub reachability: ReachabilityProbes,
    pub v4_tests: Vec<Arc<dyn Measurement>>,
    pub v6_tests: Vec<Arc<dyn Measurement>>,
    pub multipath_tests: Vec<Arc<dyn Measurement>>,
    pub mptcp_tests: Vec<Arc<dyn Measurement>>,
}

impl TestPlan {
    /// Upper bound on the number of units this plan can execute, used as
    /// the progress denominator until assembly fixes the real total.
    fn total_potential(&self) -> usize {
        self.latency_probes.len()
            + 3
            + self.v4_tests.len()
            + self.v6_tests.len()
            + self.multipath_tests.len()
            + self.mptcp_tests.len()
    }
}

/// The orchestrator: owns the run state, the plan, and the control
/// channel, and drives the four-phase protocol to a report.
pub struct TestScheduler {
    config: RunConfig,
    plan: TestPlan,
    fallback: ServerCandidate,
    monitor: Arc<dyn ConnectivityMonitor>,
    counters: Arc<dyn ByteCounters>,
    progress: Arc<dyn ProgressCallback>,
    signals: mpsc::Receiver<ControlSignal>,
    handle: SchedulerHandle,
    state: RunState,
    history: Vec<ConnectivityEvent>,
    locations: Vec<LocationSample>,
    aggregator: ResultAggregator,
    completed: usize,
    total: usize,
}

impl TestScheduler {
    pub fn new(
        config: RunConfig,
        plan: TestPlan,
        monitor: Arc<dyn ConnectivityMonitor>,
        counters: Arc<dyn ByteCounters>,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let fallback =
            config.fallback_candidate().ok_or(ConfigError::NoCandidates)?;

        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            plan,
            fallback,
            monitor,
            counters,
            progress,
            signals: rx,
            handle: SchedulerHandle { tx },
            state: RunState::new(),
            history: Vec::new(),
            locations: Vec::new(),
            aggregator: ResultAggregator::new(),
            completed: 0,
            total: 0,
        })
    }

    /// Entry point for signal sources. Clone freely; the handle stays
    /// valid for the whole run.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Run the benchmark to completion (or to a controlled abort) and
    /// return the report. A report is always produced, even for a run
    /// aborted right after the probe phases.
    pub async fn run(mut self) -> Result<BenchmarkReport, InternalStateViolation> {
        let started_at = Utc::now();
        self.state.started_at = Some(started_at);
        self.total = self.plan.total_potential();

        let initial = self.monitor.current_snapshot();
        info!("initial connectivity: {}", initial.network_type.describe());
        self.history.push(initial.clone());
        let start_counters = self.counters.snapshot();

        // -- Phase 1: latency probing picks the test server.
        self.set_phase(Phase::LatencyProbe);
        let mut probes = self.plan.latency_probes.clone();
        // Randomize probe order so traffic does not correlate across runs.
        probes.shuffle(&mut thread_rng());
        let estimate = self.run_latency_phase(probes).await;
        self.record_latency_outcomes(&estimate)?;
        let selection = estimate.selection;
        if selection.degraded() {
            info!("continuing degraded with {}", selection.candidate);
        } else {
            info!(
                "selected server {} (median {:.1} ms)",
                selection.candidate,
                selection.median_ms()
            );
        }

        // Reachability probes target the selected server.
        self.plan.reachability.ipv4.configure(&selection.candidate);
        self.plan.reachability.ipv6.configure(&selection.candidate);
        self.plan.reachability.multipath.configure(&selection.candidate);

        // -- Phase 2: reachability probes, sequential, settle after each.
        self.set_phase(Phase::ReachabilityProbe);
        let mut reach_order: Vec<Arc<dyn Measurement>> = vec![
            Arc::clone(&self.plan.reachability.ipv4),
            Arc::clone(&self.plan.reachability.ipv6),
            Arc::clone(&self.plan.reachability.multipath),
        ];
        reach_order.shuffle(&mut thread_rng());
        self.execute_sequentially(&reach_order).await?;

        if self.state.abort.is_none() {
            // -- Phase 3: gate and assemble the final test list.
            self.set_phase(Phase::Assembling);
            let outcome = ReachabilityOutcome {
                ipv4: self.plan.reachability.ipv4.succeeded(),
                ipv6: self.plan.reachability.ipv6.succeeded(),
                multipath: self.plan.reachability.multipath.succeeded(),
            };
            let mptcp_permitted = self.config.multipath_service
                == MultipathService::Handover
                && self
                    .config
                    .mptcp_policy
                    .permits(initial.network_type, self.config.platform_version);
            let eligible = eligible_groups(&outcome, mptcp_permitted);
            debug!("reachability {outcome:?}, eligible groups {eligible:?}");

            let grouped = GroupedTests {
                v4: std::mem::take(&mut self.plan.v4_tests),
                v6: std::mem::take(&mut self.plan.v6_tests),
                multipath: std::mem::take(&mut self.plan.multipath_tests),
                mptcp: std::mem::take(&mut self.plan.mptcp_tests),
            };
            let tests = assemble_tests(grouped, &eligible, &mut thread_rng());
            for test in &tests {
                test.configure(&selection.candidate);
            }
            // The execution order is frozen from here on.
            self.total = self.completed + tests.len();

            // -- Phase 4: sequential execution of the assembled tests.
            self.set_phase(Phase::Executing);
            self.execute_sequentially(&tests).await?;
        }

        // -- Finalize: the report exists even for a fully aborted run.
        self.set_phase(Phase::Finalizing);
        self.state.current_index = None;
        let finished_at = Utc::now();
        self.state.finished_at = Some(finished_at);
        let outcomes = self.aggregator.finalize(self.state.abort)?;
        let end_counters = self.counters.snapshot();

        let report = BenchmarkReport {
            started_at,
            finished_at,
            duration_secs: (finished_at - started_at).num_milliseconds()
                as f64
                / 1000.0,
            server: selection.candidate.clone(),
            ping_median_ms: selection.median.map(stats::millis),
            ping_std_deviation_ms: selection.std_deviation_ms(),
            multipath_service: self.config.multipath_service,
            aborted: self.state.abort,
            connectivity: std::mem::take(&mut self.history),
            locations: std::mem::take(&mut self.locations),
            interfaces: end_counters.delta_since(&start_counters),
            outcomes,
        };

        self.progress
            .on_progress(ProgressEvent::RunComplete(Box::new(report.clone())));
        self.set_phase(Phase::Done);
        info!(
            "benchmark done: {} ok, {} failed{}",
            report.succeeded_count(),
            report.failed_count(),
            match report.aborted {
                Some(reason) => format!(", aborted: {reason}"),
                None => String::new(),
            }
        );

        Ok(report)
    }

    /// Phase 1, supervised: the estimator runs while control signals are
    /// still being recorded. Signals set the abort flag but the Abort
    /// transition itself is only taken from phase 2 onward.
    async fn run_latency_phase(
        &mut self,
        probes: Vec<Arc<dyn LatencyProbe>>,
    ) -> LatencyEstimate {
        let estimator = LatencyEstimator::new(
            self.config.burst_count,
            self.config.inter_burst_delay,
        );
        let fallback = self.fallback.clone();
        let estimating = async move {
            estimator.estimate(&probes, fallback).await
        };
        tokio::pin!(estimating);

        let mut channel_closed = false;
        loop {
            tokio::select! {
                estimate = &mut estimating => return estimate,
                signal = self.signals.recv(), if !channel_closed => {
                    match signal {
                        Some(signal) => self.apply_signal(signal),
                        None => channel_closed = true,
                    }
                }
            }
        }
    }

    fn record_latency_outcomes(
        &mut self,
        estimate: &LatencyEstimate,
    ) -> Result<(), InternalStateViolation> {
        for statistic in &estimate.statistics {
            let index = self.aggregator.len();
            let summary = statistic
                .median()
                .map(|median| format!("median {:.1} ms", stats::millis(median)));
            self.push_outcome(TestOutcome {
                index,
                kind: TestKind::LatencyProbe,
                description: format!("latency probe {}", statistic.candidate),
                succeeded: statistic.qualifies(self.config.burst_count),
                short_summary: summary,
                aborted: None,
            })?;
        }
        self.emit_progress(None);
        Ok(())
    }

    /// Run tests one after the other: dispatch, drive to completion,
    /// record, settle. The abort flag is checked immediately before each
    /// dispatch; once it is set no further test starts.
    async fn execute_sequentially(
        &mut self,
        tests: &[Arc<dyn Measurement>],
    ) -> Result<(), InternalStateViolation> {
        for (position, test) in tests.iter().enumerate() {
            self.drain_signals();
            if self.state.abort.is_some() {
                break;
            }

            let index = self.aggregator.len();
            self.state.current_index = Some(index);
            debug!("dispatching test {index}: {}", test.describe());
            self.progress.on_progress(ProgressEvent::TestStarted {
                index,
                description: test.describe(),
            });

            self.drive(test).await;
            self.push_outcome(test.result(index))?;

            let eta = tests[position + 1..]
                .iter()
                .map(|t| t.estimated_wait() + t.estimated_run())
                .sum::<Duration>();
            self.emit_progress(Some(eta));

            if self.state.abort.is_some() {
                break;
            }

            // Settle before the next test; some tests must drain before a
            // follow-up probe can reuse their ports.
            sleep(test.estimated_wait()).await;
        }
        Ok(())
    }

    /// Drive one measurement to completion while processing control
    /// signals. On abort the in-flight test is asked to stop; its run is
    /// then awaited (stop makes it return soon) so its outcome can be
    /// recorded.
    async fn drive(&mut self, test: &Arc<dyn Measurement>) {
        let runner = {
            let test = Arc::clone(test);
            async move {
                test.run().await;
                test.wait_until_done().await;
            }
        };
        tokio::pin!(runner);

        let mut stopped = false;
        let mut channel_closed = false;
        loop {
            tokio::select! {
                _ = &mut runner => break,
                signal = self.signals.recv(), if !channel_closed => {
                    match signal {
                        Some(signal) => {
                            self.apply_signal(signal);
                            if self.state.abort.is_some() && !stopped {
                                debug!("stopping in-flight test");
                                test.stop();
                                stopped = true;
                            }
                        }
                        None => channel_closed = true,
                    }
                }
            }
        }
    }

    /// Process every signal already sitting in the channel.
    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.apply_signal(signal);
        }
    }

    /// The only place run state reacts to the outside world. Connectivity
    /// events are always appended to the history; whether one aborts the
    /// run is decided by the change policy.
    fn apply_signal(&mut self, signal: ControlSignal) {
        match signal {
            ControlSignal::Connectivity(event) => {
                let triggers = match (self.history.first(), self.history.last())
                {
                    (Some(initial), Some(last)) => {
                        is_abort_worthy(initial, last, &event)
                    }
                    _ => false,
                };
                debug!(
                    "connectivity event: {}{}",
                    event.network_type.describe(),
                    if triggers { " (change)" } else { "" }
                );
                self.history.push(event);
                if triggers {
                    self.request_abort(AbortReason::NetworkChanged);
                }
            }
            ControlSignal::Backgrounded => {
                self.request_abort(AbortReason::Backgrounded)
            }
            ControlSignal::StopRequested => {
                self.request_abort(AbortReason::UserInterrupted)
            }
            ControlSignal::Location(sample) => self.locations.push(sample),
        }
    }

    /// Set the abort flag. The first reason wins; later signals only add
    /// to the connectivity history.
    fn request_abort(&mut self, reason: AbortReason) {
        if self.state.abort.is_none() {
            warn!("aborting run: {reason}");
            self.state.abort = Some(reason);
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!("phase {} -> {}", self.state.phase, phase);
        self.state.phase = phase;
        self.progress.on_progress(ProgressEvent::PhaseChanged(phase));
    }

    fn push_outcome(
        &mut self,
        outcome: TestOutcome,
    ) -> Result<(), InternalStateViolation> {
        let index = outcome.index;
        self.aggregator.append(outcome.clone())?;
        self.completed += 1;
        self.progress
            .on_progress(ProgressEvent::TestFinished { index, outcome });
        Ok(())
    }

    fn emit_progress(&self, eta: Option<Duration>) {
        let fraction = self.completed as f64 / self.total.max(1) as f64;
        self.progress.on_progress(ProgressEvent::Progress { fraction, eta });
    }
}
