//! Best-server selection by concurrent latency probing.
//!
//! Phase 1 of a run: every candidate gets one concurrent connect probe,
//! then a fixed number of ping bursts re-probe the candidates whose
//! connect succeeded, with a delay between bursts so the probes do not
//! interfere with each other. A candidate is ranked only if it produced a
//! full set of durations; the lowest median wins, ties going to the first
//! candidate encountered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::config::ServerCandidate;
use crate::stats;

/// One latency probe bound to a single candidate server.
///
/// `connect` establishes the probe's connection and keeps whatever
/// resources it needs for subsequent pings; `close` releases them and is
/// always called after measurement, whatever the outcome.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    fn candidate(&self) -> &ServerCandidate;

    /// Initial connect. Returns false when the candidate is unreachable.
    async fn connect(&self) -> bool;

    /// One round trip. `None` when the ping failed.
    async fn ping(&self) -> Option<Duration>;

    /// Release per-candidate resources (descriptors, sessions).
    async fn close(&self);
}

/// Per-candidate probe record: the ordered round-trip durations plus the
/// connect flag. Derives median and standard deviation on demand.
#[derive(Debug, Clone)]
pub struct LatencyStatistic {
    pub candidate: ServerCandidate,
    pub connected: bool,
    pub samples: Vec<Duration>,
}

impl LatencyStatistic {
    /// A candidate participates in ranking only with a full set of
    /// successful durations.
    pub fn qualifies(&self, burst_count: usize) -> bool {
        self.connected && self.samples.len() == burst_count
    }

    pub fn median(&self) -> Option<Duration> {
        stats::median(&self.samples)
    }

    pub fn std_deviation(&self) -> Option<Duration> {
        stats::std_deviation(&self.samples)
    }
}

/// The server chosen for the rest of the run. `median` is `None` when no
/// candidate qualified and the caller-defined default was substituted.
#[derive(Debug, Clone)]
pub struct ServerSelection {
    pub candidate: ServerCandidate,
    pub median: Option<Duration>,
    pub std_deviation: Option<Duration>,
}

impl ServerSelection {
    /// True when no candidate completed every burst and the fallback was
    /// used.
    pub fn degraded(&self) -> bool {
        self.median.is_none()
    }

    /// Median latency in milliseconds; infinite for a degraded selection.
    pub fn median_ms(&self) -> f64 {
        self.median.map(stats::millis).unwrap_or(f64::INFINITY)
    }

    pub fn std_deviation_ms(&self) -> Option<f64> {
        self.std_deviation.map(stats::millis)
    }
}

/// Everything phase 1 produced: the selection plus the per-candidate
/// statistics, in probe order.
#[derive(Debug)]
pub struct LatencyEstimate {
    pub selection: ServerSelection,
    pub statistics: Vec<LatencyStatistic>,
}

/// The latency estimation engine.
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    pub burst_count: usize,
    pub inter_burst_delay: Duration,
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self {
            burst_count: crate::config::DEFAULT_BURST_COUNT,
            inter_burst_delay: crate::config::DEFAULT_INTER_BURST_DELAY,
        }
    }
}

impl LatencyEstimator {
    pub fn new(burst_count: usize, inter_burst_delay: Duration) -> Self {
        Self { burst_count, inter_burst_delay }
    }

    /// Probe all candidates and pick the best one.
    ///
    /// Individual probe failures only exclude that candidate from
    /// ranking. When nothing qualifies, `fallback` is returned with no
    /// median (reported as infinite latency); repeated calls with the
    /// same failing inputs yield the same result.
    pub async fn estimate(
        &self,
        probes: &[Arc<dyn LatencyProbe>],
        fallback: ServerCandidate,
    ) -> LatencyEstimate {
        // Initial connects, all candidates at once.
        let connected = join_all(probes.iter().map(|probe| probe.connect()))
            .await;

        let mut samples: Vec<Vec<Duration>> = vec![Vec::new(); probes.len()];

        for burst in 0..self.burst_count {
            let targets: Vec<usize> = (0..probes.len())
                .filter(|&i| connected[i])
                .collect();

            let results = join_all(
                targets.iter().map(|&i| probes[i].ping()),
            )
            .await;

            for (&i, result) in targets.iter().zip(results) {
                match result {
                    Some(duration) => samples[i].push(duration),
                    None => debug!(
                        "ping {}/{} failed for {}",
                        burst + 1,
                        self.burst_count,
                        probes[i].candidate()
                    ),
                }
            }

            // Backpressure between bursts so we do not measure our own
            // queueing.
            sleep(self.inter_burst_delay).await;
        }

        // Release per-candidate resources regardless of outcome.
        join_all(probes.iter().map(|probe| probe.close())).await;

        let statistics: Vec<LatencyStatistic> = probes
            .iter()
            .zip(samples)
            .zip(connected)
            .map(|((probe, samples), connected)| LatencyStatistic {
                candidate: probe.candidate().clone(),
                connected,
                samples,
            })
            .collect();

        let mut best: Option<(usize, Duration)> = None;
        for (i, statistic) in statistics.iter().enumerate() {
            if !statistic.qualifies(self.burst_count) {
                continue;
            }
            let median = match statistic.median() {
                Some(median) => median,
                None => continue,
            };
            info!(
                "median latency of {} is {:.1} ms",
                statistic.candidate,
                stats::millis(median)
            );
            // Strict less-than keeps the first candidate on ties.
            match best {
                Some((_, best_median)) if median >= best_median => {}
                _ => best = Some((i, median)),
            }
        }

        let selection = match best {
            Some((i, median)) => ServerSelection {
                candidate: statistics[i].candidate.clone(),
                median: Some(median),
                std_deviation: statistics[i].std_deviation(),
            },
            None => {
                warn!(
                    "no candidate completed all {} bursts; continuing with {}",
                    self.burst_count, fallback
                );
                ServerSelection {
                    candidate: fallback,
                    median: None,
                    std_deviation: None,
                }
            }
        };

        LatencyEstimate { selection, statistics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Probe with scripted ping results.
    struct FakeProbe {
        candidate: ServerCandidate,
        connect_ok: bool,
        pings: Mutex<Vec<Option<Duration>>>,
        closed: AtomicBool,
    }

    impl FakeProbe {
        fn new(
            region: &str,
            connect_ok: bool,
            pings: Vec<Option<Duration>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                candidate: ServerCandidate::new(
                    format!("{region}.example.org"),
                    443,
                    region,
                ),
                connect_ok,
                pings: Mutex::new(pings),
                closed: AtomicBool::new(false),
            })
        }

        fn steady(region: &str, latency_ms: u64, count: usize) -> Arc<Self> {
            Self::new(
                region,
                true,
                vec![Some(Duration::from_millis(latency_ms)); count],
            )
        }
    }

    #[async_trait]
    impl LatencyProbe for FakeProbe {
        fn candidate(&self) -> &ServerCandidate {
            &self.candidate
        }

        async fn connect(&self) -> bool {
            self.connect_ok
        }

        async fn ping(&self) -> Option<Duration> {
            let mut pings = self.pings.lock().unwrap();
            if pings.is_empty() { None } else { pings.remove(0) }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn estimator() -> LatencyEstimator {
        LatencyEstimator::new(5, Duration::from_millis(1))
    }

    fn fallback() -> ServerCandidate {
        ServerCandidate::new("fallback.example.org", 443, "fallback")
    }

    fn probes(list: Vec<Arc<FakeProbe>>) -> Vec<Arc<dyn LatencyProbe>> {
        list.into_iter().map(|p| p as Arc<dyn LatencyProbe>).collect()
    }

    #[tokio::test]
    async fn test_lowest_median_wins() {
        let list = probes(vec![
            FakeProbe::steady("fr", 120, 5),
            FakeProbe::steady("ca", 45, 5),
            FakeProbe::steady("jp", 300, 5),
        ]);

        let estimate = estimator().estimate(&list, fallback()).await;

        assert_eq!(estimate.selection.candidate.region, "ca");
        assert!((estimate.selection.median_ms() - 45.0).abs() < 0.001);
        assert!(!estimate.selection.degraded());
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_candidate() {
        let list = probes(vec![
            FakeProbe::steady("fr", 60, 5),
            FakeProbe::steady("ca", 60, 5),
        ]);

        let estimate = estimator().estimate(&list, fallback()).await;

        assert_eq!(estimate.selection.candidate.region, "fr");
    }

    #[tokio::test]
    async fn test_incomplete_burst_set_disqualifies() {
        // "ca" is faster but drops one ping; "fr" must win.
        let mut ca_pings =
            vec![Some(Duration::from_millis(10)); 4];
        ca_pings.insert(2, None);

        let list = probes(vec![
            FakeProbe::steady("fr", 80, 5),
            FakeProbe::new("ca", true, ca_pings),
        ]);

        let estimate = estimator().estimate(&list, fallback()).await;

        assert_eq!(estimate.selection.candidate.region, "fr");
        assert!(!estimate.statistics[1].qualifies(5));
    }

    #[tokio::test]
    async fn test_failed_connect_is_excluded() {
        let list = probes(vec![
            FakeProbe::new("fr", false, Vec::new()),
            FakeProbe::steady("ca", 90, 5),
        ]);

        let estimate = estimator().estimate(&list, fallback()).await;

        assert_eq!(estimate.selection.candidate.region, "ca");
        assert!(estimate.statistics[0].samples.is_empty());
    }

    #[tokio::test]
    async fn test_no_qualifier_returns_fallback_with_infinite_median() {
        for _ in 0..2 {
            // Idempotent across repeated calls with the same failing
            // inputs.
            let list = probes(vec![
                FakeProbe::new("fr", false, Vec::new()),
                FakeProbe::new("ca", false, Vec::new()),
            ]);

            let estimate = estimator().estimate(&list, fallback()).await;

            assert_eq!(estimate.selection.candidate.region, "fallback");
            assert!(estimate.selection.degraded());
            assert!(estimate.selection.median_ms().is_infinite());
        }
    }

    #[tokio::test]
    async fn test_probes_closed_regardless_of_outcome() {
        let ok = FakeProbe::steady("fr", 50, 5);
        let broken = FakeProbe::new("ca", false, Vec::new());
        let list = probes(vec![ok.clone(), broken.clone()]);

        estimator().estimate(&list, fallback()).await;

        assert!(ok.closed.load(Ordering::SeqCst));
        assert!(broken.closed.load(Ordering::SeqCst));
    }
}
