//! TCP connect probes: latency estimation and reachability.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};

use crate::config::ServerCandidate;
use crate::latency::LatencyProbe;
use crate::measurement::{Measurement, TestKind};
use crate::stats;

/// Which address family a probe should test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
    /// Whatever resolution yields first.
    Any,
}

impl AddressFamily {
    fn label(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "IPv4",
            AddressFamily::V6 => "IPv6",
            AddressFamily::Any => "any",
        }
    }
}

/// Resolve `host:port` and pick the first address matching the family.
async fn resolve(
    host: &str,
    port: u16,
    family: AddressFamily,
) -> Option<SocketAddr> {
    let addresses = lookup_host(format!("{host}:{port}")).await.ok()?;
    addresses.into_iter().find(|address| match family {
        AddressFamily::V4 => address.is_ipv4(),
        AddressFamily::V6 => address.is_ipv6(),
        AddressFamily::Any => true,
    })
}

/// Latency probe over TCP connects.
///
/// The initial connect is kept open until `close` so the candidate's
/// resources live exactly as long as the estimation; each ping opens and
/// drops a fresh connection and reports the handshake time.
pub struct TcpLatencyProbe {
    candidate: ServerCandidate,
    connect_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpLatencyProbe {
    pub fn new(candidate: ServerCandidate, connect_timeout: Duration) -> Self {
        Self { candidate, connect_timeout, stream: Mutex::new(None) }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.candidate.host, self.candidate.port)
    }
}

#[async_trait]
impl LatencyProbe for TcpLatencyProbe {
    fn candidate(&self) -> &ServerCandidate {
        &self.candidate
    }

    async fn connect(&self) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect(self.address()))
            .await
        {
            Ok(Ok(stream)) => {
                *self.stream.lock().unwrap() = Some(stream);
                true
            }
            _ => {
                debug!("initial connect to {} failed", self.candidate);
                false
            }
        }
    }

    async fn ping(&self) -> Option<Duration> {
        let start = Instant::now();
        match timeout(self.connect_timeout, TcpStream::connect(self.address()))
            .await
        {
            Ok(Ok(stream)) => {
                let elapsed = start.elapsed();
                drop(stream);
                Some(elapsed)
            }
            _ => None,
        }
    }

    async fn close(&self) {
        // Drops the held connection, releasing the descriptor.
        self.stream.lock().unwrap().take();
    }
}

/// Reachability probe: one TCP connect over a fixed address family.
///
/// The multipath-capable variant is expressed as `AddressFamily::Any`
/// against the transport's dedicated port.
pub struct TcpReachabilityProbe {
    family: AddressFamily,
    /// Port probed instead of the server's default, when set.
    port_override: Option<u16>,
    connect_timeout: Duration,
    server: Mutex<Option<ServerCandidate>>,
    stopped: AtomicBool,
    connect_duration: Mutex<Option<Duration>>,
}

impl TcpReachabilityProbe {
    pub fn new(family: AddressFamily, connect_timeout: Duration) -> Self {
        Self {
            family,
            port_override: None,
            connect_timeout,
            server: Mutex::new(None),
            stopped: AtomicBool::new(false),
            connect_duration: Mutex::new(None),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }
}

#[async_trait]
impl Measurement for TcpReachabilityProbe {
    fn kind(&self) -> TestKind {
        TestKind::Reachability
    }

    fn describe(&self) -> String {
        match self.port_override {
            Some(port) => {
                format!("reachability probe ({}, port {port})", self.family.label())
            }
            None => format!("reachability probe ({})", self.family.label()),
        }
    }

    fn configure(&self, server: &ServerCandidate) {
        *self.server.lock().unwrap() = Some(server.clone());
    }

    async fn run(&self) {
        let Some(server) = self.server.lock().unwrap().clone() else {
            return;
        };
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let port = self.port_override.unwrap_or(server.port);
        let Some(address) = resolve(&server.host, port, self.family).await
        else {
            debug!("no {} address for {}", self.family.label(), server);
            return;
        };
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let start = Instant::now();
        if let Ok(Ok(stream)) =
            timeout(self.connect_timeout, TcpStream::connect(address)).await
        {
            drop(stream);
            *self.connect_duration.lock().unwrap() = Some(start.elapsed());
        }
    }

    async fn wait_until_done(&self) {}

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn succeeded(&self) -> bool {
        self.connect_duration.lock().unwrap().is_some()
            && !self.stopped.load(Ordering::SeqCst)
    }

    fn short_summary(&self) -> Option<String> {
        self.connect_duration
            .lock()
            .unwrap()
            .map(|duration| format!("connect {:.1} ms", stats::millis(duration)))
    }

    /// Let the probe's connection drain before the next one starts, so
    /// back-to-back probes do not race on port reuse.
    fn estimated_wait(&self) -> Duration {
        Duration::from_millis(200)
    }

    fn estimated_run(&self) -> Duration {
        self.connect_timeout
    }
}
