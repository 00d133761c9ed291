//! HTTPS bulk download measurement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::Instant;

use crate::config::ServerCandidate;
use crate::measurement::{Measurement, TestKind};

#[derive(Debug, Clone, Copy)]
struct Transfer {
    bytes: u64,
    duration: Duration,
    complete: bool,
}

impl Transfer {
    fn mbps(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        (self.bytes as f64 * 8.0) / self.duration.as_secs_f64() / 1_000_000.0
    }
}

/// Bulk download over HTTPS against a fixed path on the selected server.
///
/// The response body is consumed chunk by chunk so an advisory `stop`
/// takes effect at the next chunk boundary; a stopped transfer is
/// recorded as failed.
pub struct HttpDownloadTest {
    path: String,
    client: reqwest::Client,
    request_timeout: Duration,
    server: Mutex<Option<ServerCandidate>>,
    stopped: AtomicBool,
    transfer: Mutex<Option<Transfer>>,
}

impl HttpDownloadTest {
    pub fn new(path: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            client: reqwest::Client::new(),
            request_timeout,
            server: Mutex::new(None),
            stopped: AtomicBool::new(false),
            transfer: Mutex::new(None),
        }
    }

    fn url(&self, server: &ServerCandidate) -> String {
        format!("https://{}:{}{}", server.host, server.port, self.path)
    }
}

#[async_trait]
impl Measurement for HttpDownloadTest {
    fn kind(&self) -> TestKind {
        TestKind::BulkDownload
    }

    fn describe(&self) -> String {
        format!("bulk download {}", self.path)
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

        let url = self.url(&server);
        debug!("downloading {url}");
        let start = Instant::now();

        let mut response = match self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
        {
            Ok(response) => response,
            Err(err) => {
                warn!("download {url} failed: {err}");
                return;
            }
        };

        let mut bytes: u64 = 0;
        let mut complete = true;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                complete = false;
                break;
            }
            match response.chunk().await {
                Ok(Some(chunk)) => bytes += chunk.len() as u64,
                Ok(None) => break,
                Err(err) => {
                    warn!("download {url} interrupted: {err}");
                    complete = false;
                    break;
                }
            }
        }

        *self.transfer.lock().unwrap() =
            Some(Transfer { bytes, duration: start.elapsed(), complete });
    }

    async fn wait_until_done(&self) {}

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn succeeded(&self) -> bool {
        matches!(
            self.transfer.lock().unwrap().as_ref(),
            Some(transfer) if transfer.complete
        )
    }

    fn short_summary(&self) -> Option<String> {
        self.transfer
            .lock()
            .unwrap()
            .map(|transfer| format!("{:.2} Mbps", transfer.mbps()))
    }

    fn estimated_wait(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn estimated_run(&self) -> Duration {
        self.request_timeout
    }
}
