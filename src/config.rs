//! Run configuration: candidate servers and orchestration knobs.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::errors::ConfigError;
use crate::reachability::MptcpPolicy;

/// Default number of ping bursts per candidate during latency estimation.
pub const DEFAULT_BURST_COUNT: usize = 5;

/// Default delay between ping bursts.
pub const DEFAULT_INTER_BURST_DELAY: Duration = Duration::from_millis(100);

/// Default timeout for a single connect probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A candidate test server: host, port, and a region tag used for display
/// and ranking logs. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerCandidate {
    pub host: String,
    pub port: u16,
    pub region: String,
}

impl ServerCandidate {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        region: impl Into<String>,
    ) -> Self {
        Self { host: host.into(), port, region: region.into() }
    }

    /// Parse a `host:port=region` spec as given on the command line.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (address, region) = spec
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidServerSpec {
                spec: spec.to_string(),
            })?;

        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            ConfigError::InvalidServerSpec { spec: spec.to_string() }
        })?;

        if host.is_empty() || region.is_empty() {
            return Err(ConfigError::InvalidServerSpec {
                spec: spec.to_string(),
            });
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort { spec: spec.to_string() })?;

        Ok(Self::new(host, port, region))
    }
}

impl fmt::Display for ServerCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.region, self.host, self.port)
    }
}

/// How multipath transports should spread traffic across paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipathService {
    /// Secondary paths are standby only.
    Handover,
    /// All paths carry traffic simultaneously. MPTCP tests are skipped in
    /// this mode.
    Aggregate,
}

impl Default for MultipathService {
    fn default() -> Self {
        MultipathService::Handover
    }
}

/// Parse a `major.minor` platform version string.
pub fn parse_platform_version(value: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::InvalidPlatformVersion {
        value: value.to_string(),
    };

    let (major, minor) = value.split_once('.').ok_or_else(invalid)?;
    Ok((
        major.parse().map_err(|_| invalid())?,
        minor.parse().map_err(|_| invalid())?,
    ))
}

/// Everything the scheduler needs to know about a run, minus the tests
/// themselves (those live in the test plan).
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Candidate servers for latency estimation, in encounter order.
    pub candidates: Vec<ServerCandidate>,
    /// Server reported when no candidate qualifies. Defaults to the first
    /// candidate.
    pub default_candidate: Option<ServerCandidate>,
    /// Number of ping bursts per candidate.
    pub burst_count: usize,
    /// Delay between ping bursts.
    pub inter_burst_delay: Duration,
    /// Timeout for a single connect probe.
    pub probe_timeout: Duration,
    /// Multipath service mode applied to every test.
    pub multipath_service: MultipathService,
    /// Gate deciding whether the MPTCP test group may run.
    pub mptcp_policy: MptcpPolicy,
    /// Platform version fed to the MPTCP gate, when known.
    pub platform_version: Option<(u32, u32)>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            default_candidate: None,
            burst_count: DEFAULT_BURST_COUNT,
            inter_burst_delay: DEFAULT_INTER_BURST_DELAY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            multipath_service: MultipathService::default(),
            mptcp_policy: MptcpPolicy::default(),
            platform_version: None,
        }
    }
}

impl RunConfig {
    /// The candidate reported when latency estimation finds no qualifier.
    pub fn fallback_candidate(&self) -> Option<ServerCandidate> {
        self.default_candidate
            .clone()
            .or_else(|| self.candidates.first().cloned())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_spec() {
        let candidate = ServerCandidate::parse("mp.example.org:443=fr").unwrap();
        assert_eq!(candidate.host, "mp.example.org");
        assert_eq!(candidate.port, 443);
        assert_eq!(candidate.region, "fr");
    }

    #[test]
    fn test_parse_server_spec_ipv6_host() {
        let candidate = ServerCandidate::parse("[2001:db8::1]:443=ca").unwrap();
        assert_eq!(candidate.host, "[2001:db8::1]");
        assert_eq!(candidate.port, 443);
    }

    #[test]
    fn test_parse_server_spec_missing_region() {
        assert!(ServerCandidate::parse("mp.example.org:443").is_err());
    }

    #[test]
    fn test_parse_server_spec_bad_port() {
        assert!(ServerCandidate::parse("mp.example.org:https=fr").is_err());
    }

    #[test]
    fn test_parse_platform_version() {
        assert_eq!(parse_platform_version("11.3").unwrap(), (11, 3));
        assert!(parse_platform_version("11").is_err());
        assert!(parse_platform_version("11.x").is_err());
    }

    #[test]
    fn test_fallback_prefers_explicit_default() {
        let mut config = RunConfig::default();
        config.candidates =
            vec![ServerCandidate::new("a.example.org", 443, "fr")];
        config.default_candidate =
            Some(ServerCandidate::new("b.example.org", 443, "ca"));

        assert_eq!(config.fallback_candidate().unwrap().region, "ca");
    }

    #[test]
    fn test_validate_requires_candidates() {
        assert!(RunConfig::default().validate().is_err());
    }
}
