//! Error types for benchmark orchestration.
//!
//! Probe and test failures are never surfaced as errors: they are absorbed
//! where they occur and recorded as data in the report. The types here
//! cover the two remaining categories -- invalid configuration supplied by
//! the caller, and internal state violations that indicate a scheduler bug
//! and should never occur in correct operation.

use thiserror::Error;

/// Exit codes for the `mpbench` binary.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Configuration error (invalid arguments).
    pub const CONFIG_ERROR: i32 = 3;
    /// Scheduler bug surfaced as an internal state violation.
    pub const INTERNAL_ERROR: i32 = 70;
}

/// Invalid run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server spec '{spec}': expected host:port=region")]
    InvalidServerSpec { spec: String },

    #[error("invalid port in server spec '{spec}'")]
    InvalidPort { spec: String },

    #[error("invalid platform version '{value}': expected major.minor")]
    InvalidPlatformVersion { value: String },

    #[error("at least one server candidate is required")]
    NoCandidates,
}

/// A violation of the scheduler's internal bookkeeping invariants.
///
/// These are fatal: a benchmark run that hits one of these has a bug in
/// the orchestration code, not in the network.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternalStateViolation {
    #[error("outcome appended out of order: expected index {expected}, got {got}")]
    OutOfOrderAppend { expected: usize, got: usize },

    #[error("outcome appended after the report was finalized")]
    AppendAfterFinalize,

    #[error("finalize called a second time with different inputs")]
    ConflictingFinalize,
}
