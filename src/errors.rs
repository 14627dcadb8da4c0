//! Failure taxonomy for the harness.
//!
//! Per-task failures are [`FetchError`]s: they are caught inside the worker loop,
//! written to the event log and never abort the run. Coordinator-level failures
//! (startup, shutdown, log sinks) are [`HarnessError`]s and make the run exit
//! non-zero once the log artifacts are finalized.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Categories of failures a single fetch can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection refused, DNS failure, body read interrupted, ...
    NetworkError,

    /// The request did not complete within the client timeout
    TimeoutError,

    /// The backend answered with a non-2xx status
    StatusError,

    /// The body was not a JSON object
    ParseError,
}

impl ErrorCategory {
    /// Label used in step-error messages and as the Prometheus label.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::StatusError => "status_error",
            ErrorCategory::ParseError => "parse_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::StatusError => "Non-2xx HTTP Status",
            ErrorCategory::ParseError => "Malformed JSON Body",
        }
    }

    /// Get all error categories in a consistent order.
    pub fn all() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::StatusError,
            ErrorCategory::ParseError,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A failed fetch of one item.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out: {source}")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} {reason} from {url}")]
    Status {
        url: String,
        status: u16,
        reason: &'static str,
    },

    #[error("invalid JSON body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("JSON body is {found}, expected an object")]
    NotAnObject { found: &'static str },
}

impl FetchError {
    /// Wraps a transport error, separating timeouts from everything else.
    pub fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                source,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Builds a status failure, or `None` when the status is a success.
    pub fn from_status(url: &str, status: reqwest::StatusCode) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        Some(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown Status"),
        })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Timeout { .. } => ErrorCategory::TimeoutError,
            FetchError::Network { .. } => ErrorCategory::NetworkError,
            FetchError::Status { .. } => ErrorCategory::StatusError,
            FetchError::Parse(_) | FetchError::NotAnObject { .. } => ErrorCategory::ParseError,
        }
    }

    /// HTTP status code if the backend answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Run-level failures surfaced by the coordinator.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Not an error: \"all\" is not implemented yet ({0})")]
    NotImplemented(&'static str),

    #[error("failed to prepare log file {path:?}: {source}")]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch server script {script:?}: {source}")]
    Launch {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server exited before becoming ready: {0}")]
    ServerExited(String),

    #[error("server did not answer {url} within {timeout:?}")]
    ServerNotReady { url: String, timeout: Duration },

    #[error("server did not shut down: {0}")]
    Shutdown(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("{0} worker(s) ended abnormally")]
    WorkersFailed(usize),
}
