//! Error types for remote calls, polling and allocation

use crate::state::StateLabel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Status-like kind attached to every Remote API Client error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ServerFault,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// Any other status code
    Other(u16),
}

impl ApiErrorKind {
    /// Map an HTTP-like status code onto an error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            500..=599 => Self::ServerFault,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::BadRequest => write!(f, "bad request"),
            ApiErrorKind::Unauthorized => write!(f, "unauthorized"),
            ApiErrorKind::Forbidden => write!(f, "forbidden"),
            ApiErrorKind::NotFound => write!(f, "not found"),
            ApiErrorKind::Conflict => write!(f, "conflict"),
            ApiErrorKind::ServerFault => write!(f, "server fault"),
            ApiErrorKind::NotImplemented => write!(f, "not implemented"),
            ApiErrorKind::BadGateway => write!(f, "bad gateway"),
            ApiErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            ApiErrorKind::GatewayTimeout => write!(f, "gateway timeout"),
            ApiErrorKind::Other(status) => write!(f, "status {}", status),
        }
    }
}

/// Error returned by a Remote API Client call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("API error ({kind}): {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::from_status(status), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_not_found() {
            return ErrorCategory::NotFoundAsTerminal;
        }
        match crate::retry::classify(self) {
            crate::retry::Verdict::Retryable => ErrorCategory::Retryable,
            crate::retry::Verdict::Fatal => ErrorCategory::Fatal,
        }
    }
}

/// Caller-facing classification of every failure this crate produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient remote contention or unavailability
    Retryable,
    /// Request or programming error; never succeeds on retry
    Fatal,
    /// Absence, which satisfies a deletion-target poll
    NotFoundAsTerminal,
    /// Deadline exceeded while still converging
    ReconciliationTimeout,
    /// The object left the expected state graph
    UnexpectedState,
    NoCandidatesAvailable,
    AllocationExhausted,
    Cancelled,
}

/// Failure of a bounded write retry loop
#[derive(Error, Debug, Clone)]
pub enum RetryError {
    #[error("Non-retryable error: {0}")]
    Fatal(#[source] ApiError),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ApiError },

    /// `last` is `None` when the first attempt itself outlived the deadline
    #[error(
        "Retry deadline of {timeout:?} exceeded (last error: {})",
        .last.as_ref().map_or_else(|| "none".to_string(), ToString::to_string)
    )]
    Timeout {
        timeout: Duration,
        last: Option<ApiError>,
    },

    #[error("Retry cancelled")]
    Cancelled,
}

impl RetryError {
    /// The last remote error observed, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            RetryError::Fatal(err) => Some(err),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Timeout { last, .. } => last.as_ref(),
            RetryError::Cancelled => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RetryError::Fatal(err) => err.category(),
            RetryError::Exhausted { .. } => ErrorCategory::Retryable,
            RetryError::Timeout { .. } => ErrorCategory::ReconciliationTimeout,
            RetryError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Failure of a state poll
///
/// `T` is the remote object type; the last observed object travels with the
/// error so callers can report precisely where convergence stopped.
#[derive(Error, Debug)]
pub enum PollError<T: fmt::Debug> {
    #[error("Timeout after {timeout:?} waiting for state {expected}")]
    Timeout {
        timeout: Duration,
        expected: String,
        last_state: Option<StateLabel>,
        last_object: Option<T>,
    },

    #[error("Unexpected state '{state}', wanted {expected}")]
    UnexpectedState {
        state: StateLabel,
        object: Option<T>,
        expected: String,
    },

    #[error("Object not found after {checks} consecutive checks")]
    NotFound { checks: u32 },

    #[error("Poll cancelled")]
    Cancelled,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl<T: fmt::Debug> PollError<T> {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PollError::Timeout { .. } => ErrorCategory::ReconciliationTimeout,
            PollError::UnexpectedState { .. } => ErrorCategory::UnexpectedState,
            PollError::NotFound { .. } => ErrorCategory::Fatal,
            PollError::Cancelled => ErrorCategory::Cancelled,
            PollError::Api(err) => err.category(),
        }
    }

    /// The last state label observed before the poll gave up
    ///
    /// A fatal remote error reports the synthesized [`StateLabel::ERROR`].
    pub fn last_state(&self) -> Option<StateLabel> {
        match self {
            PollError::Timeout { last_state, .. } => last_state.clone(),
            PollError::UnexpectedState { state, .. } => Some(state.clone()),
            PollError::Api(_) => Some(StateLabel::error()),
            PollError::NotFound { .. } => Some(StateLabel::deleted()),
            PollError::Cancelled => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }
}

/// Failure of an optimistic allocation
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("No unclaimed candidate matches {filter}")]
    NoCandidatesAvailable { filter: String },

    #[error(
        "Allocation exhausted after {attempts} attempts (last contested: {})",
        .last_contested.as_deref().unwrap_or("none")
    )]
    AllocationExhausted {
        attempts: u32,
        last_contested: Option<String>,
    },

    #[error("Rollback of allocation {allocation_id} failed: {source}")]
    RollbackFailed {
        allocation_id: String,
        #[source]
        source: RetryError,
    },

    #[error("Allocation cancelled")]
    Cancelled,

    #[error(transparent)]
    Remote(RetryError),
}

impl From<RetryError> for AllocationError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Cancelled => AllocationError::Cancelled,
            other => AllocationError::Remote(other),
        }
    }
}

impl AllocationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AllocationError::NoCandidatesAvailable { .. } => ErrorCategory::NoCandidatesAvailable,
            AllocationError::AllocationExhausted { .. } => ErrorCategory::AllocationExhausted,
            AllocationError::RollbackFailed { .. } => ErrorCategory::Fatal,
            AllocationError::Cancelled => ErrorCategory::Cancelled,
            AllocationError::Remote(err) => err.category(),
        }
    }
}
