//! Closed error taxonomy for the storage core (spec §7).
//!
//! Every public method returns [`StorageError`]. Backend-layer errors are
//! opaque strings until they cross into this crate, at which point
//! [`classify`] maps them onto this closed set exactly once, near the
//! boundary, per spec §7 Propagation.

use thiserror::Error;

/// The closed error-kind taxonomy from spec §7. Kept separate from
/// [`StorageError`] so callers can match on kind without caring about the
/// human-readable message, and so [`StorageError::Aggregate`] can carry a
/// list of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ConnectionFailed,
    Timeout,
    IntegrityFailure,
    BackendOffline,
    NoBackends,
    InvalidRequest,
    QuotaExceeded,
    Unauthorized,
    CircuitOpen,
    QueueFull,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Only these kinds are retryable (spec §7 Retryability).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::ConnectionFailed | ErrorKind::BackendOffline
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::ConnectionFailed => "connection-failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::IntegrityFailure => "integrity-failure",
            ErrorKind::BackendOffline => "backend-offline",
            ErrorKind::NoBackends => "no-backends",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::QuotaExceeded => "quota-exceeded",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::CircuitOpen => "circuit-open",
            ErrorKind::QueueFull => "queue-full",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("{kind:?} on {operation}: {message}")]
    Operation {
        kind: ErrorKind,
        operation: String,
        message: String,
    },

    #[error("no backends available for operation {operation}")]
    NoBackends { operation: String },

    #[error("backend {backend} not registered")]
    BackendNotFound { backend: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("circuit open for operation type {op_type}")]
    CircuitOpen { op_type: String },

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("aggregate failure across {} backend(s): {primary:?}", .kinds.len())]
    Aggregate {
        primary: ErrorKind,
        kinds: Vec<ErrorKind>,
        backends: Vec<String>,
    },
}

impl StorageError {
    pub fn operation(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Operation {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::operation(ErrorKind::NotFound, operation, message)
    }

    pub fn invalid_request(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::operation(ErrorKind::InvalidRequest, operation, message)
    }

    /// The error kind this variant classifies as, for retry/circuit-breaker decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Operation { kind, .. } => *kind,
            StorageError::NoBackends { .. } => ErrorKind::NoBackends,
            StorageError::BackendNotFound { .. } => ErrorKind::NotFound,
            StorageError::Configuration(_) => ErrorKind::InvalidRequest,
            StorageError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            StorageError::QueueFull(_) => ErrorKind::QueueFull,
            StorageError::Cancelled(_) => ErrorKind::Cancelled,
            StorageError::Aggregate { primary, .. } => *primary,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Priority order used to pick the "primary cause" of an aggregate error: lower
/// index means higher priority (surfaced first to the caller).
const PRIORITY_ORDER: &[ErrorKind] = &[
    ErrorKind::IntegrityFailure,
    ErrorKind::Unauthorized,
    ErrorKind::QuotaExceeded,
    ErrorKind::InvalidRequest,
    ErrorKind::BackendOffline,
    ErrorKind::ConnectionFailed,
    ErrorKind::Timeout,
    ErrorKind::NotFound,
    ErrorKind::CircuitOpen,
    ErrorKind::QueueFull,
    ErrorKind::Cancelled,
    ErrorKind::NoBackends,
    ErrorKind::Unknown,
];

fn priority_rank(kind: ErrorKind) -> usize {
    PRIORITY_ORDER.iter().position(|k| *k == kind).unwrap_or(PRIORITY_ORDER.len())
}

/// Classify an opaque backend error string into the closed taxonomy.
///
/// This is the documented fallback mapping from spec §7 and §9: backends are
/// expected to return already-classified errors where possible; this
/// substring table only covers the last-resort case of an opaque string
/// coming out of a backend implementation we don't control.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("not found") || lower.contains("no such") {
        ErrorKind::NotFound
    } else if lower.contains("timeout") || lower.contains("deadline") {
        ErrorKind::Timeout
    } else if lower.contains("quota") || lower.contains("limit") || lower.contains("space") {
        ErrorKind::QuotaExceeded
    } else if lower.contains("unauthorized") || lower.contains("forbidden") || lower.contains("permission") {
        ErrorKind::Unauthorized
    } else if lower.contains("checksum") || lower.contains("integrity") || lower.contains("corrupt") {
        ErrorKind::IntegrityFailure
    } else if lower.contains("offline") || lower.contains("unreachable") {
        ErrorKind::BackendOffline
    } else if lower.contains("connection") || lower.contains("connect") || lower.contains("refused") {
        ErrorKind::ConnectionFailed
    } else if lower.contains("invalid") || lower.contains("malformed") || lower.contains("bad request") {
        ErrorKind::InvalidRequest
    } else if lower.contains("cancel") {
        ErrorKind::Cancelled
    } else {
        ErrorKind::Unknown
    }
}

/// Build an aggregate error from a set of per-backend outcomes, keeping the
/// highest-priority kind as the primary cause (spec §7 Propagation).
pub fn aggregate(outcomes: Vec<(String, ErrorKind)>) -> StorageError {
    let backends: Vec<String> = outcomes.iter().map(|(b, _)| b.clone()).collect();
    let kinds: Vec<ErrorKind> = outcomes.iter().map(|(_, k)| *k).collect();
    let primary = kinds
        .iter()
        .copied()
        .min_by_key(|k| priority_rank(*k))
        .unwrap_or(ErrorKind::Unknown);

    StorageError::Aggregate { primary, kinds, backends }
}
