use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::CorrelationId;

/// Errors returned synchronously from `Dispatcher::submit`. No job exists when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("correlation id already registered: {0}")]
    DuplicateCorrelationId(CorrelationId),
}

/// Why a job ended in `Failed` or `TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FailureReason {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("worker error{}: {reason}", language_suffix(.language))]
    WorkerError {
        language: Option<String>,
        reason: String,
    },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("timed out waiting for worker")]
    TimedOut,

    #[error("cancelled")]
    Cancelled,
}

fn language_suffix(language: &Option<String>) -> String {
    language
        .as_deref()
        .map(|l| format!(" ({l})"))
        .unwrap_or_default()
}

/// Flat taxonomy of everything the dispatch core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    TransportUnavailable,
    WorkerError,
    RetriesExhausted,
    TimedOut,
    Cancelled,
    DuplicateCorrelationId,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::TransportUnavailable => "TransportUnavailable",
            ErrorKind::WorkerError => "WorkerError",
            ErrorKind::RetriesExhausted => "RetriesExhausted",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::DuplicateCorrelationId => "DuplicateCorrelationId",
        };
        write!(f, "{name}")
    }
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DispatchError::DuplicateCorrelationId(_) => ErrorKind::DuplicateCorrelationId,
        }
    }
}

impl FailureReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FailureReason::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            FailureReason::WorkerError { .. } => ErrorKind::WorkerError,
            FailureReason::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            FailureReason::TimedOut => ErrorKind::TimedOut,
            FailureReason::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Terminal failure delivered through a `TranslationHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("translation {correlation_id} failed: {reason}")]
pub struct TranslationError {
    pub correlation_id: CorrelationId,
    pub reason: FailureReason,
}

impl TranslationError {
    pub fn kind(&self) -> ErrorKind {
        self.reason.kind()
    }
}

/// Errors raised by a `Transport` implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("channel full")]
    Full,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
