//! Persistence boundary.
//!
//! The dispatch core calls a [`CompletionSink`] exactly once per job: either
//! `on_completion` or `on_failure`, never both and never twice.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::error::FailureReason;
use crate::job::{CorrelationId, TranslationResults};

pub trait CompletionSink: Send + Sync {
    fn on_completion(&self, correlation_id: &CorrelationId, results: &TranslationResults);
    fn on_failure(&self, correlation_id: &CorrelationId, reason: &FailureReason);
}

/// Sink that only logs outcomes.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl CompletionSink for LoggingSink {
    fn on_completion(&self, correlation_id: &CorrelationId, results: &TranslationResults) {
        info!(%correlation_id, languages = ?results.languages(), "translation completed");
    }

    fn on_failure(&self, correlation_id: &CorrelationId, reason: &FailureReason) {
        warn!(%correlation_id, kind = %reason.kind(), %reason, "translation failed");
    }
}

/// Outcome captured by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Completed(CorrelationId, TranslationResults),
    Failed(CorrelationId, FailureReason),
}

/// Sink that keeps every call in memory, in call order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.lock().clone()
    }

    pub fn completions_for(&self, id: &CorrelationId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Recorded::Completed(cid, _) if cid == id))
            .count()
    }

    pub fn failures_for(&self, id: &CorrelationId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Recorded::Failed(cid, _) if cid == id))
            .count()
    }

    fn push(&self, call: Recorded) {
        self.lock().push(call);
    }

    // A panicking test must not make later calls vanish.
    fn lock(&self) -> MutexGuard<'_, Vec<Recorded>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionSink for RecordingSink {
    fn on_completion(&self, correlation_id: &CorrelationId, results: &TranslationResults) {
        self.push(Recorded::Completed(*correlation_id, results.clone()));
    }

    fn on_failure(&self, correlation_id: &CorrelationId, reason: &FailureReason) {
        self.push(Recorded::Failed(*correlation_id, reason.clone()));
    }
}
