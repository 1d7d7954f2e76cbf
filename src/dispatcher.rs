use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, FailureReason, TranslationError};
use crate::job::{
    CorrelationId, JobEvent, JobSnapshot, JobStatus, RetryPolicy, TranslationJob,
    TranslationResults,
};
use crate::registry::{Applied, JobOutcome, JobRegistry};
use crate::sink::CompletionSink;
use crate::transport::{Transport, WireRequest};

/// Per-request overrides of the configured retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

/// A message to translate into one or more languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub options: SubmitOptions,
}

impl TranslationRequest {
    pub fn new<I, S>(
        text: impl Into<String>,
        source_language: impl Into<String>,
        targets: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            source_language: source_language.into(),
            target_languages: targets.into_iter().map(Into::into).collect(),
            options: SubmitOptions::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.text.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "source text must not be empty".into(),
            ));
        }
        if self.source_language.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "source language must not be empty".into(),
            ));
        }
        if self.target_languages.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "at least one target language is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for lang in &self.target_languages {
            if lang.trim().is_empty() {
                return Err(DispatchError::InvalidRequest(
                    "target language codes must not be empty".into(),
                ));
            }
            if !seen.insert(lang.as_str()) {
                return Err(DispatchError::InvalidRequest(format!(
                    "duplicate target language: {lang}"
                )));
            }
        }
        if self.options.timeout.is_some_and(|t| t.is_zero()) {
            return Err(DispatchError::InvalidRequest(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Entry point for callers. Cheap to clone; every clone shares one registry
/// and one transport.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn CompletionSink>,
    defaults: RetryPolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<JobRegistry>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn CompletionSink>,
        defaults: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            transport,
            sink,
            defaults,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register and send a translation job.
    ///
    /// Invalid input fails here and creates no job. If the transport rejects
    /// the first send, the returned handle is already resolved with
    /// `TransportUnavailable`.
    pub fn submit(&self, request: TranslationRequest) -> Result<TranslationHandle, DispatchError> {
        request.validate()?;
        self.submit_with_id(CorrelationId::generate(), request)
    }

    pub(crate) fn submit_with_id(
        &self,
        id: CorrelationId,
        request: TranslationRequest,
    ) -> Result<TranslationHandle, DispatchError> {
        let policy = RetryPolicy {
            max_retries: request.options.max_retries.unwrap_or(self.defaults.max_retries),
            timeout: request.options.timeout.unwrap_or(self.defaults.timeout),
        };
        let job = TranslationJob::new(
            id,
            request.text,
            request.source_language,
            request.target_languages,
            policy,
            Instant::now(),
        );
        let wire = WireRequest::for_job(&job);

        let (tx, rx) = oneshot::channel();
        self.registry.insert(job, tx)?;
        let handle = TranslationHandle {
            correlation_id: id,
            rx: Some(rx),
            resolved: None,
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
        };

        match self.transport.send(&wire) {
            Ok(()) => {
                info!(
                    correlation_id = %id,
                    targets = ?wire.target_languages,
                    "translation dispatched"
                );
            }
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "transport rejected request");
                let reason = FailureReason::TransportUnavailable(e.to_string());
                self.follow_up(self.registry.mark_failed(&id, reason));
                self.registry.evict(&id);
            }
        }

        Ok(handle)
    }

    /// Carry out whatever a registry operation asked for.
    pub(crate) fn follow_up(&self, applied: Applied) {
        match applied {
            Applied::Settled(settlement) => settlement.deliver(self.sink.as_ref()),
            Applied::Retry(request) => self.resend(request),
            Applied::Progress(_) | Applied::Ignored(_) | Applied::Unknown => {}
        }
    }

    fn resend(&self, request: WireRequest) {
        let id = request.correlation_id;
        match self.transport.send(&request) {
            Ok(()) => debug!(
                correlation_id = %id,
                attempt = request.retry_attempt,
                targets = ?request.target_languages,
                "retry dispatched"
            ),
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "retry send failed");
                let event = JobEvent::SendFailed {
                    error: e.to_string(),
                };
                self.follow_up(self.registry.apply(&id, event, Instant::now()));
            }
        }
    }
}

/// Caller's view of one submitted job.
pub struct TranslationHandle {
    correlation_id: CorrelationId,
    rx: Option<oneshot::Receiver<JobOutcome>>,
    resolved: Option<JobOutcome>,
    registry: Arc<JobRegistry>,
    sink: Arc<dyn CompletionSink>,
}

impl std::fmt::Debug for TranslationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationHandle")
            .field("correlation_id", &self.correlation_id)
            .field("resolved", &self.resolved.is_some())
            .finish()
    }
}

impl TranslationHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Current status, or `None` once the job has been evicted.
    pub fn status(&self) -> Option<JobStatus> {
        self.registry.status(&self.correlation_id)
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.registry.get(&self.correlation_id)
    }

    /// Non-blocking poll. Returns the outcome once the job is terminal.
    pub fn try_result(&mut self) -> Option<&JobOutcome> {
        if self.resolved.is_none()
            && let Some(rx) = self.rx.as_mut()
        {
            match rx.try_recv() {
                Ok(outcome) => {
                    self.resolved = Some(outcome);
                    self.rx = None;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.resolved = Some(Err(self.abandoned()));
                    self.rx = None;
                }
            }
        }
        self.resolved.as_ref()
    }

    /// Fail the job locally with `Cancelled`. Returns `false` if it was
    /// already terminal. An in-flight worker computation is not stopped; its
    /// late events are discarded.
    pub fn cancel(&self) -> bool {
        match self.registry.mark_failed(&self.correlation_id, FailureReason::Cancelled) {
            Applied::Settled(settlement) => {
                info!(correlation_id = %self.correlation_id, "translation cancelled");
                settlement.deliver(self.sink.as_ref());
                true
            }
            _ => false,
        }
    }

    /// Wait for the terminal outcome.
    pub async fn wait(mut self) -> Result<TranslationResults, TranslationError> {
        if let Some(outcome) = self.resolved.take() {
            return outcome;
        }
        let Some(rx) = self.rx.take() else {
            return Err(self.abandoned());
        };
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.abandoned()),
        }
    }

    // The registry dropped the signal without settling: only happens when the
    // whole core is torn down.
    fn abandoned(&self) -> TranslationError {
        TranslationError {
            correlation_id: self.correlation_id,
            reason: FailureReason::Cancelled,
        }
    }
}
