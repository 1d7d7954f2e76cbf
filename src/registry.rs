//! Job registry: the only shared mutable state in the dispatch core.
//!
//! Each operation locks one entry, runs the [`StateMachine`] on it and
//! returns an [`Applied`] describing the follow-up work. A terminal
//! transition moves the caller's completion signal out of the entry and into
//! a [`Settlement`], so whichever racer wins the transition is the only one
//! that can notify the caller and the sink. Later racers see
//! `Ignored(AlreadyTerminal)`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DispatchError, FailureReason, TranslationError};
use crate::job::{
    CorrelationId, Ignored, JobEvent, JobSnapshot, JobStatus, StateMachine, TranslationJob,
    TranslationResults, Transition,
};
use crate::sink::CompletionSink;
use crate::transport::WireRequest;

/// What a caller's handle eventually resolves to.
pub type JobOutcome = Result<TranslationResults, TranslationError>;

struct Entry {
    job: TranslationJob,
    signal: Option<oneshot::Sender<JobOutcome>>,
}

/// The single terminal outcome of a job, ready to be delivered.
#[derive(Debug)]
pub struct Settlement {
    correlation_id: CorrelationId,
    outcome: Result<TranslationResults, FailureReason>,
    signal: Option<oneshot::Sender<JobOutcome>>,
}

impl Settlement {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn outcome(&self) -> &Result<TranslationResults, FailureReason> {
        &self.outcome
    }

    /// Notify the sink, then resolve the caller's handle.
    pub fn deliver(self, sink: &dyn CompletionSink) {
        let id = self.correlation_id;
        match &self.outcome {
            Ok(results) => sink.on_completion(&id, results),
            Err(reason) => sink.on_failure(&id, reason),
        }
        if let Some(signal) = self.signal {
            // The caller may have dropped its handle; nothing to do then.
            let _ = signal.send(self.outcome.map_err(|reason| TranslationError {
                correlation_id: id,
                reason,
            }));
        }
    }
}

/// Follow-up required after an event was applied.
#[derive(Debug)]
pub enum Applied {
    /// Partial result recorded; the job is still in flight.
    Progress(JobStatus),
    /// Re-send this request (same correlation id, outstanding languages only).
    Retry(WireRequest),
    /// The job just became terminal.
    Settled(Settlement),
    Ignored(Ignored),
    /// No job with this id (never submitted, or already evicted).
    Unknown,
}

#[derive(Debug, Default)]
struct RegistryStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    retries: AtomicU64,
    duplicate_results: AtomicU64,
    late_events: AtomicU64,
    ignored_errors: AtomicU64,
    unknown_events: AtomicU64,
    contract_violations: AtomicU64,
    malformed_frames: AtomicU64,
    evicted: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub in_flight: u64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub retries: u64,
    pub duplicate_results: u64,
    pub late_events: u64,
    pub ignored_errors: u64,
    pub unknown_events: u64,
    pub contract_violations: u64,
    pub malformed_frames: u64,
    pub evicted: u64,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<CorrelationId, Entry>,
    stats: RegistryStats,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job. Fails if the id is already taken; the existing job is untouched.
    pub fn insert(
        &self,
        job: TranslationJob,
        signal: oneshot::Sender<JobOutcome>,
    ) -> Result<(), DispatchError> {
        match self.jobs.entry(job.id) {
            MapEntry::Occupied(_) => Err(DispatchError::DuplicateCorrelationId(job.id)),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry {
                    job,
                    signal: Some(signal),
                });
                bump(&self.stats.submitted);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &CorrelationId) -> Option<JobSnapshot> {
        self.jobs.get(id).map(|e| e.job.snapshot())
    }

    pub fn status(&self, id: &CorrelationId) -> Option<JobStatus> {
        self.jobs.get(id).map(|e| e.job.status)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Atomically apply `event` to the job `id`.
    pub fn apply(&self, id: &CorrelationId, event: JobEvent, now: Instant) -> Applied {
        let Some(mut guard) = self.jobs.get_mut(id) else {
            return Applied::Unknown;
        };
        let entry = guard.value_mut();

        match StateMachine::apply(&mut entry.job, event, now) {
            Transition::Progress => Applied::Progress(entry.job.status),
            Transition::Retry { attempt } => {
                bump(&self.stats.retries);
                debug!(correlation_id = %id, attempt, "retry scheduled");
                Applied::Retry(WireRequest::for_job(&entry.job))
            }
            Transition::Completed => {
                bump(&self.stats.completed);
                Applied::Settled(Settlement {
                    correlation_id: *id,
                    outcome: Ok(entry.job.ordered_results()),
                    signal: entry.signal.take(),
                })
            }
            Transition::Failed(reason) => {
                bump(&self.stats.failed);
                Applied::Settled(Settlement {
                    correlation_id: *id,
                    outcome: Err(reason),
                    signal: entry.signal.take(),
                })
            }
            Transition::TimedOut => {
                bump(&self.stats.timed_out);
                Applied::Settled(Settlement {
                    correlation_id: *id,
                    outcome: Err(FailureReason::TimedOut),
                    signal: entry.signal.take(),
                })
            }
            Transition::Ignored(ignored) => {
                match ignored {
                    Ignored::AlreadyTerminal => {
                        bump(&self.stats.late_events);
                        debug!(correlation_id = %id, "event for terminal job discarded");
                    }
                    Ignored::DuplicateResult => {
                        bump(&self.stats.duplicate_results);
                        debug!(correlation_id = %id, "duplicate result discarded");
                    }
                    Ignored::UnrequestedLanguage => {
                        bump(&self.stats.contract_violations);
                        warn!(
                            correlation_id = %id,
                            targets = ?entry.job.target_languages,
                            "worker answered for a language that was not requested"
                        );
                    }
                    Ignored::ResolvedLanguage | Ignored::StaleAttempt => {
                        bump(&self.stats.ignored_errors);
                        debug!(correlation_id = %id, reason = ?ignored, "worker error discarded");
                    }
                    Ignored::NotDue | Ignored::Recorded => {}
                }
                Applied::Ignored(ignored)
            }
        }
    }

    pub fn apply_partial_result(&self, id: &CorrelationId, language: &str, text: &str) -> Applied {
        self.apply(
            id,
            JobEvent::Result {
                language: language.to_string(),
                text: text.to_string(),
            },
            Instant::now(),
        )
    }

    pub fn mark_failed(&self, id: &CorrelationId, reason: FailureReason) -> Applied {
        self.apply(id, JobEvent::Fail(reason), Instant::now())
    }

    pub fn mark_timed_out(&self, id: &CorrelationId) -> Applied {
        self.apply(id, JobEvent::Timeout, Instant::now())
    }

    /// Remove a job regardless of status. Returns whether it was present.
    pub fn evict(&self, id: &CorrelationId) -> bool {
        let removed = self.jobs.remove(id).is_some();
        if removed {
            bump(&self.stats.evicted);
        }
        removed
    }

    /// Non-terminal jobs whose own inactivity timeout has elapsed at `now`.
    pub fn list_stale(&self, now: Instant) -> Vec<CorrelationId> {
        self.jobs
            .iter()
            .filter(|e| !e.job.is_terminal() && e.job.is_overdue(now))
            .map(|e| *e.key())
            .collect()
    }

    /// Drop terminal jobs that settled at least `grace` before `now`.
    pub fn evict_expired(&self, now: Instant, grace: Duration) -> usize {
        let mut removed = 0;
        self.jobs.retain(|_, entry| {
            let expired = entry
                .job
                .terminal_at
                .is_some_and(|at| now.saturating_duration_since(at) >= grace);
            if expired {
                removed += 1;
            }
            !expired
        });
        self.stats
            .evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Fail every in-flight job with `Cancelled`.
    pub fn cancel_all(&self) -> Vec<Settlement> {
        let ids: Vec<CorrelationId> = self
            .jobs
            .iter()
            .filter(|e| !e.job.is_terminal())
            .map(|e| *e.key())
            .collect();

        ids.iter()
            .filter_map(|id| match self.mark_failed(id, FailureReason::Cancelled) {
                Applied::Settled(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn record_unknown_event(&self) {
        bump(&self.stats.unknown_events);
    }

    pub(crate) fn record_malformed_frame(&self) {
        bump(&self.stats.malformed_frames);
    }

    pub fn stats(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let s = &self.stats;
        StatsSnapshot {
            in_flight: self.jobs.iter().filter(|e| !e.job.is_terminal()).count() as u64,
            submitted: load(&s.submitted),
            completed: load(&s.completed),
            failed: load(&s.failed),
            timed_out: load(&s.timed_out),
            retries: load(&s.retries),
            duplicate_results: load(&s.duplicate_results),
            late_events: load(&s.late_events),
            ignored_errors: load(&s.ignored_errors),
            unknown_events: load(&s.unknown_events),
            contract_violations: load(&s.contract_violations),
            malformed_frames: load(&s.malformed_frames),
            evicted: load(&s.evicted),
        }
    }
}
