use tokio::time::Instant;

use super::model::{JobStatus, TranslationJob};
use crate::error::FailureReason;

/// Something that happened to a job, from the worker, the clock or the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker delivered the translation for one language.
    Result { language: String, text: String },
    /// A worker reported a failure, for one language or for the whole job.
    /// `attempt` is the retry attempt the worker was answering, when known.
    Error {
        language: Option<String>,
        reason: String,
        fatal: bool,
        attempt: Option<u32>,
    },
    /// The supervisor found the job overdue.
    Deadline,
    /// A send attempt for this job failed on the transport.
    SendFailed { error: String },
    /// Unconditional failure (cancellation, transport down at submit time).
    Fail(FailureReason),
    /// Unconditional timeout.
    Timeout,
}

/// Why an event left the job untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// The job already reached a terminal status.
    AlreadyTerminal,
    /// The language already has a result.
    DuplicateResult,
    /// The worker answered for a language that was never requested.
    UnrequestedLanguage,
    /// Error for a language that already has a result.
    ResolvedLanguage,
    /// Error from an attempt that a retry has already superseded.
    StaleAttempt,
    /// The deadline has not passed yet.
    NotDue,
    /// Bookkeeping only, no status change.
    Recorded,
}

/// Result of feeding an event to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A partial result was applied, more languages are outstanding.
    Progress,
    /// Re-send the outstanding languages. `attempt` is the new retry count.
    Retry { attempt: u32 },
    /// Every target language has a result.
    Completed,
    Failed(FailureReason),
    TimedOut,
    Ignored(Ignored),
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Transition::Completed | Transition::Failed(_) | Transition::TimedOut
        )
    }
}

/// Drives a `TranslationJob` through its lifecycle.
///
/// Statuses only move forward:
/// `Pending -> PartiallyCompleted* -> Completed`, or to `Failed`/`TimedOut`
/// from any non-terminal status. Once terminal, every event is ignored.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job` at time `now` and report what happened.
    pub fn apply(job: &mut TranslationJob, event: JobEvent, now: Instant) -> Transition {
        if job.is_terminal() {
            return Transition::Ignored(Ignored::AlreadyTerminal);
        }

        let transition = match event {
            JobEvent::Result { language, text } => Self::on_result(job, language, text, now),
            JobEvent::Error {
                language,
                reason,
                fatal,
                attempt,
            } => Self::on_error(job, language, reason, fatal, attempt, now),
            JobEvent::Deadline => Self::on_deadline(job, now),
            JobEvent::SendFailed { error } => {
                job.last_send_error = Some(error);
                Transition::Ignored(Ignored::Recorded)
            }
            JobEvent::Fail(reason) => Transition::Failed(reason),
            JobEvent::Timeout => Transition::TimedOut,
        };

        match &transition {
            Transition::Completed => Self::finish(job, JobStatus::Completed, None, now),
            Transition::Failed(reason) => {
                Self::finish(job, JobStatus::Failed, Some(reason.clone()), now)
            }
            Transition::TimedOut => {
                Self::finish(job, JobStatus::TimedOut, Some(FailureReason::TimedOut), now)
            }
            Transition::Retry { .. } | Transition::Progress | Transition::Ignored(_) => {}
        }

        transition
    }

    fn on_result(
        job: &mut TranslationJob,
        language: String,
        text: String,
        now: Instant,
    ) -> Transition {
        if !job.is_requested(&language) {
            return Transition::Ignored(Ignored::UnrequestedLanguage);
        }
        if job.results.contains_key(&language) {
            return Transition::Ignored(Ignored::DuplicateResult);
        }

        job.results.insert(language, text);
        job.last_activity_at = now;

        if job.has_all_results() {
            Transition::Completed
        } else {
            job.status = JobStatus::PartiallyCompleted;
            Transition::Progress
        }
    }

    fn on_error(
        job: &mut TranslationJob,
        language: Option<String>,
        reason: String,
        fatal: bool,
        attempt: Option<u32>,
        now: Instant,
    ) -> Transition {
        if let Some(lang) = &language {
            if !job.is_requested(lang) {
                return Transition::Ignored(Ignored::UnrequestedLanguage);
            }
            if job.results.contains_key(lang) {
                return Transition::Ignored(Ignored::ResolvedLanguage);
            }
        }
        // A re-delivered error from an earlier attempt must not spend the
        // budget again: that attempt's languages are already being resent.
        if attempt.is_some_and(|a| a < job.retry_count) {
            return Transition::Ignored(Ignored::StaleAttempt);
        }

        if !fatal && job.retry_count < job.retry_policy.max_retries {
            return Self::begin_retry(job, now);
        }

        Transition::Failed(FailureReason::WorkerError { language, reason })
    }

    fn on_deadline(job: &mut TranslationJob, now: Instant) -> Transition {
        if !job.is_overdue(now) {
            return Transition::Ignored(Ignored::NotDue);
        }

        if job.retry_count < job.retry_policy.max_retries {
            return Self::begin_retry(job, now);
        }

        // The last attempt never reached the worker: that is a transport
        // failure, not a worker that went quiet.
        match job.last_send_error.take() {
            Some(last_error) if job.retry_count > 0 => {
                Transition::Failed(FailureReason::RetriesExhausted {
                    attempts: job.retry_count,
                    last_error,
                })
            }
            _ => Transition::TimedOut,
        }
    }

    fn begin_retry(job: &mut TranslationJob, now: Instant) -> Transition {
        job.retry_count += 1;
        job.last_activity_at = now;
        job.last_send_error = None;
        Transition::Retry {
            attempt: job.retry_count,
        }
    }

    fn finish(
        job: &mut TranslationJob,
        status: JobStatus,
        failure: Option<FailureReason>,
        now: Instant,
    ) {
        job.status = status;
        job.failure = failure;
        job.terminal_at = Some(now);
        job.last_activity_at = now;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::model::{CorrelationId, RetryPolicy};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn make_job(targets: &[&str], max_retries: u32) -> TranslationJob {
        TranslationJob::new(
            CorrelationId::generate(),
            "good morning".into(),
            "en".into(),
            targets.iter().map(|s| s.to_string()).collect(),
            RetryPolicy {
                max_retries,
                timeout: TIMEOUT,
            },
            Instant::now(),
        )
    }

    fn result(language: &str, text: &str) -> JobEvent {
        JobEvent::Result {
            language: language.into(),
            text: text.into(),
        }
    }

    #[test]
    fn partial_then_complete() {
        let mut job = make_job(&["en", "es"], 2);
        let now = Instant::now();

        let t = StateMachine::apply(&mut job, result("en", "good morning"), now);
        assert_eq!(t, Transition::Progress);
        assert_eq!(job.status, JobStatus::PartiallyCompleted);

        let t = StateMachine::apply(&mut job, result("es", "buenos dias"), now);
        assert_eq!(t, Transition::Completed);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.terminal_at.is_some());
        assert_eq!(job.results.len(), 2);
    }

    #[test]
    fn duplicate_result_keeps_first_text() {
        let mut job = make_job(&["es", "fr"], 2);
        let now = Instant::now();

        StateMachine::apply(&mut job, result("es", "hola"), now);
        let t = StateMachine::apply(&mut job, result("es", "otra cosa"), now);
        assert_eq!(t, Transition::Ignored(Ignored::DuplicateResult));
        assert_eq!(job.results["es"], "hola");
    }

    #[test]
    fn unrequested_language_is_ignored() {
        let mut job = make_job(&["es"], 2);
        let t = StateMachine::apply(&mut job, result("de", "hallo"), Instant::now());
        assert_eq!(t, Transition::Ignored(Ignored::UnrequestedLanguage));
        assert!(job.results.is_empty());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn terminal_job_ignores_everything() {
        let mut job = make_job(&["es"], 2);
        let now = Instant::now();
        StateMachine::apply(&mut job, JobEvent::Fail(FailureReason::Cancelled), now);
        assert_eq!(job.status, JobStatus::Failed);

        for event in [
            result("es", "hola"),
            JobEvent::Deadline,
            JobEvent::Timeout,
            JobEvent::Fail(FailureReason::TimedOut),
        ] {
            let t = StateMachine::apply(&mut job, event, now + TIMEOUT * 5);
            assert_eq!(t, Transition::Ignored(Ignored::AlreadyTerminal));
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.results.is_empty());
        assert_eq!(job.failure, Some(FailureReason::Cancelled));
    }

    #[test]
    fn fatal_error_fails_immediately() {
        let mut job = make_job(&["es"], 3);
        let t = StateMachine::apply(
            &mut job,
            JobEvent::Error {
                language: None,
                reason: "unsupported pair".into(),
                fatal: true,
                attempt: None,
            },
            Instant::now(),
        );
        assert!(matches!(t, Transition::Failed(FailureReason::WorkerError { .. })));
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn non_fatal_error_retries_then_fails() {
        let mut job = make_job(&["es"], 1);
        let now = Instant::now();
        let error = || JobEvent::Error {
            language: None,
            reason: "worker busy".into(),
            fatal: false,
            attempt: None,
        };

        let t = StateMachine::apply(&mut job, error(), now);
        assert_eq!(t, Transition::Retry { attempt: 1 });
        assert_eq!(job.status, JobStatus::Pending);

        let t = StateMachine::apply(&mut job, error(), now);
        assert_eq!(
            t,
            Transition::Failed(FailureReason::WorkerError {
                language: None,
                reason: "worker busy".into()
            })
        );
    }

    #[test]
    fn deadline_not_due_is_ignored() {
        let mut job = make_job(&["es"], 0);
        let at = job.last_activity_at;
        let t = StateMachine::apply(&mut job, JobEvent::Deadline, at);
        assert_eq!(t, Transition::Ignored(Ignored::NotDue));
    }

    #[test]
    fn zero_retries_times_out_directly() {
        let mut job = make_job(&["es"], 0);
        let later = job.last_activity_at + TIMEOUT;
        let t = StateMachine::apply(&mut job, JobEvent::Deadline, later);
        assert_eq!(t, Transition::TimedOut);
        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(job.failure, Some(FailureReason::TimedOut));
    }

    #[test]
    fn deadline_retry_resets_activity() {
        let mut job = make_job(&["es"], 1);
        let later = job.last_activity_at + TIMEOUT;
        let t = StateMachine::apply(&mut job, JobEvent::Deadline, later);
        assert_eq!(t, Transition::Retry { attempt: 1 });
        assert_eq!(job.last_activity_at, later);

        // Not due again until another full timeout has passed.
        let t = StateMachine::apply(&mut job, JobEvent::Deadline, later + TIMEOUT / 2);
        assert_eq!(t, Transition::Ignored(Ignored::NotDue));

        let t = StateMachine::apply(&mut job, JobEvent::Deadline, later + TIMEOUT);
        assert_eq!(t, Transition::TimedOut);
    }

    #[test]
    fn failed_resends_exhaust_retries() {
        let mut job = make_job(&["es"], 1);
        let later = job.last_activity_at + TIMEOUT;
        StateMachine::apply(&mut job, JobEvent::Deadline, later);
        StateMachine::apply(
            &mut job,
            JobEvent::SendFailed {
                error: "channel closed".into(),
            },
            later,
        );

        let t = StateMachine::apply(&mut job, JobEvent::Deadline, later + TIMEOUT);
        assert_eq!(
            t,
            Transition::Failed(FailureReason::RetriesExhausted {
                attempts: 1,
                last_error: "channel closed".into()
            })
        );
    }

    #[test]
    fn results_are_order_independent() {
        let mut a = make_job(&["es", "fr", "de"], 0);
        let mut b = make_job(&["es", "fr", "de"], 0);
        let now = Instant::now();

        for (l, t) in [("es", "hola"), ("fr", "salut"), ("de", "hallo")] {
            StateMachine::apply(&mut a, result(l, t), now);
        }
        for (l, t) in [("de", "hallo"), ("es", "hola"), ("fr", "salut")] {
            StateMachine::apply(&mut b, result(l, t), now);
        }

        assert_eq!(a.status, JobStatus::Completed);
        assert_eq!(b.status, JobStatus::Completed);
        assert_eq!(a.ordered_results(), b.ordered_results());
    }

    #[test]
    fn error_for_translated_language_is_ignored() {
        let mut job = make_job(&["es", "fr"], 0);
        let now = Instant::now();
        StateMachine::apply(&mut job, result("es", "hola"), now);

        let t = StateMachine::apply(
            &mut job,
            JobEvent::Error {
                language: Some("es".into()),
                reason: "late failure".into(),
                fatal: true,
                attempt: Some(0),
            },
            now,
        );
        assert_eq!(t, Transition::Ignored(Ignored::ResolvedLanguage));
        assert_eq!(job.status, JobStatus::PartiallyCompleted);
        assert_eq!(job.results["es"], "hola");
    }

    #[test]
    fn error_from_superseded_attempt_keeps_budget() {
        let mut job = make_job(&["fr"], 1);
        let now = Instant::now();
        let error = JobEvent::Error {
            language: Some("fr".into()),
            reason: "worker busy".into(),
            fatal: false,
            attempt: Some(0),
        };

        let t = StateMachine::apply(&mut job, error.clone(), now);
        assert_eq!(t, Transition::Retry { attempt: 1 });

        let t = StateMachine::apply(&mut job, error, now);
        assert_eq!(t, Transition::Ignored(Ignored::StaleAttempt));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }
}
