use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::FailureReason;

/// Links an outbound request to the inbound events produced for it.
///
/// Backed by a random v4 UUID. Retries reuse the id of the original request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a translation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    PartiallyCompleted,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::PartiallyCompleted => write!(f, "PARTIALLY_COMPLETED"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Retry budget and inactivity deadline for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of re-sends before the job is failed or timed out.
    pub max_retries: u32,
    /// How long a job may go without inbound activity before the supervisor acts.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One translated language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageResult {
    pub language: String,
    pub text: String,
}

/// Results of a job, ordered like the requested target languages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranslationResults(Vec<LanguageResult>);

impl TranslationResults {
    pub fn get(&self, language: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|r| r.language == language)
            .map(|r| r.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageResult> {
        self.0.iter()
    }

    pub fn languages(&self) -> Vec<&str> {
        self.0.iter().map(|r| r.language.as_str()).collect()
    }
}

/// The unit of work tracked by the job registry.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub id: CorrelationId,
    pub source_text: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub status: JobStatus,
    pub results: HashMap<String, String>,
    pub retry_count: u32,
    pub retry_policy: RetryPolicy,
    pub submitted_at: DateTime<Utc>,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    /// Set on the single terminal transition; drives eviction.
    pub terminal_at: Option<Instant>,
    pub failure: Option<FailureReason>,
    /// Error from the most recent send attempt, cleared when a new attempt starts.
    pub last_send_error: Option<String>,
}

impl TranslationJob {
    pub fn new(
        id: CorrelationId,
        source_text: String,
        source_language: String,
        target_languages: Vec<String>,
        retry_policy: RetryPolicy,
        now: Instant,
    ) -> Self {
        Self {
            id,
            source_text,
            source_language,
            target_languages,
            status: JobStatus::Pending,
            results: HashMap::new(),
            retry_count: 0,
            retry_policy,
            submitted_at: Utc::now(),
            created_at: now,
            last_activity_at: now,
            terminal_at: None,
            failure: None,
            last_send_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_requested(&self, language: &str) -> bool {
        self.target_languages.iter().any(|l| l == language)
    }

    /// Target languages without a result yet, in request order.
    pub fn outstanding_languages(&self) -> Vec<String> {
        self.target_languages
            .iter()
            .filter(|l| !self.results.contains_key(l.as_str()))
            .cloned()
            .collect()
    }

    pub fn has_all_results(&self) -> bool {
        self.target_languages
            .iter()
            .all(|l| self.results.contains_key(l.as_str()))
    }

    /// Whether the inactivity deadline has passed at `now`.
    pub fn is_overdue(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity_at) >= self.retry_policy.timeout
    }

    pub fn ordered_results(&self) -> TranslationResults {
        TranslationResults(
            self.target_languages
                .iter()
                .filter_map(|l| {
                    self.results.get(l).map(|text| LanguageResult {
                        language: l.clone(),
                        text: text.clone(),
                    })
                })
                .collect(),
        )
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            correlation_id: self.id,
            status: self.status,
            source_language: self.source_language.clone(),
            target_languages: self.target_languages.clone(),
            results: self.ordered_results(),
            retry_count: self.retry_count,
            max_retries: self.retry_policy.max_retries,
            submitted_at: self.submitted_at,
            failure: self.failure.clone(),
        }
    }
}

/// Read-only copy of a job handed out by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub correlation_id: CorrelationId,
    pub status: JobStatus,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub results: TranslationResults,
    pub retry_count: u32,
    pub max_retries: u32,
    pub submitted_at: DateTime<Utc>,
    pub failure: Option<FailureReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job(targets: &[&str]) -> TranslationJob {
        TranslationJob::new(
            CorrelationId::generate(),
            "hello".into(),
            "en".into(),
            targets.iter().map(|s| s.to_string()).collect(),
            RetryPolicy::default(),
            Instant::now(),
        )
    }

    #[test]
    fn job_creation_defaults() {
        let job = make_job(&["es", "fr"]);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.retry_policy.max_retries, 2);
        assert!(job.results.is_empty());
        assert!(job.terminal_at.is_none());
        assert_eq!(job.outstanding_languages(), vec!["es", "fr"]);
    }

    #[test]
    fn ordered_results_follow_request_order() {
        let mut job = make_job(&["es", "fr", "de"]);
        job.results.insert("de".into(), "hallo".into());
        job.results.insert("es".into(), "hola".into());

        let results = job.ordered_results();
        assert_eq!(results.languages(), vec!["es", "de"]);
        assert_eq!(results.get("de"), Some("hallo"));
        assert_eq!(job.outstanding_languages(), vec!["fr"]);
        assert!(!job.has_all_results());
    }

    #[test]
    fn correlation_ids_are_unique_and_parse() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        let parsed: CorrelationId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::PartiallyCompleted.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
        assert_eq!(JobStatus::TimedOut.to_string(), "TIMED_OUT");
    }

    #[test]
    fn overdue_uses_last_activity() {
        let job = make_job(&["es"]);
        let timeout = job.retry_policy.timeout;
        assert!(!job.is_overdue(job.last_activity_at));
        assert!(job.is_overdue(job.last_activity_at + timeout));
    }
}
