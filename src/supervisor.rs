//! Timeout/retry supervisor.
//!
//! Runs [`Supervisor::sweep`] on a fixed interval. A sweep re-sends or
//! times out overdue jobs and evicts terminal jobs past the grace period.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::FailureReason;
use crate::job::JobEvent;
use crate::registry::Applied;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retried: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub evicted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Supervisor {
    dispatcher: Dispatcher,
    interval: Duration,
    eviction_grace: Duration,
}

impl Supervisor {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        interval: Duration,
        eviction_grace: Duration,
    ) -> Self {
        Self {
            dispatcher,
            interval,
            eviction_grace,
        }
    }

    pub fn sweep(&self, now: Instant) -> SweepReport {
        let registry = self.dispatcher.registry();
        let mut report = SweepReport::default();

        for id in registry.list_stale(now) {
            // The job may have moved since it was listed; the registry
            // re-checks the deadline under the entry lock.
            let applied = registry.apply(&id, JobEvent::Deadline, now);
            match &applied {
                Applied::Retry(request) => {
                    report.retried += 1;
                    info!(
                        correlation_id = %id,
                        attempt = request.retry_attempt,
                        outstanding = ?request.target_languages,
                        "job overdue, retrying"
                    );
                }
                Applied::Settled(settlement) => match settlement.outcome() {
                    Err(FailureReason::TimedOut) => {
                        report.timed_out += 1;
                        info!(correlation_id = %id, "job timed out");
                    }
                    _ => {
                        report.failed += 1;
                        info!(correlation_id = %id, "job failed after exhausting retries");
                    }
                },
                Applied::Progress(_) | Applied::Ignored(_) | Applied::Unknown => {}
            }
            self.dispatcher.follow_up(applied);
        }

        report.evicted = registry.evict_expired(now, self.eviction_grace);
        report
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "supervisor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep(Instant::now());
                    if !report.is_empty() {
                        debug!(?report, "supervisor sweep");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("supervisor stopped");
    }
}
