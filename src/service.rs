use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::dispatcher::Dispatcher;
use crate::listener::EventListener;
use crate::registry::{Applied, JobRegistry, StatsSnapshot};
use crate::sink::CompletionSink;
use crate::supervisor::Supervisor;
use crate::transport::{Inbound, Transport};

/// The assembled dispatch core: one registry, one transport, one listener
/// task and one supervisor task.
pub struct DispatchService {
    dispatcher: Dispatcher,
    shutdown_tx: watch::Sender<bool>,
    listener_task: JoinHandle<()>,
    supervisor_task: JoinHandle<()>,
}

impl DispatchService {
    /// Wire up and spawn the core. Must be called inside a tokio runtime.
    ///
    /// Fails without spawning anything if `config` does not validate.
    pub fn start(
        config: &DispatchConfig,
        transport: impl Transport,
        inbound: Inbound,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let dispatcher =
            Dispatcher::new(registry, Arc::new(transport), sink, config.retry_policy());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = EventListener::new(dispatcher.clone());
        let listener_task = tokio::spawn(listener.run(inbound, shutdown_rx.clone()));

        let supervisor = Supervisor::new(
            dispatcher.clone(),
            config.supervisor_interval(),
            config.eviction_grace(),
        );
        let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

        info!(
            max_retries = config.max_retries,
            per_job_timeout_ms = config.per_job_timeout_ms,
            "dispatch service started"
        );

        Ok(Self {
            dispatcher,
            shutdown_tx,
            listener_task,
            supervisor_task,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.registry().stats()
    }

    /// Stop both tasks and settle every in-flight job as `Cancelled`.
    pub async fn shutdown(self) -> StatsSnapshot {
        let _ = self.shutdown_tx.send(true);
        for (name, task) in [
            ("listener", self.listener_task),
            ("supervisor", self.supervisor_task),
        ] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "task ended abnormally");
            }
        }

        let registry = self.dispatcher.registry();
        let pending = registry.cancel_all();
        if !pending.is_empty() {
            info!(count = pending.len(), "cancelling in-flight jobs on shutdown");
        }
        for settlement in pending {
            self.dispatcher.follow_up(Applied::Settled(settlement));
        }

        let stats = registry.stats();
        info!(?stats, "dispatch service stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::TranslationRequest;
    use crate::error::ErrorKind;
    use crate::sink::RecordingSink;
    use crate::transport::MemoryTransport;
    use crate::worker::{SimulatedWorker, WorkerBehavior};

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            max_retries: 1,
            per_job_timeout_ms: 200,
            eviction_grace_ms: 50,
            supervisor_interval_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn end_to_end_with_duplicating_worker() {
        let (transport, inbound, endpoint) = MemoryTransport::channel(64);
        let worker = SimulatedWorker::new(WorkerBehavior {
            duplicate_events: true,
            ..Default::default()
        });
        tokio::spawn(worker.serve_endpoint(endpoint));

        let sink = Arc::new(RecordingSink::new());
        let service =
            DispatchService::start(&fast_config(), transport, inbound, sink.clone()).unwrap();

        let handle = service
            .dispatcher()
            .submit(TranslationRequest::new("good night", "en", ["es", "fr", "de"]))
            .unwrap();
        let id = handle.correlation_id();
        let results = handle.wait().await.unwrap();
        assert_eq!(results.languages(), vec!["es", "fr", "de"]);
        assert_eq!(results.get("fr"), Some("[fr] good night"));

        let stats = service.shutdown().await;
        assert_eq!(sink.completions_for(&id), 1);
        assert_eq!(sink.calls().len(), 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn silent_worker_is_backstopped_by_timeout() {
        let (transport, inbound, endpoint) = MemoryTransport::channel(64);
        let worker = SimulatedWorker::new(WorkerBehavior {
            silent_languages: vec!["fr".into()],
            ..Default::default()
        });
        tokio::spawn(worker.serve_endpoint(endpoint));

        let sink = Arc::new(RecordingSink::new());
        let service =
            DispatchService::start(&fast_config(), transport, inbound, sink.clone()).unwrap();
        let handle = service
            .dispatcher()
            .submit(TranslationRequest::new("hello", "en", ["es", "fr"]))
            .unwrap();
        let id = handle.correlation_id();

        let err = tokio::time::timeout(std::time::Duration::from_secs(5), handle.wait())
            .await
            .expect("timeout sweep must resolve the handle")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert_eq!(sink.failures_for(&id), 1);

        let stats = service.shutdown().await;
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.timed_out, 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_jobs() {
        let (transport, inbound, _endpoint) = MemoryTransport::channel(64);
        let sink = Arc::new(RecordingSink::new());
        let config = DispatchConfig {
            per_job_timeout_ms: 60_000,
            ..fast_config()
        };
        let service = DispatchService::start(&config, transport, inbound, sink.clone()).unwrap();
        let handle = service
            .dispatcher()
            .submit(TranslationRequest::new("hello", "en", ["es"]))
            .unwrap();
        let id = handle.correlation_id();

        let stats = service.shutdown().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(sink.failures_for(&id), 1);
    }

    #[tokio::test]
    async fn start_rejects_invalid_config() {
        for config in [
            DispatchConfig {
                supervisor_interval_ms: 0,
                ..fast_config()
            },
            DispatchConfig {
                per_job_timeout_ms: 0,
                ..fast_config()
            },
        ] {
            let (transport, inbound, _endpoint) = MemoryTransport::channel(8);
            let started =
                DispatchService::start(&config, transport, inbound, Arc::new(RecordingSink::new()));
            assert!(started.is_err());
        }
    }
}
