//! Event listener: the single consumer of inbound transport frames.
//!
//! Every frame goes through [`EventListener::handle_frame`], which decodes it,
//! turns it into a [`JobEvent`] and applies it through the registry. Nothing
//! in here returns an error to the receive loop; bad frames and unknown ids
//! are logged, counted and dropped.

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::job::JobEvent;
use crate::registry::Applied;
use crate::transport::{Inbound, WireEvent, decode_event};

pub struct EventListener {
    dispatcher: Dispatcher,
}

impl EventListener {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Drain `inbound` until it closes or `shutdown` flips to `true`.
    ///
    /// Takes the subscription by value: there is no way to attach a second
    /// consumer to the same transport.
    pub(crate) async fn run(self, mut inbound: Inbound, mut shutdown: watch::Receiver<bool>) {
        info!("event listener started");
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => {
                        info!("inbound channel closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("event listener stopped");
    }

    pub fn handle_frame(&self, frame: &[u8]) {
        match decode_event(frame) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                self.dispatcher.registry().record_malformed_frame();
                warn!(error = %e, "discarding malformed inbound frame");
            }
        }
    }

    pub fn handle_event(&self, event: WireEvent) {
        let id = event.correlation_id();
        let job_event = match event {
            WireEvent::Completed(e) => JobEvent::Result {
                language: e.language,
                text: e.translated_text,
            },
            WireEvent::Error(e) => JobEvent::Error {
                language: e.language,
                reason: e.error_reason,
                fatal: e.fatal,
                attempt: e.retry_attempt,
            },
        };

        let registry = self.dispatcher.registry();
        let applied = registry.apply(&id, job_event, Instant::now());
        match &applied {
            Applied::Unknown => {
                registry.record_unknown_event();
                debug!(correlation_id = %id, "event for unknown or evicted job discarded");
            }
            Applied::Progress(status) => {
                debug!(correlation_id = %id, %status, "partial result applied");
            }
            Applied::Settled(settlement) => {
                debug!(
                    correlation_id = %id,
                    success = settlement.outcome().is_ok(),
                    "job settled by worker event"
                );
            }
            Applied::Retry(_) | Applied::Ignored(_) => {}
        }
        self.dispatcher.follow_up(applied);
    }
}
