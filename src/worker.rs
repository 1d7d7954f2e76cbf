//! Simulated translation worker pool.
//!
//! Stands in for the real worker fleet in the CLI demo and in tests. It
//! speaks the same wire protocol and produces a pseudo-translation
//! (`"[<lang>] <text>"`) per requested language. [`WorkerBehavior`] injects
//! the faults the dispatch core has to survive: duplicated events, errors and
//! languages that never answer.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{
    CompletedEvent, ErrorEvent, WireEvent, WireRequest, WorkerEndpoint, decode_request, encode,
};

/// Fault injection knobs.
#[derive(Debug, Clone, Default)]
pub struct WorkerBehavior {
    /// Emit every event twice.
    pub duplicate_events: bool,
    /// Languages answered with a fatal error.
    pub fatal_languages: Vec<String>,
    /// Languages answered with a non-fatal error on the first attempt only.
    pub flaky_languages: Vec<String>,
    /// Languages that never get an answer.
    pub silent_languages: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedWorker {
    behavior: WorkerBehavior,
}

pub fn pseudo_translate(text: &str, language: &str) -> String {
    format!("[{language}] {text}")
}

impl SimulatedWorker {
    pub fn new(behavior: WorkerBehavior) -> Self {
        Self { behavior }
    }

    /// Events this worker emits for `request`, in emission order.
    pub fn respond(&self, request: &WireRequest) -> Vec<WireEvent> {
        let b = &self.behavior;
        let mut events = Vec::new();

        for lang in &request.target_languages {
            let event = if b.silent_languages.contains(lang) {
                continue;
            } else if b.fatal_languages.contains(lang) {
                WireEvent::Error(ErrorEvent {
                    correlation_id: request.correlation_id,
                    language: Some(lang.clone()),
                    error_reason: format!("no model for {}->{lang}", request.source_language),
                    fatal: true,
                    retry_attempt: Some(request.retry_attempt),
                })
            } else if b.flaky_languages.contains(lang) && request.retry_attempt == 0 {
                WireEvent::Error(ErrorEvent {
                    correlation_id: request.correlation_id,
                    language: Some(lang.clone()),
                    error_reason: "worker overloaded".into(),
                    fatal: false,
                    retry_attempt: Some(request.retry_attempt),
                })
            } else {
                WireEvent::Completed(CompletedEvent {
                    correlation_id: request.correlation_id,
                    language: lang.clone(),
                    translated_text: pseudo_translate(&request.source_text, lang),
                })
            };

            if b.duplicate_events {
                events.push(event.clone());
            }
            events.push(event);
        }

        events
    }

    /// Answer requests arriving on an in-memory endpoint until it closes.
    pub async fn serve_endpoint(self, mut endpoint: WorkerEndpoint) {
        while let Some(frame) = endpoint.recv_request().await {
            let request = match frame {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "worker received malformed request");
                    continue;
                }
            };
            debug!(
                correlation_id = %request.correlation_id,
                attempt = request.retry_attempt,
                "worker handling request"
            );
            for event in self.respond(&request) {
                if endpoint.emit(&event).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Accept TCP connections and serve each on its own task.
    pub async fn serve_tcp(self, listener: TcpListener) -> Result<(), TransportError> {
        info!(addr = %listener.local_addr()?, "simulated worker listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "dispatcher connected");
            let worker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = worker.serve_connection(stream).await {
                    warn!(%peer, error = %e, "worker connection ended with error");
                }
            });
        }
    }

    async fn serve_connection(&self, stream: TcpStream) -> Result<(), TransportError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(());
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let request = match decode_request(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "worker received malformed request");
                    continue;
                }
            };
            for event in self.respond(&request) {
                let mut frame = encode(&event)?;
                frame.push('\n');
                write_half.write_all(frame.as_bytes()).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CorrelationId;

    fn request(targets: &[&str], retry_attempt: u32) -> WireRequest {
        WireRequest {
            correlation_id: CorrelationId::generate(),
            source_text: "hello".into(),
            source_language: "en".into(),
            target_languages: targets.iter().map(|s| s.to_string()).collect(),
            retry_attempt,
        }
    }

    #[test]
    fn answers_every_language() {
        let worker = SimulatedWorker::default();
        let events = worker.respond(&request(&["es", "fr"], 0));
        assert_eq!(events.len(), 2);
        match &events[1] {
            WireEvent::Completed(e) => {
                assert_eq!(e.language, "fr");
                assert_eq!(e.translated_text, "[fr] hello");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn fault_injection() {
        let worker = SimulatedWorker::new(WorkerBehavior {
            duplicate_events: true,
            fatal_languages: vec!["xx".into()],
            flaky_languages: vec!["fr".into()],
            silent_languages: vec!["de".into()],
        });

        let events = worker.respond(&request(&["es", "fr", "de", "xx"], 0));
        assert_eq!(events.len(), 6);
        assert!(matches!(&events[2], WireEvent::Error(e) if !e.fatal));
        assert!(matches!(&events[4], WireEvent::Error(e) if e.fatal && e.retry_attempt == Some(0)));

        let retried = worker.respond(&request(&["fr"], 1));
        assert!(matches!(&retried[0], WireEvent::Completed(_)));
    }
}
