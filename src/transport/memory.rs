use tokio::sync::mpsc::{self, error::TrySendError};

use super::{Inbound, Transport, WireEvent, WireRequest, decode_request, encode};
use crate::error::TransportError;

/// In-process transport backed by bounded tokio channels.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    outbound: mpsc::Sender<String>,
}

/// Worker-pool side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct WorkerEndpoint {
    requests: mpsc::Receiver<String>,
    events: mpsc::Sender<Vec<u8>>,
}

impl MemoryTransport {
    /// Build a connected transport, its inbound subscription and the worker end.
    pub fn channel(capacity: usize) -> (Self, Inbound, WorkerEndpoint) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Self { outbound: out_tx },
            Inbound::new(in_rx),
            WorkerEndpoint {
                requests: out_rx,
                events: in_tx,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&self, request: &WireRequest) -> Result<(), TransportError> {
        let frame = encode(request)?;
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

impl WorkerEndpoint {
    /// Wait for the next request. `None` once every transport handle is dropped.
    pub async fn recv_request(&mut self) -> Option<Result<WireRequest, TransportError>> {
        self.requests
            .recv()
            .await
            .map(|frame| decode_request(frame.as_bytes()))
    }

    /// Non-blocking variant of [`recv_request`](Self::recv_request).
    pub fn try_recv_request(&mut self) -> Option<Result<WireRequest, TransportError>> {
        self.requests
            .try_recv()
            .ok()
            .map(|frame| decode_request(frame.as_bytes()))
    }

    pub async fn emit(&self, event: &WireEvent) -> Result<(), TransportError> {
        self.emit_raw(encode(event)?).await
    }

    /// Push an arbitrary frame, valid or not.
    pub async fn emit_raw(&self, frame: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.events
            .send(frame.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Stop accepting requests; later sends on the transport fail with `Closed`.
    pub fn close_requests(&mut self) {
        self.requests.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CorrelationId;
    use crate::transport::{CompletedEvent, decode_event};

    fn request() -> WireRequest {
        WireRequest {
            correlation_id: CorrelationId::generate(),
            source_text: "hi".into(),
            source_language: "en".into(),
            target_languages: vec!["es".into()],
            retry_attempt: 0,
        }
    }

    #[tokio::test]
    async fn request_reaches_worker_and_event_comes_back() {
        let (transport, mut inbound, mut worker) = MemoryTransport::channel(8);
        let req = request();
        transport.send(&req).unwrap();

        let received = worker.recv_request().await.unwrap().unwrap();
        assert_eq!(received, req);

        worker
            .emit(&WireEvent::Completed(CompletedEvent {
                correlation_id: req.correlation_id,
                language: "es".into(),
                translated_text: "hola".into(),
            }))
            .await
            .unwrap();
        let frame = inbound.recv().await.unwrap();
        match decode_event(&frame).unwrap() {
            WireEvent::Completed(e) => assert_eq!(e.translated_text, "hola"),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn send_fails_when_full_or_closed() {
        let (transport, _inbound, mut worker) = MemoryTransport::channel(1);
        transport.send(&request()).unwrap();
        assert!(matches!(transport.send(&request()), Err(TransportError::Full)));

        worker.close_requests();
        assert!(matches!(
            transport.send(&request()),
            Err(TransportError::Closed)
        ));
    }
}
