//! Transport channel between the dispatcher and the worker pool.
//!
//! Outbound requests go through [`Transport::send`], which never blocks: a
//! push onto the transport either succeeds immediately or fails with a
//! [`TransportError`]. Inbound frames arrive on a single [`Inbound`] value
//! handed out once by the transport constructor. `Inbound` is neither `Clone`
//! nor constructible outside this module, so the process can hold at most one
//! subscription to the event stream.
//!
//! Frames are JSON objects, one per line, with camelCase field names. Inbound
//! frames stay raw bytes until [`decode_event`], so a frame that is not UTF-8
//! is just another malformed frame.

mod memory;
mod tcp;

pub use memory::{MemoryTransport, WorkerEndpoint};
pub use tcp::TcpTransport;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::job::{CorrelationId, TranslationJob};

/// Request sent to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub correlation_id: CorrelationId,
    pub source_text: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub retry_attempt: u32,
}

impl WireRequest {
    /// Request for the languages of `job` that still lack a result.
    pub fn for_job(job: &TranslationJob) -> Self {
        Self {
            correlation_id: job.id,
            source_text: job.source_text.clone(),
            source_language: job.source_language.clone(),
            target_languages: job.outstanding_languages(),
            retry_attempt: job.retry_count,
        }
    }
}

/// One language translated successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedEvent {
    pub correlation_id: CorrelationId,
    pub language: String,
    pub translated_text: String,
}

/// Worker-side failure, for one language or the whole job when `language` is absent.
///
/// `retry_attempt` echoes the request that failed. When present, errors from
/// an attempt that has already been superseded by a retry are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub error_reason: String,
    #[serde(default)]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
}

/// Inbound event. Success and error frames are told apart by their fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEvent {
    Completed(CompletedEvent),
    Error(ErrorEvent),
}

impl WireEvent {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            WireEvent::Completed(e) => e.correlation_id,
            WireEvent::Error(e) => e.correlation_id,
        }
    }
}

pub fn encode<T: Serialize>(frame: &T) -> Result<String, TransportError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_event(frame: &[u8]) -> Result<WireEvent, TransportError> {
    Ok(serde_json::from_slice(frame)?)
}

pub fn decode_request(frame: &[u8]) -> Result<WireRequest, TransportError> {
    Ok(serde_json::from_slice(frame)?)
}

/// Outbound half of the transport channel.
///
/// Implementations must be safe to call from several tasks at once; the
/// dispatcher, the event listener and the supervisor all send.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: &WireRequest) -> Result<(), TransportError>;
}

/// The one subscription to inbound frames.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Inbound {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Next raw frame, or `None` once the transport has shut down.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
