//! Asynchronous translation dispatch core.
//!
//! A [`Dispatcher`] hands translation jobs to a worker pool over a
//! [`Transport`], a single [`EventListener`](listener::EventListener) folds the
//! worker's completion and error events back into the [`JobRegistry`], and a
//! [`Supervisor`](supervisor::Supervisor) retries or times out jobs that go
//! quiet. Each job settles exactly once, and the [`CompletionSink`] sees
//! exactly one call per job no matter how often the transport re-delivers an
//! event.
//!
//! [`DispatchService::start`] wires all of this together once per process.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod listener;
pub mod registry;
pub mod service;
pub mod sink;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use config::DispatchConfig;
pub use dispatcher::{Dispatcher, SubmitOptions, TranslationHandle, TranslationRequest};
pub use error::{DispatchError, ErrorKind, FailureReason, TranslationError, TransportError};
pub use job::{CorrelationId, JobSnapshot, JobStatus, TranslationResults};
pub use registry::{JobRegistry, StatsSnapshot};
pub use service::DispatchService;
pub use sink::{CompletionSink, LoggingSink, RecordingSink};
pub use transport::{Inbound, MemoryTransport, TcpTransport, Transport};
