mod model;
mod state;

pub use model::{
    CorrelationId, JobSnapshot, JobStatus, LanguageResult, RetryPolicy, TranslationJob,
    TranslationResults,
};
pub use state::{Ignored, JobEvent, StateMachine, Transition};
