//! Staged apply/validate pipeline.

pub mod executor;
pub mod orchestrator;
pub mod parsers;
pub mod report;
pub mod retry;
pub mod state;
pub mod validator;

pub use orchestrator::{Orchestrator, PipelineSettings};
pub use retry::{Backoff, RetryPolicy};
