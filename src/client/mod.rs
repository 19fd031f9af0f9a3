// src/client/mod.rs

//! Candidate-side core: local store, backend client, proctoring glue,
//! countdowns and the final submission.

pub mod aggregator;
pub mod api;
pub mod error;
pub mod events;
pub mod runner;
pub mod store;
pub mod timer;

#[cfg(test)]
pub(crate) mod fake;

pub use aggregator::{Finalization, ResultAggregator};
pub use api::{ExamApi, HttpExamApi};
pub use error::ClientError;
pub use events::{CompletionBus, ExamEvent};
pub use runner::{ClientConfig, ExamClient};
pub use store::{JsonFileStore, MemoryStore, SessionStore, SessionStoreExt};
