// src/exam/mod.rs

//! Exam-session domain core.
//!
//! Everything in here is free of HTTP and storage concerns except the
//! resolver, which talks to an [`ExamRepository`](crate::repository::ExamRepository).

pub mod annotation;
pub mod code;
pub mod error;
pub mod model;
pub mod proctor;
pub mod resolver;
pub mod scoring;
pub mod session;

pub use error::ExamError;
pub use model::{
    AssignedSets, Candidate, ExamStatus, FinalResult, ModuleId, ModuleResult, ModuleScore,
    Violation, ViolationKind,
};
pub use session::{Completion, ExamSession, Phase};
