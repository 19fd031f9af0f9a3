// src/repository/mod.rs

//! Storage behind the exam backend.
//!
//! Handlers only see [`ExamRepository`]; production runs on Postgres and the
//! tests run on the in-memory implementation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::AppError,
    exam::{ExamSession, ExamStatus, FinalResult, ModuleResult, Violation},
    models::{exam_code::ExamCode, question_set::QuestionSet, session::ClientInfo, user::User},
};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// A session as stored, with the backend-only bookkeeping next to it.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub session: ExamSession,
    pub ip: Option<String>,
    pub fingerprint: Option<String>,
    pub final_result: Option<FinalResult>,
}

/// Question-set fields supplied on creation, content already sanitized.
#[derive(Debug, Clone)]
pub struct NewQuestionSet {
    pub module: String,
    pub set_number: i32,
    pub title: String,
    pub content: String,
    pub audio_url: Option<String>,
}

#[async_trait]
pub trait ExamRepository: Send + Sync {
    async fn find_exam_code(&self, code: &str) -> Result<Option<ExamCode>, AppError>;

    /// Fails with `Conflict` when the code exists.
    async fn insert_exam_code(&self, code: ExamCode) -> Result<ExamCode, AppError>;

    async fn exam_codes_for_user(&self, user_id: i64) -> Result<Vec<ExamCode>, AppError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<StoredSession>, AppError>;

    async fn find_session_by_code(&self, code: &str) -> Result<Option<StoredSession>, AppError>;

    /// Fails with `Conflict` when the code already has a session.
    async fn insert_session(&self, session: &ExamSession, client: &ClientInfo) -> Result<(), AppError>;

    /// Moves the session to `status` unless it is already completed or
    /// terminated. Returns whether the status changed.
    async fn set_status(&self, session_id: &str, status: ExamStatus) -> Result<bool, AppError>;

    /// Stores a module result unless one exists; returns whether it was written.
    async fn insert_module_result(
        &self,
        session_id: &str,
        result: &ModuleResult,
    ) -> Result<bool, AppError>;

    /// Appends to the violation log and returns the new session-wide count.
    async fn append_violation(&self, session_id: &str, violation: &Violation) -> Result<u32, AppError>;

    /// Writes the final record unless one exists.
    /// Returns the stored record and whether this call wrote it.
    async fn finalize_session(
        &self,
        session_id: &str,
        result: &FinalResult,
    ) -> Result<(FinalResult, bool), AppError>;

    async fn find_question_set(&self, id: i64) -> Result<Option<QuestionSet>, AppError>;

    async fn insert_question_set(&self, set: NewQuestionSet) -> Result<QuestionSet, AppError>;

    /// Flips `is_active`; `None` when the set does not exist.
    async fn toggle_question_set(&self, id: i64) -> Result<Option<QuestionSet>, AppError>;

    async fn create_user(&self, email: &str, password_hash: &str, role: &str) -> Result<User, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, AppError>;
}
