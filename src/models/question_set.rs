// src/models/question_set.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use url::Url;
use validator::Validate;

/// Represents the 'question_sets' table in the database.
/// Content is read-only for the exam core; admins can only add sets and toggle them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionSet {
    pub id: i64,

    /// 'listening', 'reading' or 'writing'.
    pub module: String,

    /// Number referenced by `AssignedSets`.
    pub set_number: i32,

    pub title: String,

    /// Sanitized HTML of passages, prompts and questions.
    pub content: String,

    /// Recording for listening sets.
    pub audio_url: Option<String>,

    pub is_active: bool,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for creating a question set.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateQuestionSetRequest {
    #[validate(length(min = 1, max = 20))]
    pub module: String,
    #[validate(range(min = 1))]
    pub set_number: i32,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 100000))]
    pub content: String,
    #[validate(length(max = 500), custom(function = validate_audio_url))]
    pub audio_url: Option<String>,
}

/// Audio must be served over http(s).
fn validate_audio_url(url: &str) -> Result<(), validator::ValidationError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_audio_url")),
    }
}
