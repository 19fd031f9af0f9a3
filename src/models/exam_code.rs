// src/models/exam_code.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::exam::AssignedSets;

/// Represents the 'exam_codes' table in the database.
/// A code is issued per booked attempt, before any session exists.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamCode {
    /// Uppercased candidate-facing code.
    pub code: String,

    pub candidate_name: String,
    pub contact_phone: Option<String>,
    pub national_id: Option<String>,

    pub listening_set: i32,
    pub reading_set: i32,
    pub writing_set: i32,

    /// Account the code was booked from, if any.
    pub user_id: Option<i64>,

    /// Deactivated codes no longer resolve.
    pub is_active: bool,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ExamCode {
    pub fn assigned_sets(&self) -> AssignedSets {
        AssignedSets {
            listening: self.listening_set,
            reading: self.reading_set,
            writing: self.writing_set,
        }
    }

    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            exam_id: self.code.clone(),
            name: self.candidate_name.clone(),
            national_id_hint: self.national_id.as_deref().map(mask_tail),
        }
    }
}

/// Only the last four characters are shown.
fn mask_tail(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let keep = chars.len().min(4);
    let hidden = chars.len() - keep;
    let tail: String = chars[hidden..].iter().collect();
    format!("{}{}", "*".repeat(hidden), tail)
}

/// What the confirmation step shows before a session is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub exam_id: String,
    pub name: String,
    pub national_id_hint: Option<String>,
}

/// DTO for an admin issuing a new exam code.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateExamCodeRequest {
    /// Generated when omitted.
    #[validate(length(min = 6, max = 16))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub candidate_name: String,
    #[validate(length(min = 5, max = 20))]
    pub contact_phone: Option<String>,
    #[validate(length(min = 4, max = 20))]
    pub national_id: Option<String>,
    #[validate(range(min = 1))]
    pub listening_set: i32,
    #[validate(range(min = 1))]
    pub reading_set: i32,
    #[validate(range(min = 1))]
    pub writing_set: i32,
    pub user_id: Option<i64>,
}

/// DTO for `POST /api/exam/verify`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifyExamRequest {
    pub code: String,
}

/// Result of resolving an exam code. Never creates a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
