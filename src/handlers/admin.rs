// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    exam::{ModuleId, code::normalize_exam_code},
    models::{
        exam_code::{CreateExamCodeRequest, ExamCode},
        question_set::CreateQuestionSetRequest,
    },
    repository::{ExamRepository, NewQuestionSet},
    utils::html::sanitize_passage,
};

/// Ten uppercase hex characters, always a well-formed exam code.
fn generate_exam_code() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_uppercase()
}

/// Issues an exam code with its assigned question sets.
/// Admin only.
pub async fn create_exam_code(
    State(repo): State<Arc<dyn ExamRepository>>,
    Json(payload): Json<CreateExamCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let code = match payload.code.as_deref() {
        Some(raw) => normalize_exam_code(raw)
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => generate_exam_code(),
    };

    let created = repo
        .insert_exam_code(ExamCode {
            code,
            candidate_name: payload.candidate_name.trim().to_string(),
            contact_phone: payload.contact_phone,
            national_id: payload.national_id,
            listening_set: payload.listening_set,
            reading_set: payload.reading_set,
            writing_set: payload.writing_set,
            user_id: payload.user_id,
            is_active: true,
            created_at: None,
        })
        .await?;

    tracing::info!(code = %created.code, "Exam code issued");
    Ok((StatusCode::CREATED, Json(created)))
}

/// Creates a question set. Content HTML is sanitized before storage.
/// Admin only.
pub async fn create_question_set(
    State(repo): State<Arc<dyn ExamRepository>>,
    Json(payload): Json<CreateQuestionSetRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let module: ModuleId = payload.module.parse()?;
    if module == ModuleId::Listening && payload.audio_url.is_none() {
        return Err(AppError::BadRequest(
            "Listening sets need an audio_url".to_string(),
        ));
    }

    let set = repo
        .insert_question_set(NewQuestionSet {
            module: module.as_str().to_string(),
            set_number: payload.set_number,
            title: payload.title.trim().to_string(),
            content: sanitize_passage(&payload.content),
            audio_url: payload.audio_url,
        })
        .await?;

    tracing::info!(id = set.id, module = %set.module, "Question set created");
    Ok((StatusCode::CREATED, Json(set)))
}

/// Activates or deactivates a question set.
/// Admin only.
pub async fn toggle_question_set(
    State(repo): State<Arc<dyn ExamRepository>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let set = repo
        .toggle_question_set(id)
        .await?
        .ok_or(AppError::NotFound(format!("Question set {} not found", id)))?;

    tracing::info!(id, is_active = set.is_active, "Question set toggled");
    Ok(Json(set))
}
