// src/handlers/question_set.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{error::AppError, repository::ExamRepository};

/// Get a single question set by ID.
/// Inactive sets are hidden from everyone but the admin endpoints.
pub async fn get_question_set(
    State(repo): State<Arc<dyn ExamRepository>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let set = repo
        .find_question_set(id)
        .await?
        .filter(|set| set.is_active)
        .ok_or(AppError::NotFound(format!("Question set {} not found", id)))?;

    Ok(Json(set))
}
