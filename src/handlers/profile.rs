// src/handlers/profile.rs

use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};

use crate::{
    error::AppError,
    models::user::{ExamCodeStatus, MeResponse},
    repository::ExamRepository,
    utils::jwt::Claims,
};

/// Get current user's profile and the state of their booked exams.
pub async fn get_me(
    State(repo): State<Arc<dyn ExamRepository>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let user = repo
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    let mut exams = Vec::new();
    for code in repo.exam_codes_for_user(user_id).await? {
        let stored = repo.find_session_by_code(&code.code).await?;
        exams.push(ExamCodeStatus {
            code: code.code,
            status: stored.as_ref().map(|s| s.session.status()),
            overall_band: stored
                .and_then(|s| s.final_result)
                .map(|result| result.overall_band),
        });
    }

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        role: user.role,
        created_at: user.created_at,
        exams,
    }))
}
