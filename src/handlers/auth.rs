// src/handlers/auth.rs

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::user::{LoginRequest, LoginResponse, RegisterRequest},
    repository::ExamRepository,
    utils::{
        hash::{hash_password, verify_password},
        jwt::sign_jwt,
    },
};

/// Registers a new candidate account.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created and the user object (excluding password).
pub async fn register(
    State(repo): State<Arc<dyn ExamRepository>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let email = payload.email.trim().to_lowercase();
    let hashed_password = hash_password(&payload.password)?;

    let user = repo
        .create_user(&email, &hashed_password, "candidate")
        .await
        .inspect_err(|e| {
            if !matches!(e, AppError::Conflict(_)) {
                tracing::error!("Failed to register user: {:?}", e);
            }
        })?;

    tracing::info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Authenticates a user and returns a JWT token.
///
/// Unknown emails and wrong passwords get the same answer.
pub async fn login(
    State(repo): State<Arc<dyn ExamRepository>>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let email = payload.email.trim().to_lowercase();
    let rejected = || AppError::AuthError("Invalid email or password".to_string());

    let user = repo.find_user_by_email(&email).await?.ok_or_else(rejected)?;

    if !verify_password(&payload.password, &user.password)? {
        tracing::warn!(user_id = user.id, "Login with wrong password");
        return Err(rejected());
    }

    let token = sign_jwt(user.id, &user.role, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        role: user.role,
    }))
}
