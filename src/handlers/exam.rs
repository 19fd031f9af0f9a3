// src/handlers/exam.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    exam::{
        Completion, ExamError, ExamStatus, ModuleId, ModuleScore, resolver, scoring,
    },
    models::{
        exam_code::VerifyExamRequest,
        session::{
            ClientInfo, CompleteExamRequest, CompleteExamResponse, CompleteModuleResponse,
            SessionSnapshot, StartExamRequest, StartExamResponse,
        },
    },
    repository::{ExamRepository, StoredSession},
    utils::jwt::{SessionClaims, sign_session_token},
};

/// Loads the session a token points at.
pub(crate) async fn load_session(
    repo: &dyn ExamRepository,
    session_id: &str,
) -> Result<StoredSession, AppError> {
    repo.find_session(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
}

pub(crate) fn snapshot(stored: &StoredSession) -> SessionSnapshot {
    SessionSnapshot::new(&stored.session, stored.final_result.clone())
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Checks an exam code for the confirmation step. Never starts a session.
pub async fn verify_exam(
    State(repo): State<Arc<dyn ExamRepository>>,
    Json(payload): Json<VerifyExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let resolution = resolver::resolve_exam_code(repo.as_ref(), &payload.code).await?;
    if !resolution.valid {
        tracing::info!(code = %payload.code.trim(), "Exam code did not resolve");
    }
    Ok(Json(resolution))
}

/// Starts the exam for a confirmed candidate, or resumes it from the same browser.
///
/// Returns 201 for a new session, 200 for a resumed one.
pub async fn start_exam(
    State(repo): State<Arc<dyn ExamRepository>>,
    State(config): State<Config>,
    headers: HeaderMap,
    Json(payload): Json<StartExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let client = ClientInfo {
        ip: client_ip(&headers),
        fingerprint: payload.fingerprint.clone(),
    };

    let (stored, resumed) = resolver::start_session(
        repo.as_ref(),
        &payload.code,
        payload.candidate.into(),
        &client,
        Utc::now(),
    )
    .await?;

    let token = sign_session_token(
        &stored.session.session_id,
        &stored.session.exam_id,
        stored.fingerprint.as_deref(),
        &config.jwt_secret,
        config.session_token_ttl,
    )?;

    let status = if resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(StartExamResponse {
            token,
            resumed,
            session: snapshot(&stored),
        }),
    ))
}

/// Current session state, used to restore the candidate after a reload.
pub async fn get_session(
    State(repo): State<Arc<dyn ExamRepository>>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, AppError> {
    let stored = load_session(repo.as_ref(), &claims.sub).await?;
    Ok(Json(snapshot(&stored)))
}

/// Enters a module. Only the next module in order can be entered.
pub async fn enter_module(
    State(repo): State<Arc<dyn ExamRepository>>,
    Extension(claims): Extension<SessionClaims>,
    Path(module): Path<ModuleId>,
) -> Result<impl IntoResponse, AppError> {
    let mut stored = load_session(repo.as_ref(), &claims.sub).await?;
    let before = stored.session.status();

    stored.session.enter_module(module)?;

    if before != stored.session.status() {
        repo.set_status(&claims.sub, stored.session.status()).await?;
    }
    tracing::info!(session_id = %claims.sub, module = %module, "Module entered");

    Ok(Json(snapshot(&stored)))
}

/// Records the result of a finished module.
///
/// Bands are always computed here from the raw score data. A module that is
/// already recorded is acknowledged with `recorded: false` and left unchanged,
/// so a client retrying a lost response cannot double-count.
pub async fn complete_module(
    State(repo): State<Arc<dyn ExamRepository>>,
    Extension(claims): Extension<SessionClaims>,
    Path(module): Path<ModuleId>,
    Json(score): Json<ModuleScore>,
) -> Result<impl IntoResponse, AppError> {
    let mut stored = load_session(repo.as_ref(), &claims.sub).await?;

    if stored.session.is_completed(module) {
        tracing::info!(session_id = %claims.sub, module = %module, "Module already recorded");
        return Ok(Json(CompleteModuleResponse {
            recorded: false,
            session: snapshot(&stored),
        }));
    }

    let result = scoring::score_module(module, score, Utc::now())?;

    let recorded = match stored.session.complete_module(module, result.clone())? {
        Completion::AlreadyRecorded => false,
        Completion::Recorded { next } => {
            // a concurrent request may have won the write
            let written = repo.insert_module_result(&claims.sub, &result).await?;
            if written && next.is_none() {
                repo.set_status(&claims.sub, ExamStatus::Completed).await?;
            }
            written
        }
    };

    if recorded {
        tracing::info!(
            session_id = %claims.sub,
            module = %module,
            band = result.band_score,
            "Module completed"
        );
    }

    let stored = load_session(repo.as_ref(), &claims.sub).await?;
    Ok(Json(CompleteModuleResponse {
        recorded,
        session: snapshot(&stored),
    }))
}

/// Aggregates the three module results into the final record, once.
///
/// Repeated calls return the record written by the first one.
pub async fn complete_exam(
    State(repo): State<Arc<dyn ExamRepository>>,
    Extension(claims): Extension<SessionClaims>,
    Json(payload): Json<CompleteExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let stored = load_session(repo.as_ref(), &claims.sub).await?;

    if let Some(result) = stored.final_result {
        return Ok(Json(CompleteExamResponse {
            result,
            already_submitted: true,
        }));
    }

    if stored.session.status() == ExamStatus::Terminated {
        return Err(ExamError::TerminationTriggered {
            violations: stored.session.violation_count(),
        }
        .into());
    }

    let aggregate = scoring::aggregate(stored.session.scores())?;

    if let Some(claimed) = payload.overall_band {
        if (claimed - aggregate.overall_band).abs() > f64::EPSILON {
            tracing::warn!(
                session_id = %claims.sub,
                claimed,
                computed = aggregate.overall_band,
                "Client overall band differs from stored results"
            );
        }
    }

    let (result, written) = repo
        .finalize_session(&claims.sub, &aggregate.into_final(Utc::now()))
        .await?;
    if written {
        tracing::info!(
            session_id = %claims.sub,
            overall_band = result.overall_band,
            "Exam submitted"
        );
    }

    Ok(Json(CompleteExamResponse {
        result,
        already_submitted: !written,
    }))
}
