// src/exam/resolver.rs

//! Session identity resolution: exam code -> candidate -> session.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{code::normalize_exam_code, error::ExamError, model::Candidate, session::ExamSession};
use crate::{
    error::AppError,
    models::{
        exam_code::{ExamCode, Resolution},
        session::ClientInfo,
    },
    repository::{ExamRepository, StoredSession},
};

async fn active_code(repo: &dyn ExamRepository, raw: &str) -> Result<ExamCode, AppError> {
    let code = normalize_exam_code(raw)?;
    match repo.find_exam_code(&code).await? {
        Some(found) if found.is_active => Ok(found),
        _ => Err(ExamError::InvalidCode(code).into()),
    }
}

/// Checks an exam code and returns what the confirmation step needs.
///
/// Never creates a session. Unknown codes are a normal negative answer,
/// storage failures are errors.
pub async fn resolve_exam_code(repo: &dyn ExamRepository, raw: &str) -> Result<Resolution, AppError> {
    match active_code(repo, raw).await {
        Ok(code) => Ok(Resolution {
            valid: true,
            candidate: Some(code.summary()),
            error: None,
        }),
        Err(AppError::NotFound(msg)) => Ok(Resolution {
            valid: false,
            candidate: None,
            error: Some(msg),
        }),
        Err(e) => Err(e),
    }
}

/// An open session can be picked up again from the browser that started it,
/// by the same candidate.
fn is_resumable(stored: &StoredSession, candidate: &Candidate, client: &ClientInfo) -> bool {
    !stored.session.status().is_terminal()
        && stored.fingerprint.as_deref() == Some(client.fingerprint.as_str())
        && stored.session.candidate.national_id == candidate.national_id
}

fn resume_or_reject(
    stored: StoredSession,
    candidate: &Candidate,
    client: &ClientInfo,
) -> Result<(StoredSession, bool), AppError> {
    if is_resumable(&stored, candidate, client) {
        tracing::info!(
            session_id = %stored.session.session_id,
            exam_id = %stored.session.exam_id,
            "Resuming exam session"
        );
        return Ok((stored, true));
    }
    tracing::warn!(
        exam_id = %stored.session.exam_id,
        status = %stored.session.status(),
        "Rejected start for a code with an existing session"
    );
    Err(ExamError::AlreadyActive(stored.session.exam_id).into())
}

/// Starts, or resumes, the session for an exam code.
///
/// This is the only place assigned question sets are bound to a session.
/// Returns the stored session and whether it was resumed.
pub async fn start_session(
    repo: &dyn ExamRepository,
    raw_code: &str,
    candidate: Candidate,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> Result<(StoredSession, bool), AppError> {
    let code = active_code(repo, raw_code).await?;

    if let Some(registered) = code.national_id.as_deref() {
        if registered != candidate.national_id {
            return Err(AppError::BadRequest(
                "Candidate details do not match the booking".to_string(),
            ));
        }
    }

    if let Some(stored) = repo.find_session_by_code(&code.code).await? {
        return resume_or_reject(stored, &candidate, client);
    }

    let session = ExamSession::new(
        Uuid::new_v4().to_string(),
        code.code.clone(),
        candidate.clone(),
        code.assigned_sets(),
        now,
    );

    match repo.insert_session(&session, client).await {
        Ok(()) => {
            tracing::info!(
                session_id = %session.session_id,
                exam_id = %session.exam_id,
                "Exam session started"
            );
            Ok((
                StoredSession {
                    session,
                    ip: client.ip.clone(),
                    fingerprint: Some(client.fingerprint.clone()),
                    final_result: None,
                },
                false,
            ))
        }
        // another request created it first
        Err(AppError::Conflict(_)) => match repo.find_session_by_code(&code.code).await? {
            Some(stored) => resume_or_reject(stored, &candidate, client),
            None => Err(ExamError::PersistenceFailure("session vanished".to_string()).into()),
        },
        Err(e) => Err(e),
    }
}
