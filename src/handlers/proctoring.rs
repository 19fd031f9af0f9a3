// src/handlers/proctoring.rs

use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;

use crate::{
    config::Config,
    error::AppError,
    exam::{ExamError, ExamStatus, Violation},
    handlers::exam::{load_session, snapshot},
    models::session::{ReportViolationRequest, ViolationResponse},
    repository::ExamRepository,
    utils::jwt::SessionClaims,
};

/// Appends a proctoring violation and terminates the session at the limit.
///
/// The counter lives in storage, so two browser tabs reporting at once still
/// produce one termination. Reports against a closed session are ignored.
pub async fn report_violation(
    State(repo): State<Arc<dyn ExamRepository>>,
    State(config): State<Config>,
    Extension(claims): Extension<SessionClaims>,
    Json(payload): Json<ReportViolationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let max_violations = config.proctoring.max_violations;
    let mut stored = load_session(repo.as_ref(), &claims.sub).await?;

    if stored.session.status().is_terminal() {
        tracing::debug!(
            session_id = %claims.sub,
            kind = %payload.kind,
            "Violation after session closed, ignored"
        );
        return Ok(Json(ViolationResponse {
            violation_count: stored.session.violation_count(),
            max_violations,
            terminated: stored.session.status() == ExamStatus::Terminated,
        }));
    }

    let now = Utc::now();
    let violation = Violation {
        kind: payload.kind,
        // client clocks may run ahead
        timestamp: payload.timestamp.filter(|t| *t <= now).unwrap_or(now),
    };

    let count = repo.append_violation(&claims.sub, &violation).await?;
    let tally = stored.session.apply_violation_count(count, max_violations);

    tracing::warn!(
        session_id = %claims.sub,
        kind = %violation.kind,
        count = tally.count,
        max_violations,
        "Proctoring violation recorded"
    );

    let mut terminated = false;
    if tally.terminated_now {
        // the exam may have been completed since it was loaded
        if repo.set_status(&claims.sub, ExamStatus::Terminated).await? {
            tracing::warn!(session_id = %claims.sub, "Session terminated by proctoring");
            terminated = true;
        } else {
            let current = load_session(repo.as_ref(), &claims.sub).await?;
            terminated = current.session.status() == ExamStatus::Terminated;
            tracing::info!(
                session_id = %claims.sub,
                status = %current.session.status(),
                "Limit reached after the session closed"
            );
        }
    }

    Ok(Json(ViolationResponse {
        violation_count: tally.count,
        max_violations,
        terminated,
    }))
}

/// Ends the session after the candidate's own monitor reached the limit.
///
/// Violation reports can get lost, so the client sends this separately and
/// retries it. Repeating it is harmless; a completed exam stays completed (409).
pub async fn terminate_session(
    State(repo): State<Arc<dyn ExamRepository>>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, AppError> {
    let mut stored = load_session(repo.as_ref(), &claims.sub).await?;

    if stored.session.status() != ExamStatus::Terminated {
        stored.session.terminate()?;
        if repo.set_status(&claims.sub, ExamStatus::Terminated).await? {
            tracing::warn!(
                session_id = %claims.sub,
                violations = stored.session.violation_count(),
                "Session terminated at the candidate's violation limit"
            );
        }
    }

    let stored = load_session(repo.as_ref(), &claims.sub).await?;
    if stored.session.status() == ExamStatus::Completed {
        // completed between the load and the update
        return Err(ExamError::SessionClosed(ExamStatus::Completed).into());
    }
    Ok(Json(snapshot(&stored)))
}
