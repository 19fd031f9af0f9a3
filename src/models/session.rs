// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::exam::{
    AssignedSets, Candidate, ExamSession, ExamStatus, FinalResult, ModuleId, ModuleResult,
    Phase, ViolationKind,
};

/// Candidate attributes entered on the confirmation step.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CandidateInput {
    #[validate(length(min = 1, max = 100, message = "Name is required."))]
    pub name: String,
    #[validate(length(min = 5, max = 20, message = "Phone number looks invalid."))]
    pub contact_phone: String,
    #[validate(length(min = 4, max = 20, message = "National ID looks invalid."))]
    pub national_id: String,
}

impl From<CandidateInput> for Candidate {
    fn from(input: CandidateInput) -> Self {
        Candidate {
            name: input.name.trim().to_string(),
            contact_phone: input.contact_phone.trim().to_string(),
            national_id: input.national_id.trim().to_string(),
        }
    }
}

/// DTO for `POST /api/exam/start`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StartExamRequest {
    pub code: String,
    #[validate(nested)]
    pub candidate: CandidateInput,
    /// Browser fingerprint; a session can only be resumed from the same one.
    #[validate(length(min = 8, max = 128))]
    pub fingerprint: String,
}

/// Where a start request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub fingerprint: String,
}

/// Session state as sent to the candidate. Enough to rebuild the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub exam_id: String,
    pub candidate: Candidate,
    pub assigned_sets: AssignedSets,
    pub completed_modules: Vec<ModuleId>,
    pub scores: Vec<ModuleResult>,
    pub status: ExamStatus,
    pub phase: Phase,
    pub next_module: Option<ModuleId>,
    pub violation_count: u32,
    pub started_at: DateTime<Utc>,
    pub final_result: Option<FinalResult>,
}

impl SessionSnapshot {
    pub fn new(session: &ExamSession, final_result: Option<FinalResult>) -> Self {
        Self {
            session_id: session.session_id.clone(),
            exam_id: session.exam_id.clone(),
            candidate: session.candidate.clone(),
            assigned_sets: session.assigned_sets,
            completed_modules: session.completed_modules(),
            scores: session.scores().values().cloned().collect(),
            status: session.status(),
            phase: session.phase(),
            next_module: session.resume_target(),
            violation_count: session.violation_count(),
            started_at: session.started_at,
            final_result,
        }
    }

    /// Rebuilds the state machine from the persisted parts only.
    pub fn to_session(&self) -> ExamSession {
        let base = ExamSession::new(
            self.session_id.clone(),
            self.exam_id.clone(),
            self.candidate.clone(),
            self.assigned_sets,
            self.started_at,
        );
        ExamSession::from_parts(
            base,
            self.scores.iter().cloned(),
            self.status,
            self.violation_count,
        )
    }
}

/// Response of `POST /api/exam/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExamResponse {
    /// Bearer token for every `/api/exam/session` call.
    pub token: String,
    /// True when an existing session was picked up again.
    pub resumed: bool,
    pub session: SessionSnapshot,
}

/// Response of a module completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteModuleResponse {
    /// False when the module had already been recorded.
    pub recorded: bool,
    pub session: SessionSnapshot,
}

/// DTO for `POST /api/exam/session/violations`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportViolationRequest {
    pub kind: ViolationKind,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationResponse {
    pub violation_count: u32,
    pub max_violations: u32,
    pub terminated: bool,
}

/// DTO for `POST /api/exam/session/complete`.
///
/// The overall band is recomputed from stored results; the client's own
/// figure is only compared for the audit log.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompleteExamRequest {
    pub overall_band: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteExamResponse {
    pub result: FinalResult,
    /// True when the exam had been submitted before this call.
    pub already_submitted: bool,
}
