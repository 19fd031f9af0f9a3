// src/client/fake.rs

//! In-process stand-in for the backend, for client unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{api::ExamApi, error::ClientError};
use crate::{
    exam::{
        AssignedSets, Candidate, Completion, ExamSession, ModuleId, ModuleScore, ViolationKind,
        scoring,
    },
    models::{
        exam_code::Resolution,
        session::{
            CompleteExamRequest, CompleteExamResponse, CompleteModuleResponse,
            ReportViolationRequest, SessionSnapshot, StartExamRequest, StartExamResponse,
            ViolationResponse,
        },
        user::{LoginResponse, MeResponse},
    },
};

#[derive(Debug, Default)]
pub struct Calls {
    pub complete_module: u32,
    pub complete_exam: u32,
    pub terminate: u32,
    pub violations: Vec<ViolationKind>,
}

#[derive(Debug)]
struct Backend {
    session: Option<ExamSession>,
    final_result: Option<crate::exam::FinalResult>,
    /// Upcoming module submissions that fail with a 503.
    failing_module_calls: u32,
    failing_exam_calls: u32,
    failing_violation_calls: u32,
    failing_terminate_calls: u32,
    calls: Calls,
}

pub struct FakeApi {
    session_id: String,
    backend: Mutex<Backend>,
}

fn unavailable() -> ClientError {
    ClientError::Api {
        status: 503,
        message: "unavailable".to_string(),
    }
}

impl FakeApi {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            backend: Mutex::new(Backend {
                session: None,
                final_result: None,
                failing_module_calls: 0,
                failing_exam_calls: 0,
                failing_violation_calls: 0,
                failing_terminate_calls: 0,
                calls: Calls::default(),
            }),
        }
    }

    pub fn fail_module_calls(&self, n: u32) {
        self.backend.lock().unwrap().failing_module_calls = n;
    }

    pub fn fail_exam_calls(&self, n: u32) {
        self.backend.lock().unwrap().failing_exam_calls = n;
    }

    pub fn fail_violation_calls(&self, n: u32) {
        self.backend.lock().unwrap().failing_violation_calls = n;
    }

    pub fn fail_terminate_calls(&self, n: u32) {
        self.backend.lock().unwrap().failing_terminate_calls = n;
    }

    /// Server-side status, bypassing any snapshot the client holds.
    pub fn status(&self) -> Option<crate::exam::ExamStatus> {
        self.backend.lock().unwrap().session.as_ref().map(|s| s.status())
    }

    pub fn calls<T>(&self, f: impl FnOnce(&Calls) -> T) -> T {
        f(&self.backend.lock().unwrap().calls)
    }

    fn snapshot(backend: &Backend) -> Result<SessionSnapshot, ClientError> {
        let session = backend.session.as_ref().ok_or(ClientError::NoSession)?;
        Ok(SessionSnapshot::new(session, backend.final_result.clone()))
    }
}

#[async_trait]
impl ExamApi for FakeApi {
    async fn verify_exam_id(&self, code: &str) -> Result<Resolution, ClientError> {
        Ok(Resolution {
            valid: !code.is_empty(),
            candidate: None,
            error: None,
        })
    }

    async fn start_exam(&self, request: &StartExamRequest) -> Result<StartExamResponse, ClientError> {
        let mut backend = self.backend.lock().unwrap();
        let resumed = backend.session.is_some();
        if !resumed {
            backend.session = Some(ExamSession::new(
                self.session_id.clone(),
                request.code.to_uppercase(),
                Candidate::from(request.candidate.clone()),
                AssignedSets {
                    listening: 1,
                    reading: 1,
                    writing: 1,
                },
                Utc::now(),
            ));
        }
        Ok(StartExamResponse {
            token: format!("token-{}", self.session_id),
            resumed,
            session: Self::snapshot(&backend)?,
        })
    }

    async fn get_session(&self, _token: &str) -> Result<SessionSnapshot, ClientError> {
        Self::snapshot(&self.backend.lock().unwrap())
    }

    async fn enter_module(&self, _token: &str, module: ModuleId) -> Result<SessionSnapshot, ClientError> {
        let mut backend = self.backend.lock().unwrap();
        let session = backend.session.as_mut().ok_or(ClientError::NoSession)?;
        session.enter_module(module)?;
        Self::snapshot(&backend)
    }

    async fn complete_module(
        &self,
        _token: &str,
        module: ModuleId,
        score: &ModuleScore,
    ) -> Result<CompleteModuleResponse, ClientError> {
        let mut backend = self.backend.lock().unwrap();
        backend.calls.complete_module += 1;
        if backend.failing_module_calls > 0 {
            backend.failing_module_calls -= 1;
            return Err(unavailable());
        }
        let result = scoring::score_module(module, *score, Utc::now())?;
        let session = backend.session.as_mut().ok_or(ClientError::NoSession)?;
        let recorded = matches!(
            session.complete_module(module, result)?,
            Completion::Recorded { .. }
        );
        Ok(CompleteModuleResponse {
            recorded,
            session: Self::snapshot(&backend)?,
        })
    }

    async fn report_violation(
        &self,
        _token: &str,
        request: &ReportViolationRequest,
    ) -> Result<ViolationResponse, ClientError> {
        let mut backend = self.backend.lock().unwrap();
        backend.calls.violations.push(request.kind);
        if backend.failing_violation_calls > 0 {
            backend.failing_violation_calls -= 1;
            return Err(unavailable());
        }
        let session = backend.session.as_mut().ok_or(ClientError::NoSession)?;
        let tally = session.record_violation(3);
        Ok(ViolationResponse {
            violation_count: tally.count,
            max_violations: 3,
            terminated: session.status().is_terminal(),
        })
    }

    async fn terminate_session(&self, _token: &str) -> Result<SessionSnapshot, ClientError> {
        let mut backend = self.backend.lock().unwrap();
        backend.calls.terminate += 1;
        if backend.failing_terminate_calls > 0 {
            backend.failing_terminate_calls -= 1;
            return Err(unavailable());
        }
        let session = backend.session.as_mut().ok_or(ClientError::NoSession)?;
        if !session.status().is_terminal() {
            session.terminate()?;
        }
        Self::snapshot(&backend)
    }

    async fn complete_exam(
        &self,
        _token: &str,
        _request: &CompleteExamRequest,
    ) -> Result<CompleteExamResponse, ClientError> {
        let mut backend = self.backend.lock().unwrap();
        backend.calls.complete_exam += 1;
        if backend.failing_exam_calls > 0 {
            backend.failing_exam_calls -= 1;
            return Err(unavailable());
        }
        if let Some(result) = backend.final_result.clone() {
            return Ok(CompleteExamResponse {
                result,
                already_submitted: true,
            });
        }
        let session = backend.session.as_ref().ok_or(ClientError::NoSession)?;
        let result = scoring::aggregate(session.scores())?.into_final(Utc::now());
        backend.final_result = Some(result.clone());
        Ok(CompleteExamResponse {
            result,
            already_submitted: false,
        })
    }

    async fn login(&self, _email: &str, _password: &str) -> Result<LoginResponse, ClientError> {
        Err(ClientError::Api {
            status: 401,
            message: "not supported".to_string(),
        })
    }

    async fn get_my_profile(&self, _token: &str) -> Result<MeResponse, ClientError> {
        Err(ClientError::Api {
            status: 401,
            message: "not supported".to_string(),
        })
    }
}
