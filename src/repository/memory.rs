// src/repository/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ExamRepository, NewQuestionSet, StoredSession};
use crate::{
    error::AppError,
    exam::{ExamSession, ExamStatus, FinalResult, ModuleResult, Violation},
    models::{exam_code::ExamCode, question_set::QuestionSet, session::ClientInfo, user::User},
};

#[derive(Debug, Default)]
struct Tables {
    exam_codes: HashMap<String, ExamCode>,
    /// session id -> session
    sessions: HashMap<String, StoredSession>,
    /// exam code -> session id
    sessions_by_code: HashMap<String, String>,
    violations: HashMap<String, Vec<Violation>>,
    question_sets: HashMap<i64, QuestionSet>,
    users: HashMap<i64, User>,
    next_question_set_id: i64,
    next_user_id: i64,
}

/// Repository kept in process memory, used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Violation log of a session, oldest first.
    pub async fn violations(&self, session_id: &str) -> Vec<Violation> {
        self.tables
            .read()
            .await
            .violations
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn missing_session(session_id: &str) -> AppError {
    AppError::NotFound(format!("Session '{}' not found", session_id))
}

#[async_trait]
impl ExamRepository for MemoryRepository {
    async fn find_exam_code(&self, code: &str) -> Result<Option<ExamCode>, AppError> {
        Ok(self.tables.read().await.exam_codes.get(code).cloned())
    }

    async fn insert_exam_code(&self, mut code: ExamCode) -> Result<ExamCode, AppError> {
        let mut tables = self.tables.write().await;
        if tables.exam_codes.contains_key(&code.code) {
            return Err(AppError::Conflict(format!(
                "Exam code '{}' already exists",
                code.code
            )));
        }
        code.created_at.get_or_insert_with(Utc::now);
        tables.exam_codes.insert(code.code.clone(), code.clone());
        Ok(code)
    }

    async fn exam_codes_for_user(&self, user_id: i64) -> Result<Vec<ExamCode>, AppError> {
        let tables = self.tables.read().await;
        let mut codes: Vec<ExamCode> = tables
            .exam_codes
            .values()
            .filter(|c| c.user_id == Some(user_id))
            .cloned()
            .collect();
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<StoredSession>, AppError> {
        Ok(self.tables.read().await.sessions.get(session_id).cloned())
    }

    async fn find_session_by_code(&self, code: &str) -> Result<Option<StoredSession>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions_by_code
            .get(code)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn insert_session(&self, session: &ExamSession, client: &ClientInfo) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        if tables.sessions_by_code.contains_key(&session.exam_id) {
            return Err(AppError::Conflict(format!(
                "Exam code '{}' already has a session",
                session.exam_id
            )));
        }
        tables
            .sessions_by_code
            .insert(session.exam_id.clone(), session.session_id.clone());
        tables.sessions.insert(
            session.session_id.clone(),
            StoredSession {
                session: session.clone(),
                ip: client.ip.clone(),
                fingerprint: Some(client.fingerprint.clone()),
                final_result: None,
            },
        );
        Ok(())
    }

    async fn set_status(&self, session_id: &str, status: ExamStatus) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| missing_session(session_id))?;
        let s = &stored.session;
        if s.status().is_terminal() {
            return Ok(false);
        }
        stored.session = ExamSession::from_parts(
            s.clone(),
            s.scores().values().cloned().collect::<Vec<_>>(),
            status,
            s.violation_count(),
        );
        Ok(true)
    }

    async fn insert_module_result(
        &self,
        session_id: &str,
        result: &ModuleResult,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| missing_session(session_id))?;
        let s = &stored.session;
        if s.is_completed(result.module) {
            return Ok(false);
        }
        let mut scores: Vec<ModuleResult> = s.scores().values().cloned().collect();
        scores.push(result.clone());
        stored.session = ExamSession::from_parts(s.clone(), scores, s.status(), s.violation_count());
        Ok(true)
    }

    async fn append_violation(&self, session_id: &str, violation: &Violation) -> Result<u32, AppError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| missing_session(session_id))?;
        let s = &stored.session;
        let count = s.violation_count() + 1;
        let scores: Vec<ModuleResult> = s.scores().values().cloned().collect();
        stored.session = ExamSession::from_parts(s.clone(), scores, s.status(), count);
        tables
            .violations
            .entry(session_id.to_string())
            .or_default()
            .push(violation.clone());
        Ok(count)
    }

    async fn finalize_session(
        &self,
        session_id: &str,
        result: &FinalResult,
    ) -> Result<(FinalResult, bool), AppError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| missing_session(session_id))?;
        match &stored.final_result {
            Some(existing) => Ok((existing.clone(), false)),
            None => {
                stored.final_result = Some(result.clone());
                Ok((result.clone(), true))
            }
        }
    }

    async fn find_question_set(&self, id: i64) -> Result<Option<QuestionSet>, AppError> {
        Ok(self.tables.read().await.question_sets.get(&id).cloned())
    }

    async fn insert_question_set(&self, set: NewQuestionSet) -> Result<QuestionSet, AppError> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .question_sets
            .values()
            .any(|q| q.module == set.module && q.set_number == set.set_number);
        if taken {
            return Err(AppError::Conflict(format!(
                "{} set {} already exists",
                set.module, set.set_number
            )));
        }
        tables.next_question_set_id += 1;
        let question_set = QuestionSet {
            id: tables.next_question_set_id,
            module: set.module,
            set_number: set.set_number,
            title: set.title,
            content: set.content,
            audio_url: set.audio_url,
            is_active: true,
            created_at: Some(Utc::now()),
        };
        tables
            .question_sets
            .insert(question_set.id, question_set.clone());
        Ok(question_set)
    }

    async fn toggle_question_set(&self, id: i64) -> Result<Option<QuestionSet>, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.question_sets.get_mut(&id).map(|q| {
            q.is_active = !q.is_active;
            q.clone()
        }))
    }

    async fn create_user(&self, email: &str, password_hash: &str, role: &str) -> Result<User, AppError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.email == email) {
            return Err(AppError::Conflict(format!("Email '{}' already exists", email)));
        }
        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            email: email.to_string(),
            password: password_hash.to_string(),
            role: role.to_string(),
            created_at: Some(Utc::now()),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::{AssignedSets, Candidate, ModuleId, ModuleScore, ViolationKind, scoring};

    fn session() -> ExamSession {
        ExamSession::new(
            "s-1".to_string(),
            "BAC2500123".to_string(),
            Candidate {
                name: "A".to_string(),
                contact_phone: "0912000000".to_string(),
                national_id: "1234".to_string(),
            },
            AssignedSets {
                listening: 1,
                reading: 1,
                writing: 1,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn module_results_are_write_once() {
        let repo = MemoryRepository::new();
        repo.insert_session(&session(), &ClientInfo::default()).await.unwrap();

        let mut result = scoring::score_module(
            ModuleId::Listening,
            ModuleScore::Objective {
                raw_score: 30,
                total_possible: 40,
            },
            Utc::now(),
        )
        .unwrap();
        assert!(repo.insert_module_result("s-1", &result).await.unwrap());

        result.band_score = 9.0;
        assert!(!repo.insert_module_result("s-1", &result).await.unwrap());

        let stored = repo.find_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored.session.scores()[&ModuleId::Listening].band_score, 7.0);
        assert_eq!(stored.session.status(), ExamStatus::InProgress);
    }

    #[tokio::test]
    async fn one_session_per_code() {
        let repo = MemoryRepository::new();
        repo.insert_session(&session(), &ClientInfo::default()).await.unwrap();
        let mut other = session();
        other.session_id = "s-2".to_string();
        assert!(matches!(
            repo.insert_session(&other, &ClientInfo::default()).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn violations_accumulate() {
        let repo = MemoryRepository::new();
        repo.insert_session(&session(), &ClientInfo::default()).await.unwrap();
        let v = Violation {
            kind: ViolationKind::TabSwitch,
            timestamp: Utc::now(),
        };
        assert_eq!(repo.append_violation("s-1", &v).await.unwrap(), 1);
        assert_eq!(repo.append_violation("s-1", &v).await.unwrap(), 2);
        assert_eq!(repo.violations("s-1").await.len(), 2);
    }

    #[tokio::test]
    async fn closed_sessions_keep_their_status() {
        let repo = MemoryRepository::new();
        repo.insert_session(&session(), &ClientInfo::default()).await.unwrap();

        assert!(repo.set_status("s-1", ExamStatus::Completed).await.unwrap());
        // a late violation report must not flip a finished exam
        assert!(!repo.set_status("s-1", ExamStatus::Terminated).await.unwrap());
        let stored = repo.find_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored.session.status(), ExamStatus::Completed);

        let mut other = session();
        other.session_id = "s-2".to_string();
        other.exam_id = "BAC2500124".to_string();
        repo.insert_session(&other, &ClientInfo::default()).await.unwrap();
        assert!(repo.set_status("s-2", ExamStatus::Terminated).await.unwrap());
        assert!(!repo.set_status("s-2", ExamStatus::Completed).await.unwrap());
    }
}
