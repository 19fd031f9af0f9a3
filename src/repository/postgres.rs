// src/repository/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::{ExamRepository, NewQuestionSet, StoredSession};
use crate::{
    error::AppError,
    exam::{
        AssignedSets, Candidate, ExamError, ExamSession, ExamStatus, FinalResult, ModuleId,
        ModuleResult, ModuleScore, Violation,
    },
    models::{exam_code::ExamCode, question_set::QuestionSet, session::ClientInfo, user::User},
};

const EXAM_CODE_COLUMNS: &str = "code, candidate_name, contact_phone, national_id, \
     listening_set, reading_set, writing_set, user_id, is_active, created_at";

const SESSION_COLUMNS: &str = "id, exam_code, candidate_name, contact_phone, national_id, \
     listening_set, reading_set, writing_set, status, violation_count, ip, fingerprint, \
     started_at, overall_band, listening_band, reading_band, writing_band, total_score, \
     total_possible, submitted_at";

const QUESTION_SET_COLUMNS: &str =
    "id, module, set_number, title, content, audio_url, is_active, created_at";

/// Row of the 'exam_sessions' table.
#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    exam_code: String,
    candidate_name: String,
    contact_phone: String,
    national_id: String,
    listening_set: i32,
    reading_set: i32,
    writing_set: i32,
    status: String,
    violation_count: i32,
    ip: Option<String>,
    fingerprint: Option<String>,
    started_at: DateTime<Utc>,
    overall_band: Option<f64>,
    listening_band: Option<f64>,
    reading_band: Option<f64>,
    writing_band: Option<f64>,
    total_score: Option<i32>,
    total_possible: Option<i32>,
    submitted_at: Option<DateTime<Utc>>,
}

/// Row of the 'module_results' table.
#[derive(Debug, FromRow)]
struct ModuleResultRow {
    module: String,
    raw_score: Option<i32>,
    total_possible: Option<i32>,
    task1_words: Option<i32>,
    task2_words: Option<i32>,
    band_score: f64,
    completed_at: DateTime<Utc>,
}

fn corrupt(what: impl std::fmt::Display) -> AppError {
    AppError::InternalServerError(format!("corrupt exam data: {}", what))
}

fn to_u32(value: i32, field: &str) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| corrupt(format!("negative {}", field)))
}

/// Score data is checked before it reaches an INT column.
fn to_i32(value: u32, field: &str) -> Result<i32, AppError> {
    i32::try_from(value).map_err(|_| {
        AppError::from(ExamError::MalformedScoreData(format!(
            "{} {} is out of range",
            field, value
        )))
    })
}

impl ModuleResultRow {
    fn into_result(self) -> Result<ModuleResult, AppError> {
        let module: ModuleId = self.module.parse().map_err(corrupt)?;
        let score = match (
            self.raw_score,
            self.total_possible,
            self.task1_words,
            self.task2_words,
        ) {
            (Some(raw), Some(total), _, _) => ModuleScore::Objective {
                raw_score: to_u32(raw, "raw_score")?,
                total_possible: to_u32(total, "total_possible")?,
            },
            (_, _, Some(t1), Some(t2)) => ModuleScore::Writing {
                task1_words: to_u32(t1, "task1_words")?,
                task2_words: to_u32(t2, "task2_words")?,
            },
            _ => return Err(corrupt(format!("{} result has no score", module))),
        };
        Ok(ModuleResult {
            module,
            score,
            band_score: self.band_score,
            completed_at: self.completed_at,
        })
    }
}

impl SessionRow {
    fn into_stored(self, results: Vec<ModuleResult>) -> Result<StoredSession, AppError> {
        let status: ExamStatus = self.status.parse().map_err(corrupt)?;
        let base = ExamSession::new(
            self.id,
            self.exam_code,
            Candidate {
                name: self.candidate_name,
                contact_phone: self.contact_phone,
                national_id: self.national_id,
            },
            AssignedSets {
                listening: self.listening_set,
                reading: self.reading_set,
                writing: self.writing_set,
            },
            self.started_at,
        );
        let session = ExamSession::from_parts(
            base,
            results,
            status,
            to_u32(self.violation_count, "violation_count")?,
        );

        let final_result = match (
            self.overall_band,
            self.listening_band,
            self.reading_band,
            self.writing_band,
            self.submitted_at,
        ) {
            (Some(overall), Some(l), Some(r), Some(w), Some(at)) => Some(FinalResult {
                overall_band: overall,
                listening_band: l,
                reading_band: r,
                writing_band: w,
                total_score: to_u32(self.total_score.unwrap_or(0), "total_score")?,
                total_possible: to_u32(self.total_possible.unwrap_or(0), "total_possible")?,
                submitted_at: at,
            }),
            _ => None,
        };

        Ok(StoredSession {
            session,
            ip: self.ip,
            fingerprint: self.fingerprint,
            final_result,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Postgres-backed repository.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_results(&self, session_id: &str) -> Result<Vec<ModuleResult>, AppError> {
        let rows = sqlx::query_as::<_, ModuleResultRow>(
            r#"
            SELECT module, raw_score, total_possible, task1_words, task2_words,
                   band_score, completed_at
            FROM module_results
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ModuleResultRow::into_result).collect()
    }

    async fn load_session(&self, row: Option<SessionRow>) -> Result<Option<StoredSession>, AppError> {
        match row {
            Some(row) => {
                let results = self.load_results(&row.id).await?;
                row.into_stored(results).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ExamRepository for PgRepository {
    async fn find_exam_code(&self, code: &str) -> Result<Option<ExamCode>, AppError> {
        let code = sqlx::query_as::<_, ExamCode>(&format!(
            "SELECT {} FROM exam_codes WHERE code = $1",
            EXAM_CODE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn insert_exam_code(&self, code: ExamCode) -> Result<ExamCode, AppError> {
        sqlx::query_as::<_, ExamCode>(&format!(
            r#"
            INSERT INTO exam_codes (code, candidate_name, contact_phone, national_id,
                                    listening_set, reading_set, writing_set, user_id, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            EXAM_CODE_COLUMNS
        ))
        .bind(&code.code)
        .bind(&code.candidate_name)
        .bind(&code.contact_phone)
        .bind(&code.national_id)
        .bind(code.listening_set)
        .bind(code.reading_set)
        .bind(code.writing_set)
        .bind(code.user_id)
        .bind(code.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Exam code '{}' already exists", code.code))
            } else {
                tracing::error!("Failed to insert exam code: {:?}", e);
                AppError::from(e)
            }
        })
    }

    async fn exam_codes_for_user(&self, user_id: i64) -> Result<Vec<ExamCode>, AppError> {
        let codes = sqlx::query_as::<_, ExamCode>(&format!(
            "SELECT {} FROM exam_codes WHERE user_id = $1 ORDER BY created_at DESC",
            EXAM_CODE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<StoredSession>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        self.load_session(row).await
    }

    async fn find_session_by_code(&self, code: &str) -> Result<Option<StoredSession>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE exam_code = $1",
            SESSION_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        self.load_session(row).await
    }

    async fn insert_session(&self, session: &ExamSession, client: &ClientInfo) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO exam_sessions (id, exam_code, candidate_name, contact_phone, national_id,
                                       listening_set, reading_set, writing_set, status,
                                       violation_count, ip, fingerprint, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11, $12)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.exam_id)
        .bind(&session.candidate.name)
        .bind(&session.candidate.contact_phone)
        .bind(&session.candidate.national_id)
        .bind(session.assigned_sets.listening)
        .bind(session.assigned_sets.reading)
        .bind(session.assigned_sets.writing)
        .bind(session.status().as_str())
        .bind(&client.ip)
        .bind(&client.fingerprint)
        .bind(session.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "Exam code '{}' already has a session",
                    session.exam_id
                ))
            } else {
                tracing::error!("Failed to insert exam session: {:?}", e);
                AppError::from(e)
            }
        })?;
        Ok(())
    }

    async fn set_status(&self, session_id: &str, status: ExamStatus) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE exam_sessions SET status = $2
            WHERE id = $1 AND status NOT IN ('completed', 'terminated')
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        let changed = updated.rows_affected() == 1;
        if !changed {
            tracing::debug!(session_id, status = %status, "Status left unchanged");
        }
        Ok(changed)
    }

    async fn insert_module_result(
        &self,
        session_id: &str,
        result: &ModuleResult,
    ) -> Result<bool, AppError> {
        let (raw_score, total_possible, task1_words, task2_words) = match result.score {
            ModuleScore::Objective {
                raw_score,
                total_possible,
            } => (
                Some(to_i32(raw_score, "raw_score")?),
                Some(to_i32(total_possible, "total_possible")?),
                None,
                None,
            ),
            ModuleScore::Writing {
                task1_words,
                task2_words,
            } => (
                None,
                None,
                Some(to_i32(task1_words, "task1_words")?),
                Some(to_i32(task2_words, "task2_words")?),
            ),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO module_results (session_id, module, raw_score, total_possible,
                                        task1_words, task2_words, band_score, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id, module) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(result.module.as_str())
        .bind(raw_score)
        .bind(total_possible)
        .bind(task1_words)
        .bind(task2_words)
        .bind(result.band_score)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store {} result: {:?}", result.module, e);
            AppError::from(e)
        })?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn append_violation(&self, session_id: &str, violation: &Violation) -> Result<u32, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO violations (session_id, kind, occurred_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(violation.kind.as_str())
            .bind(violation.timestamp)
            .execute(&mut *tx)
            .await?;

        let (count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE exam_sessions SET violation_count = violation_count + 1
            WHERE id = $1
            RETURNING violation_count
            "#,
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        to_u32(count, "violation_count")
    }

    async fn finalize_session(
        &self,
        session_id: &str,
        result: &FinalResult,
    ) -> Result<(FinalResult, bool), AppError> {
        let written = sqlx::query(
            r#"
            UPDATE exam_sessions
            SET overall_band = $2, listening_band = $3, reading_band = $4, writing_band = $5,
                total_score = $6, total_possible = $7, submitted_at = $8
            WHERE id = $1 AND submitted_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(result.overall_band)
        .bind(result.listening_band)
        .bind(result.reading_band)
        .bind(result.writing_band)
        .bind(to_i32(result.total_score, "total_score")?)
        .bind(to_i32(result.total_possible, "total_possible")?)
        .bind(result.submitted_at)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if written {
            return Ok((result.clone(), true));
        }

        let stored = self
            .find_session(session_id)
            .await?
            .and_then(|s| s.final_result)
            .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))?;
        Ok((stored, false))
    }

    async fn find_question_set(&self, id: i64) -> Result<Option<QuestionSet>, AppError> {
        let set = sqlx::query_as::<_, QuestionSet>(&format!(
            "SELECT {} FROM question_sets WHERE id = $1",
            QUESTION_SET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(set)
    }

    async fn insert_question_set(&self, set: NewQuestionSet) -> Result<QuestionSet, AppError> {
        sqlx::query_as::<_, QuestionSet>(&format!(
            r#"
            INSERT INTO question_sets (module, set_number, title, content, audio_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            QUESTION_SET_COLUMNS
        ))
        .bind(&set.module)
        .bind(set.set_number)
        .bind(&set.title)
        .bind(&set.content)
        .bind(&set.audio_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "{} set {} already exists",
                    set.module, set.set_number
                ))
            } else {
                tracing::error!("Failed to create question set: {:?}", e);
                AppError::from(e)
            }
        })
    }

    async fn toggle_question_set(&self, id: i64) -> Result<Option<QuestionSet>, AppError> {
        let set = sqlx::query_as::<_, QuestionSet>(&format!(
            "UPDATE question_sets SET is_active = NOT is_active WHERE id = $1 RETURNING {}",
            QUESTION_SET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(set)
    }

    async fn create_user(&self, email: &str, password_hash: &str, role: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password, role)
            VALUES ($1, $2, $3)
            RETURNING id, email, password, role, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Email '{}' already exists", email))
            } else {
                tracing::error!("Failed to register user: {:?}", e);
                AppError::from(e)
            }
        })
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password, role, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
