// src/exam/session.rs

//! The exam-session state machine.
//!
//! Progress is never cached separately: the current phase is always derived
//! from the persisted status and the set of completed modules, so a session
//! rebuilt after a reload lands exactly where the stored results say it is.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    error::ExamError,
    model::{AssignedSets, Candidate, ExamStatus, ModuleId, ModuleResult},
};

/// Where a session stands, derived from status and completed modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Listening,
    Reading,
    Writing,
    Completed,
    Terminated,
}

impl Phase {
    fn of_module(module: ModuleId) -> Self {
        match module {
            ModuleId::Listening => Phase::Listening,
            ModuleId::Reading => Phase::Reading,
            ModuleId::Writing => Phase::Writing,
        }
    }
}

/// Outcome of [`ExamSession::complete_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The result was stored; `next` is the following module, if any.
    Recorded { next: Option<ModuleId> },
    /// The module was already completed; nothing changed.
    AlreadyRecorded,
}

/// Outcome of [`ExamSession::record_violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationTally {
    pub count: u32,
    /// True only for the violation that crossed the limit.
    pub terminated_now: bool,
}

/// One candidate's attempt at an exam.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamSession {
    pub session_id: String,
    pub exam_id: String,
    pub candidate: Candidate,
    pub assigned_sets: AssignedSets,
    pub started_at: DateTime<Utc>,
    scores: BTreeMap<ModuleId, ModuleResult>,
    status: ExamStatus,
    violation_count: u32,
}

impl ExamSession {
    /// A fresh session with nothing completed.
    pub fn new(
        session_id: String,
        exam_id: String,
        candidate: Candidate,
        assigned_sets: AssignedSets,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            exam_id,
            candidate,
            assigned_sets,
            started_at,
            scores: BTreeMap::new(),
            status: ExamStatus::NotStarted,
            violation_count: 0,
        }
    }

    /// Rebuilds a session from persisted parts.
    ///
    /// The stored status only matters for `terminated` and for telling a
    /// never-entered session apart; everything else follows from `scores`.
    pub fn from_parts(
        mut base: ExamSession,
        scores: impl IntoIterator<Item = ModuleResult>,
        stored_status: ExamStatus,
        violation_count: u32,
    ) -> Self {
        base.scores = scores.into_iter().map(|r| (r.module, r)).collect();
        base.violation_count = violation_count;
        base.status = if stored_status == ExamStatus::Terminated {
            ExamStatus::Terminated
        } else if base.scores.len() == ModuleId::ORDER.len() {
            ExamStatus::Completed
        } else if base.scores.is_empty() && stored_status == ExamStatus::NotStarted {
            ExamStatus::NotStarted
        } else {
            ExamStatus::InProgress
        };
        base
    }

    pub fn status(&self) -> ExamStatus {
        self.status
    }

    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    pub fn scores(&self) -> &BTreeMap<ModuleId, ModuleResult> {
        &self.scores
    }

    /// Completed modules in the fixed module order.
    pub fn completed_modules(&self) -> Vec<ModuleId> {
        self.scores.keys().copied().collect()
    }

    pub fn is_completed(&self, module: ModuleId) -> bool {
        self.scores.contains_key(&module)
    }

    /// First module of the fixed order that is not completed yet.
    pub fn next_module(&self) -> Option<ModuleId> {
        ModuleId::ORDER.into_iter().find(|m| !self.scores.contains_key(m))
    }

    pub fn phase(&self) -> Phase {
        match self.status {
            ExamStatus::Terminated => Phase::Terminated,
            ExamStatus::Completed => Phase::Completed,
            ExamStatus::NotStarted => Phase::NotStarted,
            ExamStatus::InProgress => self
                .next_module()
                .map(Phase::of_module)
                .unwrap_or(Phase::Completed),
        }
    }

    /// The module a resumed candidate should be sent to.
    pub fn resume_target(&self) -> Option<ModuleId> {
        if self.status.is_terminal() {
            return None;
        }
        self.next_module()
    }

    fn ensure_open(&self) -> Result<(), ExamError> {
        if self.status.is_terminal() {
            return Err(ExamError::SessionClosed(self.status));
        }
        Ok(())
    }

    fn ensure_next(&self, module: ModuleId) -> Result<(), ExamError> {
        let expected = self.next_module();
        if expected != Some(module) {
            return Err(ExamError::ModuleOutOfOrder {
                requested: module,
                expected,
            });
        }
        Ok(())
    }

    /// Enters a module. Only the next module of an open session may be entered.
    pub fn enter_module(&mut self, module: ModuleId) -> Result<(), ExamError> {
        self.ensure_open()?;
        self.ensure_next(module)?;
        self.status = ExamStatus::InProgress;
        Ok(())
    }

    /// Records a module result.
    ///
    /// A module that is already completed is left untouched and reported as
    /// [`Completion::AlreadyRecorded`], so retried requests never double-count.
    pub fn complete_module(
        &mut self,
        module: ModuleId,
        result: ModuleResult,
    ) -> Result<Completion, ExamError> {
        if self.scores.contains_key(&module) {
            return Ok(Completion::AlreadyRecorded);
        }
        self.ensure_open()?;
        self.ensure_next(module)?;
        if result.module != module {
            return Err(ExamError::MalformedScoreData(format!(
                "result for '{}' submitted as '{}'",
                result.module, module
            )));
        }

        self.scores.insert(module, result);
        let next = self.next_module();
        self.status = if next.is_none() {
            ExamStatus::Completed
        } else {
            ExamStatus::InProgress
        };
        Ok(Completion::Recorded { next })
    }

    /// Counts one violation and terminates the session when the count
    /// reaches `max_violations`.
    ///
    /// Violations arriving after the session is closed are ignored.
    pub fn record_violation(&mut self, max_violations: u32) -> ViolationTally {
        if self.status.is_terminal() {
            return ViolationTally {
                count: self.violation_count,
                terminated_now: false,
            };
        }
        self.apply_violation_count(self.violation_count + 1, max_violations)
    }

    /// Adopts a counter kept elsewhere (the database increments atomically).
    ///
    /// The count never goes down; a closed session keeps its status.
    pub fn apply_violation_count(&mut self, count: u32, max_violations: u32) -> ViolationTally {
        self.violation_count = self.violation_count.max(count);
        let terminated_now =
            !self.status.is_terminal() && self.violation_count >= max_violations;
        if terminated_now {
            self.status = ExamStatus::Terminated;
        }
        ViolationTally {
            count: self.violation_count,
            terminated_now,
        }
    }

    /// Ends the session. Completed sessions stay completed.
    pub fn terminate(&mut self) -> Result<(), ExamError> {
        if self.status == ExamStatus::Completed {
            return Err(ExamError::SessionClosed(self.status));
        }
        self.status = ExamStatus::Terminated;
        Ok(())
    }
}
