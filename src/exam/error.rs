// src/exam/error.rs

use std::fmt;

use super::model::{ExamStatus, ModuleId};

/// Domain errors raised by the exam-session core.
#[derive(Debug, Clone, PartialEq)]
pub enum ExamError {
    /// The exam code is malformed, unknown or deactivated.
    InvalidCode(String),

    /// A session already exists for this code and cannot be resumed here.
    AlreadyActive(String),

    /// The requested module is not the next one in the fixed order.
    ModuleOutOfOrder {
        requested: ModuleId,
        expected: Option<ModuleId>,
    },

    /// The session reached a terminal status; no further transitions.
    SessionClosed(ExamStatus),

    /// Aggregation was attempted without all three module results.
    IncompleteResults(Vec<ModuleId>),

    /// Score data that cannot be turned into a band.
    MalformedScoreData(String),

    /// A module completion or final submission did not reach storage.
    PersistenceFailure(String),

    /// The violation limit ended the session.
    TerminationTriggered { violations: u32 },

    UnknownModule(String),
}

impl fmt::Display for ExamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamError::InvalidCode(code) => write!(f, "Invalid exam code '{}'", code),
            ExamError::AlreadyActive(code) => {
                write!(f, "A session for exam code '{}' is already active", code)
            }
            ExamError::ModuleOutOfOrder {
                requested,
                expected: Some(expected),
            } => write!(
                f,
                "Module '{}' cannot be taken now, '{}' comes next",
                requested, expected
            ),
            ExamError::ModuleOutOfOrder {
                requested,
                expected: None,
            } => write!(f, "Module '{}' cannot be taken, all modules are done", requested),
            ExamError::SessionClosed(status) => write!(f, "Exam session is {}", status),
            ExamError::IncompleteResults(missing) => {
                let names: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
                write!(f, "Missing module results: {}", names.join(", "))
            }
            ExamError::MalformedScoreData(msg) => write!(f, "Malformed score data: {}", msg),
            ExamError::PersistenceFailure(msg) => write!(f, "Could not save progress: {}", msg),
            ExamError::TerminationTriggered { violations } => write!(
                f,
                "Exam terminated after {} proctoring violations",
                violations
            ),
            ExamError::UnknownModule(name) => write!(f, "Unknown module '{}'", name),
        }
    }
}

impl std::error::Error for ExamError {}
