// src/exam/model.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ExamError;

/// One of the three scored exam parts.
///
/// The derive order of the variants is the fixed module order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleId {
    Listening,
    Reading,
    Writing,
}

impl ModuleId {
    pub const ORDER: [ModuleId; 3] = [ModuleId::Listening, ModuleId::Reading, ModuleId::Writing];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleId::Listening => "listening",
            ModuleId::Reading => "reading",
            ModuleId::Writing => "writing",
        }
    }

    /// The module that follows this one, `None` after writing.
    pub fn next(self) -> Option<ModuleId> {
        match self {
            ModuleId::Listening => Some(ModuleId::Reading),
            ModuleId::Reading => Some(ModuleId::Writing),
            ModuleId::Writing => None,
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleId {
    type Err = ExamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "listening" => Ok(ModuleId::Listening),
            "reading" => Ok(ModuleId::Reading),
            "writing" => Ok(ModuleId::Writing),
            other => Err(ExamError::UnknownModule(other.to_string())),
        }
    }
}

/// Persisted lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    NotStarted,
    InProgress,
    Completed,
    Terminated,
}

impl ExamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamStatus::NotStarted => "not_started",
            ExamStatus::InProgress => "in_progress",
            ExamStatus::Completed => "completed",
            ExamStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExamStatus::Completed | ExamStatus::Terminated)
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ExamStatus::NotStarted),
            "in_progress" => Ok(ExamStatus::InProgress),
            "completed" => Ok(ExamStatus::Completed),
            "terminated" => Ok(ExamStatus::Terminated),
            other => Err(format!("unknown exam status '{}'", other)),
        }
    }
}

/// Candidate identity captured once when the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub contact_phone: String,
    pub national_id: String,
}

/// Question-set numbers bound to a session at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedSets {
    pub listening: i32,
    pub reading: i32,
    pub writing: i32,
}

impl AssignedSets {
    pub fn for_module(&self, module: ModuleId) -> i32 {
        match module {
            ModuleId::Listening => self.listening,
            ModuleId::Reading => self.reading,
            ModuleId::Writing => self.writing,
        }
    }
}

/// Raw outcome of a module before band conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleScore {
    /// Listening and reading: correct answers out of the question count.
    Objective { raw_score: u32, total_possible: u32 },
    /// Writing: word counts of the two tasks.
    Writing { task1_words: u32, task2_words: u32 },
}

/// Write-once result of a completed module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module: ModuleId,
    pub score: ModuleScore,
    pub band_score: f64,
    pub completed_at: DateTime<Utc>,
}

/// Proctoring violation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
    RightClick,
    CopyPaste,
    KeyboardShortcut,
    DevTools,
    Screenshot,
    Print,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::WindowBlur => "window_blur",
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::RightClick => "right_click",
            ViolationKind::CopyPaste => "copy_paste",
            ViolationKind::KeyboardShortcut => "keyboard_shortcut",
            ViolationKind::DevTools => "dev_tools",
            ViolationKind::Screenshot => "screenshot",
            ViolationKind::Print => "print",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tab_switch" => Ok(ViolationKind::TabSwitch),
            "window_blur" => Ok(ViolationKind::WindowBlur),
            "fullscreen_exit" => Ok(ViolationKind::FullscreenExit),
            "right_click" => Ok(ViolationKind::RightClick),
            "copy_paste" => Ok(ViolationKind::CopyPaste),
            "keyboard_shortcut" => Ok(ViolationKind::KeyboardShortcut),
            "dev_tools" => Ok(ViolationKind::DevTools),
            "screenshot" => Ok(ViolationKind::Screenshot),
            "print" => Ok(ViolationKind::Print),
            other => Err(format!("unknown violation kind '{}'", other)),
        }
    }
}

/// Append-only proctoring log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub timestamp: DateTime<Utc>,
}

/// The final exam record, written once by the final submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub overall_band: f64,
    pub listening_band: f64,
    pub reading_band: f64,
    pub writing_band: f64,
    pub total_score: u32,
    pub total_possible: u32,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_order_is_fixed() {
        assert_eq!(ModuleId::Listening.next(), Some(ModuleId::Reading));
        assert_eq!(ModuleId::Reading.next(), Some(ModuleId::Writing));
        assert_eq!(ModuleId::Writing.next(), None);
        assert!(ModuleId::Listening < ModuleId::Writing);
    }

    #[test]
    fn module_parses_case_insensitively() {
        assert_eq!("Reading".parse::<ModuleId>(), Ok(ModuleId::Reading));
        assert!(matches!(
            "speaking".parse::<ModuleId>(),
            Err(ExamError::UnknownModule(_))
        ));
    }

    #[test]
    fn module_score_serializes_with_type_tag() {
        let score = ModuleScore::Writing {
            task1_words: 160,
            task2_words: 270,
        };
        let json = serde_json::to_value(score).unwrap();
        assert_eq!(json["type"], "writing");
        assert_eq!(json["task2_words"], 270);
    }
}
