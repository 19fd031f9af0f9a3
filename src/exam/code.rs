// src/exam/code.rs

use std::sync::LazyLock;

use regex::Regex;

use super::error::ExamError;

static EXAM_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{6,16}$").expect("exam code pattern compiles"));

/// Normalizes a human-entered exam code for lookup.
///
/// Surrounding whitespace is dropped and letters are uppercased before the
/// format check, so `" bac2500123 "` and `"BAC2500123"` resolve to the same code.
pub fn normalize_exam_code(raw: &str) -> Result<String, ExamError> {
    let code = raw.trim().to_uppercase();
    if !EXAM_CODE_RE.is_match(&code) {
        return Err(ExamError::InvalidCode(raw.trim().to_string()));
    }
    Ok(code)
}
