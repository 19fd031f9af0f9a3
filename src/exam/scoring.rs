// src/exam/scoring.rs

//! Band conversion and result aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    error::ExamError,
    model::{FinalResult, ModuleId, ModuleResult, ModuleScore},
};

pub const MIN_BAND: f64 = 1.0;
pub const MAX_BAND: f64 = 9.0;

/// Question count the conversion tables are written for.
const TABLE_QUESTIONS: u32 = 40;

/// (minimum correct answers out of 40, band), highest first.
const LISTENING_TABLE: &[(u32, f64)] = &[
    (39, 9.0),
    (37, 8.5),
    (35, 8.0),
    (32, 7.5),
    (30, 7.0),
    (26, 6.5),
    (23, 6.0),
    (18, 5.5),
    (16, 5.0),
    (13, 4.5),
    (10, 4.0),
    (8, 3.5),
    (6, 3.0),
    (4, 2.5),
    (2, 2.0),
    (0, 1.0),
];

const READING_TABLE: &[(u32, f64)] = &[
    (39, 9.0),
    (37, 8.5),
    (35, 8.0),
    (33, 7.5),
    (30, 7.0),
    (27, 6.5),
    (23, 6.0),
    (19, 5.5),
    (15, 5.0),
    (13, 4.5),
    (10, 4.0),
    (8, 3.5),
    (6, 3.0),
    (4, 2.5),
    (2, 2.0),
    (0, 1.0),
];

/// Upper bounds on submitted score data.
pub const MAX_QUESTIONS: u32 = 200;
pub const MAX_TASK_WORDS: u32 = 5_000;

pub const TASK1_MIN_WORDS: u32 = 150;
pub const TASK2_MIN_WORDS: u32 = 250;

/// Highest band a script can get from word counts alone.
pub const WRITING_ESTIMATE_CEILING: f64 = 7.0;

/// Rounds to the nearest half band (ties go up) and clamps to [1.0, 9.0].
///
/// Non-finite input falls back to the lowest band.
pub fn quantize_band(value: f64) -> f64 {
    if !value.is_finite() {
        return MIN_BAND;
    }
    let halves = (value * 2.0 + 0.5).floor();
    (halves / 2.0).clamp(MIN_BAND, MAX_BAND)
}

/// Text shown for a band, `"—"` when the value is missing or unusable.
pub fn display_band(band: Option<f64>) -> String {
    match band {
        Some(b) if b.is_finite() => format!("{:.1}", quantize_band(b)),
        _ => "—".to_string(),
    }
}

/// Converts listening/reading correct answers to a band.
///
/// Tests with a question count other than 40 are scaled onto the 40-question table.
pub fn objective_band(module: ModuleId, raw_score: u32, total_possible: u32) -> Result<f64, ExamError> {
    let table = match module {
        ModuleId::Listening => LISTENING_TABLE,
        ModuleId::Reading => READING_TABLE,
        ModuleId::Writing => {
            return Err(ExamError::MalformedScoreData(
                "writing is not scored by correct answers".to_string(),
            ));
        }
    };
    if total_possible == 0 || total_possible > MAX_QUESTIONS {
        return Err(ExamError::MalformedScoreData(format!(
            "{} cannot have {} questions",
            module, total_possible
        )));
    }
    if raw_score > total_possible {
        return Err(ExamError::MalformedScoreData(format!(
            "{} score {} exceeds {}",
            module, raw_score, total_possible
        )));
    }

    let scaled = (u64::from(raw_score) * u64::from(TABLE_QUESTIONS) * 2 + u64::from(total_possible))
        / (2 * u64::from(total_possible));

    let band = table
        .iter()
        .find(|(min, _)| scaled >= u64::from(*min))
        .map(|(_, band)| *band)
        .unwrap_or(MIN_BAND);
    Ok(band)
}

/// Estimates a writing band from task word counts.
///
/// Each task counts by the share of its minimum length reached; task 2 weighs
/// twice as much as task 1.
pub fn writing_band(task1_words: u32, task2_words: u32) -> f64 {
    let r1 = (f64::from(task1_words) / f64::from(TASK1_MIN_WORDS)).min(1.0);
    let r2 = (f64::from(task2_words) / f64::from(TASK2_MIN_WORDS)).min(1.0);
    let weighted = (r1 + 2.0 * r2) / 3.0;
    quantize_band(MIN_BAND + weighted * (WRITING_ESTIMATE_CEILING - MIN_BAND))
}

/// Turns a raw module score into its write-once result.
pub fn score_module(
    module: ModuleId,
    score: ModuleScore,
    completed_at: DateTime<Utc>,
) -> Result<ModuleResult, ExamError> {
    let band_score = match (module, score) {
        (
            ModuleId::Listening | ModuleId::Reading,
            ModuleScore::Objective {
                raw_score,
                total_possible,
            },
        ) => objective_band(module, raw_score, total_possible)?,
        (
            ModuleId::Writing,
            ModuleScore::Writing {
                task1_words,
                task2_words,
            },
        ) => {
            if task1_words > MAX_TASK_WORDS || task2_words > MAX_TASK_WORDS {
                return Err(ExamError::MalformedScoreData(format!(
                    "word counts {}/{} exceed {}",
                    task1_words, task2_words, MAX_TASK_WORDS
                )));
            }
            writing_band(task1_words, task2_words)
        }
        (module, _) => {
            return Err(ExamError::MalformedScoreData(format!(
                "score shape does not fit module '{}'",
                module
            )));
        }
    };

    Ok(ModuleResult {
        module,
        score,
        band_score,
        completed_at,
    })
}

/// Combined outcome of the three modules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub overall_band: f64,
    pub listening_band: f64,
    pub reading_band: f64,
    pub writing_band: f64,
    /// Correct answers over listening and reading.
    pub total_score: u32,
    pub total_possible: u32,
}

impl Aggregate {
    pub fn into_final(self, submitted_at: DateTime<Utc>) -> FinalResult {
        FinalResult {
            overall_band: self.overall_band,
            listening_band: self.listening_band,
            reading_band: self.reading_band,
            writing_band: self.writing_band,
            total_score: self.total_score,
            total_possible: self.total_possible,
            submitted_at,
        }
    }
}

/// Overall band from three module bands: the mean, rounded half-up to 0.5.
///
/// Worked in half-band integers so thirds never pick up float error.
pub fn overall_band(listening: f64, reading: f64, writing: f64) -> f64 {
    let halves: i64 = [listening, reading, writing]
        .iter()
        .map(|b| (quantize_band(*b) * 2.0).round() as i64)
        .sum();
    // round-half-up(halves / 3) == floor((2 * halves + 3) / 6)
    let overall_halves = (2 * halves + 3).div_euclid(6);
    quantize_band(overall_halves as f64 / 2.0)
}

/// Aggregates all three module results.
///
/// Refuses to run unless every module is present.
pub fn aggregate(results: &BTreeMap<ModuleId, ModuleResult>) -> Result<Aggregate, ExamError> {
    let missing: Vec<ModuleId> = ModuleId::ORDER
        .into_iter()
        .filter(|m| !results.contains_key(m))
        .collect();
    if !missing.is_empty() {
        return Err(ExamError::IncompleteResults(missing));
    }

    let band = |m: ModuleId| results.get(&m).map(|r| quantize_band(r.band_score)).unwrap_or(MIN_BAND);
    let (listening_band, reading_band, writing_band) = (
        band(ModuleId::Listening),
        band(ModuleId::Reading),
        band(ModuleId::Writing),
    );

    let (total_score, total_possible) = results
        .values()
        .fold((0u32, 0u32), |(score, possible), r| match r.score {
            ModuleScore::Objective {
                raw_score,
                total_possible,
            } => (score + raw_score, possible + total_possible),
            ModuleScore::Writing { .. } => (score, possible),
        });

    Ok(Aggregate {
        overall_band: overall_band(listening_band, reading_band, writing_band),
        listening_band,
        reading_band,
        writing_band,
        total_score,
        total_possible,
    })
}
