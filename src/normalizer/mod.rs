//! Schema normalizer: loader rows -> canonical long-format records
//!
//! Every value is either coerced strictly into its question type's domain or
//! rejected with a [`RejectionReason`]. Nothing is defaulted.

pub mod dataset;

pub use dataset::{LongFormDataset, RecordKey};

use crate::config::Config;
use crate::loader::{LoadedRecords, LogicalField, RawRecord};
use crate::{FaceView, QuestionType, ResponseRecord, ResponseValue};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

const DEFAULT_TRUE_VALUES: [&str; 5] = ["1", "yes", "y", "true", "t"];
const DEFAULT_FALSE_VALUES: [&str; 5] = ["0", "no", "n", "false", "f"];

/// Tokens that carry no information about the condition ("Left Half Face")
const FACE_VIEW_FILLER: [&str; 5] = ["face", "half", "side", "view", "hemiface"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d_%Hh%M.%S.%3f",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Why a row or value was excluded from the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingImage,
    MissingFaceView,
    UnknownFaceView,
    UnknownQuestionType,
    MissingValue,
    MalformedValue,
    OutOfRange,
    DuplicateKey,
    UnparseableRow,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MissingImage => "missing_image",
            RejectionReason::MissingFaceView => "missing_face_view",
            RejectionReason::UnknownFaceView => "unknown_face_view",
            RejectionReason::UnknownQuestionType => "unknown_question_type",
            RejectionReason::MissingValue => "missing_value",
            RejectionReason::MalformedValue => "malformed_value",
            RejectionReason::OutOfRange => "out_of_range",
            RejectionReason::DuplicateKey => "duplicate_key",
            RejectionReason::UnparseableRow => "unparseable_row",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-question columns in melt order
const QUESTION_COLUMNS: [LogicalField; 4] = [
    LogicalField::TrustRating,
    LogicalField::MascChoice,
    LogicalField::FemChoice,
    LogicalField::EmotionRating,
];

pub struct Normalizer {
    face_view_synonyms: BTreeMap<String, FaceView>,
    true_values: HashSet<String>,
    false_values: HashSet<String>,
    bounds: BTreeMap<QuestionType, (f64, f64)>,
    allow_repeated_trials: bool,
}

impl Normalizer {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let face_view_synonyms = config
            .face_view_synonyms
            .iter()
            .map(|(raw, view)| (canonical_tokens(raw), *view))
            .collect();

        let tokens = |configured: &[String], defaults: &[&str]| -> HashSet<String> {
            if configured.is_empty() {
                defaults.iter().map(|s| s.to_string()).collect()
            } else {
                configured.iter().map(|s| s.trim().to_lowercase()).collect()
            }
        };
        let true_values = tokens(&config.choice_true_values, &DEFAULT_TRUE_VALUES[..]);
        let false_values = tokens(&config.choice_false_values, &DEFAULT_FALSE_VALUES[..]);
        if let Some(both) = true_values.intersection(&false_values).next() {
            anyhow::bail!(crate::error::PipelineError::InvalidConfig(format!(
                "choice token \"{}\" is listed as both true and false",
                both
            )));
        }

        let bounds = QuestionType::ALL
            .iter()
            .filter(|q| q.is_rating())
            .map(|q| (*q, config.rating_bounds(*q)))
            .collect();

        Ok(Self {
            face_view_synonyms,
            true_values,
            false_values,
            bounds,
            allow_repeated_trials: config.allow_repeated_trials(),
        })
    }

    /// Normalize every loaded row, preserving file-then-row order
    pub fn normalize(&self, loaded: &LoadedRecords) -> LongFormDataset {
        let mut accepted = Vec::new();
        let mut rejections: BTreeMap<RejectionReason, usize> = BTreeMap::new();
        let mut unparsed_timestamps = 0;

        for raw in &loaded.records {
            let (timestamp, timestamp_ok) = match raw.get(LogicalField::Timestamp) {
                Some(text) => match parse_timestamp(text) {
                    Some(ts) => (Some(ts), true),
                    None => (None, false),
                },
                None => (None, true),
            };
            if !timestamp_ok {
                unparsed_timestamps += 1;
            }

            for outcome in self.normalize_record(raw) {
                match outcome {
                    Ok(mut record) => {
                        record.timestamp = timestamp;
                        accepted.push(record);
                    }
                    Err(reason) => {
                        log::debug!("{} row {}: rejected ({})", raw.source_file, raw.row, reason);
                        *rejections.entry(reason).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut dataset = LongFormDataset::from_records(accepted, self.allow_repeated_trials);
        for (reason, count) in rejections {
            dataset.reject(reason, count);
        }
        dataset.reject(RejectionReason::UnparseableRow, loaded.unparseable_rows);
        dataset.set_unparsed_timestamps(unparsed_timestamps);

        if dataset.rejected_total() > 0 {
            log::warn!(
                "{} values rejected during normalization",
                dataset.rejected_total()
            );
        }
        if unparsed_timestamps > 0 {
            log::warn!("{} timestamps could not be parsed", unparsed_timestamps);
        }
        dataset
    }

    /// Canonical records for one raw row.
    ///
    /// Row-level problems (no image, bad face view) reject the row once; a row
    /// in wide layout yields one outcome per populated question column.
    pub fn normalize_record(&self, raw: &RawRecord) -> Vec<Result<ResponseRecord, RejectionReason>> {
        let Some(image_id) = raw.get(LogicalField::ImageId) else {
            return vec![Err(RejectionReason::MissingImage)];
        };
        let Some(view_text) = raw.get(LogicalField::FaceView) else {
            return vec![Err(RejectionReason::MissingFaceView)];
        };
        let Some(face_view) = self.normalize_face_view(view_text) else {
            return vec![Err(RejectionReason::UnknownFaceView)];
        };

        let build = |question: QuestionType, text: &str| {
            self.coerce_value(question, text).map(|value| ResponseRecord {
                participant_id: raw.participant_id.clone(),
                image_id: image_id.to_string(),
                face_view,
                question_type: question,
                value,
                timestamp: None,
                source_file: raw.source_file.clone(),
                row: raw.row,
            })
        };

        if let Some(question_text) = raw.get(LogicalField::QuestionType) {
            let Some(question) = parse_question_type(question_text) else {
                return vec![Err(RejectionReason::UnknownQuestionType)];
            };
            let value = raw
                .get(LogicalField::Value)
                .or_else(|| raw.get(question_column(question)));
            return match value {
                Some(text) => vec![build(question, text)],
                None => vec![Err(RejectionReason::MissingValue)],
            };
        }

        let outcomes: Vec<_> = QUESTION_COLUMNS
            .iter()
            .filter_map(|field| {
                let question = field.question_type()?;
                raw.get(*field).map(|text| build(question, text))
            })
            .collect();

        if !outcomes.is_empty() {
            outcomes
        } else if raw.get(LogicalField::Value).is_some() {
            // a bare value column cannot say which question it answers
            vec![Err(RejectionReason::UnknownQuestionType)]
        } else {
            vec![Err(RejectionReason::MissingValue)]
        }
    }

    /// Map a raw face-view spelling onto the closed enumeration
    pub fn normalize_face_view(&self, raw: &str) -> Option<FaceView> {
        let tokens = canonical_tokens(raw);
        if let Some(view) = self.face_view_synonyms.get(&tokens) {
            return Some(*view);
        }

        let core: Vec<&str> = tokens
            .split(' ')
            .filter(|t| !t.is_empty() && !FACE_VIEW_FILLER.contains(t))
            .collect();
        match core.join(" ").as_str() {
            "full" | "whole" | "both" | "f" | "complete" | "fullface" | "frontal" => {
                Some(FaceView::Full)
            }
            "left" | "l" | "lh" | "leftface" | "lefthalf" => Some(FaceView::Left),
            "right" | "r" | "rh" | "rightface" | "righthalf" => Some(FaceView::Right),
            _ => None,
        }
    }

    fn coerce_value(&self, question: QuestionType, text: &str) -> Result<ResponseValue, RejectionReason> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RejectionReason::MissingValue);
        }

        if question.is_rating() {
            let value: f64 = text.parse().map_err(|_| RejectionReason::MalformedValue)?;
            if !value.is_finite() {
                return Err(RejectionReason::MalformedValue);
            }
            let (min, max) = self
                .bounds
                .get(&question)
                .copied()
                .unwrap_or(crate::config::DEFAULT_RATING_BOUNDS);
            if value < min || value > max {
                return Err(RejectionReason::OutOfRange);
            }
            return Ok(ResponseValue::Rating(value));
        }

        let token = text.to_lowercase();
        if self.true_values.contains(&token) {
            return Ok(ResponseValue::Choice(true));
        }
        if self.false_values.contains(&token) {
            return Ok(ResponseValue::Choice(false));
        }
        match token.parse::<f64>() {
            Ok(v) if v == 1.0 => Ok(ResponseValue::Choice(true)),
            Ok(v) if v == 0.0 => Ok(ResponseValue::Choice(false)),
            Ok(v) if v.is_finite() => Err(RejectionReason::OutOfRange),
            _ => Err(RejectionReason::MalformedValue),
        }
    }
}

fn question_column(question: QuestionType) -> LogicalField {
    match question {
        QuestionType::TrustRating => LogicalField::TrustRating,
        QuestionType::MascChoice => LogicalField::MascChoice,
        QuestionType::FemChoice => LogicalField::FemChoice,
        QuestionType::EmotionRating => LogicalField::EmotionRating,
    }
}

/// Lowercase, separators to single spaces
fn canonical_tokens(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-' || c == '.')
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse an explicit question-type label
pub fn parse_question_type(raw: &str) -> Option<QuestionType> {
    let key = canonical_tokens(raw).replace(' ', "_");
    match key.as_str() {
        "trust_rating" | "trust" | "trustworthiness" | "trustworthy" => Some(QuestionType::TrustRating),
        "masc_choice" | "masculinity_choice" | "masculinity" | "masc" | "masculine" => {
            Some(QuestionType::MascChoice)
        }
        "fem_choice" | "femininity_choice" | "femininity" | "fem" | "feminine" => {
            Some(QuestionType::FemChoice)
        }
        "emotion_rating" | "emotion" | "emotionality" | "emotional" => Some(QuestionType::EmotionRating),
        _ => None,
    }
}

/// Parse a timestamp in any of the accepted layouts
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}
