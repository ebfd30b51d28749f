//! Declarative column-name resolution
//!
//! Every logical field has an ordered list of accepted raw column names. The
//! list is resolved once per file against its header row; the first synonym
//! present wins.

use crate::error::PipelineError;
use std::collections::BTreeMap;

/// Logical fields a participant file may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogicalField {
    ParticipantId,
    ImageId,
    FaceView,
    QuestionType,
    /// Generic response column paired with an explicit question-type column
    Value,
    TrustRating,
    MascChoice,
    FemChoice,
    EmotionRating,
    Timestamp,
}

impl LogicalField {
    pub const ALL: [LogicalField; 10] = [
        LogicalField::ParticipantId,
        LogicalField::ImageId,
        LogicalField::FaceView,
        LogicalField::QuestionType,
        LogicalField::Value,
        LogicalField::TrustRating,
        LogicalField::MascChoice,
        LogicalField::FemChoice,
        LogicalField::EmotionRating,
        LogicalField::Timestamp,
    ];

    /// Config key for this field
    pub fn key(&self) -> &'static str {
        match self {
            LogicalField::ParticipantId => "participant_id",
            LogicalField::ImageId => "image_id",
            LogicalField::FaceView => "face_view",
            LogicalField::QuestionType => "question_type",
            LogicalField::Value => "value",
            LogicalField::TrustRating => "trust_rating",
            LogicalField::MascChoice => "masc_choice",
            LogicalField::FemChoice => "fem_choice",
            LogicalField::EmotionRating => "emotion_rating",
            LogicalField::Timestamp => "timestamp",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }

    /// Question type answered by a per-question column
    pub fn question_type(&self) -> Option<crate::QuestionType> {
        match self {
            LogicalField::TrustRating => Some(crate::QuestionType::TrustRating),
            LogicalField::MascChoice => Some(crate::QuestionType::MascChoice),
            LogicalField::FemChoice => Some(crate::QuestionType::FemChoice),
            LogicalField::EmotionRating => Some(crate::QuestionType::EmotionRating),
            _ => None,
        }
    }

    fn default_synonyms(&self) -> &'static [&'static str] {
        match self {
            LogicalField::ParticipantId => &[
                "Participant ID",
                "ParticipantID",
                "participant_id",
                "participant",
                "pid",
                "Subject",
            ],
            LogicalField::ImageId => &[
                "Image",
                "Image ID",
                "ImageID",
                "image_id",
                "Image Name",
                "Stimulus",
                "stimulus",
            ],
            LogicalField::FaceView => &[
                "Face View",
                "FaceView",
                "face_view",
                "View",
                "Condition",
                "Face Type",
            ],
            LogicalField::QuestionType => &["Question Type", "QuestionType", "question_type", "Question"],
            LogicalField::Value => &["Response", "Value", "response", "value", "Answer"],
            LogicalField::TrustRating => &["Trust Rating", "TrustRating", "trust_rating", "Trust"],
            LogicalField::MascChoice => &[
                "Masculinity Choice",
                "MascChoice",
                "masc_choice",
                "Masculine",
                "Masculinity",
            ],
            LogicalField::FemChoice => &[
                "Femininity Choice",
                "FemChoice",
                "fem_choice",
                "Feminine",
                "Femininity",
            ],
            LogicalField::EmotionRating => &[
                "Emotion Rating",
                "EmotionRating",
                "emotion_rating",
                "Emotion",
            ],
            LogicalField::Timestamp => &["Timestamp", "timestamp", "Date", "date", "Time"],
        }
    }
}

/// Logical field -> ordered accepted column names
#[derive(Debug, Clone)]
pub struct FieldTable {
    synonyms: BTreeMap<LogicalField, Vec<String>>,
}

impl Default for FieldTable {
    fn default() -> Self {
        let synonyms = LogicalField::ALL
            .iter()
            .map(|f| {
                (
                    *f,
                    f.default_synonyms().iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();
        Self { synonyms }
    }
}

impl FieldTable {
    /// Defaults with configured lists replacing the lists of the fields they name
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Result<Self, PipelineError> {
        let mut table = Self::default();
        for (key, names) in overrides {
            let field = LogicalField::from_key(key).ok_or_else(|| {
                PipelineError::InvalidConfig(format!("unknown field \"{}\" in \"fields\"", key))
            })?;
            if names.is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "field \"{}\" needs at least one column name",
                    key
                )));
            }
            table.synonyms.insert(field, names.clone());
        }
        Ok(table)
    }

    pub fn synonyms(&self, field: LogicalField) -> &[String] {
        self.synonyms.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve every field against one header row.
    ///
    /// Exact matches are tried across the whole synonym list before falling
    /// back to case-insensitive matches, so a declared spelling always beats a
    /// looser one later in the list.
    pub fn resolve(&self, headers: &[String]) -> ResolvedColumns {
        let cleaned: Vec<String> = headers.iter().map(|h| clean_header(h)).collect();
        let mut columns = BTreeMap::new();

        for (field, names) in &self.synonyms {
            let exact = names
                .iter()
                .find_map(|name| cleaned.iter().position(|h| h == name));
            let found = exact.or_else(|| {
                names.iter().find_map(|name| {
                    cleaned
                        .iter()
                        .position(|h| h.eq_ignore_ascii_case(name))
                })
            });
            if let Some(index) = found {
                columns.insert(*field, index);
            }
        }

        ResolvedColumns { columns }
    }
}

/// Strip BOM and surrounding whitespace from a header cell
fn clean_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_string()
}

/// Column indices for the fields one file provides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedColumns {
    columns: BTreeMap<LogicalField, usize>,
}

impl ResolvedColumns {
    pub fn index(&self, field: LogicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn has(&self, field: LogicalField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Fields present in this file
    pub fn fields(&self) -> impl Iterator<Item = LogicalField> + '_ {
        self.columns.keys().copied()
    }

    /// A file is usable only if it identifies the image and the face view
    pub fn is_usable(&self) -> bool {
        self.has(LogicalField::ImageId) && self.has(LogicalField::FaceView)
    }
}
