//! Config schema and deserialization

use crate::{AnalysisKind, FaceView, QuestionType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default inclusive bounds for numeric rating scales
pub const DEFAULT_RATING_BOUNDS: (f64, f64) = (1.0, 7.0);

/// File-name globs that are always excluded (sample and demo exports)
pub const DEFAULT_IGNORE: [&str; 4] = ["*sample*", "*demo*", "**/*sample*", "**/*demo*"];

/// One requested ANOVA: a numeric outcome across a categorical grouping variable
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnovaSpec {
    /// Question type whose ratings form the outcome (e.g. "trust_rating")
    pub outcome: String,
    /// Grouping variable: face_view, image_id, participant_id or source_file
    pub group_by: String,
}

impl AnovaSpec {
    pub fn new(outcome: &str, group_by: &str) -> Self {
        Self {
            outcome: outcome.to_string(),
            group_by: group_by.to_string(),
        }
    }
}

/// Root config structure for .facestatsrc.json
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Extend another config file (path relative to this config)
    #[serde(default)]
    pub extends: Option<String>,

    /// Directory of participant response files
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Where report artifacts are written (default: <dataDir>/report)
    #[serde(default)]
    pub output_dir: Option<String>,

    /// Participant file name globs (default: *.csv)
    #[serde(default)]
    pub file_patterns: Vec<String>,

    /// Extra globs excluded from loading, matched against the path relative to the data dir
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Logical field -> ordered list of accepted column names (replaces the default list)
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,

    /// Regex with one capture group extracting a participant id from the file stem
    #[serde(default)]
    pub participant_id_pattern: Option<String>,

    /// Extra raw face-view spellings
    #[serde(default)]
    pub face_view_synonyms: BTreeMap<String, FaceView>,

    /// Tokens accepted as a positive binary choice
    #[serde(default)]
    pub choice_true_values: Vec<String>,

    /// Tokens accepted as a negative binary choice
    #[serde(default)]
    pub choice_false_values: Vec<String>,

    /// Inclusive [min, max] per rating type
    #[serde(default)]
    pub rating_bounds: BTreeMap<QuestionType, [f64; 2]>,

    /// Keep repeated trials for the same participant/image/view/question key
    #[serde(default)]
    pub allow_repeated_trials: Option<bool>,

    /// Reference condition for model contrasts (default: full)
    #[serde(default)]
    pub reference_face_view: Option<FaceView>,

    /// Analyses to run (default: all)
    #[serde(default)]
    pub analyses: Option<Vec<AnalysisKind>>,

    /// ANOVA specifications (default: trust_rating by face_view)
    #[serde(default)]
    pub anova: Vec<AnovaSpec>,
}

impl Config {
    /// Merge CLI overrides into config. CLI values take precedence.
    pub fn merge_with_cli(mut self, data_dir: Option<&Path>, output_dir: Option<&Path>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = Some(dir.to_string_lossy().to_string());
        }
        if let Some(dir) = output_dir {
            self.output_dir = Some(dir.to_string_lossy().to_string());
        }
        self
    }

    /// Merge another config into this one (for extends)
    pub fn merge_from(&mut self, base: Config) {
        if self.data_dir.is_none() {
            self.data_dir = base.data_dir;
        }
        if self.output_dir.is_none() {
            self.output_dir = base.output_dir;
        }
        if self.file_patterns.is_empty() {
            self.file_patterns = base.file_patterns;
        }

        let mut all_ignores = base.ignore;
        all_ignores.append(&mut self.ignore);
        self.ignore = all_ignores;

        for (field, names) in base.fields {
            self.fields.entry(field).or_insert(names);
        }
        if self.participant_id_pattern.is_none() {
            self.participant_id_pattern = base.participant_id_pattern;
        }
        for (raw, view) in base.face_view_synonyms {
            self.face_view_synonyms.entry(raw).or_insert(view);
        }
        if self.choice_true_values.is_empty() {
            self.choice_true_values = base.choice_true_values;
        }
        if self.choice_false_values.is_empty() {
            self.choice_false_values = base.choice_false_values;
        }
        for (question, bounds) in base.rating_bounds {
            self.rating_bounds.entry(question).or_insert(bounds);
        }
        if self.allow_repeated_trials.is_none() {
            self.allow_repeated_trials = base.allow_repeated_trials;
        }
        if self.reference_face_view.is_none() {
            self.reference_face_view = base.reference_face_view;
        }
        if self.analyses.is_none() {
            self.analyses = base.analyses;
        }
        if self.anova.is_empty() {
            self.anova = base.anova;
        }
    }

    /// Resolved data directory, if any
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(PathBuf::from)
    }

    /// Resolved output directory: explicit setting or `<data_dir>/report`
    pub fn output_dir(&self, data_dir: &Path) -> PathBuf {
        match self.output_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => data_dir.join("report"),
        }
    }

    /// Participant file globs
    pub fn file_patterns(&self) -> Vec<&str> {
        if self.file_patterns.is_empty() {
            vec!["*.csv"]
        } else {
            self.file_patterns.iter().map(|s| s.as_str()).collect()
        }
    }

    /// Default sample/demo exclusions plus configured ignores
    pub fn ignore_patterns(&self) -> Vec<String> {
        DEFAULT_IGNORE
            .iter()
            .map(|s| s.to_string())
            .chain(self.ignore.iter().cloned())
            .collect()
    }

    pub fn rating_bounds(&self, question: QuestionType) -> (f64, f64) {
        self.rating_bounds
            .get(&question)
            .map(|b| (b[0], b[1]))
            .unwrap_or(DEFAULT_RATING_BOUNDS)
    }

    pub fn allow_repeated_trials(&self) -> bool {
        self.allow_repeated_trials.unwrap_or(false)
    }

    pub fn reference_face_view(&self) -> FaceView {
        self.reference_face_view.unwrap_or(FaceView::Full)
    }

    /// Whether an analysis category was requested
    pub fn runs(&self, kind: AnalysisKind) -> bool {
        match self.analyses {
            Some(ref kinds) => kinds.contains(&kind),
            None => true,
        }
    }

    pub fn anova_specs(&self) -> Vec<AnovaSpec> {
        if self.anova.is_empty() {
            vec![AnovaSpec::new("trust_rating", "face_view")]
        } else {
            self.anova.clone()
        }
    }

    /// Check values serde cannot validate on its own
    pub fn validate(&self) -> Result<(), crate::error::PipelineError> {
        for (question, bounds) in &self.rating_bounds {
            if !question.is_rating() {
                return Err(crate::error::PipelineError::InvalidConfig(format!(
                    "ratingBounds given for non-rating question type {}",
                    question
                )));
            }
            if !(bounds[0] < bounds[1]) {
                return Err(crate::error::PipelineError::InvalidConfig(format!(
                    "ratingBounds for {} must satisfy min < max (got [{}, {}])",
                    question, bounds[0], bounds[1]
                )));
            }
        }
        Ok(())
    }
}
