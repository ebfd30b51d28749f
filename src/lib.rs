//! facestats: response aggregation and compliance statistics for facial-perception studies
//!
//! This library loads per-participant response files, normalizes them into a
//! long-format dataset, and runs a fixed battery of descriptive and inferential
//! analyses whose results are compiled into a [`ComplianceReport`].
//!
//! The pipeline is a pure function of the response directory and the
//! configuration: [`run_pipeline`] never writes anything. Publishing the report
//! is a separate step ([`reporter::publish`]).

pub mod aggregate;
pub mod config;
pub mod error;
pub mod inference;
pub mod loader;
pub mod normalizer;
pub mod reporter;
pub mod stats;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// p-value threshold used by every significance flag in the report
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Experimental condition under which an image was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceView {
    Full,
    Left,
    Right,
}

impl FaceView {
    pub const ALL: [FaceView; 3] = [FaceView::Full, FaceView::Left, FaceView::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaceView::Full => "full",
            FaceView::Left => "left",
            FaceView::Right => "right",
        }
    }
}

impl std::fmt::Display for FaceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of question a response answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    TrustRating,
    MascChoice,
    FemChoice,
    EmotionRating,
}

impl QuestionType {
    pub const ALL: [QuestionType; 4] = [
        QuestionType::TrustRating,
        QuestionType::MascChoice,
        QuestionType::FemChoice,
        QuestionType::EmotionRating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::TrustRating => "trust_rating",
            QuestionType::MascChoice => "masc_choice",
            QuestionType::FemChoice => "fem_choice",
            QuestionType::EmotionRating => "emotion_rating",
        }
    }

    /// Numeric ratings on a bounded scale
    pub fn is_rating(&self) -> bool {
        matches!(self, QuestionType::TrustRating | QuestionType::EmotionRating)
    }

    /// Binary forced-choice responses
    pub fn is_choice(&self) -> bool {
        !self.is_rating()
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed response value; the variant always matches the question type's domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum ResponseValue {
    Rating(f64),
    Choice(bool),
}

impl ResponseValue {
    pub fn as_rating(&self) -> Option<f64> {
        match self {
            ResponseValue::Rating(v) => Some(*v),
            ResponseValue::Choice(_) => None,
        }
    }

    pub fn as_choice(&self) -> Option<bool> {
        match self {
            ResponseValue::Choice(c) => Some(*c),
            ResponseValue::Rating(_) => None,
        }
    }
}

/// One normalized observation (participant x image x face view x question)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub participant_id: String,
    pub image_id: String,
    pub face_view: FaceView,
    pub question_type: QuestionType,
    pub value: ResponseValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    /// File name (relative to the data directory) the record came from
    pub source_file: String,
    /// 1-indexed data row within the source file
    pub row: usize,
}

/// Statistical procedure that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Linear mixed model, crossed random intercepts (participant, image)
    MixedEffects,
    /// Ordinary least squares on condition dummies, used when the mixed model cannot be fitted
    FixedEffectsFallback,
    Logistic,
    Anova,
    Icc,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::MixedEffects => write!(f, "Linear mixed model"),
            ModelType::FixedEffectsFallback => write!(f, "Fixed-effects regression (fallback)"),
            ModelType::Logistic => write!(f, "Logistic regression"),
            ModelType::Anova => write!(f, "One-way ANOVA"),
            ModelType::Icc => write!(f, "Intraclass correlation"),
        }
    }
}

/// Outcome of one analysis; always explicit so fallbacks and skips are never hidden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AnalysisStatus {
    Completed,
    Fallback { reason: String },
    Skipped { reason: String },
    Failed { reason: String },
}

impl AnalysisStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Fallback { .. } => "completed via fallback",
            AnalysisStatus::Skipped { .. } => "skipped",
            AnalysisStatus::Failed { .. } => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AnalysisStatus::Completed => None,
            AnalysisStatus::Fallback { reason }
            | AnalysisStatus::Skipped { reason }
            | AnalysisStatus::Failed { reason } => Some(reason),
        }
    }

    /// True when the analysis produced numbers (directly or via fallback)
    pub fn produced_estimates(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Fallback { .. }
        )
    }
}

/// Rounding class applied to a value at the formatting boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Coefficients, p-values, odds ratios, ICCs: 3 decimal places
    Coefficient,
    /// Test statistics, means, percentages, R²: 2 decimal places
    Statistic,
    /// Counts and degrees of freedom
    Integer,
}

/// Column of a result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub precision: Precision,
}

impl Column {
    pub fn coefficient(name: &str) -> Self {
        Self {
            name: name.to_string(),
            precision: Precision::Coefficient,
        }
    }

    pub fn statistic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            precision: Precision::Statistic,
        }
    }

    pub fn integer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            precision: Precision::Integer,
        }
    }
}

/// One labeled row of a result table; `values` aligns with the table's columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub term: String,
    pub values: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significant: Option<bool>,
}

/// Row-oriented table of per-term estimates (coefficients, group means, comparisons)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<TableRow>,
}

impl ResultTable {
    pub fn new(name: &str, columns: Vec<Column>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, term: impl Into<String>, values: Vec<Option<f64>>, significant: Option<bool>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(TableRow {
            term: term.into(),
            values,
            significant,
        });
    }
}

/// Immutable output of one statistical procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Stable identifier, also used for the artifact file name
    pub name: String,
    pub model_type: ModelType,
    pub status: AnalysisStatus,
    /// Coefficients and headline statistics, full precision internally
    #[serde(serialize_with = "reporter::format::serialize_coefficients")]
    pub statistics: BTreeMap<String, f64>,
    /// Fit diagnostics (R², accuracy, degrees of freedom, variance components)
    #[serde(serialize_with = "reporter::format::serialize_statistics")]
    pub fit_diagnostics: BTreeMap<String, f64>,
    pub n_observations: usize,
    pub n_participants: usize,
    /// Levels of the grouping factor: images for the mixed model and ICC,
    /// conditions for logistic models, groups for ANOVA
    pub n_groups: usize,
    pub significance_flags: BTreeMap<String, bool>,
    #[serde(serialize_with = "reporter::format::serialize_tables")]
    pub tables: Vec<ResultTable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl AnalysisResult {
    pub fn new(name: &str, model_type: ModelType) -> Self {
        Self {
            name: name.to_string(),
            model_type,
            status: AnalysisStatus::Completed,
            statistics: BTreeMap::new(),
            fit_diagnostics: BTreeMap::new(),
            n_observations: 0,
            n_participants: 0,
            n_groups: 0,
            significance_flags: BTreeMap::new(),
            tables: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn skipped(name: &str, model_type: ModelType, reason: impl Into<String>) -> Self {
        let mut result = Self::new(name, model_type);
        result.status = AnalysisStatus::Skipped {
            reason: reason.into(),
        };
        result
    }

    pub fn failed(name: &str, model_type: ModelType, reason: impl Into<String>) -> Self {
        let mut result = Self::new(name, model_type);
        result.status = AnalysisStatus::Failed {
            reason: reason.into(),
        };
        result
    }

    pub fn table(&self, name: &str) -> Option<&ResultTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Mandated analysis categories tracked by the report checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Descriptive,
    MixedModel,
    Logistic,
    Anova,
    Icc,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Descriptive,
        AnalysisKind::MixedModel,
        AnalysisKind::Logistic,
        AnalysisKind::Anova,
        AnalysisKind::Icc,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            AnalysisKind::Descriptive => "Descriptive statistics",
            AnalysisKind::MixedModel => "Mixed-effects trust model",
            AnalysisKind::Logistic => "Logistic choice models",
            AnalysisKind::Anova => "ANOVA with post-hoc comparisons",
            AnalysisKind::Icc => "Intraclass correlation",
        }
    }
}

/// Completion state of one checklist category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ChecklistState {
    Completed,
    CompletedViaFallback { reason: String },
    Skipped { reason: String },
    Failed { reason: String },
    NotRequested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub kind: AnalysisKind,
    pub title: String,
    pub state: ChecklistState,
    /// Individual results of this category that did not complete
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ChecklistState {
    pub fn label(&self) -> &'static str {
        match self {
            ChecklistState::Completed => "completed",
            ChecklistState::CompletedViaFallback { .. } => "completed via fallback",
            ChecklistState::Skipped { .. } => "skipped",
            ChecklistState::Failed { .. } => "failed",
            ChecklistState::NotRequested => "not requested",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ChecklistState::CompletedViaFallback { reason }
            | ChecklistState::Skipped { reason }
            | ChecklistState::Failed { reason } => Some(reason),
            ChecklistState::Completed | ChecklistState::NotRequested => None,
        }
    }
}

/// Kind of file listed in the artifact manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Report,
    Summary,
    Table,
    /// Placeholder expected from a visualization collaborator
    Figure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEntry {
    pub file_name: String,
    pub kind: ArtifactKind,
    /// True when facestats writes the file itself
    pub generated: bool,
}

/// Ordered analysis results plus dataset-level summaries and the artifact manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub tool_version: String,
    pub summary: aggregate::DatasetSummary,
    pub descriptives: aggregate::Descriptives,
    pub analyses: Vec<AnalysisResult>,
    pub checklist: Vec<ChecklistItem>,
    pub manifest: Vec<ArtifactEntry>,
}

/// Run the whole pipeline: load, normalize, summarize, model, compile.
///
/// * `data_dir` - directory of participant response files (absent directory yields an empty dataset)
/// * `config` - effective configuration
pub fn run_pipeline(data_dir: &Path, config: &config::Config) -> anyhow::Result<ComplianceReport> {
    let (loaded, dataset) = load_dataset(data_dir, config)?;

    let aggregate = aggregate::AggregateEngine::new();
    let summary = aggregate.dataset_summary(&dataset, &loaded);
    let descriptives = if config.runs(AnalysisKind::Descriptive) {
        aggregate.descriptives(&dataset)
    } else {
        aggregate::Descriptives::default()
    };

    let engine = inference::InferenceEngine::from_config(config);
    let analyses = engine.run_all(&dataset);

    log::info!(
        "pipeline finished: {} responses, {} rejected, {} analyses",
        summary.total_responses,
        summary.rejected_rows,
        analyses.len()
    );

    let compiler = reporter::ReportCompiler::new(config);
    Ok(compiler.compile(summary, descriptives, analyses))
}

/// Dataset summary block only; no models are fitted
pub fn summarize(data_dir: &Path, config: &config::Config) -> anyhow::Result<aggregate::DatasetSummary> {
    let (loaded, dataset) = load_dataset(data_dir, config)?;
    Ok(aggregate::AggregateEngine::new().dataset_summary(&dataset, &loaded))
}

fn load_dataset(
    data_dir: &Path,
    config: &config::Config,
) -> anyhow::Result<(loader::LoadedRecords, normalizer::LongFormDataset)> {
    let loader = loader::RecordLoader::from_config(config)?.excluding(&config.output_dir(data_dir));
    let loaded = loader.load_dir(data_dir);

    let normalizer = normalizer::Normalizer::from_config(config)?;
    let dataset = normalizer.normalize(&loaded);
    Ok((loaded, dataset))
}
