//! Inferential model engine
//!
//! Each analysis reads the shared, read-only dataset and returns one or more
//! [`AnalysisResult`]s. Problems with the input never abort the run: they are
//! recorded as a skipped or failed status inside the result.

pub mod anova;
pub mod icc;
pub mod logistic;
pub mod mixed;

pub use anova::AnovaAnalysis;
pub use icc::IccAnalysis;
pub use logistic::LogisticAnalysis;
pub use mixed::MixedModelAnalysis;

use crate::config::Config;
use crate::normalizer::LongFormDataset;
use crate::{AnalysisKind, AnalysisResult, AnalysisStatus, FaceView, QuestionType, ResponseRecord, SIGNIFICANCE_LEVEL};
use std::collections::BTreeSet;

/// Trait for all inferential procedures
pub trait Analysis {
    /// Checklist category this analysis belongs to
    fn kind(&self) -> AnalysisKind;

    /// Stable result name
    fn name(&self) -> String;

    /// Run against the dataset snapshot
    fn run(&self, dataset: &LongFormDataset) -> AnalysisResult;
}

/// Runs the configured analyses in a fixed order
pub struct InferenceEngine {
    analyses: Vec<Box<dyn Analysis>>,
}

impl InferenceEngine {
    /// Mixed model, logistic models, ANOVAs, then ICCs; categories not requested are left out
    pub fn from_config(config: &Config) -> Self {
        let reference = config.reference_face_view();
        let mut analyses: Vec<Box<dyn Analysis>> = Vec::new();

        if config.runs(AnalysisKind::MixedModel) {
            analyses.push(Box::new(MixedModelAnalysis::new(
                QuestionType::TrustRating,
                reference,
            )));
        }
        if config.runs(AnalysisKind::Logistic) {
            for question in [QuestionType::MascChoice, QuestionType::FemChoice] {
                analyses.push(Box::new(LogisticAnalysis::new(question, reference)));
            }
        }
        if config.runs(AnalysisKind::Anova) {
            for spec in config.anova_specs() {
                analyses.push(Box::new(AnovaAnalysis::new(&spec.outcome, &spec.group_by)));
            }
        }
        if config.runs(AnalysisKind::Icc) {
            for question in [QuestionType::TrustRating, QuestionType::EmotionRating] {
                analyses.push(Box::new(IccAnalysis::new(question)));
            }
        }

        Self { analyses }
    }

    /// Build an engine from an explicit analysis list
    pub fn with_analyses(analyses: Vec<Box<dyn Analysis>>) -> Self {
        Self { analyses }
    }

    /// (kind, name) of every scheduled analysis
    pub fn scheduled(&self) -> Vec<(AnalysisKind, String)> {
        self.analyses.iter().map(|a| (a.kind(), a.name())).collect()
    }

    /// Run every analysis; the result order matches the schedule
    pub fn run_all(&self, dataset: &LongFormDataset) -> Vec<AnalysisResult> {
        self.analyses
            .iter()
            .map(|analysis| {
                let result = analysis.run(dataset);
                match &result.status {
                    AnalysisStatus::Completed => {
                        log::info!("{}: completed (n = {})", result.name, result.n_observations)
                    }
                    AnalysisStatus::Fallback { reason } => {
                        log::warn!("{}: completed via fallback: {}", result.name, reason)
                    }
                    AnalysisStatus::Skipped { reason } => {
                        log::warn!("{}: skipped: {}", result.name, reason)
                    }
                    AnalysisStatus::Failed { reason } => {
                        log::warn!("{}: failed: {}", result.name, reason)
                    }
                }
                result
            })
            .collect()
    }
}

/// p < 0.05, never true for a missing or non-finite p
pub fn is_significant(p: f64) -> bool {
    p.is_finite() && p < SIGNIFICANCE_LEVEL
}

/// Treatment coding of face view: intercept plus one dummy per non-reference view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionDesign {
    pub reference: FaceView,
    pub others: Vec<FaceView>,
    /// Set when the requested reference was absent and another view stood in
    pub substituted_reference: Option<FaceView>,
}

impl ConditionDesign {
    /// Design over the views present in `records`; `None` if fewer than two are present
    pub fn for_records(records: &[&ResponseRecord], preferred: FaceView) -> Option<Self> {
        let present: BTreeSet<FaceView> = records.iter().map(|r| r.face_view).collect();
        if present.len() < 2 {
            return None;
        }
        let (reference, substituted_reference) = if present.contains(&preferred) {
            (preferred, None)
        } else {
            let first = *present.iter().next()?;
            log::info!(
                "reference face view {} not present; using {}",
                preferred,
                first
            );
            (first, Some(preferred))
        };
        let others = present.into_iter().filter(|v| *v != reference).collect();
        Some(Self {
            reference,
            others,
            substituted_reference,
        })
    }

    pub fn n_params(&self) -> usize {
        1 + self.others.len()
    }

    /// Design-matrix row for one observation
    pub fn row(&self, view: FaceView) -> Vec<f64> {
        std::iter::once(1.0)
            .chain(self.others.iter().map(|o| if *o == view { 1.0 } else { 0.0 }))
            .collect()
    }

    /// Term labels aligned with [`Self::row`]
    pub fn terms(&self) -> Vec<String> {
        std::iter::once("intercept".to_string())
            .chain(self.others.iter().map(|v| format!("face_view_{}", v)))
            .collect()
    }

    /// Note recorded in the result when the reference had to be substituted
    pub fn reference_note(&self) -> Option<String> {
        self.substituted_reference.map(|wanted| {
            format!(
                "reference face view '{}' has no observations; '{}' used as reference",
                wanted, self.reference
            )
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::rating;
    use super::*;

    #[test]
    fn test_engine_respects_requested_analyses() {
        let config: Config = serde_json::from_str(r#"{ "analyses": ["anova", "icc"] }"#).unwrap();
        let engine = InferenceEngine::from_config(&config);
        let kinds: Vec<AnalysisKind> = engine.scheduled().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![AnalysisKind::Anova, AnalysisKind::Icc, AnalysisKind::Icc]
        );
    }

    #[test]
    fn test_default_schedule_order() {
        let engine = InferenceEngine::from_config(&Config::default());
        let names: Vec<String> = engine.scheduled().into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            names,
            vec![
                "mixed_model_trust_rating",
                "logistic_masc_choice",
                "logistic_fem_choice",
                "anova_trust_rating_by_face_view",
                "icc_trust_rating",
                "icc_emotion_rating",
            ]
        );
    }

    #[test]
    fn test_empty_dataset_never_panics() {
        let engine = InferenceEngine::from_config(&Config::default());
        let results = engine.run_all(&LongFormDataset::default());
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| !r.status.produced_estimates()));
    }

    #[test]
    fn test_condition_design_substitutes_missing_reference() {
        let a = rating("P1", "img1", FaceView::Left, QuestionType::TrustRating, 3.0);
        let b = rating("P1", "img1", FaceView::Right, QuestionType::TrustRating, 4.0);
        let design = ConditionDesign::for_records(&[&a, &b], FaceView::Full).unwrap();
        assert_eq!(design.reference, FaceView::Left);
        assert_eq!(design.others, vec![FaceView::Right]);
        assert_eq!(design.row(FaceView::Right), vec![1.0, 1.0]);
        assert_eq!(design.terms(), vec!["intercept", "face_view_right"]);
        assert!(design.reference_note().is_some());
    }

    #[test]
    fn test_condition_design_needs_two_views() {
        let a = rating("P1", "img1", FaceView::Full, QuestionType::TrustRating, 3.0);
        assert!(ConditionDesign::for_records(&[&a], FaceView::Full).is_none());
    }

    #[test]
    fn test_significance_threshold() {
        assert!(is_significant(0.049));
        assert!(!is_significant(0.05));
        assert!(!is_significant(f64::NAN));
    }
}
