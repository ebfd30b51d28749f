//! Report compiler: results + summaries -> ComplianceReport

use crate::aggregate::{DatasetSummary, Descriptives};
use crate::config::Config;
use crate::{
    AnalysisKind, AnalysisResult, AnalysisStatus, ArtifactEntry, ArtifactKind, ChecklistItem,
    ChecklistState, ComplianceReport, ModelType,
};

pub const REPORT_MARKDOWN: &str = "compliance_report.md";
pub const REPORT_JSON: &str = "compliance_report.json";
pub const SUMMARY_JSON: &str = "dataset_summary.json";

/// Artifact file holding one result's tables
pub fn result_file_name(result: &AnalysisResult) -> String {
    format!("{}_results.csv", result.name)
}

/// Checklist category of a result
pub fn kind_of(model_type: ModelType) -> AnalysisKind {
    match model_type {
        ModelType::MixedEffects | ModelType::FixedEffectsFallback => AnalysisKind::MixedModel,
        ModelType::Logistic => AnalysisKind::Logistic,
        ModelType::Anova => AnalysisKind::Anova,
        ModelType::Icc => AnalysisKind::Icc,
    }
}

pub struct ReportCompiler {
    requested: Vec<AnalysisKind>,
}

impl ReportCompiler {
    pub fn new(config: &Config) -> Self {
        Self {
            requested: AnalysisKind::ALL
                .iter()
                .copied()
                .filter(|k| config.runs(*k))
                .collect(),
        }
    }

    pub fn compile(
        &self,
        summary: DatasetSummary,
        descriptives: Descriptives,
        analyses: Vec<AnalysisResult>,
    ) -> ComplianceReport {
        let checklist = AnalysisKind::ALL
            .iter()
            .map(|kind| self.checklist_item(*kind, &summary, &analyses))
            .collect();
        let manifest = self.manifest(&descriptives, &analyses);

        ComplianceReport {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            summary,
            descriptives,
            analyses,
            checklist,
            manifest,
        }
    }

    fn checklist_item(
        &self,
        kind: AnalysisKind,
        summary: &DatasetSummary,
        analyses: &[AnalysisResult],
    ) -> ChecklistItem {
        let mut item = ChecklistItem {
            kind,
            title: kind.title().to_string(),
            state: ChecklistState::NotRequested,
            notes: Vec::new(),
        };
        if !self.requested.contains(&kind) {
            return item;
        }

        if kind == AnalysisKind::Descriptive {
            item.state = if summary.total_responses == 0 {
                ChecklistState::Skipped {
                    reason: "no valid responses were loaded".to_string(),
                }
            } else {
                ChecklistState::Completed
            };
            return item;
        }

        let results: Vec<&AnalysisResult> = analyses
            .iter()
            .filter(|r| kind_of(r.model_type) == kind)
            .collect();
        item.state = checklist_state(&results);
        item.notes = results
            .iter()
            .filter(|r| !matches!(r.status, AnalysisStatus::Completed))
            .map(|r| {
                format!(
                    "{}: {}{}",
                    r.name,
                    r.status.label(),
                    r.status
                        .reason()
                        .map(|reason| format!(" ({})", reason))
                        .unwrap_or_default()
                )
            })
            .collect();
        item
    }

    fn manifest(&self, descriptives: &Descriptives, analyses: &[AnalysisResult]) -> Vec<ArtifactEntry> {
        let generated = |file_name: String, kind: ArtifactKind| ArtifactEntry {
            file_name,
            kind,
            generated: true,
        };
        let placeholder = |file_name: String| ArtifactEntry {
            file_name,
            kind: ArtifactKind::Figure,
            generated: false,
        };

        let mut manifest = vec![
            generated(REPORT_MARKDOWN.to_string(), ArtifactKind::Report),
            generated(REPORT_JSON.to_string(), ArtifactKind::Report),
            generated(SUMMARY_JSON.to_string(), ArtifactKind::Summary),
        ];
        manifest.extend(
            analyses
                .iter()
                .map(|r| generated(result_file_name(r), ArtifactKind::Table)),
        );

        if !descriptives.is_empty() {
            manifest.push(placeholder("figure_response_distributions.png".to_string()));
        }
        for result in analyses.iter().filter(|r| r.status.produced_estimates()) {
            let figure = match kind_of(result.model_type) {
                AnalysisKind::MixedModel => "condition_effects",
                AnalysisKind::Logistic => "odds_ratios",
                AnalysisKind::Anova => "group_means",
                AnalysisKind::Icc => "item_agreement",
                AnalysisKind::Descriptive => continue,
            };
            manifest.push(placeholder(format!("figure_{}_{}.png", result.name, figure)));
        }
        manifest
    }
}

/// Category state from its individual results.
///
/// A category counts as completed as soon as one result produced estimates;
/// results that did not are listed in the item's notes.
fn checklist_state(results: &[&AnalysisResult]) -> ChecklistState {
    if results.is_empty() {
        return ChecklistState::Skipped {
            reason: "no analyses of this kind were scheduled".to_string(),
        };
    }

    let fallbacks: Vec<&str> = results
        .iter()
        .filter_map(|r| match &r.status {
            AnalysisStatus::Fallback { reason } => Some(reason.as_str()),
            _ => None,
        })
        .collect();
    if results.iter().any(|r| r.status == AnalysisStatus::Completed) && fallbacks.is_empty() {
        return ChecklistState::Completed;
    }
    if !fallbacks.is_empty() {
        return ChecklistState::CompletedViaFallback {
            reason: fallbacks.join("; "),
        };
    }

    let reasons = results
        .iter()
        .filter_map(|r| r.status.reason().map(|reason| format!("{}: {}", r.name, reason)))
        .collect::<Vec<_>>()
        .join("; ");
    if results
        .iter()
        .any(|r| matches!(r.status, AnalysisStatus::Failed { .. }))
    {
        ChecklistState::Failed { reason: reasons }
    } else {
        ChecklistState::Skipped { reason: reasons }
    }
}
