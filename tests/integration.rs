//! Integration tests: full pipeline against test-data/study/

use facestats::config::Config;
use facestats::normalizer::RejectionReason;
use facestats::{
    run_pipeline, AnalysisKind, AnalysisStatus, ChecklistState, ComplianceReport, FaceView, ModelType,
    QuestionType,
};
use std::path::Path;

const STUDY_DIR: &str = "test-data/study";

fn study_report() -> ComplianceReport {
    run_pipeline(Path::new(STUDY_DIR), &Config::default())
        .unwrap_or_else(|e| panic!("pipeline on {} failed: {}", STUDY_DIR, e))
}

fn analysis<'a>(report: &'a ComplianceReport, name: &str) -> &'a facestats::AnalysisResult {
    report
        .analyses
        .iter()
        .find(|a| a.name == name)
        .unwrap_or_else(|| panic!("no analysis named {}", name))
}

// --- Dataset summary ---

#[test]
fn summary_counts_every_valid_response() {
    let summary = study_report().summary;
    // 4 files x 12 trials x 3 questions, minus the out-of-range rating
    assert_eq!(summary.total_responses, 143);
    assert_eq!(summary.unique_participants, 4);
    assert_eq!(summary.unique_images, 4);
    assert_eq!(summary.responses_by_question_type[&QuestionType::TrustRating], 47);
    assert_eq!(summary.responses_by_question_type[&QuestionType::MascChoice], 48);
    assert_eq!(summary.responses_by_question_type[&QuestionType::FemChoice], 48);
    assert_eq!(summary.responses_by_question_type[&QuestionType::EmotionRating], 0);
    assert_eq!(summary.responses_by_face_view[&FaceView::Full], 48);
    assert_eq!(summary.responses_by_face_view[&FaceView::Right], 47);
}

#[test]
fn summary_accounts_for_rejections() {
    let summary = study_report().summary;
    assert_eq!(summary.rejected_rows, 4);
    for reason in [
        RejectionReason::MissingImage,
        RejectionReason::UnknownFaceView,
        RejectionReason::OutOfRange,
        RejectionReason::UnknownQuestionType,
    ] {
        assert_eq!(summary.rejections_by_reason.get(&reason), Some(&1), "{}", reason);
    }
}

#[test]
fn sample_demo_and_broken_files_are_not_loaded() {
    let files = study_report().summary.files;
    assert_eq!(files.attempted, 5);
    assert_eq!(files.succeeded, 4);
    assert_eq!(files.skipped, 1);
    assert_eq!(files.skipped_files[0].file_name, "participant_99_broken.csv");
}

#[test]
fn participant_ids_come_from_columns_or_file_names() {
    let summary = study_report().summary;
    let counts = summary.participant_response_counts;
    assert_eq!(counts.count, 4);
    assert_eq!(counts.min, Some(35.0));
    assert_eq!(counts.max, Some(36.0));
}

#[test]
fn date_range_spans_parsed_timestamps() {
    let range = study_report().summary.date_range;
    assert_eq!(range.start.unwrap().to_string(), "2024-03-04 10:00:00");
    assert_eq!(range.end.unwrap().to_string(), "2024-03-04 10:11:00");
}

// --- Analyses ---

#[test]
fn analyses_run_in_fixed_order() {
    let names: Vec<String> = study_report().analyses.into_iter().map(|a| a.name).collect();
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
fn mixed_model_is_fitted_in_full() {
    let report = study_report();
    let mixed = analysis(&report, "mixed_model_trust_rating");
    assert_eq!(mixed.model_type, ModelType::MixedEffects);
    assert_eq!(mixed.status, AnalysisStatus::Completed);
    assert_eq!(mixed.n_observations, 47);
    assert_eq!(mixed.n_participants, 4);
    assert_eq!(mixed.n_groups, 4);
    // full faces were rated highest in every file
    assert!(mixed.statistics["face_view_left"] < 0.0);
    assert!(mixed.statistics["face_view_right"] < 0.0);
}

#[test]
fn logistic_models_report_odds_ratios() {
    let report = study_report();
    for name in ["logistic_masc_choice", "logistic_fem_choice"] {
        let result = analysis(&report, name);
        assert_eq!(result.status, AnalysisStatus::Completed, "{}", name);
        assert_eq!(result.n_observations, 48);
        let table = result.table("odds_ratios").expect("odds ratio table");
        assert!(table.rows.iter().all(|r| r.values.iter().all(|v| v.map_or(true, f64::is_finite))));
        let accuracy = result.fit_diagnostics["accuracy_percent"];
        assert!((0.0..=100.0).contains(&accuracy));
    }
}

#[test]
fn anova_detects_face_view_effect() {
    let report = study_report();
    let anova = analysis(&report, "anova_trust_rating_by_face_view");
    assert_eq!(anova.status, AnalysisStatus::Completed);
    assert!(anova.statistics["p"] < 0.001);
    assert_eq!(anova.fit_diagnostics["df_between"], 2.0);
    assert_eq!(anova.fit_diagnostics["df_within"], 44.0);
    assert!((anova.statistics["mean_full"] - 5.25).abs() < 1e-9);
    assert!((anova.statistics["mean_right"] - 3.4).abs() < 1e-9);
    assert_eq!(anova.table("post_hoc").map(|t| t.rows.len()), Some(3));
}

#[test]
fn icc_skips_missing_rating_type_explicitly() {
    let report = study_report();
    let trust = analysis(&report, "icc_trust_rating");
    assert_eq!(trust.status, AnalysisStatus::Completed);
    assert_eq!(trust.n_groups, 4);

    let emotion = analysis(&report, "icc_emotion_rating");
    assert!(matches!(emotion.status, AnalysisStatus::Skipped { .. }));
    assert!(emotion.statistics.is_empty());
}

// --- Checklist and manifest ---

#[test]
fn checklist_marks_every_category_completed() {
    let report = study_report();
    for item in &report.checklist {
        assert_eq!(item.state, ChecklistState::Completed, "{:?}", item.kind);
    }
    let icc = report.checklist.iter().find(|i| i.kind == AnalysisKind::Icc).unwrap();
    assert_eq!(icc.notes.len(), 1);
}

#[test]
fn manifest_lists_a_table_per_analysis() {
    let report = study_report();
    for result in &report.analyses {
        let file = format!("{}_results.csv", result.name);
        assert!(
            report.manifest.iter().any(|a| a.file_name == file),
            "{} missing from manifest",
            file
        );
    }
}

#[test]
fn restricting_analyses_marks_others_not_requested() {
    let config: Config = serde_json::from_str(r#"{ "analyses": ["descriptive", "anova"] }"#).unwrap();
    let report = run_pipeline(Path::new(STUDY_DIR), &config).unwrap();
    assert_eq!(report.analyses.len(), 1);
    let mixed = report
        .checklist
        .iter()
        .find(|i| i.kind == AnalysisKind::MixedModel)
        .unwrap();
    assert_eq!(mixed.state, ChecklistState::NotRequested);
}
