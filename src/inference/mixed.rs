//! Linear mixed model for trust ratings
//!
//! rating ~ face_view + (1 | participant) + (1 | image)
//!
//! Crossed random intercepts are estimated by EM-REML iterations on
//! Henderson's mixed-model equations:
//!
//! ```text
//! | X'X   X'Z          | |b|   |X'y|
//! | Z'X   Z'Z + Λ      | |u| = |Z'y|      Λ = diag(σe²/σp² ..., σe²/σi² ...)
//! ```
//!
//! When the design cannot support random effects (too few participants or
//! images, too few observations, singular equations) the analysis falls back
//! to ordinary least squares on the face-view dummies and says so in its status.

use super::{is_significant, Analysis, ConditionDesign};
use crate::normalizer::LongFormDataset;
use crate::stats::descriptive::{mean, variance};
use crate::stats::distributions::{normal_two_sided_p, t_two_sided_p};
use crate::stats::linalg::{dot, Matrix};
use crate::{AnalysisKind, AnalysisResult, AnalysisStatus, Column, FaceView, ModelType, QuestionType, ResponseRecord, ResultTable};
use std::collections::BTreeMap;

const MIN_LEVELS: usize = 3;
const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-8;
/// Variance components are kept above this fraction of var(y)
const VARIANCE_FLOOR: f64 = 1e-10;
const Z_95: f64 = 1.959_963_984_540_054;

pub struct MixedModelAnalysis {
    question: QuestionType,
    reference: FaceView,
}

impl MixedModelAnalysis {
    pub fn new(question: QuestionType, reference: FaceView) -> Self {
        Self { question, reference }
    }
}

impl Analysis for MixedModelAnalysis {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::MixedModel
    }

    fn name(&self) -> String {
        format!("mixed_model_{}", self.question)
    }

    fn run(&self, dataset: &LongFormDataset) -> AnalysisResult {
        let name = self.name();
        let records: Vec<&ResponseRecord> = dataset
            .by_question(self.question)
            .filter(|r| r.value.as_rating().is_some())
            .collect();

        if records.is_empty() {
            return AnalysisResult::skipped(
                &name,
                ModelType::MixedEffects,
                format!("no {} responses", self.question),
            );
        }
        let Some(design) = ConditionDesign::for_records(&records, self.reference) else {
            return AnalysisResult::skipped(
                &name,
                ModelType::MixedEffects,
                "only one face view present; no condition contrast to estimate",
            );
        };

        let data = ModelData::new(&records, &design);
        if variance(&data.y) <= 0.0 {
            return AnalysisResult::failed(
                &name,
                ModelType::MixedEffects,
                format!("{} has zero variance", self.question),
            );
        }

        let q = data.participants.len() + data.images.len();
        let n = data.y.len();
        let p = design.n_params();

        let fallback_reason = if data.participants.len() < MIN_LEVELS {
            Some(format!(
                "{} participants; random effects need at least {}",
                data.participants.len(),
                MIN_LEVELS
            ))
        } else if data.images.len() < MIN_LEVELS {
            Some(format!(
                "{} images; random effects need at least {}",
                data.images.len(),
                MIN_LEVELS
            ))
        } else if n <= p + q {
            Some(format!(
                "{} observations for {} fixed and {} random parameters",
                n, p, q
            ))
        } else {
            None
        };

        let mut result = match fallback_reason {
            None => match fit_reml(&data, p) {
                Some(fit) => mixed_result(&name, &data, &design, &fit),
                None => fallback(
                    &name,
                    &data,
                    &design,
                    "mixed-model equations are singular".to_string(),
                ),
            },
            Some(reason) => fallback(&name, &data, &design, reason),
        };

        result.n_observations = n;
        result.n_participants = data.participants.len();
        result.n_groups = data.images.len();
        if let Some(note) = design.reference_note() {
            result.notes.push(note);
        }
        result
    }
}

/// Response vector, fixed-effect design and random-effect level indices
struct ModelData {
    y: Vec<f64>,
    x: Matrix,
    participant_of: Vec<usize>,
    image_of: Vec<usize>,
    participants: Vec<String>,
    images: Vec<String>,
}

impl ModelData {
    fn new(records: &[&ResponseRecord], design: &ConditionDesign) -> Self {
        let participants = levels(records.iter().map(|r| r.participant_id.as_str()));
        let images = levels(records.iter().map(|r| r.image_id.as_str()));

        let mut y = Vec::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());
        let mut participant_of = Vec::with_capacity(records.len());
        let mut image_of = Vec::with_capacity(records.len());
        for record in records {
            y.push(record.value.as_rating().unwrap_or(f64::NAN));
            rows.push(design.row(record.face_view));
            participant_of.push(participants[record.participant_id.as_str()]);
            image_of.push(images[record.image_id.as_str()]);
        }

        Self {
            y,
            x: Matrix::from_rows(&rows),
            participant_of,
            image_of,
            participants: participants.into_keys().map(str::to_string).collect(),
            images: images.into_keys().map(str::to_string).collect(),
        }
    }
}

/// Sorted level -> index
fn levels<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<&'a str, usize> {
    let mut map: BTreeMap<&str, usize> = values.map(|v| (v, 0)).collect();
    for (i, index) in map.values_mut().enumerate() {
        *index = i;
    }
    map
}

struct RemlFit {
    fixed: Vec<f64>,
    fixed_cov: Matrix,
    var_participant: f64,
    var_image: f64,
    var_residual: f64,
    iterations: usize,
    converged: bool,
}

/// EM-REML on Henderson's equations; `None` if the equations are singular
fn fit_reml(data: &ModelData, p: usize) -> Option<RemlFit> {
    let n = data.y.len();
    let qp = data.participants.len();
    let qi = data.images.len();
    let dim = p + qp + qi;

    // W = [X | Zp | Zi]; C0 = W'W and rhs = W'y are fixed across iterations
    let mut w = Matrix::zeros(n, dim);
    for r in 0..n {
        for c in 0..p {
            w[(r, c)] = data.x[(r, c)];
        }
        w[(r, p + data.participant_of[r])] = 1.0;
        w[(r, p + qp + data.image_of[r])] = 1.0;
    }
    let c0 = w.gram();
    let rhs = w.t_mul_vec(&data.y);
    let yy = dot(&data.y, &data.y);

    let total_var = variance(&data.y);
    let floor = VARIANCE_FLOOR * total_var;
    let mut var_e = 0.5 * total_var;
    let mut var_p = 0.25 * total_var;
    let mut var_i = 0.25 * total_var;

    let solve = |var_e: f64, var_p: f64, var_i: f64| -> Option<(Matrix, Vec<f64>)> {
        let mut c = c0.clone();
        for j in 0..qp {
            c[(p + j, p + j)] += var_e / var_p;
        }
        for j in 0..qi {
            c[(p + qp + j, p + qp + j)] += var_e / var_i;
        }
        let c_inv = c.inverse()?;
        let solution = c_inv.mul_vec(&rhs);
        Some((c_inv, solution))
    };

    let mut iterations = 0;
    let mut converged = false;
    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let (c_inv, solution) = solve(var_e, var_p, var_i)?;

        let u_p = &solution[p..p + qp];
        let u_i = &solution[p + qp..];
        let trace_p: f64 = (p..p + qp).map(|j| c_inv[(j, j)]).sum();
        let trace_i: f64 = (p + qp..dim).map(|j| c_inv[(j, j)]).sum();

        let new_e = ((yy - dot(&solution, &rhs)) / (n - p) as f64).max(floor);
        let new_p = ((dot(u_p, u_p) + var_e * trace_p) / qp as f64).max(floor);
        let new_i = ((dot(u_i, u_i) + var_e * trace_i) / qi as f64).max(floor);

        let change = [(new_e, var_e), (new_p, var_p), (new_i, var_i)]
            .iter()
            .map(|(new, old)| (new - old).abs() / old.abs().max(floor))
            .fold(0.0_f64, f64::max);

        var_e = new_e;
        var_p = new_p;
        var_i = new_i;

        if change < TOLERANCE {
            converged = true;
            break;
        }
    }
    log::debug!(
        "EM-REML: {} iterations, converged = {}, σe² = {:.4}, σp² = {:.4}, σi² = {:.4}",
        iterations,
        converged,
        var_e,
        var_p,
        var_i
    );

    let (c_inv, solution) = solve(var_e, var_p, var_i)?;
    let mut fixed_cov = Matrix::zeros(p, p);
    for i in 0..p {
        for j in 0..p {
            fixed_cov[(i, j)] = var_e * c_inv[(i, j)];
        }
    }

    Some(RemlFit {
        fixed: solution[..p].to_vec(),
        fixed_cov,
        var_participant: var_p,
        var_image: var_i,
        var_residual: var_e,
        iterations,
        converged,
    })
}

fn mixed_result(name: &str, data: &ModelData, design: &ConditionDesign, fit: &RemlFit) -> AnalysisResult {
    let mut result = AnalysisResult::new(name, ModelType::MixedEffects);

    let mut table = ResultTable::new(
        "fixed_effects",
        vec![
            Column::coefficient("estimate"),
            Column::coefficient("std_error"),
            Column::statistic("z"),
            Column::coefficient("p"),
            Column::coefficient("ci_lower"),
            Column::coefficient("ci_upper"),
        ],
    );
    for (i, term) in design.terms().into_iter().enumerate() {
        let estimate = fit.fixed[i];
        let se = fit.fixed_cov[(i, i)].max(0.0).sqrt();
        let z = estimate / se;
        let p = normal_two_sided_p(z);
        let significant = is_significant(p);

        result.statistics.insert(term.clone(), estimate);
        result.statistics.insert(format!("{}_p", term), p);
        result.significance_flags.insert(term.clone(), significant);
        table.push(
            term,
            vec![
                Some(estimate),
                Some(se),
                Some(z),
                Some(p),
                Some(estimate - Z_95 * se),
                Some(estimate + Z_95 * se),
            ],
            Some(significant),
        );
    }
    result.tables.push(table);

    let mut components = ResultTable::new(
        "variance_components",
        vec![Column::coefficient("variance"), Column::coefficient("std_dev")],
    );
    for (label, var) in [
        ("participant", fit.var_participant),
        ("image", fit.var_image),
        ("residual", fit.var_residual),
    ] {
        components.push(label, vec![Some(var), Some(var.sqrt())], None);
        result.statistics.insert(format!("var_{}", label), var);
    }
    result.tables.push(components);

    // Nakagawa & Schielzeth R²
    let fitted = data.x.mul_vec(&fit.fixed);
    let var_fixed = variance(&fitted);
    let var_random = fit.var_participant + fit.var_image;
    let total = var_fixed + var_random + fit.var_residual;
    result.fit_diagnostics.insert("r2_marginal".to_string(), var_fixed / total);
    result
        .fit_diagnostics
        .insert("r2_conditional".to_string(), (var_fixed + var_random) / total);
    result
        .fit_diagnostics
        .insert("iterations".to_string(), fit.iterations as f64);
    result
        .fit_diagnostics
        .insert("converged".to_string(), if fit.converged { 1.0 } else { 0.0 });
    result
        .fit_diagnostics
        .insert("mean_response".to_string(), mean(&data.y));

    if !fit.converged {
        result.notes.push(format!(
            "EM-REML stopped after {} iterations without meeting the convergence tolerance",
            fit.iterations
        ));
    }
    result
}

/// Fixed-effects-only regression on the face-view dummies
fn fallback(name: &str, data: &ModelData, design: &ConditionDesign, reason: String) -> AnalysisResult {
    let n = data.y.len();
    let p = design.n_params();
    if n <= p {
        return AnalysisResult::failed(
            name,
            ModelType::FixedEffectsFallback,
            format!("{}; {} observations are too few for the fallback regression", reason, n),
        );
    }
    let Some(xtx_inv) = data.x.gram().inverse() else {
        return AnalysisResult::failed(
            name,
            ModelType::FixedEffectsFallback,
            format!("{}; fallback design matrix is singular", reason),
        );
    };

    let mut result = AnalysisResult::new(name, ModelType::FixedEffectsFallback);
    result.status = AnalysisStatus::Fallback {
        reason: reason.clone(),
    };
    result.notes.push(format!(
        "Random effects for participant and image were not estimated ({}). \
         Coefficients are condition mean differences from a fixed-effects regression.",
        reason
    ));

    let b = xtx_inv.mul_vec(&data.x.t_mul_vec(&data.y));
    let fitted = data.x.mul_vec(&b);
    let rss: f64 = data.y.iter().zip(&fitted).map(|(y, f)| (y - f).powi(2)).sum();
    let y_mean = mean(&data.y);
    let tss: f64 = data.y.iter().map(|y| (y - y_mean).powi(2)).sum();
    let df = (n - p) as f64;
    let s2 = rss / df;

    let mut table = ResultTable::new(
        "fixed_effects",
        vec![
            Column::coefficient("estimate"),
            Column::coefficient("std_error"),
            Column::statistic("t"),
            Column::coefficient("p"),
        ],
    );
    for (i, term) in design.terms().into_iter().enumerate() {
        let se = (s2 * xtx_inv[(i, i)]).max(0.0).sqrt();
        let t = b[i] / se;
        let p = t_two_sided_p(t, df);
        let significant = is_significant(p);
        result.statistics.insert(term.clone(), b[i]);
        result.statistics.insert(format!("{}_p", term), p);
        result.significance_flags.insert(term.clone(), significant);
        table.push(term, vec![Some(b[i]), Some(se), Some(t), Some(p)], Some(significant));
    }
    result.tables.push(table);

    let r2 = 1.0 - rss / tss;
    result.fit_diagnostics.insert("r2".to_string(), r2);
    result.fit_diagnostics.insert(
        "r2_adjusted".to_string(),
        1.0 - (1.0 - r2) * (n as f64 - 1.0) / df,
    );
    result.fit_diagnostics.insert("df_residual".to_string(), df);
    result.fit_diagnostics.insert("mean_response".to_string(), y_mean);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::test_support::rating;

    const TRUST: QuestionType = QuestionType::TrustRating;

    /// Every participant rates every image once under every view
    fn balanced(participants: usize, images: usize) -> LongFormDataset {
        let mut records = Vec::new();
        for p in 0..participants {
            for i in 0..images {
                for (v, view) in FaceView::ALL.iter().enumerate() {
                    let effect = [0.0, -0.8, -1.1][v];
                    let participant = 0.3 * (p as f64 - 1.5);
                    let image = 0.2 * ((i % 3) as f64 - 1.0);
                    let noise = 0.15 * (((p * 7 + i * 3 + v * 5) % 5) as f64 - 2.0);
                    records.push(rating(
                        &format!("P{}", p),
                        &format!("img{}", i),
                        *view,
                        TRUST,
                        4.5 + effect + participant + image + noise,
                    ));
                }
            }
        }
        LongFormDataset::from_records(records, false)
    }

    fn view_mean(dataset: &LongFormDataset, view: FaceView) -> f64 {
        let values: Vec<f64> = dataset
            .by_question(TRUST)
            .filter(|r| r.face_view == view)
            .filter_map(|r| r.value.as_rating())
            .collect();
        mean(&values)
    }

    #[test]
    fn test_balanced_design_recovers_mean_differences() {
        let dataset = balanced(4, 6);
        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);

        assert_eq!(result.model_type, ModelType::MixedEffects);
        assert_eq!(result.status, AnalysisStatus::Completed);
        assert_eq!(result.n_observations, 72);
        assert_eq!(result.n_participants, 4);
        assert_eq!(result.n_groups, 6);

        let full = view_mean(&dataset, FaceView::Full);
        let left = view_mean(&dataset, FaceView::Left);
        let right = view_mean(&dataset, FaceView::Right);
        assert!((result.statistics["intercept"] - full).abs() < 1e-6);
        assert!((result.statistics["face_view_left"] - (left - full)).abs() < 1e-6);
        assert!((result.statistics["face_view_right"] - (right - full)).abs() < 1e-6);
        assert_eq!(result.significance_flags.get("face_view_right"), Some(&true));

        let r2m = result.fit_diagnostics["r2_marginal"];
        let r2c = result.fit_diagnostics["r2_conditional"];
        assert!(r2m > 0.0 && r2m <= r2c && r2c <= 1.0);
        assert!(result.statistics["var_participant"] > 0.0);
        assert!(result.table("variance_components").is_some());
    }

    /// Method-of-moments variance components of a balanced participant x image x view layout
    fn anova_components(dataset: &LongFormDataset, participants: usize, images: usize) -> (f64, f64, f64) {
        let views = FaceView::ALL.len() as f64;
        let (np, ni) = (participants as f64, images as f64);
        let mut by_participant: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut by_image: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut by_view: BTreeMap<FaceView, Vec<f64>> = BTreeMap::new();
        let mut all = Vec::new();
        for r in dataset.by_question(TRUST) {
            let y = r.value.as_rating().unwrap();
            by_participant.entry(r.participant_id.as_str()).or_default().push(y);
            by_image.entry(r.image_id.as_str()).or_default().push(y);
            by_view.entry(r.face_view).or_default().push(y);
            all.push(y);
        }
        let grand = mean(&all);
        let ss = |groups: Vec<&Vec<f64>>| -> f64 {
            groups
                .iter()
                .map(|g| g.len() as f64 * (mean(g) - grand).powi(2))
                .sum()
        };
        let ss_p = ss(by_participant.values().collect());
        let ss_i = ss(by_image.values().collect());
        let ss_v = ss(by_view.values().collect());
        let ss_total: f64 = all.iter().map(|y| (y - grand).powi(2)).sum();

        let df_e = all.len() as f64 - np - ni - views + 2.0;
        let ms_e = (ss_total - ss_p - ss_i - ss_v) / df_e;
        let ms_p = ss_p / (np - 1.0);
        let ms_i = ss_i / (ni - 1.0);
        (ms_e, (ms_p - ms_e) / (ni * views), (ms_i - ms_e) / (np * views))
    }

    #[test]
    fn test_balanced_variance_components_match_anova_estimators() {
        let dataset = balanced(4, 6);
        let (var_e, var_p, var_i) = anova_components(&dataset, 4, 6);
        assert!(var_e > 0.0 && var_p > 0.0 && var_i > 0.0);

        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);
        assert_eq!(result.status, AnalysisStatus::Completed);
        let close = |got: f64, want: f64| (got - want).abs() <= 1e-3 * want;
        assert!(close(result.statistics["var_residual"], var_e), "σe² {} vs {}", result.statistics["var_residual"], var_e);
        assert!(close(result.statistics["var_participant"], var_p), "σp² {} vs {}", result.statistics["var_participant"], var_p);
        assert!(close(result.statistics["var_image"], var_i), "σi² {} vs {}", result.statistics["var_image"], var_i);
        assert_eq!(result.fit_diagnostics["converged"], 1.0);
    }

    #[test]
    fn test_unbalanced_design_keeps_every_observation() {
        let dataset = balanced(4, 6);
        // drop a third of one participant's trials
        let records: Vec<_> = dataset
            .records()
            .iter()
            .filter(|r| !(r.participant_id == "P0" && r.image_id < "img2".to_string()))
            .cloned()
            .collect();
        let kept = records.len();
        let dataset = LongFormDataset::from_records(records, false);

        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);
        assert_eq!(result.n_observations, kept);
        assert!(result.status.produced_estimates());
    }

    #[test]
    fn test_too_few_participants_falls_back() {
        let dataset = balanced(2, 6);
        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);

        assert_eq!(result.model_type, ModelType::FixedEffectsFallback);
        match &result.status {
            AnalysisStatus::Fallback { reason } => assert!(reason.contains("2 participants")),
            other => panic!("expected fallback, got {:?}", other),
        }
        assert!(!result.notes.is_empty());

        let full = view_mean(&dataset, FaceView::Full);
        let left = view_mean(&dataset, FaceView::Left);
        assert!((result.statistics["face_view_left"] - (left - full)).abs() < 1e-9);
        assert!(result.fit_diagnostics.contains_key("r2"));
    }

    #[test]
    fn test_single_view_skipped() {
        let dataset = LongFormDataset::from_records(
            vec![
                rating("P1", "img1", FaceView::Full, TRUST, 3.0),
                rating("P2", "img1", FaceView::Full, TRUST, 4.0),
            ],
            false,
        );
        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);
        assert!(matches!(result.status, AnalysisStatus::Skipped { .. }));
    }

    #[test]
    fn test_constant_ratings_fail() {
        let dataset = LongFormDataset::from_records(
            vec![
                rating("P1", "img1", FaceView::Full, TRUST, 4.0),
                rating("P1", "img1", FaceView::Left, TRUST, 4.0),
                rating("P2", "img1", FaceView::Full, TRUST, 4.0),
            ],
            false,
        );
        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);
        assert!(matches!(result.status, AnalysisStatus::Failed { .. }));
    }

    #[test]
    fn test_missing_reference_is_noted() {
        let dataset = balanced(4, 6);
        let records: Vec<_> = dataset
            .records()
            .iter()
            .filter(|r| r.face_view != FaceView::Full)
            .cloned()
            .collect();
        let dataset = LongFormDataset::from_records(records, false);
        let result = MixedModelAnalysis::new(TRUST, FaceView::Full).run(&dataset);
        assert!(result.statistics.contains_key("face_view_right"));
        assert!(!result.statistics.contains_key("face_view_left"));
        assert!(result.notes.iter().any(|n| n.contains("used as reference")));
    }
}
