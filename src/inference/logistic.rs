//! Logistic regression of a binary choice on face view (IRLS)

use super::{is_significant, Analysis, ConditionDesign};
use crate::aggregate::choice_label;
use crate::normalizer::LongFormDataset;
use crate::stats::distributions::{chi_square_sf, normal_two_sided_p};
use crate::stats::linalg::Matrix;
use crate::{AnalysisKind, AnalysisResult, Column, FaceView, ModelType, QuestionType, ResponseRecord, ResultTable};
use std::collections::{BTreeMap, BTreeSet};

const MAX_ITERATIONS: usize = 50;
const TOLERANCE: f64 = 1e-10;
const Z_95: f64 = 1.959_963_984_540_054;

pub struct LogisticAnalysis {
    question: QuestionType,
    reference: FaceView,
}

impl LogisticAnalysis {
    pub fn new(question: QuestionType, reference: FaceView) -> Self {
        Self { question, reference }
    }
}

impl Analysis for LogisticAnalysis {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Logistic
    }

    fn name(&self) -> String {
        format!("logistic_{}", self.question)
    }

    fn run(&self, dataset: &LongFormDataset) -> AnalysisResult {
        let name = self.name();
        let records: Vec<&ResponseRecord> = dataset
            .by_question(self.question)
            .filter(|r| r.value.as_choice().is_some())
            .collect();

        if records.is_empty() {
            return AnalysisResult::skipped(
                &name,
                ModelType::Logistic,
                format!("no {} responses", self.question),
            );
        }
        let Some(design) = ConditionDesign::for_records(&records, self.reference) else {
            return AnalysisResult::skipped(
                &name,
                ModelType::Logistic,
                "only one face view present; no condition contrast to estimate",
            );
        };

        let n_participants = records
            .iter()
            .map(|r| r.participant_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        if let Some(reason) = degenerate_outcome(&records, self.question) {
            let mut result = AnalysisResult::failed(&name, ModelType::Logistic, reason);
            result.n_observations = records.len();
            result.n_participants = n_participants;
            result.n_groups = design.n_params();
            return result;
        }

        let y: Vec<f64> = records
            .iter()
            .map(|r| if r.value.as_choice() == Some(true) { 1.0 } else { 0.0 })
            .collect();
        let x = Matrix::from_rows(&records.iter().map(|r| design.row(r.face_view)).collect::<Vec<_>>());

        let mut result = match fit_irls(&x, &y) {
            Some(fit) => logistic_result(&name, &design, &x, &y, &fit),
            None => AnalysisResult::failed(
                &name,
                ModelType::Logistic,
                "information matrix is singular; odds ratios are not estimable",
            ),
        };
        result.n_observations = records.len();
        result.n_participants = n_participants;
        result.n_groups = design.n_params();
        if let Some(note) = design.reference_note() {
            result.notes.push(note);
        }
        result
    }
}

/// Reason the outcome cannot be modeled, if any condition (or the whole outcome) is constant
fn degenerate_outcome(records: &[&ResponseRecord], question: QuestionType) -> Option<String> {
    let mut by_view: BTreeMap<FaceView, BTreeSet<bool>> = BTreeMap::new();
    for record in records {
        if let Some(choice) = record.value.as_choice() {
            by_view.entry(record.face_view).or_default().insert(choice);
        }
    }

    let overall: BTreeSet<bool> = by_view.values().flatten().copied().collect();
    if overall.len() < 2 {
        let value = overall.iter().next().copied().unwrap_or(false);
        return Some(format!(
            "degenerate fit: every {} response is '{}'",
            question,
            choice_label(value)
        ));
    }

    let constant: Vec<String> = by_view
        .iter()
        .filter(|(_, values)| values.len() < 2)
        .map(|(view, values)| {
            let value = values.iter().next().copied().unwrap_or(false);
            format!("{} (all '{}')", view, choice_label(value))
        })
        .collect();
    if constant.is_empty() {
        None
    } else {
        Some(format!(
            "degenerate fit: zero outcome variance in face view {}; odds ratios would be infinite",
            constant.join(", ")
        ))
    }
}

struct LogisticFit {
    beta: Vec<f64>,
    cov: Matrix,
    iterations: usize,
    converged: bool,
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// Iteratively reweighted least squares; `None` if X'WX becomes singular
fn fit_irls(x: &Matrix, y: &[f64]) -> Option<LogisticFit> {
    let n = x.rows();
    let p = x.cols();
    let mut beta = vec![0.0; p];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let eta = x.mul_vec(&beta);

        let mut xtwx = Matrix::zeros(p, p);
        let mut xtwz = vec![0.0; p];
        for r in 0..n {
            let mu = sigmoid(eta[r]);
            let w = (mu * (1.0 - mu)).max(1e-12);
            let z = eta[r] + (y[r] - mu) / w;
            for i in 0..p {
                let xi = x[(r, i)];
                xtwz[i] += xi * w * z;
                for j in 0..p {
                    xtwx[(i, j)] += xi * w * x[(r, j)];
                }
            }
        }

        let next = xtwx.inverse()?.mul_vec(&xtwz);
        let step = next
            .iter()
            .zip(&beta)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        beta = next;
        if step < TOLERANCE {
            converged = true;
            break;
        }
    }
    log::debug!("IRLS: {} iterations, converged = {}", iterations, converged);

    let eta = x.mul_vec(&beta);
    let mut info = Matrix::zeros(p, p);
    for r in 0..n {
        let mu = sigmoid(eta[r]);
        let w = mu * (1.0 - mu);
        for i in 0..p {
            for j in 0..p {
                info[(i, j)] += x[(r, i)] * w * x[(r, j)];
            }
        }
    }

    Some(LogisticFit {
        beta,
        cov: info.inverse()?,
        iterations,
        converged,
    })
}

fn log_likelihood(y: &[f64], mu: impl Iterator<Item = f64>) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(y, m)| {
            let m = m.clamp(1e-15, 1.0 - 1e-15);
            y * m.ln() + (1.0 - y) * (1.0 - m).ln()
        })
        .sum()
}

fn logistic_result(
    name: &str,
    design: &ConditionDesign,
    x: &Matrix,
    y: &[f64],
    fit: &LogisticFit,
) -> AnalysisResult {
    let mut result = AnalysisResult::new(name, ModelType::Logistic);

    let mut table = ResultTable::new(
        "odds_ratios",
        vec![
            Column::coefficient("estimate"),
            Column::coefficient("std_error"),
            Column::statistic("z"),
            Column::coefficient("p"),
            Column::coefficient("odds_ratio"),
            Column::coefficient("ci_lower"),
            Column::coefficient("ci_upper"),
        ],
    );
    for (i, term) in design.terms().into_iter().enumerate() {
        let b = fit.beta[i];
        let se = fit.cov[(i, i)].max(0.0).sqrt();
        let z = b / se;
        let p = normal_two_sided_p(z);
        let significant = is_significant(p);
        let odds_ratio = b.exp();

        result.statistics.insert(term.clone(), b);
        result.statistics.insert(format!("{}_p", term), p);
        if i > 0 {
            result
                .statistics
                .insert(format!("{}_odds_ratio", term), odds_ratio);
            result.significance_flags.insert(term.clone(), significant);
        }
        table.push(
            term,
            vec![
                Some(b),
                Some(se),
                Some(z),
                Some(p),
                Some(odds_ratio),
                Some((b - Z_95 * se).exp()),
                Some((b + Z_95 * se).exp()),
            ],
            Some(significant),
        );
    }
    result.tables.push(table);

    let mu: Vec<f64> = x.mul_vec(&fit.beta).into_iter().map(sigmoid).collect();
    let n = y.len() as f64;
    let y_bar = y.iter().sum::<f64>() / n;
    let ll = log_likelihood(y, mu.iter().copied());
    let ll_null = log_likelihood(y, std::iter::repeat(y_bar));
    let lr = (2.0 * (ll - ll_null)).max(0.0);
    let df = (design.n_params() - 1) as f64;
    let lr_p = chi_square_sf(lr, df);

    let correct = y
        .iter()
        .zip(&mu)
        .filter(|(y, m)| (**m >= 0.5) == (**y == 1.0))
        .count();

    result.statistics.insert("lr_p".to_string(), lr_p);
    result
        .significance_flags
        .insert("likelihood_ratio".to_string(), is_significant(lr_p));
    result.fit_diagnostics.insert("lr_chi_square".to_string(), lr);
    result.fit_diagnostics.insert("df".to_string(), df);
    result.fit_diagnostics.insert("log_likelihood".to_string(), ll);
    result
        .fit_diagnostics
        .insert("pseudo_r2_mcfadden".to_string(), 1.0 - ll / ll_null);
    result
        .fit_diagnostics
        .insert("accuracy_percent".to_string(), 100.0 * correct as f64 / n);
    result
        .fit_diagnostics
        .insert("iterations".to_string(), fit.iterations as f64);
    result
        .fit_diagnostics
        .insert("converged".to_string(), if fit.converged { 1.0 } else { 0.0 });
    result
}
