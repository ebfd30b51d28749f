//! Intraclass correlation: agreement among participants rating the same image
//!
//! One-way random-effects ICC(1) with unequal raters per item. Each rater
//! contributes one score per image (the mean of that rater's ratings of it),
//! and the average group size uses the k0 correction for unbalanced data.

use super::{is_significant, Analysis};
use crate::normalizer::LongFormDataset;
use crate::stats::distributions::f_sf;
use crate::{AnalysisKind, AnalysisResult, Column, ModelType, QuestionType, ResultTable};
use std::collections::{BTreeMap, BTreeSet};

const MIN_RATERS: usize = 2;
const MIN_ITEMS: usize = 2;

pub struct IccAnalysis {
    question: QuestionType,
}

impl IccAnalysis {
    pub fn new(question: QuestionType) -> Self {
        Self { question }
    }
}

impl Analysis for IccAnalysis {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Icc
    }

    fn name(&self) -> String {
        format!("icc_{}", self.question)
    }

    fn run(&self, dataset: &LongFormDataset) -> AnalysisResult {
        let name = self.name();

        // image -> participant -> ratings
        let mut items: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
        for record in dataset.by_question(self.question) {
            if let Some(value) = record.value.as_rating() {
                items
                    .entry(record.image_id.as_str())
                    .or_default()
                    .entry(record.participant_id.as_str())
                    .or_default()
                    .push(value);
            }
        }
        if items.is_empty() {
            return AnalysisResult::skipped(
                &name,
                ModelType::Icc,
                format!("no {} responses", self.question),
            );
        }

        let mut scores: Vec<(&str, Vec<f64>)> = Vec::new();
        let mut skipped_items = 0;
        let mut raters = BTreeSet::new();
        let mut observations = 0;
        for (image, by_rater) in &items {
            if by_rater.len() < MIN_RATERS {
                skipped_items += 1;
                continue;
            }
            raters.extend(by_rater.keys().copied());
            observations += by_rater.values().map(Vec::len).sum::<usize>();
            let item_scores = by_rater
                .values()
                .map(|v| v.iter().sum::<f64>() / v.len() as f64)
                .collect();
            scores.push((*image, item_scores));
        }
        if skipped_items > 0 {
            log::info!(
                "{}: {} images with fewer than {} raters excluded",
                name,
                skipped_items,
                MIN_RATERS
            );
        }

        let skip = |reason: String| {
            let mut result = AnalysisResult::skipped(&name, ModelType::Icc, reason);
            result
                .fit_diagnostics
                .insert("skipped_items".to_string(), skipped_items as f64);
            result
        };
        if scores.len() < MIN_ITEMS {
            return skip(format!(
                "{} of {} images have at least {} raters; at least {} are needed",
                scores.len(),
                items.len(),
                MIN_RATERS,
                MIN_ITEMS
            ));
        }

        let a = scores.len() as f64;
        let n: f64 = scores.iter().map(|(_, s)| s.len() as f64).sum();
        let grand_mean = scores.iter().flat_map(|(_, s)| s.iter()).sum::<f64>() / n;
        let item_means: Vec<f64> = scores
            .iter()
            .map(|(_, s)| s.iter().sum::<f64>() / s.len() as f64)
            .collect();

        let ss_between: f64 = scores
            .iter()
            .zip(&item_means)
            .map(|((_, s), m)| s.len() as f64 * (m - grand_mean).powi(2))
            .sum();
        let ss_within: f64 = scores
            .iter()
            .zip(&item_means)
            .map(|((_, s), m)| s.iter().map(|x| (x - m).powi(2)).sum::<f64>())
            .sum();

        let df_between = a - 1.0;
        let df_within = n - a;
        let ms_between = ss_between / df_between;
        let ms_within = ss_within / df_within;
        let sum_sq_sizes: f64 = scores.iter().map(|(_, s)| (s.len() as f64).powi(2)).sum();
        let k0 = (n - sum_sq_sizes / n) / df_between;

        let denominator = ms_between + (k0 - 1.0) * ms_within;
        if denominator <= 0.0 {
            return skip(format!(
                "{} scores have zero variance; agreement is undefined",
                self.question
            ));
        }
        let icc = (ms_between - ms_within) / denominator;
        let (f, p) = if ms_within > 0.0 {
            let f = ms_between / ms_within;
            (Some(f), f_sf(f, df_between, df_within))
        } else {
            (None, 0.0)
        };

        let mut result = AnalysisResult::new(&name, ModelType::Icc);
        result.n_observations = observations;
        result.n_participants = raters.len();
        result.n_groups = scores.len();
        result.statistics.insert("icc".to_string(), icc);
        result.statistics.insert("p".to_string(), p);
        result.significance_flags.insert("icc".to_string(), is_significant(p));
        if let Some(f) = f {
            result.fit_diagnostics.insert("f_statistic".to_string(), f);
        }
        result.fit_diagnostics.insert("df_between".to_string(), df_between);
        result.fit_diagnostics.insert("df_within".to_string(), df_within);
        result.fit_diagnostics.insert("k0".to_string(), k0);
        result
            .fit_diagnostics
            .insert("skipped_items".to_string(), skipped_items as f64);
        if skipped_items > 0 {
            result.notes.push(format!(
                "{} images with fewer than {} raters were excluded",
                skipped_items, MIN_RATERS
            ));
        }

        let mut table = ResultTable::new(
            "items",
            vec![Column::integer("raters"), Column::statistic("mean")],
        );
        for ((image, s), m) in scores.iter().zip(&item_means) {
            table.push(*image, vec![Some(s.len() as f64), Some(*m)], None);
        }
        result.tables.push(table);
        result
    }
}
