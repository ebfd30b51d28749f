//! One-way ANOVA with Bonferroni-corrected post-hoc comparisons

use super::{is_significant, Analysis};
use crate::normalizer::{parse_question_type, LongFormDataset};
use crate::stats::descriptive::mean_std;
use crate::stats::distributions::{f_sf, t_quantile, t_two_sided_p};
use crate::{AnalysisKind, AnalysisResult, Column, ModelType, ResponseRecord, ResultTable, SIGNIFICANCE_LEVEL};
use std::collections::{BTreeMap, BTreeSet};

/// Variables a grouping factor may name
pub const GROUPING_VARIABLES: [&str; 4] = ["face_view", "image_id", "participant_id", "source_file"];

pub struct AnovaAnalysis {
    outcome: String,
    group_by: String,
}

impl AnovaAnalysis {
    pub fn new(outcome: &str, group_by: &str) -> Self {
        Self {
            outcome: outcome.to_string(),
            group_by: group_by.to_string(),
        }
    }

    fn group_label(&self, record: &ResponseRecord) -> Option<String> {
        match self.group_by.as_str() {
            "face_view" => Some(record.face_view.to_string()),
            "image_id" => Some(record.image_id.clone()),
            "participant_id" => Some(record.participant_id.clone()),
            "source_file" => Some(record.source_file.clone()),
            _ => None,
        }
    }
}

/// Lowercase identifier safe for artifact file names
fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

struct Group {
    label: String,
    n: usize,
    mean: f64,
    sd: f64,
}

impl Analysis for AnovaAnalysis {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Anova
    }

    fn name(&self) -> String {
        format!("anova_{}_by_{}", slug(&self.outcome), slug(&self.group_by))
    }

    fn run(&self, dataset: &LongFormDataset) -> AnalysisResult {
        let name = self.name();
        let fail = |reason: String| AnalysisResult::failed(&name, ModelType::Anova, reason);

        let Some(question) = parse_question_type(&self.outcome) else {
            return fail(format!(
                "outcome variable '{}' is not present in the dataset",
                self.outcome
            ));
        };
        if !question.is_rating() {
            return fail(format!(
                "outcome variable '{}' is not numeric",
                self.outcome
            ));
        }
        if !GROUPING_VARIABLES.contains(&self.group_by.as_str()) {
            return fail(format!(
                "grouping variable '{}' is not present in the dataset (expected one of {})",
                self.group_by,
                GROUPING_VARIABLES.join(", ")
            ));
        }

        let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut participants = BTreeSet::new();
        for record in dataset.by_question(question) {
            let (Some(value), Some(label)) = (record.value.as_rating(), self.group_label(record)) else {
                continue;
            };
            participants.insert(record.participant_id.as_str());
            values.entry(label).or_default().push(value);
        }

        if values.is_empty() {
            return fail(format!(
                "outcome variable '{}' has no observations in the dataset",
                question
            ));
        }

        let groups: Vec<Group> = values
            .iter()
            .map(|(label, v)| {
                let (mean, sd) = mean_std(v);
                Group {
                    label: label.clone(),
                    n: v.len(),
                    mean,
                    sd,
                }
            })
            .collect();

        let k = groups.len();
        let n_total: usize = groups.iter().map(|g| g.n).sum();
        if k < 2 {
            return fail(format!(
                "'{}' has a single level; at least two groups are needed",
                self.group_by
            ));
        }
        if n_total <= k {
            return fail(format!(
                "{} observations across {} groups leave no within-group degrees of freedom",
                n_total, k
            ));
        }

        let grand_mean = values.values().flatten().sum::<f64>() / n_total as f64;
        let ss_between: f64 = groups
            .iter()
            .map(|g| g.n as f64 * (g.mean - grand_mean).powi(2))
            .sum();
        let ss_within: f64 = values
            .values()
            .zip(&groups)
            .map(|(v, g)| v.iter().map(|x| (x - g.mean).powi(2)).sum::<f64>())
            .sum();

        let df_between = (k - 1) as f64;
        let df_within = (n_total - k) as f64;
        let ms_between = ss_between / df_between;
        let ms_within = ss_within / df_within;
        if ms_within <= 0.0 && ss_between <= 0.0 {
            return fail("every observation is identical; the F ratio is undefined".to_string());
        }
        // no spread within groups but distinct means: separation is exact
        let exact = ms_within <= 0.0;
        let f = if exact { f64::INFINITY } else { ms_between / ms_within };
        let p = f_sf(f, df_between, df_within);
        let significant = is_significant(p);

        let mut result = AnalysisResult::new(&name, ModelType::Anova);
        result.n_observations = n_total;
        result.n_participants = participants.len();
        result.n_groups = k;
        result.statistics.insert("p".to_string(), p);
        result.fit_diagnostics.insert("f_statistic".to_string(), f);
        result.fit_diagnostics.insert("df_between".to_string(), df_between);
        result.fit_diagnostics.insert("df_within".to_string(), df_within);
        result.fit_diagnostics.insert("ms_within".to_string(), ms_within);
        result
            .fit_diagnostics
            .insert("eta_squared".to_string(), ss_between / (ss_between + ss_within));
        result.significance_flags.insert("omnibus".to_string(), significant);
        if exact {
            result.notes.push(
                "within-group variance is zero while group means differ; F is infinite and p is 0"
                    .to_string(),
            );
        }

        let mut group_table = ResultTable::new(
            "groups",
            vec![
                Column::integer("n"),
                Column::statistic("mean"),
                Column::statistic("std_dev"),
            ],
        );
        for g in &groups {
            group_table.push(g.label.clone(), vec![Some(g.n as f64), Some(g.mean), Some(g.sd)], None);
            result.statistics.insert(format!("mean_{}", g.label), g.mean);
        }
        result.tables.push(group_table);

        if significant {
            result.tables.push(post_hoc(&groups, ms_within, df_within, &mut result.significance_flags));
        } else {
            result.notes.push(format!(
                "omnibus test not significant (p >= {}); post-hoc comparisons not run",
                SIGNIFICANCE_LEVEL
            ));
        }
        result
    }
}

/// All pairwise t tests on the pooled within-group variance, Bonferroni-adjusted
fn post_hoc(
    groups: &[Group],
    ms_within: f64,
    df_within: f64,
    flags: &mut BTreeMap<String, bool>,
) -> ResultTable {
    let k = groups.len();
    let comparisons = (k * (k - 1) / 2) as f64;
    let t_crit = t_quantile(1.0 - SIGNIFICANCE_LEVEL / (2.0 * comparisons), df_within);

    let mut table = ResultTable::new(
        "post_hoc",
        vec![
            Column::coefficient("mean_difference"),
            Column::coefficient("std_error"),
            Column::statistic("t"),
            Column::coefficient("p"),
            Column::coefficient("p_adj"),
            Column::coefficient("ci_lower"),
            Column::coefficient("ci_upper"),
        ],
    );
    for i in 0..k {
        for j in (i + 1)..k {
            let (a, b) = (&groups[i], &groups[j]);
            let diff = a.mean - b.mean;
            let se = (ms_within * (1.0 / a.n as f64 + 1.0 / b.n as f64)).sqrt();
            let (t, p) = if se > 0.0 {
                (diff / se, t_two_sided_p(diff / se, df_within))
            } else if diff == 0.0 {
                (0.0, 1.0)
            } else {
                (diff.signum() * f64::INFINITY, 0.0)
            };
            let p_adj = (p * comparisons).min(1.0);
            let significant = is_significant(p_adj);
            let term = format!("{} - {}", a.label, b.label);

            flags.insert(format!("post_hoc: {}", term), significant);
            table.push(
                term,
                vec![
                    Some(diff),
                    Some(se),
                    Some(t),
                    Some(p),
                    Some(p_adj),
                    Some(diff - t_crit * se),
                    Some(diff + t_crit * se),
                ],
                Some(significant),
            );
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::test_support::rating;
    use crate::{AnalysisStatus, FaceView, QuestionType};

    fn groups(means: [f64; 3], offsets: &[f64]) -> LongFormDataset {
        let mut records = Vec::new();
        for (view, m) in FaceView::ALL.iter().zip(means) {
            for (i, offset) in offsets.iter().enumerate() {
                records.push(rating(
                    &format!("P{}", i),
                    "img1",
                    *view,
                    QuestionType::TrustRating,
                    m + offset,
                ));
            }
        }
        LongFormDataset::from_records(records, true)
    }

    const LOW_SPREAD: [f64; 10] = [-0.2, -0.15, -0.1, -0.05, 0.0, 0.0, 0.05, 0.1, 0.15, 0.2];
    const HIGH_SPREAD: [f64; 10] = [-2.0, -1.5, -1.0, -0.5, 0.0, 0.0, 0.5, 1.0, 1.5, 2.0];

    #[test]
    fn test_distinct_means_run_post_hoc() {
        let dataset = groups([5.56, 4.79, 4.49], &LOW_SPREAD);
        let result = AnovaAnalysis::new("trust_rating", "face_view").run(&dataset);

        assert_eq!(result.status, AnalysisStatus::Completed);
        assert_eq!(result.n_observations, 30);
        assert_eq!(result.n_groups, 3);
        assert_eq!(result.fit_diagnostics["df_between"], 2.0);
        assert_eq!(result.fit_diagnostics["df_within"], 27.0);
        assert!(result.statistics["p"] < 0.05);
        assert_eq!(result.significance_flags.get("omnibus"), Some(&true));
        assert!((result.statistics["mean_full"] - 5.56).abs() < 1e-9);

        let post_hoc = result.table("post_hoc").expect("post-hoc table present");
        assert_eq!(post_hoc.rows.len(), 3);
        let terms: Vec<&str> = post_hoc.rows.iter().map(|r| r.term.as_str()).collect();
        assert_eq!(terms, vec!["full - left", "full - right", "left - right"]);
        for row in &post_hoc.rows {
            let p = row.values[3].unwrap();
            let p_adj = row.values[4].unwrap();
            assert!(p_adj >= p && p_adj <= 1.0);
            let (lo, hi) = (row.values[5].unwrap(), row.values[6].unwrap());
            let diff = row.values[0].unwrap();
            assert!(lo < diff && diff < hi);
        }
    }

    #[test]
    fn test_similar_means_skip_post_hoc() {
        let dataset = groups([4.0, 4.05, 4.1], &HIGH_SPREAD);
        let result = AnovaAnalysis::new("trust_rating", "face_view").run(&dataset);

        assert_eq!(result.status, AnalysisStatus::Completed);
        assert!(result.statistics["p"] >= 0.05);
        assert_eq!(result.significance_flags.get("omnibus"), Some(&false));
        assert!(result.table("post_hoc").is_none());
        assert_eq!(result.table("groups").unwrap().rows.len(), 3);
    }

    #[test]
    fn test_zero_within_variance_is_exact_separation() {
        let dataset = groups([6.0, 5.0, 4.0], &[0.0, 0.0, 0.0, 0.0]);
        let result = AnovaAnalysis::new("trust_rating", "face_view").run(&dataset);

        assert_eq!(result.status, AnalysisStatus::Completed);
        assert_eq!(result.statistics["p"], 0.0);
        assert!(result.fit_diagnostics["f_statistic"].is_infinite());
        assert!(result.notes.iter().any(|n| n.contains("within-group variance is zero")));

        let post_hoc = result.table("post_hoc").expect("post-hoc table present");
        assert_eq!(post_hoc.rows.len(), 3);
        assert!(post_hoc.rows.iter().all(|r| r.significant == Some(true)));
    }

    #[test]
    fn test_identical_observations_fail() {
        let dataset = groups([5.0, 5.0, 5.0], &[0.0, 0.0]);
        let result = AnovaAnalysis::new("trust_rating", "face_view").run(&dataset);
        assert!(matches!(result.status, AnalysisStatus::Failed { .. }));
    }

    #[test]
    fn test_unknown_variables_fail_explicitly() {
        let dataset = groups([4.0, 4.5, 5.0], &LOW_SPREAD);

        let result = AnovaAnalysis::new("attractiveness", "face_view").run(&dataset);
        assert!(matches!(result.status, AnalysisStatus::Failed { .. }));

        let result = AnovaAnalysis::new("trust_rating", "lighting").run(&dataset);
        match &result.status {
            AnalysisStatus::Failed { reason } => assert!(reason.contains("lighting")),
            other => panic!("expected failure, got {:?}", other),
        }

        let result = AnovaAnalysis::new("emotion_rating", "face_view").run(&dataset);
        assert!(matches!(result.status, AnalysisStatus::Failed { .. }));

        let result = AnovaAnalysis::new("masc_choice", "face_view").run(&dataset);
        assert!(matches!(result.status, AnalysisStatus::Failed { .. }));
    }

    #[test]
    fn test_group_by_participant() {
        let dataset = groups([4.0, 4.5, 5.0], &LOW_SPREAD);
        let result = AnovaAnalysis::new("trust_rating", "participant_id").run(&dataset);
        assert_eq!(result.n_groups, 10);
        assert_eq!(result.name, "anova_trust_rating_by_participant_id");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Trust Rating"), "trust_rating");
        assert_eq!(slug("../face-view"), "face_view");
    }
}
