//! Distribution summaries for numeric and categorical fields

use crate::reporter::format::serialize_opt_statistic;
use serde::Serialize;
use std::collections::BTreeMap;

/// Count, location, spread and quartiles of a numeric field.
///
/// Missing values are excluded from every statistic, so mean and standard
/// deviation always share the same `count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericSummary {
    pub count: usize,
    pub missing: usize,
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1); 0 for a single observation
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub std_dev: Option<f64>,
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub min: Option<f64>,
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub q1: Option<f64>,
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub median: Option<f64>,
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub q3: Option<f64>,
    #[serde(serialize_with = "serialize_opt_statistic")]
    pub max: Option<f64>,
}

impl NumericSummary {
    /// Summarize values, where `None` and non-finite entries count as missing
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut present = Vec::new();
        let mut missing = 0;
        for value in values {
            match value {
                Some(v) if v.is_finite() => present.push(v),
                _ => missing += 1,
            }
        }

        let mut summary = Self {
            count: present.len(),
            missing,
            ..Default::default()
        };
        if present.is_empty() {
            return summary;
        }

        present.sort_by(|a, b| a.total_cmp(b));
        let (mean, sd) = mean_std(&present);
        summary.mean = Some(mean);
        summary.std_dev = Some(sd);
        summary.min = present.first().copied();
        summary.max = present.last().copied();
        summary.q1 = Some(quantile_sorted(&present, 0.25));
        summary.median = Some(quantile_sorted(&present, 0.5));
        summary.q3 = Some(quantile_sorted(&present, 0.75));
        summary
    }

    /// Summarize observed values (none missing)
    pub fn from_observed<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self::from_values(values.into_iter().map(Some))
    }
}

/// Mean and standard deviation with Bessel's correction
pub fn mean_std(data: &[f64]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    if data.len() == 1 {
        return (mean, 0.0);
    }
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

pub fn mean(data: &[f64]) -> f64 {
    mean_std(data).0
}

/// Sample variance; 0 below two observations
pub fn variance(data: &[f64]) -> f64 {
    let (_, sd) = mean_std(data);
    sd * sd
}

/// Linear interpolation between order statistics; `sorted` must be ascending and non-empty
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let value = sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]);
    // rounding must not step outside the bracketing order statistics
    value.clamp(sorted[lo], sorted[hi])
}

/// Frequency table of a categorical field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoricalSummary {
    pub count: usize,
    pub frequencies: BTreeMap<String, usize>,
    /// Most frequent label; ties go to the lexicographically smallest
    pub mode: Option<String>,
}

impl CategoricalSummary {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frequencies: BTreeMap<String, usize> = BTreeMap::new();
        for label in labels {
            *frequencies.entry(label.into()).or_insert(0) += 1;
        }
        let count = frequencies.values().sum();
        // BTreeMap iterates in label order, so the first maximum is the smallest label
        let mode = frequencies
            .iter()
            .fold(None::<(&String, usize)>, |best, (label, n)| match best {
                Some((_, top)) if top >= *n => best,
                _ => Some((label, *n)),
            })
            .map(|(label, _)| label.clone());

        Self {
            count,
            frequencies,
            mode,
        }
    }

    /// Share of one label in percent
    pub fn percent(&self, label: &str) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let n = self.frequencies.get(label).copied().unwrap_or(0);
        Some(100.0 * n as f64 / self.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_observation_has_zero_sd() {
        let s = NumericSummary::from_observed([4.0]);
        assert_eq!(s.count, 1);
        assert_eq!(s.mean, Some(4.0));
        assert_eq!(s.std_dev, Some(0.0));
        assert_eq!(s.q1, Some(4.0));
        assert_eq!(s.q3, Some(4.0));
    }

    #[test]
    fn test_empty_summary_has_no_statistics() {
        let s = NumericSummary::from_values([None, None]);
        assert_eq!(s.count, 0);
        assert_eq!(s.missing, 2);
        assert!(s.mean.is_none());
        assert!(s.std_dev.is_none());
    }

    #[test]
    fn test_missing_values_excluded() {
        let s = NumericSummary::from_values([Some(2.0), None, Some(4.0), Some(f64::NAN)]);
        assert_eq!(s.count, 2);
        assert_eq!(s.missing, 2);
        assert_eq!(s.mean, Some(3.0));
        assert!((s.std_dev.unwrap() - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_quartiles_interpolate() {
        let s = NumericSummary::from_observed([130.0, 100.0, 188.0, 120.0]);
        assert_eq!(s.min, Some(100.0));
        assert_eq!(s.max, Some(188.0));
        assert_eq!(s.q1, Some(115.0));
        assert_eq!(s.median, Some(125.0));
        assert_eq!(s.q3, Some(144.5));
    }

    #[test]
    fn test_mode_tie_breaks_to_smallest_label() {
        let s = CategoricalSummary::from_labels(["yes", "no", "yes", "no", "maybe"]);
        assert_eq!(s.count, 5);
        assert_eq!(s.mode.as_deref(), Some("no"));
        assert_eq!(s.frequencies.get("yes"), Some(&2));
        assert_eq!(s.percent("maybe"), Some(20.0));
    }

    #[test]
    fn test_empty_categorical() {
        let s = CategoricalSummary::from_labels(Vec::<String>::new());
        assert_eq!(s.count, 0);
        assert!(s.mode.is_none());
        assert!(s.percent("yes").is_none());
    }

    proptest! {
        #[test]
        fn prop_mean_and_sd_share_count(values in prop::collection::vec(prop::option::of(-1e6f64..1e6), 0..60)) {
            let s = NumericSummary::from_values(values.clone());
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            prop_assert_eq!(s.count, present.len());
            prop_assert_eq!(s.count + s.missing, values.len());
            if present.is_empty() {
                prop_assert!(s.mean.is_none() && s.std_dev.is_none());
            } else {
                let mean = present.iter().sum::<f64>() / present.len() as f64;
                prop_assert!((s.mean.unwrap() - mean).abs() <= 1e-6 * (1.0 + mean.abs()));
                prop_assert!(s.std_dev.unwrap() >= 0.0);
                prop_assert!(s.min.unwrap() <= s.q1.unwrap());
                prop_assert!(s.q1.unwrap() <= s.median.unwrap());
                prop_assert!(s.median.unwrap() <= s.q3.unwrap());
                prop_assert!(s.q3.unwrap() <= s.max.unwrap());
            }
        }

        #[test]
        fn prop_single_value_sd_is_zero(v in -1e9f64..1e9) {
            let s = NumericSummary::from_observed([v]);
            prop_assert_eq!(s.std_dev, Some(0.0));
            prop_assert_eq!(s.mean, Some(v));
        }
    }
}
