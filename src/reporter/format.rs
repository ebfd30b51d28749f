//! Rounding at the report boundary
//!
//! Engines keep full precision. Values are rounded only here, when a report
//! artifact is serialized or rendered: coefficients, p-values, odds ratios and
//! ICCs to 3 decimals, statistics, means, percentages and R² to 2 decimals,
//! counts to integers.

use crate::{Column, Precision, ResultTable};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    let rounded = (value * factor).round() / factor;
    // no "-0.0" in artifacts
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub fn round3(value: f64) -> f64 {
    round_to(value, 3)
}

pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

pub fn round(value: f64, precision: Precision) -> f64 {
    match precision {
        Precision::Coefficient => round3(value),
        Precision::Statistic => round2(value),
        Precision::Integer => round_to(value, 0),
    }
}

/// Human-readable value; missing and non-finite values render as `NA`
pub fn format_value(value: Option<f64>, precision: Precision) -> String {
    match value {
        Some(v) if v.is_finite() => match precision {
            Precision::Coefficient => format!("{:.3}", round3(v)),
            Precision::Statistic => format!("{:.2}", round2(v)),
            Precision::Integer => format!("{}", round_to(v, 0) as i64),
        },
        _ => "NA".to_string(),
    }
}

/// p-values below the 3-decimal resolution render as `<0.001`
pub fn format_p_value(p: Option<f64>) -> String {
    match p {
        Some(v) if v.is_finite() && v < 0.0005 => "<0.001".to_string(),
        other => format_value(other, Precision::Coefficient),
    }
}

/// Whether a column or statistic name holds a p-value
pub fn is_p_value(name: &str) -> bool {
    name == "p" || name.starts_with("p_") || name.ends_with("_p") || name.contains("_p_")
}

struct Rounded(Option<f64>, Precision);

impl Serialize for Rounded {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) if v.is_finite() => match self.1 {
                Precision::Integer => serializer.serialize_i64(round_to(v, 0) as i64),
                p => serializer.serialize_f64(round(v, p)),
            },
            _ => serializer.serialize_none(),
        }
    }
}

fn serialize_rounded_map<S: Serializer>(
    map: &BTreeMap<String, f64>,
    precision: Precision,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (key, value) in map {
        out.serialize_entry(key, &Rounded(Some(*value), precision))?;
    }
    out.end()
}

pub fn serialize_coefficients<S: Serializer>(
    map: &BTreeMap<String, f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_rounded_map(map, Precision::Coefficient, serializer)
}

pub fn serialize_statistics<S: Serializer>(
    map: &BTreeMap<String, f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_rounded_map(map, Precision::Statistic, serializer)
}

pub fn serialize_opt_statistic<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    Rounded(*value, Precision::Statistic).serialize(serializer)
}

pub fn serialize_opt_coefficient<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    Rounded(*value, Precision::Coefficient).serialize(serializer)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoundedRow<'a> {
    term: &'a str,
    values: Vec<Rounded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    significant: Option<bool>,
}

#[derive(Serialize)]
struct RoundedTable<'a> {
    name: &'a str,
    columns: &'a [Column],
    rows: Vec<RoundedRow<'a>>,
}

/// Tables with every cell rounded by its column's precision
pub fn serialize_tables<S: Serializer>(
    tables: &[ResultTable],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let rounded: Vec<RoundedTable<'_>> = tables
        .iter()
        .map(|table| RoundedTable {
            name: &table.name,
            columns: &table.columns,
            rows: table
                .rows
                .iter()
                .map(|row| RoundedRow {
                    term: &row.term,
                    values: row
                        .values
                        .iter()
                        .zip(&table.columns)
                        .map(|(v, c)| Rounded(*v, c.precision))
                        .collect(),
                    significant: row.significant,
                })
                .collect(),
        })
        .collect();
    rounded.serialize(serializer)
}
