//! Markdown compliance report
//!
//! The document is a pure function of the report: no timestamps, no host
//! details, and every map is iterated in key order, so identical inputs give
//! byte-identical output.

use super::format::{format_p_value, format_value, is_p_value};
use crate::aggregate::DatasetSummary;
use crate::stats::NumericSummary;
use crate::{AnalysisResult, ComplianceReport, Precision, ResultTable};
use std::fmt::Write;

/// Reporter for the human-readable compliance document
#[derive(Default)]
pub struct MarkdownReporter;

impl MarkdownReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, report: &ComplianceReport) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_report(&mut out, report);
        out
    }

    fn write_report(&self, out: &mut String, report: &ComplianceReport) -> std::fmt::Result {
        writeln!(out, "# Facial Perception Study: Statistical Compliance Report")?;
        writeln!(out)?;
        writeln!(out, "Generated by facestats {}.", report.tool_version)?;
        writeln!(out)?;

        self.write_checklist(out, report)?;
        self.write_summary(out, &report.summary)?;
        self.write_descriptives(out, report)?;

        writeln!(out, "## Analyses")?;
        writeln!(out)?;
        if report.analyses.is_empty() {
            writeln!(out, "No inferential analyses were requested.")?;
            writeln!(out)?;
        }
        for result in &report.analyses {
            self.write_analysis(out, result)?;
        }

        writeln!(out, "## Artifacts")?;
        writeln!(out)?;
        writeln!(out, "| File | Kind | Generated |")?;
        writeln!(out, "|---|---|---|")?;
        for artifact in &report.manifest {
            writeln!(
                out,
                "| {} | {:?} | {} |",
                artifact.file_name,
                artifact.kind,
                if artifact.generated { "yes" } else { "placeholder" }
            )?;
        }
        Ok(())
    }

    fn write_checklist(&self, out: &mut String, report: &ComplianceReport) -> std::fmt::Result {
        writeln!(out, "## Compliance Checklist")?;
        writeln!(out)?;
        for item in &report.checklist {
            let mark = if matches!(
                item.state,
                crate::ChecklistState::Completed | crate::ChecklistState::CompletedViaFallback { .. }
            ) {
                "x"
            } else {
                " "
            };
            write!(out, "- [{}] {}: {}", mark, item.title, item.state.label())?;
            if let Some(reason) = item.state.reason() {
                write!(out, " ({})", reason)?;
            }
            writeln!(out)?;
            for note in &item.notes {
                writeln!(out, "  - {}", note)?;
            }
        }
        writeln!(out)
    }

    fn write_summary(&self, out: &mut String, summary: &DatasetSummary) -> std::fmt::Result {
        writeln!(out, "## Dataset Summary")?;
        writeln!(out)?;
        writeln!(out, "| Measure | Value |")?;
        writeln!(out, "|---|---|")?;
        writeln!(out, "| Total responses | {} |", summary.total_responses)?;
        writeln!(out, "| Participants | {} |", summary.unique_participants)?;
        writeln!(out, "| Images | {} |", summary.unique_images)?;
        for (question, count) in &summary.responses_by_question_type {
            writeln!(out, "| Responses: {} | {} |", question, count)?;
        }
        for (view, count) in &summary.responses_by_face_view {
            writeln!(out, "| Responses: {} face | {} |", view, count)?;
        }
        let date = |d: Option<chrono::NaiveDateTime>| {
            d.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "NA".to_string())
        };
        writeln!(
            out,
            "| Date range | {} to {} |",
            date(summary.date_range.start),
            date(summary.date_range.end)
        )?;
        writeln!(out, "| Unparsed timestamps | {} |", summary.unparsed_timestamps)?;
        writeln!(
            out,
            "| Files loaded | {} of {} |",
            summary.files.succeeded, summary.files.attempted
        )?;
        writeln!(out, "| Dataset fingerprint | `{}` |", summary.dataset_fingerprint)?;
        writeln!(out)?;

        writeln!(out, "### Responses per participant and image")?;
        writeln!(out)?;
        write_numeric_header(out, "Unit")?;
        write_numeric_row(out, "participant", &summary.participant_response_counts)?;
        write_numeric_row(out, "image", &summary.image_response_counts)?;
        writeln!(out)?;

        writeln!(out, "### Rejected rows")?;
        writeln!(out)?;
        if summary.rejected_rows == 0 {
            writeln!(out, "No rows were rejected.")?;
        } else {
            writeln!(out, "{} rows or values were rejected.", summary.rejected_rows)?;
            writeln!(out)?;
            writeln!(out, "| Reason | Count |")?;
            writeln!(out, "|---|---|")?;
            for (reason, count) in &summary.rejections_by_reason {
                writeln!(out, "| {} | {} |", reason, count)?;
            }
        }
        writeln!(out)?;

        if !summary.files.skipped_files.is_empty() {
            writeln!(out, "### Skipped files")?;
            writeln!(out)?;
            for skipped in &summary.files.skipped_files {
                writeln!(out, "- `{}`: {}", skipped.file_name, skipped.reason)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_descriptives(&self, out: &mut String, report: &ComplianceReport) -> std::fmt::Result {
        let descriptives = &report.descriptives;
        if descriptives.is_empty() {
            return Ok(());
        }
        writeln!(out, "## Descriptive Statistics")?;
        writeln!(out)?;

        for (question, ratings) in &descriptives.ratings {
            writeln!(out, "### {}", question)?;
            writeln!(out)?;
            write_numeric_header(out, "Face view")?;
            write_numeric_row(out, "all", &ratings.overall)?;
            for (view, summary) in &ratings.by_face_view {
                write_numeric_row(out, view.as_str(), summary)?;
            }
            writeln!(out)?;
        }

        for (question, choices) in &descriptives.choices {
            writeln!(out, "### {}", question)?;
            writeln!(out)?;
            writeln!(out, "| Face view | n | yes % | no % | Mode |")?;
            writeln!(out, "|---|---|---|---|---|")?;
            let rows = std::iter::once(("all", &choices.overall))
                .chain(choices.by_face_view.iter().map(|(v, s)| (v.as_str(), s)));
            for (label, summary) in rows {
                writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    label,
                    summary.count,
                    format_value(summary.percent("yes"), Precision::Statistic),
                    format_value(summary.percent("no"), Precision::Statistic),
                    summary.mode.as_deref().unwrap_or("NA")
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_analysis(&self, out: &mut String, result: &AnalysisResult) -> std::fmt::Result {
        writeln!(out, "### {}", result.name)?;
        writeln!(out)?;
        writeln!(out, "- Model: {}", result.model_type)?;
        write!(out, "- Status: {}", result.status.label())?;
        if let Some(reason) = result.status.reason() {
            write!(out, " ({})", reason)?;
        }
        writeln!(out)?;
        if !result.status.produced_estimates() {
            writeln!(out)?;
            return Ok(());
        }
        writeln!(
            out,
            "- Observations: {}, participants: {}, groups: {}",
            result.n_observations, result.n_participants, result.n_groups
        )?;
        writeln!(out)?;

        if !result.fit_diagnostics.is_empty() {
            writeln!(out, "| Diagnostic | Value |")?;
            writeln!(out, "|---|---|")?;
            for (name, value) in &result.fit_diagnostics {
                writeln!(out, "| {} | {} |", name, format_value(Some(*value), Precision::Statistic))?;
            }
            writeln!(out)?;
        }

        for table in &result.tables {
            write_table(out, table)?;
        }

        for note in &result.notes {
            writeln!(out, "> {}", note)?;
        }
        if !result.notes.is_empty() {
            writeln!(out)?;
        }
        Ok(())
    }
}

fn write_numeric_header(out: &mut String, label: &str) -> std::fmt::Result {
    writeln!(out, "| {} | n | Missing | Mean | SD | Min | Q1 | Median | Q3 | Max |", label)?;
    writeln!(out, "|---|---|---|---|---|---|---|---|---|---|")
}

fn write_numeric_row(out: &mut String, label: &str, s: &NumericSummary) -> std::fmt::Result {
    let f = |v: Option<f64>| format_value(v, Precision::Statistic);
    writeln!(
        out,
        "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
        label,
        s.count,
        s.missing,
        f(s.mean),
        f(s.std_dev),
        f(s.min),
        f(s.q1),
        f(s.median),
        f(s.q3),
        f(s.max)
    )
}

fn write_table(out: &mut String, table: &ResultTable) -> std::fmt::Result {
    let has_flags = table.rows.iter().any(|r| r.significant.is_some());
    write!(out, "| {} |", table.name)?;
    for column in &table.columns {
        write!(out, " {} |", column.name)?;
    }
    if has_flags {
        write!(out, " sig |")?;
    }
    writeln!(out)?;
    write!(out, "|---|")?;
    for _ in 0..table.columns.len() + usize::from(has_flags) {
        write!(out, "---|")?;
    }
    writeln!(out)?;

    for row in &table.rows {
        write!(out, "| {} |", row.term)?;
        for (column, value) in table.columns.iter().zip(&row.values) {
            let cell = if is_p_value(&column.name) {
                format_p_value(*value)
            } else {
                format_value(*value, column.precision)
            };
            write!(out, " {} |", cell)?;
        }
        if has_flags {
            let flag = match row.significant {
                Some(true) => "*",
                _ => "",
            };
            write!(out, " {} |", flag)?;
        }
        writeln!(out)?;
    }
    writeln!(out)
}
