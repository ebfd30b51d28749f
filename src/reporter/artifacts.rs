//! Artifact rendering and atomic publication
//!
//! Every artifact is rendered in memory before anything touches the output
//! directory. All files are then staged as synced temporary files in the same
//! directory, and only once every one of them is staged and every target
//! checked are they renamed into place. A reader never sees a partial file,
//! and a failed run leaves the previous artifacts untouched. The reports go
//! last: their presence means the run finished.

use super::compiler::{result_file_name, REPORT_JSON, REPORT_MARKDOWN, SUMMARY_JSON};
use super::format::format_value;
use super::json::JsonReporter;
use super::markdown::MarkdownReporter;
use crate::error::PipelineError;
use crate::{AnalysisResult, ComplianceReport, Precision};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Long-format CSV of one result: `table,term,statistic,value`
pub fn render_result_csv(result: &AnalysisResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["table", "term", "statistic", "value"])?;

    writer.write_record(["status", "", "state", result.status.label()])?;
    if let Some(reason) = result.status.reason() {
        writer.write_record(["status", "", "reason", reason])?;
    }
    writer.write_record(["status", "", "model_type", result.model_type.to_string().as_str()])?;

    for (name, count) in [
        ("n_observations", result.n_observations),
        ("n_participants", result.n_participants),
        ("n_groups", result.n_groups),
    ] {
        writer.write_record(["counts", "", name, count.to_string().as_str()])?;
    }

    for (name, value) in &result.statistics {
        writer.write_record([
            "statistics",
            "",
            name.as_str(),
            format_value(Some(*value), Precision::Coefficient).as_str(),
        ])?;
    }
    for (name, value) in &result.fit_diagnostics {
        writer.write_record([
            "fit_diagnostics",
            "",
            name.as_str(),
            format_value(Some(*value), Precision::Statistic).as_str(),
        ])?;
    }
    for (name, flag) in &result.significance_flags {
        writer.write_record(["significance", name.as_str(), "significant", flag.to_string().as_str()])?;
    }

    for table in &result.tables {
        for row in &table.rows {
            for (column, value) in table.columns.iter().zip(&row.values) {
                writer.write_record([
                    table.name.as_str(),
                    row.term.as_str(),
                    column.name.as_str(),
                    format_value(*value, column.precision).as_str(),
                ])?;
            }
            if let Some(flag) = row.significant {
                writer.write_record([
                    table.name.as_str(),
                    row.term.as_str(),
                    "significant",
                    flag.to_string().as_str(),
                ])?;
            }
        }
    }

    let bytes = writer.into_inner().context("failed to flush CSV writer")?;
    Ok(String::from_utf8(bytes)?)
}

/// Write every generated artifact of `report` into `out_dir`.
///
/// Returns the written paths in write order. Fails with
/// [`PipelineError::OutputNotWritable`] when the directory cannot be created
/// or written; nothing is published if rendering, staging or a target check fails.
pub fn publish(report: &ComplianceReport, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let not_writable = |source: std::io::Error| PipelineError::OutputNotWritable {
        path: out_dir.to_path_buf(),
        source,
    };

    let json = JsonReporter::new().pretty();
    let mut artifacts: Vec<(String, String)> = Vec::new();
    for result in &report.analyses {
        artifacts.push((result_file_name(result), render_result_csv(result)?));
    }
    artifacts.push((SUMMARY_JSON.to_string(), json.summary(&report.summary)?));
    artifacts.push((REPORT_JSON.to_string(), json.report(report)?));
    artifacts.push((REPORT_MARKDOWN.to_string(), MarkdownReporter::new().render(report)));

    std::fs::create_dir_all(out_dir).map_err(not_writable)?;

    // stage every file before any rename; dropped temp files remove themselves
    let mut staged = Vec::with_capacity(artifacts.len());
    for (file_name, contents) in artifacts {
        let mut tmp = NamedTempFile::new_in(out_dir).map_err(not_writable)?;
        tmp.write_all(contents.as_bytes()).map_err(not_writable)?;
        tmp.as_file().sync_all().map_err(not_writable)?;
        staged.push((out_dir.join(file_name), tmp));
    }

    for (path, _) in &staged {
        if path.is_dir() {
            return Err(not_writable(std::io::Error::other(format!(
                "{} is a directory",
                path.display()
            )))
            .into());
        }
    }

    let mut written = Vec::with_capacity(staged.len());
    for (path, tmp) in staged {
        tmp.persist(&path).map_err(|e| not_writable(e.error))?;
        log::debug!("wrote {}", path.display());
        written.push(path);
    }

    log::info!("published {} artifacts to {}", written.len(), out_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{DatasetSummary, Descriptives};
    use crate::config::Config;
    use crate::reporter::ReportCompiler;
    use crate::{Column, ModelType, ResultTable};
    use tempfile::TempDir;

    fn result() -> AnalysisResult {
        let mut result = AnalysisResult::new("mixed_model_trust_rating", ModelType::MixedEffects);
        result.n_observations = 40;
        result.statistics.insert("face_view_left".to_string(), -0.76543);
        result.fit_diagnostics.insert("r2_marginal".to_string(), 0.23456);
        let mut table = ResultTable::new(
            "fixed_effects",
            vec![Column::coefficient("estimate"), Column::coefficient("p")],
        );
        table.push("face_view_left", vec![Some(-0.76543), Some(0.01234)], Some(true));
        result.tables.push(table);
        result
    }

    fn report(analyses: Vec<AnalysisResult>) -> ComplianceReport {
        ReportCompiler::new(&Config::default()).compile(
            DatasetSummary::default(),
            Descriptives::default(),
            analyses,
        )
    }

    #[test]
    fn test_csv_is_long_format_and_rounded() {
        let csv = render_result_csv(&result()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "table,term,statistic,value");
        assert_eq!(lines[1], "status,,state,completed");
        assert!(lines.contains(&"counts,,n_observations,40"));
        assert!(lines.contains(&"statistics,,face_view_left,-0.765"));
        assert!(lines.contains(&"fit_diagnostics,,r2_marginal,0.23"));
        assert!(lines.contains(&"fixed_effects,face_view_left,p,0.012"));
        assert!(lines.contains(&"fixed_effects,face_view_left,significant,true"));
    }

    #[test]
    fn test_csv_carries_skip_reason() {
        let skipped = AnalysisResult::skipped("icc_emotion_rating", ModelType::Icc, "no emotion_rating responses");
        let csv = render_result_csv(&skipped).unwrap();
        assert!(csv.contains("status,,state,skipped"));
        assert!(csv.contains("status,,reason,no emotion_rating responses"));
    }

    #[test]
    fn test_publish_writes_every_generated_artifact() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("out");
        let report = report(vec![result()]);

        let written = publish(&report, &out).unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written.last().unwrap(), &out.join(REPORT_MARKDOWN));

        for artifact in report.manifest.iter().filter(|a| a.generated) {
            assert!(out.join(&artifact.file_name).is_file(), "{} missing", artifact.file_name);
        }
        for artifact in report.manifest.iter().filter(|a| !a.generated) {
            assert!(!out.join(&artifact.file_name).exists());
        }

        let leftovers: Vec<_> = std::fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_publish_overwrites_previous_run() {
        let dir = TempDir::new().unwrap();
        publish(&report(vec![result()]), dir.path()).unwrap();
        publish(&report(Vec::new()), dir.path()).unwrap();

        let json = std::fs::read_to_string(dir.path().join(REPORT_JSON)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["analyses"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_publish_into_a_file_path_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = publish(&report(Vec::new()), &blocker).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::OutputNotWritable { .. })
        ));
    }

    #[test]
    fn test_blocked_report_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(REPORT_JSON)).unwrap();

        let err = publish(&report(vec![result()]), dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::OutputNotWritable { .. })
        ));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![REPORT_JSON.to_string()]);
    }

    #[test]
    fn test_failed_publish_keeps_previous_run() {
        let dir = TempDir::new().unwrap();
        publish(&report(Vec::new()), dir.path()).unwrap();
        let before = std::fs::read_to_string(dir.path().join(SUMMARY_JSON)).unwrap();

        std::fs::remove_file(dir.path().join(REPORT_MARKDOWN)).unwrap();
        std::fs::create_dir(dir.path().join(REPORT_MARKDOWN)).unwrap();
        let mut next = report(vec![result()]);
        next.summary.total_responses = 40;
        assert!(publish(&next, dir.path()).is_err());

        assert_eq!(std::fs::read_to_string(dir.path().join(SUMMARY_JSON)).unwrap(), before);
        assert!(!dir.path().join("mixed_model_trust_rating_results.csv").exists());
    }
}
