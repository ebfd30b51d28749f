//! Console reporter with colored output

use super::format::{format_p_value, format_value};
use crate::{AnalysisResult, AnalysisStatus, ChecklistState, ComplianceReport, Precision};
use colored::{ColoredString, Colorize};
use std::fmt::Write;

/// Reporter for terminal output
pub struct ConsoleReporter {
    /// Whether to use colors
    use_colors: bool,
    /// Whether to show per-analysis statistics
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter
    pub fn new() -> Self {
        Self {
            use_colors: true,
            verbose: false,
        }
    }

    /// Disable colors
    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    /// Enable verbose output
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Print the run overview to stdout
    pub fn report(&self, report: &ComplianceReport) {
        print!("{}", self.render(report));
    }

    pub fn render(&self, report: &ComplianceReport) -> String {
        let mut out = String::new();
        let _ = self.write_report(&mut out, report);
        out
    }

    fn write_report(&self, out: &mut String, report: &ComplianceReport) -> std::fmt::Result {
        let summary = &report.summary;
        writeln!(out)?;
        writeln!(out, "{}", self.paint("facestats compliance run", |s| s.bold()))?;
        writeln!(
            out,
            "   {} responses from {} participants on {} images",
            self.paint(&summary.total_responses.to_string(), |s| s.bold()),
            summary.unique_participants,
            summary.unique_images
        )?;
        writeln!(
            out,
            "   files: {} loaded, {} skipped; {} rejected",
            summary.files.succeeded, summary.files.skipped, summary.rejected_rows
        )?;
        if self.verbose {
            for (reason, count) in &summary.rejections_by_reason {
                writeln!(out, "     {} {}", self.paint(&format!("{}:", reason), |s| s.dimmed()), count)?;
            }
            for skipped in &summary.files.skipped_files {
                writeln!(
                    out,
                    "     {} {} ({})",
                    self.paint("skipped", |s| s.yellow()),
                    skipped.file_name,
                    skipped.reason
                )?;
            }
        }
        writeln!(out)?;

        writeln!(out, "   {}", self.paint("Checklist:", |s| s.bold()))?;
        for item in &report.checklist {
            write!(out, "   {} {}", self.state_marker(&item.state), item.title)?;
            if let Some(reason) = item.state.reason() {
                write!(out, " {}", self.paint(&format!("({})", reason), |s| s.dimmed()))?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;

        writeln!(out, "   {}", self.paint("Analyses:", |s| s.bold()))?;
        for result in &report.analyses {
            self.write_analysis(out, result)?;
        }
        Ok(())
    }

    fn write_analysis(&self, out: &mut String, result: &AnalysisResult) -> std::fmt::Result {
        let status = match &result.status {
            AnalysisStatus::Completed => self.paint(result.status.label(), |s| s.green()),
            AnalysisStatus::Fallback { .. } => self.paint(result.status.label(), |s| s.yellow()),
            AnalysisStatus::Skipped { .. } => self.paint(result.status.label(), |s| s.dimmed()),
            AnalysisStatus::Failed { .. } => self.paint(result.status.label(), |s| s.red()),
        };
        write!(out, "   {} {}", result.name, status)?;
        if let Some(p) = result.statistics.get("p").or_else(|| result.statistics.get("lr_p")) {
            write!(out, " p={}", format_p_value(Some(*p)))?;
        }
        writeln!(out)?;
        if let Some(reason) = result.status.reason() {
            writeln!(out, "     {} {}", self.paint("↳", |s| s.dimmed()), reason)?;
        }
        if self.verbose && result.status.produced_estimates() {
            for (name, value) in &result.statistics {
                writeln!(
                    out,
                    "     {} = {}",
                    name,
                    format_value(Some(*value), Precision::Coefficient)
                )?;
            }
            for (name, value) in &result.fit_diagnostics {
                writeln!(
                    out,
                    "     {} = {}",
                    self.paint(name, |s| s.dimmed()),
                    format_value(Some(*value), Precision::Statistic)
                )?;
            }
        }
        Ok(())
    }

    fn state_marker(&self, state: &ChecklistState) -> String {
        match state {
            ChecklistState::Completed => self.paint("✓", |s| s.green()),
            ChecklistState::CompletedViaFallback { .. } => self.paint("✓", |s| s.yellow()),
            ChecklistState::Skipped { .. } => self.paint("-", |s| s.dimmed()),
            ChecklistState::Failed { .. } => self.paint("✗", |s| s.red()),
            ChecklistState::NotRequested => self.paint("·", |s| s.dimmed()),
        }
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.use_colors {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}
