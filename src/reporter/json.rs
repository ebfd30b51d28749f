//! JSON reporter for machine-readable output

use crate::aggregate::DatasetSummary;
use crate::ComplianceReport;
use serde::Serialize;

/// Reporter for JSON output
pub struct JsonReporter {
    /// Whether to pretty-print JSON
    pretty: bool,
}

impl JsonReporter {
    /// Create a new JSON reporter
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Enable pretty-printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Full compliance report; numbers are rounded by the field serializers
    pub fn report(&self, report: &ComplianceReport) -> anyhow::Result<String> {
        self.to_json(report)
    }

    /// Dataset summary block on its own
    pub fn summary(&self, summary: &DatasetSummary) -> anyhow::Result<String> {
        self.to_json(summary)
    }

    fn to_json<T: Serialize>(&self, value: &T) -> anyhow::Result<String> {
        let mut json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        json.push('\n');
        Ok(json)
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}
