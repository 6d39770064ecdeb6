//! Post-batch processing: report export.

use crate::model::BatchReport;
use anyhow::{Context, Result};
use std::path::Path;

/// Write the report as pretty JSON.
pub(crate) fn export_report_json(path: &Path, report: &BatchReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Process a finished batch: run the configured exports and return their
/// outcome messages for presentation layers.
pub(crate) fn process_batch_completion(
    report: &BatchReport,
    report_json: Option<&Path>,
) -> Vec<String> {
    let mut messages = Vec::new();
    if let Some(path) = report_json {
        match export_report_json(path, report) {
            Ok(()) => messages.push(format!("Exported report: {}", path.display())),
            Err(e) => messages.push(format!("Export report failed: {e:#}")),
        }
    }
    messages
}
