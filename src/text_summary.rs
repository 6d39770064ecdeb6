//! Text summary builder for CLI output.

use crate::model::BatchReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished batch.
pub(crate) fn build_text_summary(report: &BatchReport, tracked: usize) -> TextSummary {
    let mut lines = Vec::new();

    let verb = report.mode.verb();
    lines.push(format!(
        "{}: {} {verb}, {} already {verb}, {} failed",
        if report.cancelled { "Cancelled" } else { "Finished" },
        report.succeeded,
        report.skipped,
        report.failed,
    ));
    lines.push(format!(
        "Elapsed: {}",
        humantime::format_duration(std::time::Duration::from_secs(report.elapsed.as_secs()))
    ));
    lines.push(format!("Tracked in total: {tracked}"));

    if !report.failures.is_empty() {
        lines.push("Failures:".to_string());
        for f in &report.failures {
            lines.push(format!("  {}: {}", f.id, f.error));
        }
    }

    TextSummary { lines }
}
