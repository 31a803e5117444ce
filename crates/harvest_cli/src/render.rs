//! Plain-text rendering of run reports and run history.

use std::fmt::Write;

use harvest_core::{RowsAddedEntry, RunReport, RunSummary};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn report(report: &RunReport) -> String {
    let run = &report.run;
    let id = run
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let status = if report.succeeded() { "succeeded" } else { "failed" };

    let mut out = format!(
        "run {} {} {}: {}",
        id, run.collector_name, run.collector_version, status
    );
    if let Some(ms) = run.duration_ms() {
        let _ = write!(out, " in {} ms", ms);
    }
    out.push('\n');
    for entry in &run.rows_added {
        let _ = writeln!(out, "  {}: {} rows added", entry.table_name, entry.num_rows_added);
    }
    if let Some(error) = &run.error {
        let _ = writeln!(out, "  error: {}", error.message);
    }
    out
}

pub fn runs(summaries: &[RunSummary]) -> String {
    if summaries.is_empty() {
        return "no runs recorded\n".to_string();
    }
    let mut out = String::new();
    for summary in summaries {
        let started = summary
            .start_time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>6}  {:<10}  {}  {} {}  {}",
            summary.id.0,
            summary.status(),
            started,
            summary.collector_name,
            summary.collector_version,
            counts(&summary.rows_added)
        );
        if let Some(error) = &summary.error {
            let first_line = error.lines().next().unwrap_or_default();
            let _ = writeln!(out, "        error: {}", first_line);
        }
    }
    out
}

fn counts(entries: &[RowsAddedEntry]) -> String {
    if entries.is_empty() {
        return "-".to_string();
    }
    entries
        .iter()
        .map(|e| format!("{}={}", e.table_name, e.num_rows_added))
        .collect::<Vec<_>>()
        .join(", ")
}
