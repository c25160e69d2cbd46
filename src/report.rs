//! Plain-text run summary.
//!
//! Written as `uplift_summary_<YYYYmmdd_HHMMSS>.log` into `run.summary_dir`
//! at the end of a run: header, one section per file, totals.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use uplifter_core::models::{Decision, ModernizationOutcome};

use crate::pipeline::RunReport;
use crate::progress::format_number;

const RULE: &str = "==================================================";

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{RULE}\n  {title}\n{RULE}");
}

fn decision_label(decision: Decision) -> &'static str {
    match decision {
        Decision::Accepted => "ACCEPTED",
        Decision::Rejected => "REJECTED",
        Decision::Unchanged => "UNCHANGED",
        Decision::Errored => "ERRORED",
        Decision::Canceled => "CANCELED",
    }
}

fn render_outcome(out: &mut String, outcome: &ModernizationOutcome) {
    let _ = writeln!(
        out,
        "\n--- {} [{}] ---",
        outcome.path.display(),
        decision_label(outcome.decision)
    );
    let _ = writeln!(out, "Reason: {}", outcome.reason);
    for reason in outcome.reasons.iter().skip(1) {
        let _ = writeln!(out, "        {reason}");
    }
    let _ = writeln!(out, "Final state: {}", outcome.final_state);
    if !outcome.chunks.is_empty() {
        let _ = writeln!(
            out,
            "Guidance: {}",
            if outcome.guidance_found { "found" } else { "none" }
        );
        for chunk in &outcome.chunks {
            let _ = writeln!(
                out,
                "Chunk {} ({} tokens, {}): {}",
                chunk.ordinal + 1,
                format_number(chunk.estimated_tokens as u64),
                chunk.source,
                chunk.change_summary.replace('\n', " ")
            );
        }
    }
    if let Some(backup) = &outcome.backup_path {
        let _ = writeln!(out, "Backup: {}", backup.display());
    }
}

/// The summary text for `report`.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    section(&mut out, "UPLIFT SUMMARY");
    let _ = writeln!(out, "Run: {}", report.run_id);
    let _ = writeln!(
        out,
        "Target: {} {}",
        report.language.display_name(),
        report.target_version
    );
    let _ = writeln!(out, "Started: {}", report.started_at.to_rfc3339());
    let _ = writeln!(out, "Finished: {}", report.finished_at.to_rfc3339());

    section(&mut out, "FILES");
    for outcome in &report.outcomes {
        render_outcome(&mut out, outcome);
    }
    for path in &report.not_started {
        let _ = writeln!(out, "\n--- {} [NOT STARTED] ---", path.display());
    }

    section(&mut out, "TOTALS");
    let t = &report.totals;
    let _ = writeln!(out, "Files processed: {}", t.files);
    let _ = writeln!(out, "Accepted: {}", t.accepted);
    let _ = writeln!(out, "Rejected: {}", t.rejected);
    let _ = writeln!(out, "Unchanged: {}", t.unchanged);
    let _ = writeln!(out, "Errored: {}", t.errored);
    let _ = writeln!(out, "Canceled: {}", t.canceled);
    let _ = writeln!(out, "Fallback chunks: {}", t.fallback_chunks);
    if let Some(reason) = &report.halted {
        let _ = writeln!(out, "HALTED: {reason}");
    }
    out
}

/// Write the summary into `dir`, creating it if needed.
pub fn write_summary(dir: &Path, report: &RunReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create summary directory: {}", dir.display()))?;
    let name = format!(
        "uplift_summary_{}.log",
        report.finished_at.format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(name);
    std::fs::write(&path, render_summary(report))
        .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    Ok(path)
}
