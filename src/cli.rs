//! Command handler functions for the covlens CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use tokio::sync::mpsc;

use crate::model::{Counts, DetailRecord};
use crate::runner::{BatchReport, BatchRunner, CoverageEntry};

/// Output style for the `details` command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Style {
    #[default]
    Text,
    Json,
}

/// Run one pass over `reports` and gather everything it published, ordered
/// by file for stable output.
pub async fn collect(
    runner: &BatchRunner,
    reports: &[PathBuf],
) -> (Vec<CoverageEntry>, BatchReport) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = runner.run(reports, tx).await;
    let mut entries = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }
    entries.sort_by_cached_key(|e| e.file.to_string());
    (entries, report)
}

fn counts(c: &Counts) -> String {
    format!("{}/{} ({:.1}%)", c.hit, c.instrumented, c.rate() * 100.0)
}

fn write_failures(out: &mut String, report: &BatchReport) {
    if report.failures.is_empty() {
        return;
    }
    writeln!(out).unwrap();
    writeln!(out, "Skipped {} report(s):", report.failures.len()).unwrap();
    for failure in &report.failures {
        writeln!(out, "  {}: {}", failure.path.display(), failure.error).unwrap();
    }
}

pub async fn cmd_summary(runner: &BatchRunner, reports: &[PathBuf]) -> Result<String> {
    if reports.is_empty() {
        bail!("No coverage reports given");
    }
    let (entries, report) = collect(runner, reports).await;

    let mut out = String::new();
    if entries.is_empty() {
        writeln!(out, "No coverage data found.").unwrap();
    } else {
        writeln!(
            out,
            "{:<50} {:>20} {:>20} {:>20}",
            "FILE", "LINES", "BRANCHES", "FUNCTIONS"
        )
        .unwrap();
        writeln!(out, "{}", "-".repeat(113)).unwrap();
        for entry in &entries {
            let s = &entry.summary;
            writeln!(
                out,
                "{:<50} {:>20} {:>20} {:>20}",
                entry.file.to_string(),
                counts(&s.statements),
                counts(&s.branches),
                counts(&s.declarations),
            )
            .unwrap();
        }
    }
    write_failures(&mut out, &report);
    Ok(out)
}

pub async fn cmd_details(
    runner: &BatchRunner,
    reports: &[PathBuf],
    source_file: &Path,
    style: Style,
) -> Result<String> {
    let (entries, report) = collect(runner, reports).await;

    let mut out = String::new();
    let mut found = false;
    for entry in entries.iter().filter(|e| e.file.matches(source_file)) {
        found = true;
        let records = runner
            .details(entry.key)
            .await
            .with_context(|| format!("Failed to expand details for '{}'", entry.file))?
            .unwrap_or_default();
        match style {
            Style::Json => {
                let json = serde_json::json!({ "file": entry.file, "records": records });
                writeln!(out, "{}", serde_json::to_string_pretty(&json)?).unwrap();
            }
            Style::Text => write_records(&mut out, &entry.file.to_string(), &records),
        }
    }

    if !found {
        bail!("No coverage data for '{}'", source_file.display());
    }
    write_failures(&mut out, &report);
    Ok(out)
}

fn write_records(out: &mut String, file: &str, records: &[DetailRecord]) {
    writeln!(out, "{file}").unwrap();
    writeln!(out, "{:>6}  {:>10}  BRANCHES", "LINE", "HITS").unwrap();
    writeln!(out, "{}", "-".repeat(40)).unwrap();
    for record in records {
        if let DetailRecord::Statement { line, hits, branches } = record {
            let marker = if *hits > 0 { "✓" } else { "✗" };
            let arms: Vec<String> = branches
                .iter()
                .map(|b| format!("{}:{}", b.label, b.executed))
                .collect();
            let row = format!("{:>6}  {:>10}  {} {}", line + 1, hits, marker, arms.join(" "));
            writeln!(out, "{}", row.trim_end()).unwrap();
        }
    }

    let functions: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            DetailRecord::Declaration { name, hits, line } => Some((name, hits, line)),
            DetailRecord::Statement { .. } => None,
        })
        .collect();
    if !functions.is_empty() {
        writeln!(out).unwrap();
        writeln!(out, "{:>6}  {:>10}  FUNCTION", "LINE", "HITS").unwrap();
        writeln!(out, "{}", "-".repeat(40)).unwrap();
        for (name, hits, line) in functions {
            writeln!(out, "{:>6}  {:>10}  {}", line + 1, hits, name).unwrap();
        }
    }
}
