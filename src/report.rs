//! Validation reports: the summary, the persisted records for each failing entry and
//! their console rendering.

use crate::{ElementDelta, ValidatedEntry, ValidationOutcome};
use anyhow::{bail, Context, Result};
use csv::Writer;
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult, Write as FmtWrite};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::*;

/// Outcomes for a whole catalogue, in catalogue order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    outcomes: Vec<ValidatedEntry>,
}

impl ValidationReport {
    pub fn new(outcomes: Vec<ValidatedEntry>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[ValidatedEntry] {
        &self.outcomes
    }

    /// Entries that are not valid.
    pub fn failures(&self) -> impl Iterator<Item = &ValidatedEntry> {
        self.outcomes.iter().filter(|o| !o.outcome.is_valid())
    }

    pub fn is_all_valid(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.outcomes.len(),
            ..Summary::default()
        };
        for validated in &self.outcomes {
            match validated.outcome {
                ValidationOutcome::Valid => summary.valid += 1,
                ValidationOutcome::ParseFailure { .. } => summary.parse_failures += 1,
                ValidationOutcome::Mismatch { .. } => summary.mismatches += 1,
            }
        }
        summary
    }

    /// One persisted record per failing entry.
    pub fn records(&self) -> Vec<ReportRecord> {
        self.failures().filter_map(ReportRecord::from_entry).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    pub valid: usize,
    pub parse_failures: usize,
    pub mismatches: usize,
}

impl Summary {
    /// Parse failures and mismatches together.
    pub fn invalid(&self) -> usize {
        self.parse_failures + self.mismatches
    }

    /// Percentage of invalid entries; zero for an empty catalogue.
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.invalid() as f64 / self.total as f64 * 100.0
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "Total molecules: {}", self.total)?;
        writeln!(f, "Valid: {}", self.valid)?;
        writeln!(
            f,
            "Invalid: {} ({} parse failures, {} mismatches)",
            self.invalid(),
            self.parse_failures,
            self.mismatches
        )?;
        write!(f, "Error rate: {:.1}%", self.error_rate())
    }
}

/// How a failing entry is written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    pub name: String,
    pub formula: String,
    pub smiles: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differences: Option<Vec<ElementDelta>>,
    pub status: &'static str,
}

impl ReportRecord {
    /// `None` for valid entries, which are not persisted.
    pub fn from_entry(validated: &ValidatedEntry) -> Option<Self> {
        let entry = &validated.entry;
        let mut record = ReportRecord {
            name: entry.name.clone(),
            formula: entry.authored_formula.clone(),
            smiles: entry.structural_notation.clone(),
            kind: validated.outcome.kind(),
            reason: None,
            expected: None,
            actual: None,
            differences: None,
            status: "NEEDS_REVIEW",
        };
        match &validated.outcome {
            ValidationOutcome::Valid => return None,
            ValidationOutcome::ParseFailure { reason } => record.reason = Some(reason.clone()),
            ValidationOutcome::Mismatch { expected, actual } => {
                record.expected = Some(expected.to_string());
                record.actual = Some(actual.to_string());
                record.differences = Some(expected.differences(actual));
            }
        }
        Some(record)
    }

    fn differences_text(&self) -> String {
        self.differences
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(ElementDelta::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => bail!("Unknown report format '{other}', expected 'json' or 'csv'"),
        }
    }
}

/// Writes the failing entries as a pretty-printed JSON array.
pub fn write_json(report: &ValidationReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(&report.records())
        .context("Failed to serialize validation report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!("JSON report written to {}", path.display());
    Ok(())
}

/// Writes the failing entries as CSV, one row per entry.
pub fn write_csv(report: &ValidationReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    wtr.write_record([
        "name",
        "formula",
        "smiles",
        "kind",
        "reason",
        "expected",
        "actual",
        "differences",
    ])?;
    for record in report.records() {
        let differences = record.differences_text();
        wtr.write_record([
            record.name.as_str(),
            record.formula.as_str(),
            record.smiles.as_str(),
            record.kind,
            record.reason.as_deref().unwrap_or(""),
            record.expected.as_deref().unwrap_or(""),
            record.actual.as_deref().unwrap_or(""),
            differences.as_str(),
        ])?;
    }
    wtr.flush()?;
    info!("CSV report written to {}", path.display());
    Ok(())
}

pub fn write_report(report: &ValidationReport, path: impl AsRef<Path>, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Json => write_json(report, path),
        ReportFormat::Csv => write_csv(report, path),
    }
}

/// The progress line for the `index`th (1-based) of `total` entries.
pub fn render_progress(index: usize, total: usize, validated: &ValidatedEntry) -> String {
    let name = validated.name();
    match &validated.outcome {
        ValidationOutcome::Valid => format!("✓ [{index}/{total}] {name}"),
        ValidationOutcome::ParseFailure { reason } => {
            format!("✗ [{index}/{total}] {name}\n   → SMILES parse error: {reason}")
        }
        ValidationOutcome::Mismatch { expected, actual } => format!(
            "✗ [{index}/{total}] {name}\n   → Formula mismatch: expected {expected}, got {actual}"
        ),
    }
}

/// A detail block for every failing entry.
pub fn render_details(report: &ValidationReport) -> String {
    let mut out = String::new();
    for record in report.records() {
        let _ = writeln!(out, "\n{}", record.name);
        let _ = writeln!(out, "  Current SMILES: {}", record.smiles);
        let _ = writeln!(out, "  Expected formula: {}", record.formula);
        if let Some(reason) = &record.reason {
            let _ = writeln!(out, "  Parse error: {reason}");
        }
        if let (Some(expected), Some(actual)) = (&record.expected, &record.actual) {
            let _ = writeln!(out, "  Expected parsed: {expected}");
            let _ = writeln!(out, "  Derived formula: {actual}");
            let _ = writeln!(out, "  Differences: {}", record.differences_text());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{canonicalize, CatalogueEntry};

    fn sample_report() -> ValidationReport {
        ValidationReport::new(vec![
            ValidatedEntry {
                entry: CatalogueEntry::new("Water", "H₂O", "O"),
                outcome: ValidationOutcome::Valid,
            },
            ValidatedEntry {
                entry: CatalogueEntry::new("Broken", "CH₄", "C1"),
                outcome: ValidationOutcome::ParseFailure {
                    reason: "Ring closure 1 opened at position 1 is never closed".to_string(),
                },
            },
            ValidatedEntry {
                entry: CatalogueEntry::new("Bad", "C₂H₆O", "CC=O"),
                outcome: ValidationOutcome::Mismatch {
                    expected: canonicalize("C₂H₆O"),
                    actual: canonicalize("C2H4O"),
                },
            },
        ])
    }

    #[test]
    fn test_summary() {
        let summary = sample_report().summary();
        assert_eq!(
            summary,
            Summary {
                total: 3,
                valid: 1,
                parse_failures: 1,
                mismatches: 1
            }
        );
        assert_eq!(summary.invalid(), 2);
        assert!((summary.error_rate() - 66.666).abs() < 0.01);
        assert!(summary.to_string().contains("Error rate: 66.7%"));
        assert_eq!(ValidationReport::default().summary().error_rate(), 0.0);
    }

    #[test]
    fn test_records_skip_valid_entries() {
        let report = sample_report();
        let records = report.records();
        assert_eq!(records.len(), 2);
        assert!(!report.is_all_valid());

        assert_eq!(records[0].kind, "parse_failure");
        assert_eq!(records[0].smiles, "C1");
        assert!(records[0].expected.is_none());

        assert_eq!(records[1].kind, "mismatch");
        assert_eq!(records[1].formula, "C₂H₆O");
        assert_eq!(records[1].expected.as_deref(), Some("C2H6O"));
        assert_eq!(records[1].actual.as_deref(), Some("C2H4O"));
        assert_eq!(records[1].differences_text(), "H:-2");
    }

    #[test]
    fn test_json_shape() {
        let records = sample_report().records();
        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(json[0]["kind"], "parse_failure");
        assert!(json[0].get("expected").is_none());
        assert_eq!(json[1]["expected"], "C2H6O");
        assert_eq!(json[1]["differences"][0]["element"], "H");
        assert_eq!(json[1]["differences"][0]["actual"], 4);
        assert_eq!(json[1]["status"], "NEEDS_REVIEW");
    }

    #[test]
    fn test_write_reports() {
        let dir = std::env::temp_dir();
        let json_path = dir.join(format!("molcheck-report-{}.json", std::process::id()));
        let csv_path = dir.join(format!("molcheck-report-{}.csv", std::process::id()));
        let report = sample_report();

        write_report(&report, &json_path, ReportFormat::Json).unwrap();
        let json = fs::read_to_string(&json_path).unwrap();
        assert!(json.contains("\"C₂H₆O\""), "UTF-8 should be kept: {json}");

        write_report(&report, &csv_path, ReportFormat::Csv).unwrap();
        let csv_text = fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = csv_text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("name,formula,smiles,kind"));
        assert!(lines[2].ends_with("mismatch,,C2H6O,C2H4O,H:-2"));

        let _ = fs::remove_file(json_path);
        let _ = fs::remove_file(csv_path);
    }

    #[test]
    fn test_report_format() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!(" CSV ".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_rendering() {
        let report = sample_report();
        let outcomes = report.outcomes();
        assert_eq!(render_progress(1, 3, &outcomes[0]), "✓ [1/3] Water");
        assert!(render_progress(2, 3, &outcomes[1]).starts_with("✗ [2/3] Broken\n   → SMILES parse error"));
        assert!(render_progress(3, 3, &outcomes[2]).ends_with("expected C2H6O, got C2H4O"));

        let details = render_details(&report);
        assert!(!details.contains("Water"));
        assert!(details.contains("Broken"));
        assert!(details.contains("  Differences: H:-2"));
    }
}
