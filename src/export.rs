//! Export Module
//!
//! Renders a [`RunReport`] as a text table, JSON, JSON Lines or CSV for
//! analysts and downstream tooling.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::pipeline::{Finding, RunReport};

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

/// Column headers shared by the tabular formats.
pub const FINDING_COLUMNS: [&str; 5] = ["source", "destination", "metric", "z_score", "hostname"];

/// JSON-serializable run report
#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub version: &'static str,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

/// Exports a report in the specified format
pub fn export_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(export_text(report)),
        OutputFormat::Json => export_json(report),
        OutputFormat::JsonLines => export_jsonl(report),
        OutputFormat::Csv => export_csv(report),
    }
}

/// Exports report as pretty-printed JSON
pub fn export_json(report: &RunReport) -> Result<String> {
    let json_report = JsonReport {
        version: "1.0",
        report,
    };
    serde_json::to_string_pretty(&json_report).context("Failed to serialize report")
}

/// Exports report as JSON Lines (one finding per line)
pub fn export_jsonl(report: &RunReport) -> Result<String> {
    let mut lines = Vec::with_capacity(report.findings.len() + 1);

    // First line is the summary
    let summary = serde_json::json!({
        "type": "summary",
        "timestamp": report.generated_at.to_rfc3339(),
        "total_records": report.total_records,
        "groups": report.groups,
        "undefined_scores": report.undefined_scores,
        "candidates": report.candidates,
        "threshold": report.threshold,
        "enrichment": report.enrichment,
        "finding_count": report.findings.len(),
    });
    lines.push(serde_json::to_string(&summary)?);

    for finding in &report.findings {
        lines.push(serde_json::to_string(finding)?);
    }

    Ok(lines.join("\n"))
}

/// Exports findings as CSV with a header row
pub fn export_csv(report: &RunReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(FINDING_COLUMNS)?;
    for finding in &report.findings {
        wtr.write_record([
            finding.source.clone(),
            finding.destination.clone(),
            finding.metric.to_string(),
            format!("{:.4}", finding.z_score),
            finding.hostname.clone().unwrap_or_default(),
        ])?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("CSV writer error: {}", e))?;
    String::from_utf8(data).context("UTF-8 conversion error")
}

/// Exports report as formatted text
pub fn export_text(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "--- Flow Anomaly Report ---\nTime: {}\nRecords: {}\nGroups: {}\nUndefined Scores: {}\nCandidates (|z| > {}): {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S"),
        report.total_records,
        report.groups,
        report.undefined_scores,
        report.threshold,
        report.candidates,
    ));

    if let Some(enrichment) = &report.enrichment {
        output.push_str(&format!(
            "Destinations: {} ({} resolved, {} suppressed, {} failed)\n",
            enrichment.distinct_destinations,
            enrichment.verdicts.resolved,
            enrichment.verdicts.suppressed,
            enrichment.verdicts.failed,
        ));
    }

    if report.findings.is_empty() {
        output.push_str("Findings: No anomalies found\n");
        return output;
    }

    output.push_str(&format!("\nFindings ({}):\n", report.findings.len()));
    output.push_str(&format!(
        "{:<40} {:<40} {:>14} {:>9}  {}\n",
        "Source", "Destination", "Metric", "Z-Score", "Hostname"
    ));
    output.push_str(&"-".repeat(120));
    output.push('\n');

    for finding in &report.findings {
        output.push_str(&format_finding(finding));
        output.push('\n');
    }

    output
}

fn format_finding(finding: &Finding) -> String {
    format!(
        "{:<40} {:<40} {:>14} {:>9.4}  {}",
        truncate(&finding.source, 40),
        truncate(&finding.destination, 40),
        format_metric(finding.metric),
        finding.z_score,
        finding.hostname.as_deref().unwrap_or("N/A"),
    )
}

/// Formats a metric without a trailing `.0` for whole numbers
fn format_metric(metric: f64) -> String {
    if metric.fract() == 0.0 && metric.abs() < 1e15 {
        format!("{:.0}", metric)
    } else {
        format!("{:.2}", metric)
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else {
        let head: String = value.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
