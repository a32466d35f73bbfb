//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::kinds::KindRegistry;
use crate::orchestrator::{KindReport, KindStatus, RunReport, RunStatus};
use crate::planner::DependencyGraph;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Kind outcome row for table display.
#[derive(Tabled)]
struct KindRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Created")]
    created: usize,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Changed")]
    changed: usize,
    #[tabled(rename = "Unchanged")]
    unchanged: usize,
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "Note")]
    note: String,
}

/// Registered kind row for table display.
#[derive(Tabled)]
struct KindInfoRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    display_name: String,
    #[tabled(rename = "Level")]
    level: usize,
    #[tabled(rename = "Depends on")]
    dependencies: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a run report for display.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let mut output = String::new();

        let title = if report.dry_run {
            format!("{} (dry run)", report.mode)
        } else {
            report.mode.to_string()
        };
        let _ = writeln!(output, "\nRun: {title}");
        let _ = writeln!(output, "   Order: {}\n", report.order.join(" -> "));

        if report.kinds.is_empty() {
            let _ = writeln!(output, "{} Nothing to do.", "✓".green());
            return output;
        }

        let rows: Vec<KindRow> = report.kinds.iter().map(Self::kind_row).collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let failures: Vec<&KindReport> =
            report.kinds.iter().filter(|k| !k.failures.is_empty()).collect();
        if !failures.is_empty() {
            let _ = writeln!(output, "\n{} Failed items:", "✗".red());
            for kind in failures {
                for failure in &kind.failures {
                    let _ = writeln!(
                        output,
                        "   - {} {} ({:?}): {}",
                        kind.kind, failure.identifier, failure.action, failure.cause
                    );
                }
            }
        }

        let warnings: Vec<(&str, &String)> = report
            .kinds
            .iter()
            .flat_map(|k| k.warnings.iter().map(move |w| (k.kind.as_str(), w)))
            .collect();
        if !warnings.is_empty() || !report.notes.is_empty() {
            let _ = writeln!(output, "\n{} Notes:", "⚠".yellow());
            for note in &report.notes {
                let _ = writeln!(output, "   - {note}");
            }
            for (kind, warning) in warnings {
                let _ = writeln!(output, "   - {kind}: {warning}");
            }
        }

        let (created, deleted, changed, unchanged, total) = report.totals();
        let _ = writeln!(
            output,
            "\nTotal: {} created, {} changed, {} deleted, {unchanged} unchanged ({total} items)",
            created.to_string().green(),
            changed.to_string().yellow(),
            deleted.to_string().red()
        );

        let status = match report.status {
            RunStatus::Completed => format!("{} Run completed", "✓".green()),
            RunStatus::Failed => format!("{} Run failed", "✗".red()),
            RunStatus::Suspended => format!(
                "{} Run suspended; rerun the same command to resume",
                "⏸".yellow()
            ),
        };
        let _ = writeln!(output, "{status}");

        output
    }

    fn kind_row(kind: &KindReport) -> KindRow {
        let note = match &kind.status {
            KindStatus::Completed if kind.resumed => String::from("resumed"),
            KindStatus::Completed if !kind.pulled.is_empty() => {
                format!("{} pulled", kind.pulled.len())
            }
            KindStatus::Completed => String::new(),
            KindStatus::Failed { reason } | KindStatus::Skipped { reason } => {
                Self::truncate(reason, 48)
            }
        };
        KindRow {
            kind: kind.kind.clone(),
            status: Self::format_status(&kind.status),
            created: kind.result.created,
            deleted: kind.result.deleted,
            changed: kind.result.changed,
            unchanged: kind.result.unchanged,
            total: kind.result.total,
            note,
        }
    }

    /// Formats the registered kinds in dependency order.
    #[must_use]
    pub fn format_kinds(
        &self,
        registry: &KindRegistry,
        graph: &DependencyGraph,
        detailed: bool,
    ) -> String {
        let entries: Vec<KindJson> = graph
            .levels()
            .iter()
            .enumerate()
            .flat_map(|(level, kinds)| kinds.iter().map(move |kind| (level, kind)))
            .filter_map(|(level, name)| {
                registry.get(name).map(|kind| {
                    let info = kind.info();
                    KindJson {
                        kind: info.name.clone(),
                        display_name: info.display_name.clone(),
                        level,
                        dependencies: info.dependencies.clone(),
                        supports_update: info.supports_update,
                    }
                })
            })
            .collect();

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&entries).unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<KindInfoRow> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| KindInfoRow {
                        index: i + 1,
                        kind: e.kind.clone(),
                        display_name: e.display_name.clone(),
                        level: e.level,
                        dependencies: if detailed {
                            e.dependencies.join(", ")
                        } else {
                            e.dependencies.len().to_string()
                        },
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats the rows of a query preview.
    #[must_use]
    pub fn format_preview(&self, rows: &[Value]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(rows).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for row in rows {
                    let _ = writeln!(output, "{row}");
                }
                let _ = writeln!(output, "\n{} row(s)", rows.len());
                output
            }
        }
    }

    fn format_status(status: &KindStatus) -> String {
        match status {
            KindStatus::Completed => "completed".green().to_string(),
            KindStatus::Failed { .. } => "failed".red().to_string(),
            KindStatus::Skipped { .. } => "skipped".yellow().to_string(),
        }
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{cut}...")
        }
    }

    /// Prints a success message.
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(r#"{{"status": "success", "message": {}}}"#, Value::from(message));
            }
            OutputFormat::Text => {
                println!("{} {message}", "✓".green());
            }
        }
    }

    /// Prints an error message.
    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!(r#"{{"status": "error", "message": {}}}"#, Value::from(message));
            }
            OutputFormat::Text => {
                eprintln!("{} {message}", "✗".red());
            }
        }
    }

    /// Prints a warning message.
    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!(r#"{{"status": "warning", "message": {}}}"#, Value::from(message));
            }
            OutputFormat::Text => {
                eprintln!("{} {message}", "⚠".yellow());
            }
        }
    }
}

/// JSON view of a registered kind.
#[derive(Serialize)]
struct KindJson {
    kind: String,
    display_name: String,
    level: usize,
    dependencies: Vec<String>,
    supports_update: bool,
}
