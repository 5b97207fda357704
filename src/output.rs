use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{DatasetStatus, ProgressEvent, ProgressSink, RunSummary};
use crate::schema::TableSchema;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_schemas(schemas: &[&TableSchema]) -> io::Result<()> {
        Self::print_json(&schemas)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr for interactive runs.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("[{:>7.2}s] {}", elapsed.as_secs_f64(), event.message),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    println!("Processing summary");
    println!(
        "  files: {}  succeeded: {}  failed: {}  cancelled: {}",
        summary.datasets.len(),
        summary.processed.len(),
        summary.failed.len(),
        summary.cancelled.len()
    );
    for report in &summary.datasets {
        let status = match &report.status {
            DatasetStatus::Succeeded => "ok".to_string(),
            DatasetStatus::DryRun => "validated (dry run)".to_string(),
            DatasetStatus::Failed { stage, reason } => format!("failed at {stage:?}: {reason}"),
            DatasetStatus::Cancelled => "cancelled".to_string(),
        };
        println!(
            "  {} -> {} [{} accepted, {} invalid, {} duplicate] {}",
            report.id,
            report.table,
            report.accepted,
            report.rejected_invalid,
            report.rejected_duplicate,
            status
        );
    }
    if !summary.qc_reports.is_empty() {
        println!("QC reports:");
        for path in &summary.qc_reports {
            println!("  {path}");
        }
    }
}
