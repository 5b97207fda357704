use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::backup::backup_table;
use crate::config::ResolvedConfig;
use crate::dedup::deduplicate_outcome;
use crate::discovery::SourceFile;
use crate::domain::{Dataset, TableType};
use crate::error::IngestError;
use crate::notify::Notifier;
use crate::qc::QcSummary;
use crate::reader::DatasetReader;
use crate::schema::schema_for;
use crate::store::RecordStore;
use crate::upload::{CancellationToken, UploadCoordinator, UploadOptions, UploadResult};
use crate::validate::Validator;
use crate::verify::{VerificationResult, Verifier, VerifyOptions};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub upload: UploadOptions,
    pub verify: VerifyOptions,
    pub backup_dir: Option<Utf8PathBuf>,
    pub qc_dir: Option<Utf8PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            upload: UploadOptions::default(),
            verify: VerifyOptions::default(),
            backup_dir: None,
            qc_dir: None,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &ResolvedConfig, dry_run: bool) -> Self {
        Self {
            dry_run,
            upload: config.upload,
            verify: config.verify,
            backup_dir: Some(config.backup_dir.clone()),
            qc_dir: Some(config.qc_dir.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStage {
    Read,
    Validate,
    Upload,
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatasetStatus {
    Succeeded,
    /// Validated only; nothing was written.
    DryRun,
    Failed { stage: DatasetStage, reason: String },
    Cancelled,
}

impl DatasetStatus {
    fn failed(stage: DatasetStage, reason: impl Into<String>) -> Self {
        DatasetStatus::Failed {
            stage,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub id: String,
    pub path: Option<Utf8PathBuf>,
    pub table_type: TableType,
    pub table: String,
    pub total_records: usize,
    pub accepted: usize,
    pub rejected_invalid: usize,
    pub rejected_duplicate: usize,
    pub rejection_reasons: BTreeMap<String, usize>,
    pub dropped_written: usize,
    pub qc_report: Option<Utf8PathBuf>,
    pub backup: Option<Utf8PathBuf>,
    pub upload: Option<UploadResult>,
    pub verification: Option<VerificationResult>,
    pub status: DatasetStatus,
}

impl DatasetReport {
    fn new(id: &str, path: Option<Utf8PathBuf>, table_type: TableType) -> Self {
        Self {
            id: id.to_string(),
            path,
            table_type,
            table: table_type.table_name(),
            total_records: 0,
            accepted: 0,
            rejected_invalid: 0,
            rejected_duplicate: 0,
            rejection_reasons: BTreeMap::new(),
            dropped_written: 0,
            qc_report: None,
            backup: None,
            upload: None,
            verification: None,
            status: DatasetStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub processed: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: Vec<String>,
    pub qc_reports: Vec<Utf8PathBuf>,
    pub datasets: Vec<DatasetReport>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Runs datasets through validate, dedup, backup, upload and verify against a
/// store.
pub struct Pipeline<S: RecordStore, R: DatasetReader> {
    store: S,
    reader: R,
}

impl<S: RecordStore, R: DatasetReader> Pipeline<S, R> {
    pub fn new(store: S, reader: R) -> Self {
        Self { store, reader }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the destination table of every registered table type.
    pub fn bootstrap(&self) -> Result<(), IngestError> {
        for table_type in TableType::ALL {
            let table = table_type.table_name();
            self.store
                .ensure_table(&table, schema_for(table_type))
                .map_err(|err| match err {
                    IngestError::SchemaBootstrap { .. } => err,
                    other => IngestError::SchemaBootstrap {
                        table: table.clone(),
                        message: other.to_string(),
                    },
                })?;
        }
        Ok(())
    }

    /// Reads and ingests `sources`, grouped by table type. Dataset failures
    /// are recorded in the summary; only infrastructure failures are errors.
    pub fn run(
        &self,
        sources: &[SourceFile],
        options: &RunOptions,
        notifier: &dyn Notifier,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, IngestError> {
        let started_at = Utc::now();
        let started = Instant::now();
        if !options.dry_run {
            self.bootstrap()?;
        }

        let mut reports = Vec::with_capacity(sources.len());
        for (table_type, group) in group_by_table_type(sources) {
            info!(%table_type, files = group.len(), "processing file group");
            for source in group {
                let path = Some(source.path.clone());
                if cancel.is_cancelled() {
                    reports.push(DatasetReport::new(source.file_name(), path, table_type));
                    continue;
                }
                sink.event(ProgressEvent {
                    message: format!("phase=Read; file={}", source.file_name()),
                    elapsed: Some(started.elapsed()),
                });
                let report = match self.reader.read(source) {
                    Ok(dataset) => self.ingest(&dataset, path, options, sink, cancel)?,
                    Err(err) => {
                        error!(file = %source.path, error = %err, "failed to read file");
                        let mut report = DatasetReport::new(source.file_name(), path, table_type);
                        report.status = DatasetStatus::failed(DatasetStage::Read, err.to_string());
                        report
                    }
                };
                reports.push(report);
            }
        }

        let summary = summarize(started_at, options.dry_run, reports);
        info!(
            processed = summary.processed.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled.len(),
            "processing summary"
        );
        if let Err(err) = notifier.notify(&summary) {
            warn!(error = %err, "failed to deliver run summary");
        }
        Ok(summary)
    }

    /// Ingests one parsed dataset.
    pub fn ingest(
        &self,
        dataset: &Dataset,
        path: Option<Utf8PathBuf>,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DatasetReport, IngestError> {
        let started = Instant::now();
        let table = dataset.table_type.table_name();
        let mut report = DatasetReport::new(&dataset.id, path, dataset.table_type);
        report.total_records = dataset.records.len();
        let progress = |phase: &str| {
            sink.event(ProgressEvent {
                message: format!("phase={phase}; dataset={}", dataset.id),
                elapsed: Some(started.elapsed()),
            })
        };

        if let Some(qc_dir) = &options.qc_dir {
            match QcSummary::compute(dataset, Utc::now()).write(qc_dir) {
                Ok(path) => report.qc_report = Some(path),
                Err(err) => warn!(dataset = %dataset.id, error = %err, "failed to write QC report"),
            }
        }

        progress("Validate");
        let outcome = Validator::for_table(dataset.table_type).validate(&dataset.records);
        let outcome = deduplicate_outcome(&table, outcome);
        report.accepted = outcome.accepted.len();
        report.rejected_duplicate = outcome
            .rejected
            .iter()
            .filter(|rejected| rejected.reason.is_duplicate())
            .count();
        report.rejected_invalid = outcome.rejected.len() - report.rejected_duplicate;
        report.rejection_reasons = outcome.reason_counts();

        if outcome.accepted.is_empty() {
            error!(dataset = %dataset.id, "no valid records after validation");
            report.status = DatasetStatus::failed(DatasetStage::Validate, "no valid records");
            if !options.dry_run {
                report.dropped_written = UploadCoordinator::new(&self.store, options.upload)
                    .upload_dropped(&dataset.table_type.dropped_table_name(), &outcome.rejected);
            }
            return Ok(report);
        }
        if options.dry_run {
            info!(dataset = %dataset.id, accepted = report.accepted, "dry run, validated only");
            report.status = DatasetStatus::DryRun;
            return Ok(report);
        }
        if cancel.is_cancelled() {
            return Ok(report);
        }

        let coordinator = UploadCoordinator::new(&self.store, options.upload);
        report.dropped_written = coordinator
            .upload_dropped(&dataset.table_type.dropped_table_name(), &outcome.rejected);

        if let Some(backup_dir) = &options.backup_dir {
            match backup_table(&self.store, &table, backup_dir, Utc::now()) {
                Ok(path) => report.backup = Some(path),
                Err(err) => warn!(%table, error = %err, "backup failed, continuing with upload"),
            }
        }

        let rows_before = match self.store.row_count(&table) {
            Ok(count) => count,
            Err(err) => {
                report.status = DatasetStatus::failed(DatasetStage::Upload, err.to_string());
                return Ok(report);
            }
        };

        progress("Upload");
        let upload = coordinator.upload(&table, &outcome.accepted, cancel)?;
        let written = upload.records_written as u64;
        let status = if upload.chunks_failed > 0 {
            Some(DatasetStatus::failed(
                DatasetStage::Upload,
                format!(
                    "{} of {} chunks failed",
                    upload.chunks_failed, upload.chunks_attempted
                ),
            ))
        } else if upload.cancelled() {
            Some(DatasetStatus::Cancelled)
        } else {
            None
        };
        report.upload = Some(upload);
        if let Some(status) = status {
            report.status = status;
            return Ok(report);
        }

        progress("Verify");
        let verifier = Verifier::new(&self.store, options.verify);
        let result = match verifier.verify(&table, &outcome.accepted, rows_before + written) {
            Ok(result) => result,
            Err(err) => {
                report.status = DatasetStatus::failed(DatasetStage::Verify, err.to_string());
                return Ok(report);
            }
        };
        report.status = if result.passed() {
            info!(dataset = %dataset.id, %table, records = written, "dataset ingested");
            DatasetStatus::Succeeded
        } else if !result.count_match {
            DatasetStatus::failed(
                DatasetStage::Verify,
                format!(
                    "expected {} rows, found {}",
                    result.expected_rows, result.actual_rows
                ),
            )
        } else {
            DatasetStatus::failed(
                DatasetStage::Verify,
                format!("{} sampled records not found", result.sampled_missing.len()),
            )
        };
        report.verification = Some(result);
        Ok(report)
    }
}

/// Groups sources by table type in order of first appearance, keeping input
/// order inside each group.
fn group_by_table_type(sources: &[SourceFile]) -> Vec<(TableType, Vec<&SourceFile>)> {
    let mut groups: Vec<(TableType, Vec<&SourceFile>)> = Vec::new();
    for source in sources {
        match groups.iter_mut().find(|(table_type, _)| *table_type == source.table_type) {
            Some((_, group)) => group.push(source),
            None => groups.push((source.table_type, vec![source])),
        }
    }
    groups
}

fn summarize(started_at: DateTime<Utc>, dry_run: bool, datasets: Vec<DatasetReport>) -> RunSummary {
    let mut summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        dry_run,
        processed: Vec::new(),
        failed: Vec::new(),
        cancelled: Vec::new(),
        qc_reports: datasets
            .iter()
            .filter_map(|report| report.qc_report.clone())
            .collect(),
        datasets: Vec::new(),
    };
    for report in &datasets {
        let bucket = match report.status {
            DatasetStatus::Succeeded | DatasetStatus::DryRun => &mut summary.processed,
            DatasetStatus::Failed { .. } => &mut summary.failed,
            DatasetStatus::Cancelled => &mut summary.cancelled,
        };
        bucket.push(report.id.clone());
    }
    summary.datasets = datasets;
    summary
}
