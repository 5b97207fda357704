use std::fs;

use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::pipeline::RunSummary;

/// Receives the summary at the end of a run. Delivery is best-effort: the
/// orchestrator logs failures and never changes the outcome because of them.
pub trait Notifier {
    fn notify(&self, summary: &RunSummary) -> Result<(), IngestError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<(), IngestError> {
        info!(
            processed = summary.processed.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled.len(),
            "ingestion run finished"
        );
        for id in &summary.failed {
            warn!(dataset = %id, "dataset failed");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileNotifier {
    path: Utf8PathBuf,
}

impl JsonFileNotifier {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Notifier for JsonFileNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| IngestError::Notify(err.to_string()))?;
        }
        let json = serde_json::to_string_pretty(summary)
            .map_err(|err| IngestError::Notify(err.to_string()))?;
        fs::write(self.path.as_std_path(), json)
            .map_err(|err| IngestError::Notify(err.to_string()))?;
        info!(path = %self.path, "wrote run summary");
        Ok(())
    }
}

/// Fans a summary out to several notifiers; every one is tried.
#[derive(Default)]
pub struct Notifiers(Vec<Box<dyn Notifier>>);

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.0.push(Box::new(notifier));
        self
    }
}

impl Notifier for Notifiers {
    fn notify(&self, summary: &RunSummary) -> Result<(), IngestError> {
        let mut first_err = None;
        for notifier in &self.0 {
            if let Err(err) = notifier.notify(summary) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
