use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::record::CanonicalRecord;
use crate::store::RecordStore;
use crate::validate::RejectedRecord;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    pub chunk_size: usize,
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: num_cpus::get(),
        }
    }
}

/// Shared stop flag. Checked before each chunk write; chunks already committed
/// stay committed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub range: Range<usize>,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub table: String,
    pub chunks_attempted: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub chunks_cancelled: usize,
    pub records_written: usize,
    pub failures: Vec<ChunkFailure>,
    /// True only when every chunk was written.
    pub success: bool,
}

impl UploadResult {
    fn empty(table: &str) -> Self {
        Self {
            table: table.to_string(),
            chunks_attempted: 0,
            chunks_succeeded: 0,
            chunks_failed: 0,
            chunks_cancelled: 0,
            records_written: 0,
            failures: Vec::new(),
            success: true,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.chunks_cancelled > 0
    }
}

enum ChunkOutcome {
    Written(usize),
    Failed(ChunkFailure),
    Cancelled,
}

/// Contiguous, disjoint ranges covering `0..len`; a single range when `len`
/// fits in one chunk.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

pub struct UploadCoordinator<'s, S: RecordStore> {
    store: &'s S,
    options: UploadOptions,
}

impl<'s, S: RecordStore> UploadCoordinator<'s, S> {
    pub fn new(store: &'s S, options: UploadOptions) -> Self {
        Self { store, options }
    }

    /// Writes `records` chunk by chunk on a bounded worker pool. Per-chunk
    /// failures are reported in the result; only failing to build the pool is
    /// an error.
    pub fn upload(
        &self,
        table: &str,
        records: &[CanonicalRecord],
        cancel: &CancellationToken,
    ) -> Result<UploadResult, IngestError> {
        let ranges = chunk_ranges(records.len(), self.options.chunk_size);
        if ranges.is_empty() {
            info!(table, "no records to upload");
            return Ok(UploadResult::empty(table));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|idx| format!("upload-{idx}"))
            .build()
            .map_err(|err| IngestError::WorkerPool(err.to_string()))?;

        info!(
            table,
            records = records.len(),
            chunks = ranges.len(),
            concurrency = self.options.concurrency,
            "starting upload"
        );

        let outcomes = pool.install(|| {
            ranges
                .par_iter()
                .enumerate()
                .map(|(index, range)| self.write_chunk(table, index, range.clone(), records, cancel))
                .collect::<Vec<_>>()
        });

        let mut result = UploadResult::empty(table);
        result.chunks_attempted = outcomes.len();
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Written(count) => {
                    result.chunks_succeeded += 1;
                    result.records_written += count;
                }
                ChunkOutcome::Failed(failure) => {
                    result.chunks_failed += 1;
                    result.failures.push(failure);
                }
                ChunkOutcome::Cancelled => result.chunks_cancelled += 1,
            }
        }
        result.failures.sort_by_key(|failure| failure.index);
        result.success = result.chunks_failed == 0 && result.chunks_cancelled == 0;

        if result.success {
            info!(table, records = result.records_written, "upload finished");
        } else {
            warn!(
                table,
                written = result.records_written,
                failed = result.chunks_failed,
                cancelled = result.chunks_cancelled,
                "upload incomplete"
            );
        }
        Ok(result)
    }

    fn write_chunk(
        &self,
        table: &str,
        index: usize,
        range: Range<usize>,
        records: &[CanonicalRecord],
        cancel: &CancellationToken,
    ) -> ChunkOutcome {
        if cancel.is_cancelled() {
            debug!(table, chunk = index, "skipping chunk after cancellation");
            return ChunkOutcome::Cancelled;
        }
        match self.store.append(table, &records[range.clone()]) {
            Ok(count) => {
                debug!(table, chunk = index, count, "chunk written");
                ChunkOutcome::Written(count)
            }
            Err(err) => {
                error!(table, chunk = index, start = range.start, end = range.end, error = %err, "chunk failed");
                ChunkOutcome::Failed(ChunkFailure {
                    index,
                    range,
                    cause: err.to_string(),
                })
            }
        }
    }

    /// Audit trail for rejected records. Never affects the upload outcome.
    pub fn upload_dropped(&self, table: &str, rejected: &[RejectedRecord]) -> usize {
        if rejected.is_empty() {
            return 0;
        }
        match self.store.append_dropped(table, rejected) {
            Ok(count) => {
                info!(table, count, "stored dropped records");
                count
            }
            Err(err) => {
                warn!(table, error = %err, "failed to store dropped records");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_unit_when_within_chunk_size() {
        assert_eq!(chunk_ranges(10_000, 10_000), vec![0..10_000]);
        assert_eq!(chunk_ranges(3, 10), vec![0..3]);
    }

    #[test]
    fn ranges_cover_input_contiguously() {
        assert_eq!(
            chunk_ranges(25_000, 10_000),
            vec![0..10_000, 10_000..20_000, 20_000..25_000]
        );
        assert!(chunk_ranges(0, 10).is_empty());
    }

    #[test]
    fn success_flag_is_serialized() {
        let store = crate::store::MemoryStore::new();
        let records = (0..3)
            .map(|row| {
                CanonicalRecord::new(
                    row,
                    crate::domain::Record::new().with("POS", row as i64),
                    chrono::Utc::now(),
                )
            })
            .collect::<Vec<_>>();
        let coordinator = UploadCoordinator::new(
            &store,
            UploadOptions {
                chunk_size: 2,
                concurrency: 1,
            },
        );
        let result = coordinator
            .upload("t", &records, &CancellationToken::new())
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);

        let retry = coordinator
            .upload("t", &records, &CancellationToken::new())
            .unwrap();
        let json = serde_json::to_value(&retry).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["chunks_failed"], 2);
    }

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
