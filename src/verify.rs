use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::record::{CanonicalRecord, RecordHash};
use crate::store::RecordStore;

pub const DEFAULT_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub sample_size: usize,
    /// Fixed seed for reproducible sampling.
    pub seed: Option<u64>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub expected_rows: u64,
    pub actual_rows: u64,
    pub count_match: bool,
    pub sampled: usize,
    pub sampled_missing: Vec<RecordHash>,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.count_match && self.sampled_missing.is_empty()
    }
}

pub struct Verifier<'s, S: RecordStore> {
    store: &'s S,
    options: VerifyOptions,
}

impl<'s, S: RecordStore> Verifier<'s, S> {
    pub fn new(store: &'s S, options: VerifyOptions) -> Self {
        Self { store, options }
    }

    /// Checks the table holds exactly `expected_rows` rows, then spot-checks a
    /// sample of `uploaded` for exact presence. A count mismatch skips sampling.
    pub fn verify(
        &self,
        table: &str,
        uploaded: &[CanonicalRecord],
        expected_rows: u64,
    ) -> Result<VerificationResult, IngestError> {
        let actual_rows = self.store.row_count(table)?;
        if actual_rows != expected_rows {
            warn!(table, expected_rows, actual_rows, "row count mismatch");
            return Ok(VerificationResult {
                expected_rows,
                actual_rows,
                count_match: false,
                sampled: 0,
                sampled_missing: Vec::new(),
            });
        }

        let amount = self.options.sample_size.min(uploaded.len());
        let picks = match self.options.seed {
            Some(seed) => index::sample(&mut StdRng::seed_from_u64(seed), uploaded.len(), amount),
            None => index::sample(&mut rand::thread_rng(), uploaded.len(), amount),
        };

        let mut sampled_missing = Vec::new();
        for idx in picks.iter() {
            let record = &uploaded[idx];
            if !self.store.contains(table, record)? {
                warn!(table, row = record.row(), record_hash = %record.record_hash(), "sampled record not found");
                sampled_missing.push(record.record_hash());
            }
        }

        let result = VerificationResult {
            expected_rows,
            actual_rows,
            count_match: true,
            sampled: amount,
            sampled_missing,
        };
        if result.passed() {
            info!(table, rows = actual_rows, sampled = amount, "verification passed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::Record;
    use crate::store::MemoryStore;

    fn records(count: usize) -> Vec<CanonicalRecord> {
        (0..count)
            .map(|row| {
                CanonicalRecord::new(row, Record::new().with("POS", row as i64), Utc::now())
            })
            .collect()
    }

    #[test]
    fn passes_when_all_rows_present() {
        let store = MemoryStore::new();
        let uploaded = records(12);
        store.append("t", &uploaded).unwrap();
        let verifier = Verifier::new(&store, VerifyOptions { sample_size: 5, seed: Some(7) });
        let result = verifier.verify("t", &uploaded, 12).unwrap();
        assert!(result.passed());
        assert_eq!(result.sampled, 5);
    }

    #[test]
    fn sample_is_capped_by_upload_size() {
        let store = MemoryStore::new();
        let uploaded = records(2);
        store.append("t", &uploaded).unwrap();
        let result = Verifier::new(&store, VerifyOptions::default())
            .verify("t", &uploaded, 2)
            .unwrap();
        assert_eq!(result.sampled, 2);
        assert!(result.passed());
    }

    #[test]
    fn count_mismatch_fails_without_sampling() {
        let store = MemoryStore::new();
        let uploaded = records(3);
        store.append("t", &uploaded[..2]).unwrap();
        let result = Verifier::new(&store, VerifyOptions::default())
            .verify("t", &uploaded, 3)
            .unwrap();
        assert!(!result.passed());
        assert!(!result.count_match);
        assert_eq!(result.sampled, 0);
    }
}
