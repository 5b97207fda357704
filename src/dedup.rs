use std::collections::HashSet;

use tracing::warn;

use crate::record::CanonicalRecord;
use crate::validate::{RejectedRecord, RejectionReason, ValidationOutcome};

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub unique: Vec<CanonicalRecord>,
    pub duplicates: Vec<RejectedRecord>,
}

/// Keeps the first record seen for each hash, in input order.
pub fn deduplicate(records: Vec<CanonicalRecord>) -> DedupOutcome {
    let mut seen = HashSet::with_capacity(records.len());
    let mut outcome = DedupOutcome::default();

    for record in records {
        if seen.insert(record.record_hash()) {
            outcome.unique.push(record);
        } else {
            outcome.duplicates.push(RejectedRecord {
                row: record.row(),
                record_hash: record.record_hash(),
                values: record.into_values(),
                reason: RejectionReason::Duplicate,
            });
        }
    }
    outcome
}

/// Deduplicates the accepted half of a validation outcome, moving duplicates
/// into its rejected set.
pub fn deduplicate_outcome(table: &str, outcome: ValidationOutcome) -> ValidationOutcome {
    let ValidationOutcome { accepted, mut rejected } = outcome;
    let DedupOutcome { unique, duplicates } = deduplicate(accepted);
    if !duplicates.is_empty() {
        warn!(table, duplicates = duplicates.len(), "found duplicate records");
    }
    rejected.extend(duplicates);
    ValidationOutcome {
        accepted: unique,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::Record;

    fn canonical(row: usize, gene: &str) -> CanonicalRecord {
        CanonicalRecord::new(row, Record::new().with("GENE", gene), Utc::now())
    }

    #[test]
    fn first_seen_wins() {
        let outcome = deduplicate(vec![
            canonical(0, "BRCA1"),
            canonical(1, "TP53"),
            canonical(2, "BRCA1"),
        ]);
        let rows = outcome.unique.iter().map(|r| r.row()).collect::<Vec<_>>();
        assert_eq!(rows, vec![0, 1]);
        assert_eq!(outcome.duplicates.len(), 1);
        assert_eq!(outcome.duplicates[0].row, 2);
        assert!(outcome.duplicates[0].reason.is_duplicate());
    }

    #[test]
    fn empty_input() {
        let outcome = deduplicate(Vec::new());
        assert!(outcome.unique.is_empty());
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn idempotent_on_unique_set() {
        let first = deduplicate(vec![canonical(0, "A"), canonical(1, "A"), canonical(2, "B")]);
        let second = deduplicate(first.unique.clone());
        assert_eq!(second.unique, first.unique);
        assert!(second.duplicates.is_empty());
    }
}
