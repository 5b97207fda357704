//! Property tests for validation, hashing and deduplication.

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use genomic_ingest::dedup::deduplicate;
use genomic_ingest::domain::{Record, TableType, Value};
use genomic_ingest::record::RecordHash;
use genomic_ingest::schema::{FieldRule, TableSchema};
use genomic_ingest::validate::{RejectionReason, Validator, ViolationKind};

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6..1.0e6_f64).prop_map(Value::Float),
        "[A-Za-z0-9 _.-]{0,12}".prop_map(Value::Text),
    ]
}

fn arb_fields() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[A-Za-z_]{1,8}", arb_value(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

fn tmb_record(sample: &str, tmb: f64) -> Record {
    Record::new()
        .with("SampleName", sample)
        .with("TMB", tmb)
        .with("BinomialLow", 0.2)
        .with("BinomialHigh", 0.4)
}

proptest! {
    #[test]
    fn hash_is_independent_of_field_order(fields in arb_fields(), seed in any::<u64>()) {
        let forward = fields.iter().cloned().collect::<Record>();
        let mut shuffled = fields.clone();
        let len = shuffled.len().max(1);
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();
        let backward = shuffled.into_iter().collect::<Record>();
        prop_assert_eq!(RecordHash::of(&forward), RecordHash::of(&backward));
    }

    #[test]
    fn validation_is_deterministic(samples in prop::collection::vec(("[A-Z][0-9]{1,3}", -5.0..50.0_f64), 0..40)) {
        let records = samples
            .iter()
            .map(|(sample, tmb)| tmb_record(sample, *tmb))
            .collect::<Vec<_>>();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let validator = Validator::for_table(TableType::Tmb);
        let first = validator.validate_at(&records, at);
        let second = validator.validate_at(&records, at);
        prop_assert_eq!(first.accepted, second.accepted);
        prop_assert_eq!(first.rejected, second.rejected);
    }

    #[test]
    fn every_record_is_accepted_or_rejected_once(samples in prop::collection::vec(("[A-Z]{1,2}", -5.0..50.0_f64), 0..40)) {
        let records = samples
            .iter()
            .map(|(sample, tmb)| tmb_record(sample, *tmb))
            .collect::<Vec<_>>();
        let outcome = Validator::for_table(TableType::Tmb).validate(&records);
        let mut rows = outcome
            .accepted
            .iter()
            .map(|record| record.row())
            .chain(outcome.rejected.iter().map(|record| record.row))
            .collect::<Vec<_>>();
        rows.sort_unstable();
        prop_assert_eq!(rows, (0..records.len()).collect::<Vec<_>>());
        for record in &outcome.accepted {
            let tmb = record.get("TMB").and_then(Value::as_f64).unwrap();
            prop_assert!(tmb >= 0.0);
        }
    }

    #[test]
    fn null_required_fields_are_always_rejected(present in any::<bool>(), blank in "[ \t]{0,3}") {
        let schema = TableSchema::new(TableType::Tmb, [("SampleName", FieldRule::string().required())]);
        let value = if present { Value::text(blank) } else { Value::Null };
        let outcome = Validator::new(&schema).validate(&[Record::new().with("SampleName", value)]);
        prop_assert!(outcome.accepted.is_empty());
        let is_required_null = matches!(
            &outcome.rejected[0].reason,
            RejectionReason::Invalid(violations) if violations[0].kind == ViolationKind::RequiredNull
        );
        prop_assert!(is_required_null);
    }

    #[test]
    fn missing_required_fields_are_always_rejected(
        missing in prop::sample::select(vec!["SampleName", "TMB", "BinomialLow", "BinomialHigh"]),
        tmb in 0.0..50.0_f64,
    ) {
        let record = tmb_record("S1", tmb)
            .iter()
            .filter(|(name, _)| *name != missing)
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect::<Record>();
        let outcome = Validator::for_table(TableType::Tmb).validate(&[record]);
        prop_assert!(outcome.accepted.is_empty());
        let expected = vec![format!("{missing}: required field is null")];
        prop_assert_eq!(outcome.rejected[0].reason.messages(), expected);
    }

    #[test]
    fn dedup_keeps_first_of_each_hash(genes in prop::collection::vec("[A-C]{1,2}", 0..60)) {
        let records = genes
            .iter()
            .map(|gene| Record::new().with("GENE", gene.as_str()))
            .collect::<Vec<_>>();
        let accepted = Validator::for_table(TableType::Segments).validate(&records).accepted;
        let outcome = deduplicate(accepted.clone());

        let mut seen = HashSet::new();
        let expected = accepted
            .iter()
            .filter(|record| seen.insert(record.record_hash()))
            .map(|record| record.row())
            .collect::<Vec<_>>();
        let kept = outcome.unique.iter().map(|record| record.row()).collect::<Vec<_>>();
        prop_assert_eq!(kept, expected);
        prop_assert_eq!(outcome.unique.len() + outcome.duplicates.len(), accepted.len());

        let again = deduplicate(outcome.unique.clone());
        prop_assert_eq!(again.unique, outcome.unique);
        prop_assert!(again.duplicates.is_empty());
    }
}
