use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Record, TableType, Value};
use crate::normalize::normalize;
use crate::record::{CanonicalRecord, RecordHash};
use crate::schema::{FieldRule, FieldType, TableSchema, schema_for};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    RequiredNull,
    InvalidType { expected: FieldType },
    PatternMismatch { pattern: String },
    BelowMinimum { min: f64 },
    AboveMaximum { max: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl Violation {
    fn new(field: &str, kind: ViolationKind) -> Self {
        Self {
            field: field.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::RequiredNull => write!(f, "{}: required field is null", self.field),
            ViolationKind::InvalidType { .. } => write!(f, "{}: invalid type", self.field),
            ViolationKind::PatternMismatch { pattern } => {
                write!(f, "{}: does not match pattern {pattern}", self.field)
            }
            ViolationKind::BelowMinimum { min } => write!(f, "{}: below minimum {min}", self.field),
            ViolationKind::AboveMaximum { max } => write!(f, "{}: above maximum {max}", self.field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "violations", rename_all = "snake_case")]
pub enum RejectionReason {
    Invalid(Vec<Violation>),
    Duplicate,
}

impl RejectionReason {
    /// One message per violation; duplicates contribute a single `duplicate`.
    pub fn messages(&self) -> Vec<String> {
        match self {
            RejectionReason::Invalid(violations) => {
                violations.iter().map(ToString::to_string).collect()
            }
            RejectionReason::Duplicate => vec!["duplicate".to_string()],
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RejectionReason::Duplicate)
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Invalid(violations) => {
                let joined = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "invalid values: {joined}")
            }
            RejectionReason::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// A record excluded from upload. Invalid records keep their raw values so the
/// audit trail shows what actually arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub row: usize,
    pub values: Record,
    pub record_hash: RecordHash,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<CanonicalRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl ValidationOutcome {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    pub fn reason_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for rejected in &self.rejected {
            for message in rejected.reason.messages() {
                *counts.entry(message).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    schema: &'a TableSchema,
}

impl Validator<'static> {
    pub fn for_table(table_type: TableType) -> Self {
        Self {
            schema: schema_for(table_type),
        }
    }
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    pub fn validate(&self, records: &[Record]) -> ValidationOutcome {
        self.validate_at(records, Utc::now())
    }

    /// Validates with a caller-supplied processing time stamped on every record.
    pub fn validate_at(&self, records: &[Record], upload_timestamp: DateTime<Utc>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        for (row, record) in records.iter().enumerate() {
            match self.validate_record(row, record, upload_timestamp) {
                Ok(canonical) => outcome.accepted.push(canonical),
                Err(rejected) => outcome.rejected.push(rejected),
            }
        }

        info!(
            table = %self.schema.table_type,
            total = outcome.total(),
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "validation finished"
        );
        for (reason, count) in outcome.reason_counts() {
            info!(table = %self.schema.table_type, %reason, count, "rejected records by reason");
        }
        outcome
    }

    pub fn validate_record(
        &self,
        row: usize,
        record: &Record,
        upload_timestamp: DateTime<Utc>,
    ) -> Result<CanonicalRecord, RejectedRecord> {
        let mut normalized = Record::new();
        let mut violations = Vec::new();

        for (field, raw) in record.iter() {
            let Some(rule) = self.schema.rule(field) else {
                normalized.insert(field, raw.clone());
                continue;
            };
            let value = normalize(field, raw, Some(rule)).unwrap_or_else(|err| {
                debug!(row, field, error = %err, "coercion failed, treating value as null");
                Value::Null
            });
            check_value(field, &value, rule, &mut violations);
            normalized.insert(field, value);
        }
        // ruled fields the row never carried are checked as null
        for (field, rule) in self.schema.fields() {
            if record.get(field).is_none() {
                check_value(field, &Value::Null, rule, &mut violations);
            }
        }

        let canonical = CanonicalRecord::new(row, normalized, upload_timestamp);
        if violations.is_empty() {
            Ok(canonical)
        } else {
            Err(RejectedRecord {
                row,
                values: record.clone(),
                record_hash: canonical.record_hash(),
                reason: RejectionReason::Invalid(violations),
            })
        }
    }
}

fn check_value(field: &str, value: &Value, rule: &FieldRule, violations: &mut Vec<Violation>) {
    if value.is_null() {
        if rule.required {
            violations.push(Violation::new(field, ViolationKind::RequiredNull));
        }
        return;
    }

    let conforms = matches!(
        (rule.field_type, value),
        (FieldType::Integer, Value::Integer(_))
            | (FieldType::Float, Value::Float(_))
            | (FieldType::String, Value::Text(_))
    );
    if !conforms {
        violations.push(Violation::new(
            field,
            ViolationKind::InvalidType {
                expected: rule.field_type,
            },
        ));
        return;
    }

    if let (Value::Text(text), Some(pattern)) = (value, &rule.pattern) {
        if !pattern.is_match(text) {
            violations.push(Violation::new(
                field,
                ViolationKind::PatternMismatch {
                    pattern: pattern.as_str().to_string(),
                },
            ));
        }
        return;
    }

    if let Some(number) = value.as_f64().filter(|_| rule.field_type.is_numeric()) {
        if let Some(min) = rule.min.filter(|min| number < *min) {
            violations.push(Violation::new(field, ViolationKind::BelowMinimum { min }));
        }
        if let Some(max) = rule.max.filter(|max| number > *max) {
            violations.push(Violation::new(field, ViolationKind::AboveMaximum { max }));
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use regex::Regex;

    use super::*;

    fn tmb(tmb: f64) -> Record {
        Record::new()
            .with("SampleName", "S1")
            .with("TMB", tmb)
            .with("BinomialLow", 0.1)
            .with("BinomialHigh", 0.3)
    }

    #[test]
    fn accepts_valid_tmb_record() {
        let outcome = Validator::for_table(TableType::Tmb).validate(&[tmb(5.2)]);
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.accepted[0].get("TMB"), Some(&Value::Float(5.2)));
    }

    #[test]
    fn rejects_below_minimum() {
        let outcome = Validator::for_table(TableType::Tmb).validate(&[tmb(-1.0)]);
        assert!(outcome.accepted.is_empty());
        let reason = &outcome.rejected[0].reason;
        assert_eq!(reason.messages(), vec!["TMB: below minimum 0".to_string()]);
    }

    #[test]
    fn bounds_are_inclusive() {
        let record = Record::new()
            .with("SampleName", "S1")
            .with("TMB", 0.0)
            .with("BinomialLow", 0.0)
            .with("BinomialHigh", 1.0);
        let outcome = Validator::for_table(TableType::Tmb).validate(&[record]);
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn both_bounds_and_required_reported() {
        let schema = TableSchema::new(
            TableType::Tmb,
            [
                ("score", FieldRule::float().min(5.0).max(1.0)),
                ("name", FieldRule::string().required()),
            ],
        );
        let record = Record::new().with("score", 3.0).with("name", Value::Null);
        let rejected = Validator::new(&schema)
            .validate_record(0, &record, Utc::now())
            .unwrap_err();
        assert_eq!(
            rejected.reason.messages(),
            vec![
                "score: below minimum 5".to_string(),
                "score: above maximum 1".to_string(),
                "name: required field is null".to_string(),
            ]
        );
    }

    #[test]
    fn unparseable_required_number_is_rejected_as_null() {
        let record = Record::new()
            .with("SampleName", "S1")
            .with("TMB", "n/a")
            .with("BinomialLow", 0.1)
            .with("BinomialHigh", 0.3);
        let outcome = Validator::for_table(TableType::Tmb).validate(&[record.clone()]);
        let rejected = &outcome.rejected[0];
        assert_eq!(rejected.values, record);
        assert_matches!(
            &rejected.reason,
            RejectionReason::Invalid(violations) if violations[0].kind == ViolationKind::RequiredNull
        );
    }

    #[test]
    fn chromosome_validated_after_normalization() {
        let base = |chrom: &str| {
            Record::new()
                .with("CHROM", chrom)
                .with("START", 100_i64)
                .with("STOP", 200_i64)
                .with("GENE", "BRCA1")
                .with("log2", 0.5)
                .with("SampleName", "S2")
        };
        let outcome = Validator::for_table(TableType::Cns).validate(&[base("Y"), base("chrMT")]);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].get("CHROM"), Some(&Value::text("24")));
        assert_eq!(outcome.rejected[0].row, 1);

        // a rule written for prefixed forms rejects every normalized value
        let strict = TableSchema::new(
            TableType::Cns,
            [(
                "CHROM",
                FieldRule::string().pattern(&Regex::new(r"^chr(\d+|X|Y)$").unwrap()),
            )],
        );
        let outcome = Validator::new(&strict).validate(&[Record::new().with("CHROM", "chrY")]);
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn absent_required_field_is_rejected() {
        let record = Record::new()
            .with("SampleName", "S1")
            .with("BinomialLow", 0.1)
            .with("BinomialHigh", 0.3);
        let outcome = Validator::for_table(TableType::Tmb).validate(&[record]);
        assert!(outcome.accepted.is_empty());
        assert_eq!(
            outcome.rejected[0].reason.messages(),
            vec!["TMB: required field is null".to_string()]
        );
    }

    #[test]
    fn absent_optional_field_is_not_added() {
        let schema = TableSchema::new(
            TableType::Cns,
            [
                ("GENE", FieldRule::string().required()),
                ("ci_hi", FieldRule::float()),
            ],
        );
        let outcome = Validator::new(&schema).validate(&[Record::new().with("GENE", "TP53")]);
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.accepted[0].get("ci_hi").is_none());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let mut record = tmb(1.0);
        record.insert("comment", " raw ");
        let outcome = Validator::for_table(TableType::Tmb).validate(&[record]);
        assert_eq!(outcome.accepted[0].get("comment"), Some(&Value::text(" raw ")));
    }

    #[test]
    fn empty_schema_accepts_everything() {
        let record = Record::new().with("anything", Value::Null);
        let outcome = Validator::for_table(TableType::Segments).validate(&[record]);
        assert_eq!(outcome.accepted.len(), 1);
    }
}
