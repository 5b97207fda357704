use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::domain::{Record, Value};
use crate::error::IngestError;

pub const UPLOAD_TIMESTAMP: &str = "upload_timestamp";
pub const RECORD_HASH: &str = "record_hash";

/// 128-bit content fingerprint of a record's sorted field/value pairs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHash([u8; 16]);

impl RecordHash {
    pub fn of(record: &Record) -> Self {
        let mut pairs = record.iter().collect::<Vec<_>>();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = blake3::Hasher::new();
        for (name, value) in pairs {
            write_bytes(&mut hasher, name.as_bytes());
            match value {
                Value::Null => {
                    hasher.update(&[0]);
                }
                Value::Integer(number) => {
                    hasher.update(&[1]);
                    hasher.update(&number.to_le_bytes());
                }
                Value::Float(number) => {
                    // -0.0 and 0.0 compare equal, so they must hash equal
                    let number = if *number == 0.0 { 0.0_f64 } else { *number };
                    hasher.update(&[2]);
                    hasher.update(&number.to_bits().to_le_bytes());
                }
                Value::Text(text) => {
                    hasher.update(&[3]);
                    write_bytes(&mut hasher, text.as_bytes());
                }
            }
        }

        let digest = hasher.finalize();
        let mut bytes = [0_u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

fn write_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordHash({})", self.to_hex())
    }
}

impl FromStr for RecordHash {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.len() != 32 || !value.is_ascii() {
            return Err(IngestError::Store(format!("malformed record hash: {value}")));
        }
        let mut bytes = [0_u8; 16];
        for (idx, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&value[idx * 2..idx * 2 + 2], 16)
                .map_err(|_| IngestError::Store(format!("malformed record hash: {value}")))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for RecordHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A normalized record with its derived fields. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    row: usize,
    values: Record,
    upload_timestamp: DateTime<Utc>,
    record_hash: RecordHash,
}

impl CanonicalRecord {
    pub fn new(row: usize, values: Record, upload_timestamp: DateTime<Utc>) -> Self {
        let record_hash = RecordHash::of(&values);
        Self {
            row,
            values,
            upload_timestamp,
            record_hash,
        }
    }

    /// Zero-based position of the record in its source dataset.
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn values(&self) -> &Record {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn upload_timestamp(&self) -> DateTime<Utc> {
        self.upload_timestamp
    }

    pub fn record_hash(&self) -> RecordHash {
        self.record_hash
    }

    pub fn into_values(self) -> Record {
        self.values
    }
}

/// Storage form of a timestamp; fixed precision so equality queries round-trip.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
