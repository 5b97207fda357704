use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::Serialize;

use crate::domain::{Record, Value};
use crate::error::IngestError;
use crate::record::{CanonicalRecord, RECORD_HASH, RecordHash, UPLOAD_TIMESTAMP, format_timestamp};
use crate::schema::TableSchema;
use crate::validate::RejectedRecord;

pub const DROP_REASON: &str = "drop_reason";
pub const SOURCE_ROW: &str = "source_row";

/// Rows of one table captured wholesale, as used for pre-write backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Destination store. Writes are append-only; `append` is all-or-nothing per
/// call and must refuse a `record_hash` already present in the table.
pub trait RecordStore: Send + Sync {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<(), IngestError>;
    fn append(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, IngestError>;
    fn append_dropped(&self, table: &str, records: &[RejectedRecord]) -> Result<usize, IngestError>;
    fn row_count(&self, table: &str) -> Result<u64, IngestError>;
    /// True when a row matches every field of `record` exactly.
    fn contains(&self, table: &str, record: &CanonicalRecord) -> Result<bool, IngestError>;
    fn snapshot(&self, table: &str) -> Result<TableSnapshot, IngestError>;
}

/// Column/value pairs persisted for an accepted record.
pub fn storage_row(record: &CanonicalRecord) -> Record {
    let mut row = record.values().clone();
    row.insert(UPLOAD_TIMESTAMP, format_timestamp(&record.upload_timestamp()));
    row.insert(RECORD_HASH, record.record_hash().to_hex());
    row
}

/// Column/value pairs persisted for a dropped record.
pub fn dropped_row(record: &RejectedRecord) -> Record {
    let mut row = record.values.clone();
    row.insert(SOURCE_ROW, record.row as i64);
    row.insert(RECORD_HASH, record.record_hash.to_hex());
    row.insert(DROP_REASON, record.reason.to_string());
    row
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Record>,
    hashes: HashSet<RecordHash>,
}

impl MemoryTable {
    fn push(&mut self, row: Record) {
        for name in row.field_names() {
            if !self.columns.iter().any(|column| column == name) {
                self.columns.push(name.to_string());
            }
        }
        self.rows.push(row);
    }
}

/// In-process store with the same uniqueness semantics as the SQLite store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Record>, IngestError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        Ok(tables.get(table).map(|t| t.rows.clone()).unwrap_or_default())
    }
}

impl RecordStore for MemoryStore {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<(), IngestError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        let entry = tables.entry(table.to_string()).or_default();
        for (name, _) in schema.fields() {
            if !entry.columns.iter().any(|column| column == name) {
                entry.columns.push(name.to_string());
            }
        }
        Ok(())
    }

    fn append(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, IngestError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        let entry = tables.entry(table.to_string()).or_default();

        let mut batch = HashSet::with_capacity(records.len());
        for record in records {
            let hash = record.record_hash();
            if entry.hashes.contains(&hash) || !batch.insert(hash) {
                return Err(IngestError::StoreConflict(format!(
                    "{table}: record_hash {hash} already present"
                )));
            }
        }
        for record in records {
            entry.hashes.insert(record.record_hash());
            entry.push(storage_row(record));
        }
        Ok(records.len())
    }

    fn append_dropped(&self, table: &str, records: &[RejectedRecord]) -> Result<usize, IngestError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        let entry = tables.entry(table.to_string()).or_default();
        for record in records {
            entry.push(dropped_row(record));
        }
        Ok(records.len())
    }

    fn row_count(&self, table: &str) -> Result<u64, IngestError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        Ok(tables.get(table).map(|t| t.rows.len() as u64).unwrap_or(0))
    }

    fn contains(&self, table: &str, record: &CanonicalRecord) -> Result<bool, IngestError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        let Some(entry) = tables.get(table) else {
            return Ok(false);
        };
        let wanted = storage_row(record);
        Ok(entry.rows.iter().any(|row| {
            wanted
                .iter()
                .all(|(name, value)| row.get(name).unwrap_or(&Value::Null) == value)
        }))
    }

    fn snapshot(&self, table: &str) -> Result<TableSnapshot, IngestError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))?;
        let Some(entry) = tables.get(table) else {
            return Ok(TableSnapshot::default());
        };
        let rows = entry
            .rows
            .iter()
            .map(|row| {
                entry
                    .columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(TableSnapshot {
            columns: entry.columns.clone(),
            rows,
        })
    }
}
