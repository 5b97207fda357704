use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::Utf8PathBuf;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, ToSql, TransactionBehavior};
use tracing::debug;

use crate::domain::{Record, Value};
use crate::error::IngestError;
use crate::record::{CanonicalRecord, RECORD_HASH, UPLOAD_TIMESTAMP};
use crate::schema::{FieldType, TableSchema};
use crate::store::{DROP_REASON, RecordStore, SOURCE_ROW, TableSnapshot, dropped_row, storage_row};
use crate::validate::RejectedRecord;

#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    pub path: Utf8PathBuf,
    pub busy_timeout_ms: u64,
    pub pool_size: usize,
}

impl SqliteStoreConfig {
    fn is_in_memory(&self) -> bool {
        self.path.as_str() == ":memory:"
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(number) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*number)),
            Value::Float(number) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*number)),
            Value::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::Integer(number),
        ValueRef::Real(number) => Value::Float(number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

struct ConnectionPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    fn get(&self) -> Result<MutexGuard<'_, Connection>, IngestError> {
        for slot in &self.connections {
            if let Ok(guard) = slot.try_lock() {
                return Ok(guard);
            }
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx]
            .lock()
            .map_err(|_| IngestError::Store("sqlite connection mutex poisoned".to_string()))
    }
}

/// SQLite-backed store. Every table carries a UNIQUE `record_hash`; chunk
/// appends run in their own immediate transaction.
pub struct SqliteStore {
    config: SqliteStoreConfig,
    pool: ConnectionPool,
    columns: Mutex<HashMap<String, HashSet<String>>>,
}

impl SqliteStore {
    pub fn open(config: SqliteStoreConfig) -> Result<Self, IngestError> {
        if config.pool_size == 0 {
            return Err(IngestError::InvalidConfig(
                "store pool size must be at least 1".to_string(),
            ));
        }
        let pool_size = if config.is_in_memory() {
            1
        } else {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_str().is_empty()) {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            }
            config.pool_size
        };

        let connections = (0..pool_size)
            .map(|_| open_connection(&config).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(path = %config.path, pool_size, "opened sqlite store");

        Ok(Self {
            config,
            pool: ConnectionPool {
                connections,
                next: AtomicUsize::new(0),
            },
            columns: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Utf8PathBuf {
        &self.config.path
    }

    fn create_table(&self, table: &str, typed: &[(&str, FieldType)], dropped: bool) -> Result<(), IngestError> {
        let mut definitions = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        definitions.extend(
            typed
                .iter()
                .map(|(name, field_type)| format!("{} {}", quote(name), sql_type(*field_type))),
        );
        if dropped {
            definitions.push(format!("{} INTEGER", quote(SOURCE_ROW)));
            definitions.push(format!("{} TEXT", quote(RECORD_HASH)));
            definitions.push(format!("{} TEXT NOT NULL", quote(DROP_REASON)));
        } else {
            definitions.push(format!("{} TEXT NOT NULL", quote(UPLOAD_TIMESTAMP)));
            definitions.push(format!("{} TEXT NOT NULL UNIQUE", quote(RECORD_HASH)));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(table),
            definitions.join(", ")
        );

        let conn = self.pool.get()?;
        conn.execute_batch(&sql).map_err(|err| IngestError::SchemaBootstrap {
            table: table.to_string(),
            message: err.to_string(),
        })?;
        drop(conn);

        let mut columns = self
            .columns
            .lock()
            .map_err(|_| IngestError::Store("column cache mutex poisoned".to_string()))?;
        columns.remove(table);
        Ok(())
    }

    /// Adds any columns of `rows` the table does not have yet.
    fn ensure_columns<'r>(&self, table: &str, rows: impl Iterator<Item = &'r Record>) -> Result<(), IngestError> {
        let mut cache = self
            .columns
            .lock()
            .map_err(|_| IngestError::Store("column cache mutex poisoned".to_string()))?;
        if !cache.contains_key(table) {
            let conn = self.pool.get()?;
            let existing = table_columns(&conn, table)?;
            cache.insert(table.to_string(), existing);
        }
        let known = cache.entry(table.to_string()).or_default();

        let mut missing = Vec::new();
        for row in rows {
            for name in row.field_names() {
                let key = name.to_lowercase();
                if !known.contains(&key) && !missing.iter().any(|m: &String| m.to_lowercase() == key) {
                    missing.push(name.to_string());
                }
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let conn = self.pool.get()?;
        for name in missing {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote(table),
                quote(&name)
            ))
            .map_err(map_store_error)?;
            debug!(table, column = %name, "added column");
            known.insert(name.to_lowercase());
        }
        Ok(())
    }

    fn insert_rows(&self, table: &str, rows: &[Record]) -> Result<usize, IngestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.ensure_columns(table, rows.iter())?;

        let mut conn = self.pool.get()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_store_error)?;
        for row in rows {
            let names = row.field_names().map(quote).collect::<Vec<_>>();
            let placeholders = (1..=names.len()).map(|i| format!("?{i}")).collect::<Vec<_>>();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(table),
                names.join(", "),
                placeholders.join(", ")
            );
            let values = row.iter().map(|(_, value)| value as &dyn ToSql).collect::<Vec<_>>();
            let mut stmt = tx.prepare_cached(&sql).map_err(map_store_error)?;
            stmt.execute(values.as_slice()).map_err(map_store_error)?;
        }
        tx.commit().map_err(map_store_error)?;
        Ok(rows.len())
    }

    fn table_exists(&self, conn: &Connection, table: &str) -> Result<bool, IngestError> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(map_store_error)?;
        Ok(count > 0)
    }
}

impl RecordStore for SqliteStore {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<(), IngestError> {
        let typed = schema
            .fields()
            .map(|(name, rule)| (name, rule.field_type))
            .collect::<Vec<_>>();
        self.create_table(table, &typed, false)
    }

    fn append(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, IngestError> {
        let rows = records.iter().map(storage_row).collect::<Vec<_>>();
        {
            let conn = self.pool.get()?;
            if !self.table_exists(&conn, table)? {
                drop(conn);
                self.create_table(table, &[], false)?;
            }
        }
        self.insert_rows(table, &rows)
    }

    fn append_dropped(&self, table: &str, records: &[RejectedRecord]) -> Result<usize, IngestError> {
        let rows = records.iter().map(dropped_row).collect::<Vec<_>>();
        {
            let conn = self.pool.get()?;
            if !self.table_exists(&conn, table)? {
                drop(conn);
                self.create_table(table, &[], true)?;
            }
        }
        self.insert_rows(table, &rows)
    }

    fn row_count(&self, table: &str) -> Result<u64, IngestError> {
        let conn = self.pool.get()?;
        if !self.table_exists(&conn, table)? {
            return Ok(0);
        }
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| row.get(0))
            .map_err(map_store_error)?;
        Ok(count.max(0) as u64)
    }

    fn contains(&self, table: &str, record: &CanonicalRecord) -> Result<bool, IngestError> {
        let conn = self.pool.get()?;
        if !self.table_exists(&conn, table)? {
            return Ok(false);
        }
        let row = storage_row(record);
        let mut conditions = Vec::with_capacity(row.len());
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(row.len());
        for (name, value) in row.iter() {
            match value {
                Value::Null => conditions.push(format!("{} IS NULL", quote(name))),
                value => {
                    params.push(value);
                    conditions.push(format!("{} = ?{}", quote(name), params.len()));
                }
            }
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote(table),
            conditions.join(" AND ")
        );
        let count: i64 = conn
            .query_row(&sql, params.as_slice(), |row| row.get(0))
            .map_err(map_store_error)?;
        Ok(count > 0)
    }

    fn snapshot(&self, table: &str) -> Result<TableSnapshot, IngestError> {
        let conn = self.pool.get()?;
        if !self.table_exists(&conn, table)? {
            return Ok(TableSnapshot::default());
        }
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} ORDER BY id", quote(table)))
            .map_err(map_store_error)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|idx| row.get_ref(idx).map(from_sql))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(map_store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_error)?;
        Ok(TableSnapshot { columns, rows })
    }
}

fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, IngestError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(config.path.as_std_path(), flags)
        .map_err(|err| IngestError::Store(err.to_string()))?;
    if !config.is_in_memory() {
        connection
            .execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|err| IngestError::Store(err.to_string()))?;
    }
    connection
        .execute_batch("PRAGMA synchronous = NORMAL;")
        .map_err(|err| IngestError::Store(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| IngestError::Store(err.to_string()))?;
    Ok(connection)
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, IngestError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote(table)))
        .map_err(map_store_error)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(map_store_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_store_error)?;
    Ok(names.into_iter().map(|name| name.to_lowercase()).collect())
}

fn map_store_error(err: rusqlite::Error) -> IngestError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            IngestError::StoreConflict(message.unwrap_or_else(|| failure.to_string()))
        }
        other => IngestError::Store(other.to_string()),
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::String => "TEXT",
    }
}
