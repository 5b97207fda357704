use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::IngestError;
use crate::store::{RecordStore, TableSnapshot};

pub fn backup_file_name(table: &str, at: DateTime<Utc>) -> String {
    format!("{table}_backup_{}.csv", at.format("%Y%m%d_%H%M%S_%6f"))
}

/// Snapshots `table` and writes it as CSV under `dir`. Returns the path of the
/// written file; an existing backup of the same name is never replaced.
pub fn backup_table<S: RecordStore>(
    store: &S,
    table: &str,
    dir: &Utf8Path,
    at: DateTime<Utc>,
) -> Result<Utf8PathBuf, IngestError> {
    let backup_err = |message: String| IngestError::Backup {
        table: table.to_string(),
        message,
    };

    let snapshot = store.snapshot(table)?;
    let body = snapshot_csv(&snapshot).map_err(backup_err)?;

    fs::create_dir_all(dir.as_std_path()).map_err(|err| backup_err(err.to_string()))?;
    let dest = dir.join(backup_file_name(table, at));
    let mut temp = tempfile::Builder::new()
        .prefix("genomic-ingest-backup")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| backup_err(err.to_string()))?;
    temp.write_all(&body)
        .map_err(|err| backup_err(err.to_string()))?;
    temp.persist_noclobber(dest.as_std_path())
        .map_err(|err| backup_err(err.to_string()))?;

    info!(table, rows = snapshot.len(), path = %dest, "backed up table");
    Ok(dest)
}

fn snapshot_csv(snapshot: &TableSnapshot) -> Result<Vec<u8>, String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    if snapshot.columns.is_empty() {
        return Ok(Vec::new());
    }
    wtr.write_record(&snapshot.columns)
        .map_err(|err| err.to_string())?;
    for row in &snapshot.rows {
        wtr.write_record(row.iter().map(ToString::to_string))
            .map_err(|err| err.to_string())?;
    }
    wtr.into_inner().map_err(|err| err.to_string())
}
