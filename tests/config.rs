use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use genomic_ingest::config::{ConfigLoader, Overrides};
use genomic_ingest::error::IngestError;

fn write_config(body: &str) -> (tempfile::TempDir, String) {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("genomic-ingest.json");
    fs::write(&path, body).unwrap();
    (temp, path.to_string_lossy().into_owned())
}

#[test]
fn file_values_are_resolved() {
    let (_temp, path) = write_config(
        r#"{
            "store": {"path": "db/lab.sqlite3", "pool_size": 2},
            "upload": {"chunk_size": 500, "concurrency": 3},
            "verify": {"sample_size": 9, "seed": 11},
            "output": {"backup_dir": "bk", "summary_file": "summary.json"}
        }"#,
    );
    let resolved = ConfigLoader::resolve(Some(&path), &Overrides::default()).unwrap();
    assert_eq!(resolved.store.path.as_str(), "db/lab.sqlite3");
    assert_eq!(resolved.store.pool_size, 2);
    assert_eq!(resolved.upload.chunk_size, 500);
    assert_eq!(resolved.upload.concurrency, 3);
    assert_eq!(resolved.verify.sample_size, 9);
    assert_eq!(resolved.verify.seed, Some(11));
    assert_eq!(resolved.backup_dir.as_str(), "bk");
    assert_eq!(resolved.qc_dir.as_str(), "qc_reports");
    assert_eq!(resolved.summary_file, Some(Utf8PathBuf::from("summary.json")));
}

#[test]
fn command_line_overrides_file() {
    let (_temp, path) = write_config(r#"{"upload": {"chunk_size": 500}}"#);
    let overrides = Overrides {
        chunk_size: Some(64),
        qc_dir: Some(Utf8PathBuf::from("reports")),
        ..Overrides::default()
    };
    let resolved = ConfigLoader::resolve(Some(&path), &overrides).unwrap();
    assert_eq!(resolved.upload.chunk_size, 64);
    assert_eq!(resolved.qc_dir.as_str(), "reports");
}

#[test]
fn malformed_file_is_an_error() {
    let (_temp, path) = write_config("{ not json");
    let err = ConfigLoader::resolve(Some(&path), &Overrides::default()).unwrap_err();
    assert_matches!(err, IngestError::ConfigParse(_));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap()), &Overrides::default()).unwrap_err();
    assert_matches!(err, IngestError::ConfigRead(_));
}

#[test]
fn zero_sizes_are_rejected() {
    let (_temp, path) = write_config(r#"{"upload": {"chunk_size": 0}}"#);
    let err = ConfigLoader::resolve(Some(&path), &Overrides::default()).unwrap_err();
    assert_matches!(err, IngestError::InvalidConfig(message) if message.contains("chunk_size"));

    let overrides = Overrides {
        concurrency: Some(0),
        ..Overrides::default()
    };
    let (_temp, path) = write_config("{}");
    let err = ConfigLoader::resolve(Some(&path), &overrides).unwrap_err();
    assert_matches!(err, IngestError::InvalidConfig(_));
}
