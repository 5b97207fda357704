use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use genomic_ingest::discovery::{SourceFile, default_patterns, discover};
use genomic_ingest::domain::{TableType, Value};
use genomic_ingest::error::IngestError;
use genomic_ingest::reader::{DatasetReader, TsvReader};
use genomic_ingest::validate::Validator;

fn fixture_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

fn write(dir: &Utf8PathBuf, name: &str, body: &str) -> Utf8PathBuf {
    let path = dir.join(name);
    fs::write(path.as_std_path(), body).unwrap();
    path
}

#[test]
fn tmb_columns_are_projected_and_renamed() {
    let (_temp, dir) = fixture_dir();
    let path = write(
        &dir,
        "TMB2022.tsv",
        "Samplename\tFAF\textra\tFAD\tFRD\nS1\t5.2\tx\t0.1\t0.3\nS2\tNA\ty\t0.2\t0.4\n",
    );
    let dataset = TsvReader.read(&SourceFile::new(path, TableType::Tmb)).unwrap();
    assert_eq!(dataset.id, "TMB2022.tsv");
    assert_eq!(dataset.records.len(), 2);
    let first = &dataset.records[0];
    let names = first.field_names().collect::<Vec<_>>();
    assert_eq!(names, vec!["SampleName", "TMB", "BinomialLow", "BinomialHigh"]);
    assert_eq!(first.get("TMB"), Some(&Value::text("5.2")));
    assert_eq!(dataset.records[1].get("TMB"), Some(&Value::Null));
}

#[test]
fn missing_projected_column_fails_the_read() {
    let (_temp, dir) = fixture_dir();
    let path = write(&dir, "TMB2022.tsv", "Samplename\tFAF\nS1\t5.2\n");
    let err = TsvReader.read(&SourceFile::new(path, TableType::Tmb)).unwrap_err();
    assert_matches!(err, IngestError::Read { message, .. } if message.contains("FAD"));
}

#[test]
fn cns_gets_sample_name_from_file_stem() {
    let (_temp, dir) = fixture_dir();
    let path = write(
        &dir,
        "S12.call.cns",
        "chromosome\tstart\tend\tgene\tlog2\tci_hi\tci_lo\tcn\tdepth\tprobes\tweight\n\
         chr1\t100\t200\tBRCA1\t0.5\t0.6\t0.4\t2\t30.5\t12\t0.9\n",
    );
    let dataset = TsvReader.read(&SourceFile::new(path, TableType::Cns)).unwrap();
    let record = &dataset.records[0];
    assert_eq!(record.get("STOP"), Some(&Value::text("200")));
    assert_eq!(record.get("DEPTH"), Some(&Value::text("30.5")));
    assert_eq!(record.get("SampleName"), Some(&Value::text("S12")));
}

#[test]
fn mastervar_is_read_by_position() {
    let (_temp, dir) = fixture_dir();
    let mut row = (0..68).map(|idx| format!("c{idx}")).collect::<Vec<_>>();
    row[0] = "S1".to_string();
    row[1] = "chr7".to_string();
    row[66] = "140453136".to_string();
    let path = write(&dir, "S1_Run_masterVarFinal.txt", &format!("{}\n", row.join("\t")));

    let dataset = TsvReader.read(&SourceFile::new(path, TableType::Mastervar)).unwrap();
    let record = &dataset.records[0];
    assert_eq!(record.len(), 20);
    assert_eq!(record.get("SampleName"), Some(&Value::text("S1")));
    assert_eq!(record.get("CHROM"), Some(&Value::text("chr7")));
    assert_eq!(record.get("GENE"), Some(&Value::text("c11")));
    assert_eq!(record.get("START"), Some(&Value::text("140453136")));
}

#[test]
fn short_mastervar_row_fails_the_read() {
    let (_temp, dir) = fixture_dir();
    let path = write(&dir, "Run_masterVarFinal.txt", "S1\tchr1\t100\n");
    let err = TsvReader.read(&SourceFile::new(path, TableType::Mastervar)).unwrap_err();
    assert_matches!(err, IngestError::Read { .. });
}

#[test]
fn segments_map_columns_case_insensitively() {
    let (_temp, dir) = fixture_dir();
    let path = write(
        &dir,
        "S9.segments.called.named.tsv",
        "CHROM\tStart\tSTOP\tGene\tLOG2\nchr2\t10\t20\tMYCN\t1.1\n",
    );
    let dataset = TsvReader.read(&SourceFile::new(path, TableType::Segments)).unwrap();
    let record = &dataset.records[0];
    assert_eq!(record.len(), 14);
    assert_eq!(record.get("START"), Some(&Value::text("10")));
    assert_eq!(record.get("log2"), Some(&Value::text("1.1")));
    assert_eq!(record.get("probes"), Some(&Value::Null));
    assert_eq!(record.get("SampleName"), Some(&Value::text("S9")));
}

#[test]
fn generic_files_get_cleaned_column_names() {
    let (_temp, dir) = fixture_dir();
    let path = write(&dir, "TMB_extra.tsv", "Sample Name\tTMB-Score\nS1\t4\n");
    let dataset = TsvReader.read(&SourceFile::new(path, TableType::Tmb)).unwrap();
    let names = dataset.records[0].field_names().collect::<Vec<_>>();
    assert_eq!(names, vec!["sample_name", "tmb_score"]);
}

#[test]
fn generic_tmb_file_without_schema_columns_is_rejected() {
    let (_temp, dir) = fixture_dir();
    write(
        &dir,
        "TMB2023.tsv",
        "SampleName\tTMB\tBinomialLow\tBinomialHigh\nS1\t-1.0\t7\t9\n",
    );
    let sources = discover(&dir, &default_patterns()).unwrap();
    assert_eq!(sources[0].table_type, TableType::Tmb);

    let dataset = TsvReader.read(&sources[0]).unwrap();
    let outcome = Validator::for_table(dataset.table_type).validate(&dataset.records);
    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.rejected.len(), 1);
    assert!(
        outcome.rejected[0]
            .reason
            .messages()
            .contains(&"TMB: required field is null".to_string())
    );
}

#[test]
fn discovery_uses_default_patterns_and_classifies() {
    let (_temp, dir) = fixture_dir();
    write(&dir, "TMB2022.tsv", "");
    write(&dir, "S1.call.cns", "");
    write(&dir, "S1_mean_gene_coverage.tsv", "");
    write(&dir, "notes.md", "");

    let sources = discover(&dir, &default_patterns()).unwrap();
    let found = sources
        .iter()
        .map(|source| (source.file_name().to_string(), source.table_type))
        .collect::<Vec<_>>();
    assert_eq!(
        found,
        vec![
            ("TMB2022.tsv".to_string(), TableType::Tmb),
            ("S1.call.cns".to_string(), TableType::Cns),
            ("S1_mean_gene_coverage.tsv".to_string(), TableType::MeanGeneCoverage),
        ]
    );
}

#[test]
fn discovery_skips_unrecognized_and_reports_nothing_found() {
    let (_temp, dir) = fixture_dir();
    write(&dir, "notes.tsv", "");
    let err = discover(&dir, &["*.tsv".to_string()]).unwrap_err();
    assert_matches!(err, IngestError::NoInputFiles);

    let err = discover(&dir.join("missing"), &default_patterns()).unwrap_err();
    assert_matches!(err, IngestError::DirectoryNotFound(_));
}
