use std::collections::HashMap;

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::discovery::SourceFile;
use crate::domain::{Dataset, Record, Value};
use crate::error::IngestError;

/// Produces a dataset from a discovered source file.
pub trait DatasetReader {
    fn read(&self, source: &SourceFile) -> Result<Dataset, IngestError>;
}

const TMB_COLUMNS: [(&str, &str); 4] = [
    ("Samplename", "SampleName"),
    ("FAF", "TMB"),
    ("FAD", "BinomialLow"),
    ("FRD", "BinomialHigh"),
];

const CNS_COLUMNS: [(&str, &str); 11] = [
    ("chromosome", "CHROM"),
    ("start", "START"),
    ("end", "STOP"),
    ("gene", "GENE"),
    ("log2", "log2"),
    ("ci_hi", "ci_hi"),
    ("ci_lo", "ci_lo"),
    ("cn", "cn"),
    ("depth", "DEPTH"),
    ("probes", "probes"),
    ("weight", "weight"),
];

const COVERAGE_COLUMNS: [(&str, &str); 3] = [
    ("NAME", "SampleName"),
    ("GENE", "GENE"),
    ("MEAN_COVERAGE", "MEAN_COVERAGE"),
];

/// Headerless export; fields are taken by position.
const MASTERVAR_COLUMNS: [(usize, &str); 20] = [
    (0, "SampleName"),
    (1, "CHROM"),
    (2, "POS"),
    (3, "REF"),
    (4, "ALT"),
    (5, "TYPE"),
    (11, "GENE"),
    (13, "TRANSCRIPT"),
    (15, "EXON"),
    (16, "EFFECT"),
    (25, "C_CHANGE"),
    (26, "P_CHANGE"),
    (27, "GENE_REGION"),
    (51, "DEPTH"),
    (52, "RD"),
    (53, "AD"),
    (54, "AF"),
    (58, "STRAND"),
    (66, "START"),
    (67, "STOP"),
];

const SEGMENT_COLUMNS: [&str; 14] = [
    "SampleName",
    "GENE",
    "CHROM",
    "START",
    "STOP",
    "log2",
    "cn",
    "DEPTH",
    "weight",
    "ci_hi",
    "ci_lo",
    "probes",
    "segment_weight",
    "segment_probes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Tmb,
    Cns,
    MeanGeneCoverage,
    Mastervar,
    Segments,
    Generic,
}

impl Layout {
    fn detect(path: &Utf8Path) -> Result<Self, IngestError> {
        let name = path.file_name().unwrap_or_default().to_lowercase();
        let ext = path.extension().unwrap_or_default().to_lowercase();
        let layout = if name == "tmb2022.tsv" {
            Layout::Tmb
        } else if ext == "cns" {
            Layout::Cns
        } else if name.contains("mean_gene_coverage.tsv") {
            Layout::MeanGeneCoverage
        } else if name.contains("run_mastervarfinal.txt") {
            Layout::Mastervar
        } else if name.contains("segments.called.named.tsv") {
            Layout::Segments
        } else if matches!(ext.as_str(), "tsv" | "txt" | "cnr") {
            Layout::Generic
        } else {
            return Err(IngestError::UnsupportedFile(path.to_string()));
        };
        Ok(layout)
    }
}

/// Tab-separated reader for the lab's export formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvReader;

impl DatasetReader for TsvReader {
    fn read(&self, source: &SourceFile) -> Result<Dataset, IngestError> {
        let path = source.path.as_path();
        let layout = Layout::detect(path)?;
        let read_err = |message: String| IngestError::Read {
            path: path.to_string(),
            message,
        };

        let records = match layout {
            Layout::Mastervar => {
                let rows = read_rows(path, false).map_err(read_err)?;
                rows.iter()
                    .enumerate()
                    .map(|(idx, row)| positional(row, idx))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(read_err)?
            }
            _ => {
                let (header, rows) = read_table(path).map_err(read_err)?;
                match layout {
                    Layout::Tmb => project(&header, &rows, &TMB_COLUMNS).map_err(read_err)?,
                    Layout::MeanGeneCoverage => {
                        project(&header, &rows, &COVERAGE_COLUMNS).map_err(read_err)?
                    }
                    Layout::Cns => {
                        let sample = sample_name(path);
                        project(&header, &rows, &CNS_COLUMNS)
                            .map_err(read_err)?
                            .into_iter()
                            .map(|record| record.with("SampleName", sample.as_str()))
                            .collect()
                    }
                    Layout::Segments => segments(&header, &rows, &sample_name(path)),
                    _ => generic(&header, &rows),
                }
            }
        };

        debug!(path = %path, records = records.len(), ?layout, "read dataset");
        Ok(Dataset::new(source.file_name(), source.table_type, records))
    }
}

/// Everything before the first `.` of the file name.
pub fn sample_name(path: &Utf8Path) -> String {
    let name = path.file_name().unwrap_or_default();
    name.split('.').next().unwrap_or(name).to_string()
}

pub fn clean_column_name(name: &str) -> String {
    name.replace([' ', '-'], "_").to_lowercase()
}

fn read_rows(path: &Utf8Path, has_headers: bool) -> Result<Vec<StringRecord>, String> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .flexible(true)
        .from_path(path.as_std_path())
        .map_err(|err| err.to_string())?;
    rdr.records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.to_string())
}

fn read_table(path: &Utf8Path) -> Result<(Vec<String>, Vec<StringRecord>), String> {
    let mut rows = read_rows(path, false)?;
    if rows.is_empty() {
        return Err("file is empty".to_string());
    }
    let header = rows.remove(0).iter().map(str::to_string).collect();
    Ok((header, rows))
}

/// Cell contents read as missing, in addition to blank cells.
const MISSING_MARKERS: [&str; 10] = [
    "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A", "-nan",
];

fn cell(row: &StringRecord, idx: usize) -> Value {
    match row.get(idx) {
        Some(raw) if MISSING_MARKERS.contains(&raw.trim()) => Value::Null,
        Some(raw) => Value::from_cell(raw),
        None => Value::Null,
    }
}

fn project(header: &[String], rows: &[StringRecord], columns: &[(&str, &str)]) -> Result<Vec<Record>, String> {
    let positions = columns
        .iter()
        .map(|(source, target)| {
            header
                .iter()
                .position(|name| name.as_str() == *source)
                .map(|idx| (idx, *target))
                .ok_or_else(|| format!("missing column {source}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|(idx, target)| (*target, cell(row, *idx)))
                .collect()
        })
        .collect())
}

fn positional(row: &StringRecord, line: usize) -> Result<Record, String> {
    let needed = MASTERVAR_COLUMNS[MASTERVAR_COLUMNS.len() - 1].0 + 1;
    if row.len() < needed {
        return Err(format!(
            "line {}: expected at least {needed} columns, found {}",
            line + 1,
            row.len()
        ));
    }
    Ok(MASTERVAR_COLUMNS
        .iter()
        .map(|(idx, name)| (*name, cell(row, *idx)))
        .collect())
}

fn segments(header: &[String], rows: &[StringRecord], sample: &str) -> Vec<Record> {
    let by_lower = header
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.to_lowercase(), idx))
        .collect::<HashMap<_, _>>();
    rows.iter()
        .map(|row| {
            let mut record = SEGMENT_COLUMNS
                .iter()
                .map(|name| {
                    let value = by_lower
                        .get(&name.to_lowercase())
                        .map(|idx| cell(row, *idx))
                        .unwrap_or(Value::Null);
                    (*name, value)
                })
                .collect::<Record>();
            record.insert("SampleName", sample);
            record
        })
        .collect()
}

fn generic(header: &[String], rows: &[StringRecord]) -> Vec<Record> {
    let names = header.iter().map(|name| clean_column_name(name)).collect::<Vec<_>>();
    rows.iter()
        .map(|row| {
            names
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.as_str(), cell(row, idx)))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_name_is_stem_before_first_dot() {
        assert_eq!(sample_name(Utf8Path::new("/data/S12.call.cns")), "S12");
        assert_eq!(sample_name(Utf8Path::new("S3")), "S3");
    }

    #[test]
    fn column_names_are_cleaned() {
        assert_eq!(clean_column_name("Mean Depth-X"), "mean_depth_x");
    }

    #[test]
    fn layout_detection() {
        assert_eq!(Layout::detect(Utf8Path::new("TMB2022.tsv")).unwrap(), Layout::Tmb);
        assert_eq!(Layout::detect(Utf8Path::new("TMB_other.tsv")).unwrap(), Layout::Generic);
        assert_eq!(
            Layout::detect(Utf8Path::new("S1.segments.called.named.tsv")).unwrap(),
            Layout::Segments
        );
        assert!(Layout::detect(Utf8Path::new("S1.vcf")).is_err());
    }
}
