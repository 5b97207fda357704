use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::TableType;
use crate::error::IngestError;

pub const DEFAULT_PATTERNS: [(TableType, &str); 5] = [
    (TableType::Tmb, "TMB*.tsv"),
    (TableType::Cns, "*.cns"),
    (TableType::MeanGeneCoverage, "*mean_gene_coverage.tsv"),
    (TableType::Mastervar, "*Run_masterVarFinal.txt"),
    (TableType::Segments, "*segments.called.named.tsv"),
];

pub fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS
        .iter()
        .map(|(_, pattern)| pattern.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    pub table_type: TableType,
}

impl SourceFile {
    pub fn new(path: impl Into<Utf8PathBuf>, table_type: TableType) -> Self {
        Self {
            path: path.into(),
            table_type,
        }
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

/// Table type implied by a file name. First match wins, in this order.
pub fn classify(file_name: &str) -> Option<TableType> {
    let lower = file_name.to_lowercase();
    if lower.contains("tmb") {
        Some(TableType::Tmb)
    } else if lower.ends_with(".cns") {
        Some(TableType::Cns)
    } else if lower.contains("mean_gene_coverage") {
        Some(TableType::MeanGeneCoverage)
    } else if lower.contains("mastervarfinal") {
        Some(TableType::Mastervar)
    } else if lower.contains("segments.called.named") {
        Some(TableType::Segments)
    } else {
        None
    }
}

/// Compiles a shell-style pattern (`*` and `?`) matched against whole file
/// names.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, IngestError> {
    if pattern.is_empty() || pattern.contains('/') {
        return Err(IngestError::InvalidPattern(pattern.to_string()));
    }
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|err| IngestError::InvalidPattern(err.to_string()))
}

/// Finds files directly under `dir` matching any of `patterns` and classifies
/// them. Unmatched patterns and unrecognized files are logged and skipped.
pub fn discover(dir: &Utf8Path, patterns: &[String]) -> Result<Vec<SourceFile>, IngestError> {
    if !dir.as_std_path().is_dir() {
        return Err(IngestError::DirectoryNotFound(dir.as_std_path().to_path_buf()));
    }

    let mut names = fs::read_dir(dir.as_std_path())
        .map_err(|err| IngestError::Filesystem(err.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect::<Vec<_>>();
    names.sort();

    let mut matched: Vec<String> = Vec::new();
    for pattern in patterns {
        let regex = wildcard_regex(pattern)?;
        let hits = names
            .iter()
            .filter(|name| regex.is_match(name))
            .collect::<Vec<_>>();
        if hits.is_empty() {
            warn!(%pattern, "no files found matching pattern");
        }
        for name in hits {
            if !matched.contains(name) {
                matched.push(name.clone());
            }
        }
    }

    let mut sources = Vec::with_capacity(matched.len());
    for name in matched {
        match classify(&name) {
            Some(table_type) => {
                debug!(file = %name, %table_type, "classified input file");
                sources.push(SourceFile::new(dir.join(&name), table_type));
            }
            None => warn!(file = %name, "unrecognized file type"),
        }
    }

    if sources.is_empty() {
        return Err(IngestError::NoInputFiles);
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn classify_follows_precedence() {
        assert_eq!(classify("TMB2022.tsv"), Some(TableType::Tmb));
        assert_eq!(classify("S1.call.cns"), Some(TableType::Cns));
        assert_eq!(classify("S1_mean_gene_coverage.tsv"), Some(TableType::MeanGeneCoverage));
        assert_eq!(classify("Run_masterVarFinal.txt"), Some(TableType::Mastervar));
        assert_eq!(classify("S1.segments.called.named.tsv"), Some(TableType::Segments));
        // "tmb" anywhere in the name takes precedence
        assert_eq!(classify("tmb_S1.cns"), Some(TableType::Tmb));
        assert_eq!(classify("notes.txt"), None);
    }

    #[test]
    fn wildcard_matches_whole_name() {
        let regex = wildcard_regex("TMB*.tsv").unwrap();
        assert!(regex.is_match("TMB2022.tsv"));
        assert!(!regex.is_match("TMB2022.tsv.bak"));
        assert!(!regex.is_match("xTMB.tsv"));
        assert!(wildcard_regex("S?.cns").unwrap().is_match("S1.cns"));
        assert_matches!(wildcard_regex("a/b"), Err(IngestError::InvalidPattern(_)));
    }
}
