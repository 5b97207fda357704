use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Tmb,
    Cns,
    MeanGeneCoverage,
    Mastervar,
    Segments,
}

impl TableType {
    pub const ALL: [TableType; 5] = [
        TableType::Tmb,
        TableType::Cns,
        TableType::MeanGeneCoverage,
        TableType::Mastervar,
        TableType::Segments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::Tmb => "tmb",
            TableType::Cns => "cns",
            TableType::MeanGeneCoverage => "mean_gene_coverage",
            TableType::Mastervar => "mastervar",
            TableType::Segments => "segments",
        }
    }

    /// Destination table for accepted records.
    pub fn table_name(&self) -> String {
        format!("{}_data", self.as_str())
    }

    /// Audit table receiving invalid and duplicate records.
    pub fn dropped_table_name(&self) -> String {
        format!("{}_data_dropped_records", self.as_str())
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TableType {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        TableType::ALL
            .into_iter()
            .find(|table| table.as_str() == normalized)
            .ok_or_else(|| IngestError::UnknownTableType(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Raw cell helper: empty or whitespace-only text is treated as missing.
    pub fn from_cell(cell: &str) -> Self {
        if cell.trim().is_empty() {
            Value::Null
        } else {
            Value::Text(cell.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            Value::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            Value::Null => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

/// One source row: field name to value, in the order the reader emitted them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// A parsed input file tagged with the table type it was classified as.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub table_type: TableType,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn new(id: impl Into<String>, table_type: TableType, records: Vec<Record>) -> Self {
        Self {
            id: id.into(),
            table_type,
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_table_type() {
        let table: TableType = "Mean_Gene_Coverage".parse().unwrap();
        assert_eq!(table, TableType::MeanGeneCoverage);
        assert_eq!(table.table_name(), "mean_gene_coverage_data");
    }

    #[test]
    fn parse_table_type_invalid() {
        let err = "vcf".parse::<TableType>().unwrap_err();
        assert_matches!(err, IngestError::UnknownTableType(_));
    }

    #[test]
    fn record_insert_replaces_in_place() {
        let mut record = Record::new().with("A", "1").with("B", "2");
        record.insert("A", 3_i64);
        let names = record.field_names().collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(record.get("A"), Some(&Value::Integer(3)));
    }
}
