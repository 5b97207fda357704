use std::collections::{BTreeMap, HashSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::{Dataset, TableType, Value};
use crate::error::IngestError;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; absent with fewer than two values.
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    pub missing: usize,
    pub distinct: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QcSummary {
    pub dataset: String,
    pub table_type: TableType,
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub fields: BTreeMap<String, FieldSummary>,
}

impl QcSummary {
    pub fn compute(dataset: &Dataset, generated_at: DateTime<Utc>) -> Self {
        let mut columns: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
        for (idx, record) in dataset.records.iter().enumerate() {
            for (name, value) in record.iter() {
                let column = columns.entry(name.to_string()).or_default();
                // rows that lack the field count as missing
                while column.len() < idx {
                    column.push(&NULL);
                }
                column.push(value);
            }
        }
        let total = dataset.records.len();

        let fields = columns
            .into_iter()
            .map(|(name, mut values)| {
                values.resize(total, &NULL);
                (name, summarize(&values))
            })
            .collect();

        Self {
            dataset: dataset.id.clone(),
            table_type: dataset.table_type,
            generated_at,
            total_records: total,
            fields,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}_qc_report.json", self.dataset, self.table_type)
    }

    pub fn write(&self, dir: &Utf8Path) -> Result<Utf8PathBuf, IngestError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        fs::write(path.as_std_path(), json)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        info!(dataset = %self.dataset, path = %path, "wrote QC report");
        Ok(path)
    }
}

fn summarize(values: &[&Value]) -> FieldSummary {
    let present = values.iter().filter(|v| !v.is_null()).copied().collect::<Vec<_>>();
    let distinct = present
        .iter()
        .map(|value| distinct_key(value))
        .collect::<HashSet<_>>()
        .len();

    let numbers = present.iter().map(|v| v.as_f64()).collect::<Option<Vec<_>>>();
    let numeric = numbers
        .filter(|numbers| !numbers.is_empty())
        .map(numeric_summary);

    FieldSummary {
        missing: values.len() - present.len(),
        distinct,
        numeric,
    }
}

fn distinct_key(value: &Value) -> String {
    match value {
        Value::Float(number) => format!("f:{}", number.to_bits()),
        Value::Integer(number) => format!("i:{number}"),
        other => format!("t:{other}"),
    }
}

fn numeric_summary(mut numbers: Vec<f64>) -> NumericSummary {
    numbers.sort_by(f64::total_cmp);
    let count = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / count;
    let mid = numbers.len() / 2;
    let median = if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    };
    let std = (numbers.len() > 1).then(|| {
        let variance = numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / (count - 1.0);
        variance.sqrt()
    });
    NumericSummary {
        mean,
        median,
        std,
        min: numbers[0],
        max: numbers[numbers.len() - 1],
    }
}
