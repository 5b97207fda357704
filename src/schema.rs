use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::domain::TableType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    String,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Integer => write!(f, "integer"),
            FieldType::Float => write!(f, "float"),
            FieldType::String => write!(f, "string"),
        }
    }
}

/// Validation rule for a single field. Patterns must carry their own anchors.
#[derive(Debug, Clone, Serialize)]
pub struct FieldRule {
    pub field_type: FieldType,
    pub required: bool,
    #[serde(serialize_with = "serialize_pattern", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Regex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldRule {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            pattern: None,
            min: None,
            max: None,
        }
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldType::Float)
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn pattern(mut self, pattern: &Regex) -> Self {
        self.pattern = Some(pattern.clone());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }
}

fn serialize_pattern<S: Serializer>(pattern: &Option<Regex>, serializer: S) -> Result<S::Ok, S::Error> {
    match pattern {
        Some(regex) => serializer.serialize_str(regex.as_str()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub table_type: TableType,
    fields: BTreeMap<String, FieldRule>,
}

impl TableSchema {
    pub fn new<I, K>(table_type: TableType, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldRule)>,
        K: Into<String>,
    {
        Self {
            table_type,
            fields: fields
                .into_iter()
                .map(|(name, rule)| (name.into(), rule))
                .collect(),
        }
    }

    pub fn empty(table_type: TableType) -> Self {
        Self {
            table_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// An empty schema passes every field through unvalidated.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-_]+$").expect("identifier pattern"));
static CHROMOSOME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(chr)?\d+$|^(chr)?[XY]$").expect("chromosome pattern"));
static NUCLEOTIDES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ACGT]+$").expect("nucleotide pattern"));

static REGISTRY: LazyLock<BTreeMap<TableType, TableSchema>> = LazyLock::new(|| {
    TableType::ALL
        .into_iter()
        .map(|table| (table, build_schema(table)))
        .collect()
});

/// Registered rule set for a table type. Unvalidated types get an empty schema.
pub fn schema_for(table_type: TableType) -> &'static TableSchema {
    &REGISTRY[&table_type]
}

fn build_schema(table_type: TableType) -> TableSchema {
    let sample_name = || FieldRule::string().required().pattern(&IDENTIFIER);
    match table_type {
        TableType::Tmb => TableSchema::new(
            table_type,
            [
                ("SampleName", sample_name()),
                ("TMB", FieldRule::float().required().min(0.0)),
                ("BinomialLow", FieldRule::float().required().min(0.0).max(1.0)),
                ("BinomialHigh", FieldRule::float().required().min(0.0).max(1.0)),
            ],
        ),
        TableType::Cns => TableSchema::new(
            table_type,
            [
                ("CHROM", FieldRule::string().required().pattern(&CHROMOSOME)),
                ("START", FieldRule::integer().required().min(0.0)),
                ("STOP", FieldRule::integer().required().min(0.0)),
                ("GENE", FieldRule::string().required().pattern(&IDENTIFIER)),
                ("log2", FieldRule::float().required()),
                ("SampleName", sample_name()),
            ],
        ),
        TableType::MeanGeneCoverage => TableSchema::new(
            table_type,
            [
                ("SampleName", sample_name()),
                ("GENE", FieldRule::string().required().pattern(&IDENTIFIER)),
                ("MEAN_COVERAGE", FieldRule::float().required().min(0.0)),
            ],
        ),
        TableType::Mastervar => TableSchema::new(
            table_type,
            [
                ("SampleName", sample_name()),
                ("CHROM", FieldRule::string().required().pattern(&CHROMOSOME)),
                ("POS", FieldRule::integer().required().min(0.0)),
                ("REF", FieldRule::string().required().pattern(&NUCLEOTIDES)),
                ("ALT", FieldRule::string().required().pattern(&NUCLEOTIDES)),
                ("AF", FieldRule::float().required().min(0.0).max(1.0)),
            ],
        ),
        TableType::Segments => TableSchema::empty(table_type),
    }
}
