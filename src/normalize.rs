use thiserror::Error;

use crate::domain::Value;
use crate::schema::{FieldRule, FieldType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionFailure {
    #[error("{value:?} is not a valid {target}")]
    NotNumeric { value: String, target: FieldType },

    #[error("{0} is not a finite number")]
    NonFinite(String),

    #[error("{0} does not fit a 64-bit integer")]
    OutOfRange(String),
}

pub fn is_chromosome_field(field: &str) -> bool {
    field.to_ascii_uppercase().contains("CHROM")
}

/// Converts a raw value into its canonical form for `rule`.
///
/// Missing input always yields `Value::Null`. Chromosome fields are rewritten
/// to a bare, uppercase designation with `X`/`Y` aliased to `"23"`/`"24"`.
/// Values without a rule pass through untouched.
pub fn normalize(field: &str, value: &Value, rule: Option<&FieldRule>) -> Result<Value, CoercionFailure> {
    let Some(rule) = rule else {
        return Ok(value.clone());
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    if is_chromosome_field(field) {
        return Ok(Value::Text(canonical_chromosome(&value.to_string())));
    }

    match rule.field_type {
        FieldType::Float => to_float(value).map(Value::Float),
        FieldType::Integer => to_integer(value).map(Value::Integer),
        FieldType::String => Ok(Value::Text(value.to_string().trim().to_string())),
    }
}

pub fn canonical_chromosome(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("CHR").unwrap_or(&upper);
    match bare {
        "X" => "23".to_string(),
        "Y" => "24".to_string(),
        other => other.to_string(),
    }
}

fn to_float(value: &Value) -> Result<f64, CoercionFailure> {
    let parsed = match value {
        Value::Float(number) => *number,
        Value::Integer(number) => *number as f64,
        Value::Text(text) => text.trim().parse::<f64>().map_err(|_| CoercionFailure::NotNumeric {
            value: text.clone(),
            target: FieldType::Float,
        })?,
        Value::Null => {
            return Err(CoercionFailure::NotNumeric {
                value: String::new(),
                target: FieldType::Float,
            });
        }
    };
    if !parsed.is_finite() {
        return Err(CoercionFailure::NonFinite(value.to_string()));
    }
    Ok(parsed)
}

fn to_integer(value: &Value) -> Result<i64, CoercionFailure> {
    if let Value::Integer(number) = value {
        return Ok(*number);
    }
    let float = to_float(value).map_err(|err| match err {
        CoercionFailure::NotNumeric { value, .. } => CoercionFailure::NotNumeric {
            value,
            target: FieldType::Integer,
        },
        other => other,
    })?;
    let truncated = float.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(CoercionFailure::OutOfRange(value.to_string()));
    }
    Ok(truncated as i64)
}
