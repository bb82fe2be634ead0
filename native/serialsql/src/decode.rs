/// Decoding and type conversion utilities
///
/// This module converts between the crate's `Scalar` values and libsql
/// values, and validates identifiers that have to be spliced into SQL text.
use libsql::Value;

use crate::error::{Error, Result};
use crate::models::Scalar;

/// Convert a caller value into a libsql value.
///
/// Booleans bind as integers `0`/`1`. Views are bound as the bytes they
/// cover, although the sanitizer normally replaces them before this point.
pub fn scalar_to_value(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(v) => Value::Integer(i64::from(v)),
        Scalar::Integer(v) => Value::Integer(v),
        Scalar::Real(v) => Value::Real(v),
        Scalar::Text(v) => Value::Text(v),
        Scalar::Blob(v) => Value::Blob(v.to_vec()),
        Scalar::View(v) => Value::Blob(v.to_bytes().to_vec()),
    }
}

/// Convert a value read from libsql into a caller value.
pub fn value_to_scalar(value: Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Integer(v) => Scalar::Integer(v),
        Value::Real(v) => Scalar::Real(v),
        Value::Text(v) => Scalar::Text(v),
        Value::Blob(v) => Scalar::Blob(v.into()),
    }
}

pub fn scalars_to_values(params: Vec<Scalar>) -> Vec<Value> {
    params.into_iter().map(scalar_to_value).collect()
}

/// Validate that a name is a plain SQL identifier
///
/// Identifiers must be:
/// - Non-empty
/// - ASCII alphanumeric or underscore
/// - Not start with a digit
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty()
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.chars().next().is_none_or(|c| c.is_ascii_digit())
    {
        return Err(Error::InvalidArgument(format!(
            "invalid identifier {name:?}: must be a valid SQL identifier"
        )));
    }
    Ok(())
}

/// Quote a string as a SQL string literal, doubling embedded quotes.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
