/// Result materialization
///
/// Engines return column names plus positional rows. Callers get rows keyed
/// by column name, in column order.
use std::sync::Arc;

use crate::models::{EngineResult, QueryResult, RawRows, Row, Scalar};

/// Turn an engine result into a caller-facing `QueryResult`.
///
/// Missing trailing values read as `Null` and surplus values are dropped. A
/// repeated column name keeps its first position and takes the last value.
pub fn materialize(result: EngineResult) -> QueryResult {
    let EngineResult {
        rows_affected,
        insert_id,
        column_names,
        raw_rows,
        metadata,
    } = result;

    let keys: Vec<Arc<str>> = column_names.iter().map(|c| Arc::from(c.as_str())).collect();

    let rows = raw_rows
        .unwrap_or_default()
        .into_iter()
        .map(|raw| build_row(&keys, raw))
        .collect();

    QueryResult {
        insert_id,
        rows_affected,
        rows,
        column_names,
        metadata,
    }
}

/// Keep the positional rows and drop everything else.
pub fn raw(result: EngineResult) -> RawRows {
    RawRows {
        column_names: result.column_names,
        rows: result.raw_rows.unwrap_or_default(),
    }
}

fn build_row(keys: &[Arc<str>], raw: Vec<Scalar>) -> Row {
    let mut row = Row::with_capacity(keys.len());
    let mut values = raw.into_iter();
    for key in keys {
        let value = values.next().unwrap_or(Scalar::Null);
        row.insert(Arc::clone(key), value);
    }
    row
}
