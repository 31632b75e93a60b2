//! Builds table shards from JSON documents.
//!
//! Each document is one row. Objects nest with `.`, arrays produce a
//! `[length]` column plus one `[i]` path per entry, so
//! `{"a": [{"b": 1}, {"b": 2}], "c": 9}` becomes the columns `a[length]`,
//! `a[0].b`, `a[1].b` and `c`. Columns absent from a row are filled with the
//! configured default (0 for length columns) so every column covers every
//! row.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use strata_common::config::FlattenConfig;
use strata_common::error::{StorageError, StrataResult};
use strata_common::types::{ColumnType, RowId};
use tracing::debug;

use crate::column::{AnyColumnShard, ColumnShard};
use crate::repeated::FieldPath;
use crate::shard::TableShard;
use crate::value::{ColumnValue, Value};

/// Load one shard starting at `lowest_row_id`.
pub fn load_shard(
    table: &str,
    lowest_row_id: RowId,
    docs: &[Json],
    config: &FlattenConfig,
) -> StrataResult<TableShard> {
    let mut columns: BTreeMap<String, Vec<Option<Value>>> = BTreeMap::new();
    for (row, doc) in docs.iter().enumerate() {
        let object = doc.as_object().ok_or_else(|| StorageError::InvalidColumnValue {
            column: format!("<row {}>", lowest_row_id + row as RowId),
            reason: "row is not a JSON object".into(),
        })?;
        let mut cells = Vec::new();
        for (key, value) in object {
            walk(&field_name(key, "")?, value, false, &mut cells)?;
        }
        for (name, value) in cells {
            let column = columns.entry(name).or_insert_with(|| vec![None; docs.len()]);
            column[row] = Some(value);
        }
    }

    let mut shard_columns = Vec::with_capacity(columns.len());
    for (name, cells) in columns {
        let path = FieldPath::parse(&name)?;
        let column_type = unify_types(&name, &cells)?;
        let is_length = path.is_length_column();
        let column = match column_type {
            ColumnType::Long => build::<i64>(&name, lowest_row_id, &cells, is_length, config, |v| match v {
                Value::Long(x) => Some(*x),
                _ => None,
            }),
            ColumnType::Double => build::<f64>(&name, lowest_row_id, &cells, is_length, config, |v| match v {
                Value::Long(x) => Some(*x as f64),
                Value::Double(x) => Some(*x),
                _ => None,
            }),
            ColumnType::String => build::<String>(&name, lowest_row_id, &cells, is_length, config, |v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            }),
        };
        shard_columns.push(column);
    }
    debug!(
        table,
        lowest_row_id,
        rows = docs.len(),
        columns = shard_columns.len(),
        "loaded shard"
    );
    TableShard::new(table, lowest_row_id, shard_columns)
}

/// Load consecutive shards of `shard_rows` rows each, numbered from row 0.
pub fn load_shards(
    table: &str,
    docs: &[Json],
    shard_rows: usize,
    config: &FlattenConfig,
) -> StrataResult<Vec<TableShard>> {
    docs.chunks(shard_rows.max(1))
        .enumerate()
        .map(|(i, chunk)| load_shard(table, (i * shard_rows.max(1)) as RowId, chunk, config))
        .collect()
}

fn field_name(key: &str, parent: &str) -> StrataResult<String> {
    if key.is_empty() || key.contains(['.', '[', ']']) {
        return Err(StorageError::InvalidColumnValue {
            column: format!("{}{}", parent, key),
            reason: "field names must be non-empty and free of '.', '[' and ']'".into(),
        }
        .into());
    }
    Ok(if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    })
}

fn walk(path: &str, value: &Json, in_array: bool, out: &mut Vec<(String, Value)>) -> StrataResult<()> {
    match value {
        Json::Null => {}
        Json::Bool(b) => out.push((path.to_string(), Value::Long(i64::from(*b)))),
        Json::Number(n) => {
            let v = match n.as_i64() {
                Some(i) => Value::Long(i),
                None => Value::Double(n.as_f64().unwrap_or_default()),
            };
            out.push((path.to_string(), v));
        }
        Json::String(s) => out.push((path.to_string(), Value::String(s.clone()))),
        Json::Object(fields) => {
            for (key, v) in fields {
                walk(&field_name(key, path)?, v, false, out)?;
            }
        }
        Json::Array(items) => {
            if in_array {
                return Err(StorageError::InvalidColumnValue {
                    column: path.to_string(),
                    reason: "arrays directly inside arrays are not supported".into(),
                }
                .into());
            }
            out.push((format!("{}[length]", path), Value::Long(items.len() as i64)));
            for (i, item) in items.iter().enumerate() {
                walk(&format!("{}[{}]", path, i), item, true, out)?;
            }
        }
    }
    Ok(())
}

/// One type per column; longs mixed with doubles widen to double.
fn unify_types(name: &str, cells: &[Option<Value>]) -> StrataResult<ColumnType> {
    let mut seen: Option<ColumnType> = None;
    for value in cells.iter().flatten() {
        let t = value.column_type();
        seen = Some(match (seen, t) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Long), ColumnType::Double) | (Some(ColumnType::Double), ColumnType::Long) => {
                ColumnType::Double
            }
            (Some(a), b) => {
                return Err(StorageError::ColumnTypeConflict {
                    column: name.to_string(),
                    first: a,
                    second: b,
                }
                .into())
            }
        });
    }
    Ok(seen.unwrap_or(ColumnType::Long))
}

fn build<T: ColumnValue>(
    name: &str,
    lowest_row_id: RowId,
    cells: &[Option<Value>],
    is_length: bool,
    config: &FlattenConfig,
    convert: impl Fn(&Value) -> Option<T>,
) -> AnyColumnShard {
    let fill = if is_length { T::zero() } else { T::default_value(config) };
    let values = cells
        .iter()
        .map(|c| c.as_ref().and_then(&convert).unwrap_or_else(|| fill.clone()))
        .collect();
    T::into_any(ColumnShard::from_values(name, lowest_row_id, values, config.max_page_rows))
}
