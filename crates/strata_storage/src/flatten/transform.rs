//! The per-shard flatten transform.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_common::config::FlattenConfig;
use strata_common::error::{StrataError, StrataResult};
use strata_common::types::{ColumnType, ColumnValueId, RowId};
use tracing::debug;

use crate::column::{AnyColumnShard, ColumnShard};
use crate::dictionary::Dictionary;
use crate::page::{ColumnPage, IdRemap};
use crate::repeated::FieldPath;
use crate::shard::TableShard;
use crate::value::ColumnValue;

use super::dict_merge::merge_dictionaries;
use super::page_encoder::{complement, encode_page, RowSelection};
use super::plan::{classify_columns, ColumnPlan, RowLayout};

/// Flatten one shard by `flatten_by` (already validated to end in `[*]`).
/// The output keeps the input's lowest row id.
pub(crate) fn flatten_shard(
    shard: &TableShard,
    flatten_by: &FieldPath,
    output_table: &str,
    config: &FlattenConfig,
) -> StrataResult<TableShard> {
    let prefixes = flatten_by.repeated_prefixes();
    let layout = RowLayout::build(shard, &prefixes)?;
    let plans = classify_columns(shard, &prefixes, &layout)?;

    let mut columns = Vec::with_capacity(plans.len());
    for plan in &plans {
        let column = match plan {
            ColumnPlan::Multiplicating { name } => match shard.column(name) {
                Some(AnyColumnShard::Long(c)) => multiplicate(c, shard, &layout),
                Some(AnyColumnShard::String(c)) => multiplicate(c, shard, &layout),
                Some(AnyColumnShard::Double(c)) => multiplicate(c, shard, &layout),
                None => Err(StrataError::internal_bug(
                    "E-FLAT-002",
                    "classified column vanished from its shard",
                    format!("column={}", name),
                )),
            },
            ColumnPlan::Flattened {
                output,
                column_type,
                is_length,
                sources,
            } => match column_type {
                ColumnType::Long => {
                    unroll::<i64>(output, sources, *is_length, shard, &layout, config)
                }
                ColumnType::String => {
                    unroll::<String>(output, sources, *is_length, shard, &layout, config)
                }
                ColumnType::Double => {
                    unroll::<f64>(output, sources, *is_length, shard, &layout, config)
                }
            },
        }?;
        columns.push(column);
    }

    debug!(
        table = output_table,
        lowest_row_id = shard.lowest_row_id(),
        flatten_by = %flatten_by,
        rows_in = layout.input_rows(),
        rows_out = layout.output_rows(),
        leaves = layout.leaves().len(),
        columns = columns.len(),
        "flattened shard"
    );
    TableShard::new(output_table, shard.lowest_row_id(), columns)
}

/// Repeat each row's value once per output row of that row.
fn multiplicate<T: ColumnValue>(
    column: &ColumnShard<T>,
    shard: &TableShard,
    layout: &RowLayout,
) -> StrataResult<AnyColumnShard> {
    let identity = Arc::new(IdRemap::identity());
    let mut out = PageSink::new(shard.lowest_row_id());
    for pass in 0..layout.passes() {
        out.emit_rows(column.pages(), layout.pass_rows(pass), &identity)?;
    }
    Ok(T::into_any(ColumnShard::new(
        column.name(),
        Arc::clone(column.dictionary()),
        out.pages,
    )))
}

/// Build one flattened column from its per-leaf source columns.
fn unroll<T: ColumnValue>(
    output: &str,
    sources: &[String],
    is_length: bool,
    shard: &TableShard,
    layout: &RowLayout,
    config: &FlattenConfig,
) -> StrataResult<AnyColumnShard> {
    let physical: Vec<Option<&ColumnShard<T>>> = sources
        .iter()
        .map(|name| shard.column(name).and_then(T::from_any))
        .collect();

    // Absent instances read as one constant default.
    let fill = if is_length {
        T::zero()
    } else {
        T::default_value(config)
    };
    let dictionaries: BTreeMap<usize, Arc<Dictionary<T>>> = physical
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let dict = match source {
                Some(column) => Arc::clone(column.dictionary()),
                None => Arc::new(Dictionary::constant(fill.clone())),
            };
            (i, dict)
        })
        .collect();
    let merged = merge_dictionaries(dictionaries)?;

    let mut out = PageSink::new(shard.lowest_row_id());
    for pass in 0..layout.passes() {
        let rows = layout.pass_rows(pass);
        for run in layout.runs(pass) {
            let remap = merged.remap(&run.source);
            let run_rows = &rows[run.rows.clone()];
            match physical.get(run.source).copied().flatten() {
                Some(column) => out.emit_rows(column.pages(), run_rows, &remap)?,
                None => out.emit_constant(run_rows.len(), remap.map(0), config.max_page_rows),
            }
        }
    }
    Ok(T::into_any(ColumnShard::new(
        output,
        Arc::clone(&merged.dictionary),
        out.pages,
    )))
}

/// Accumulates output pages, handing out consecutive row ids.
struct PageSink {
    next_row_id: RowId,
    pages: Vec<ColumnPage>,
}

impl PageSink {
    fn new(first_row_id: RowId) -> Self {
        Self {
            next_row_id: first_row_id,
            pages: Vec::new(),
        }
    }

    fn push(&mut self, page: ColumnPage) {
        self.next_row_id += page.size() as RowId;
        self.pages.push(page);
    }

    /// Re-emit `rows` (ascending row ids) out of `pages`.
    fn emit_rows(&mut self, pages: &[ColumnPage], rows: &[RowId], remap: &Arc<IdRemap>) -> StrataResult<()> {
        let start_row_id = self.next_row_id;
        let mut cursor = 0usize;
        for page in pages {
            if cursor == rows.len() {
                break;
            }
            let (first, end) = (page.first_row_id(), page.end_row_id());
            let lo = cursor + rows[cursor..].partition_point(|r| *r < first);
            let hi = lo + rows[lo..].partition_point(|r| *r < end);
            cursor = hi;
            if lo == hi {
                continue;
            }
            let included: Vec<u32> = rows[lo..hi].iter().map(|r| (r - first) as u32).collect();
            let emitted = if included.len() * 2 > page.size() {
                let excluded = complement(&included, page.size());
                encode_page(page, self.next_row_id, RowSelection::Exclude(&excluded), remap)?
            } else {
                encode_page(page, self.next_row_id, RowSelection::Include(&included), remap)?
            };
            if let Some(p) = emitted {
                self.push(p);
            }
        }
        let emitted = (self.next_row_id - start_row_id) as usize;
        if emitted != rows.len() {
            return Err(StrataError::internal_bug(
                "E-FLAT-001",
                "source pages do not cover every selected row",
                format!("selected={} emitted={}", rows.len(), emitted),
            ));
        }
        Ok(())
    }

    fn emit_constant(&mut self, rows: usize, id: ColumnValueId, max_page_rows: usize) {
        let mut remaining = rows;
        while remaining > 0 {
            let len = remaining.min(max_page_rows.max(1));
            self.push(ColumnPage::constant(self.next_row_id, len as u32, id));
            remaining -= len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_shard;
    use crate::value::Value;
    use serde_json::json;

    fn flatten(docs: Vec<serde_json::Value>, by: &str, config: &FlattenConfig) -> TableShard {
        let shard = load_shard("t", 0, &docs, config).unwrap();
        flatten_shard(&shard, &FieldPath::parse(by).unwrap(), "f", config).unwrap()
    }

    fn column(shard: &TableShard, name: &str) -> Vec<Value> {
        let col = shard.column(name).unwrap();
        (0..shard.row_count() as RowId)
            .map(|i| col.value_at(shard.lowest_row_id() + i).unwrap())
            .collect()
    }

    #[test]
    fn test_repository_example() {
        let out = flatten(
            vec![json!({"a": [{"b": 1}, {"b": 2}], "c": 9})],
            "a[*]",
            &FlattenConfig::default(),
        );
        assert_eq!(out.row_count(), 2);
        assert_eq!(column(&out, "a.b"), vec![Value::Long(1), Value::Long(2)]);
        assert_eq!(column(&out, "c"), vec![Value::Long(9), Value::Long(9)]);
        assert!(out.column("a[length]").is_none());
    }

    #[test]
    fn test_sparse_instances_default_fill() {
        let config = FlattenConfig {
            default_string: "-".into(),
            max_page_rows: 2,
            ..FlattenConfig::default()
        };
        let out = flatten(
            vec![
                json!({"a": [{"s": "x"}, {"n": 5}], "k": 1}),
                json!({"a": [{"s": "y"}, {"n": 6}, {"s": "z", "n": 7}], "k": 2}),
                json!({"a": [], "k": 3}),
            ],
            "a[*]",
            &config,
        );
        assert_eq!(out.row_count(), 5);
        let s: Vec<String> = column(&out, "a.s").iter().map(|v| v.to_string()).collect();
        assert_eq!(s, vec!["x", "y", "-", "-", "z"]);
        let n: Vec<String> = column(&out, "a.n").iter().map(|v| v.to_string()).collect();
        assert_eq!(n, vec!["0", "0", "5", "6", "7"]);
        let k: Vec<String> = column(&out, "k").iter().map(|v| v.to_string()).collect();
        assert_eq!(k, vec!["1", "2", "1", "2", "2"]);
    }

    #[test]
    fn test_two_level_flatten() {
        let out = flatten(
            vec![
                json!({"a": [{"b": [1, 2], "x": 7}, {"b": [3]}]}),
                json!({"a": [{"b": []}, {"b": [4]}]}),
            ],
            "a[*].b[*]",
            &FlattenConfig::default(),
        );
        let names: Vec<&str> = out.column_names().collect();
        assert_eq!(names, vec!["a.b", "a[0].x"]);
        assert_eq!(out.row_count(), 4);
        let b: Vec<String> = column(&out, "a.b").iter().map(|v| v.to_string()).collect();
        assert_eq!(b, vec!["1", "4", "2", "3"]);
        // Ancestor value follows its input row through every pass.
        let x: Vec<String> = column(&out, "a[0].x").iter().map(|v| v.to_string()).collect();
        assert_eq!(x, vec!["7", "0", "7", "7"]);
    }

    #[test]
    fn test_merged_dictionary_is_sorted_and_shared() {
        let out = flatten(
            vec![json!({"a": [3, 1]}), json!({"a": [1, 2]})],
            "a[*]",
            &FlattenConfig::default(),
        );
        match out.column("a").unwrap() {
            AnyColumnShard::Long(c) => assert_eq!(c.dictionary().values(), &[1, 2, 3]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(column(&out, "a"), vec![Value::Long(3), Value::Long(1), Value::Long(1), Value::Long(2)]);
    }
}
