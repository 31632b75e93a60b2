//! Table flattening: every entry of a repeated field becomes its own row.
//!
//! `{a: [{b: 1}, {b: 2}], c: 9}` flattened by `a[*]` gives the rows
//! `(a.b = 1, c = 9)` and `(a.b = 2, c = 9)`.
//!
//! - `dict_merge`: k-way merge of column dictionaries
//! - `page_encoder`: re-emitting a subset of a page
//! - `plan`: which output row comes from where, and what each column becomes
//! - `transform`: the per-shard transform driving the three above

pub mod dict_merge;
pub mod page_encoder;
mod plan;
mod transform;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use strata_common::config::FlattenConfig;
use strata_common::error::{FlattenError, StrataError, StrataResult};
use strata_common::types::{FlattenId, RowId};
use strata_observability::record_flatten_shard;
use tracing::{debug, info};

use crate::repeated::{FieldPath, Index};
use crate::shard::TableShard;
use crate::table::{FlattenedTable, Table};

pub use dict_merge::{merge_dictionaries, MergedDictionary};
pub use page_encoder::{choose_strategy, encode_page, PageStrategy, RowSelection};

/// Name of the table produced by flattening `table` by `flatten_by`.
pub fn flattened_table_name(table: &str, flatten_by: &str) -> String {
    format!("{}#{}", table, flatten_by)
}

/// Parse a flatten-by field; it must end in `[*]`.
pub fn parse_flatten_by(flatten_by: &str) -> StrataResult<FieldPath> {
    let invalid = |reason: String| FlattenError::InvalidFlattenBy {
        flatten_by: flatten_by.to_string(),
        reason,
    };
    let path = FieldPath::parse(flatten_by).map_err(|e| invalid(e.to_string()))?;
    if !path.ends_with_all() {
        return Err(invalid("must end in [*]".into()).into());
    }
    if path
        .segments()
        .iter()
        .any(|s| !matches!(s.index, Index::None | Index::All))
    {
        return Err(invalid("only [*] markers are allowed".into()).into());
    }
    Ok(path)
}

/// Runs the flatten transform over the shards of a table.
#[derive(Debug, Clone)]
pub struct Flattener {
    config: FlattenConfig,
}

impl Flattener {
    pub fn new(config: FlattenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlattenConfig {
        &self.config
    }

    /// Flatten one shard. The output shard keeps the input's lowest row id.
    pub fn flatten_shard(
        &self,
        shard: &TableShard,
        flatten_by: &str,
        output_table: &str,
    ) -> StrataResult<TableShard> {
        let path = parse_flatten_by(flatten_by)?;
        self.flatten_shard_path(shard, &path, output_table)
    }

    fn flatten_shard_path(
        &self,
        shard: &TableShard,
        flatten_by: &FieldPath,
        output_table: &str,
    ) -> StrataResult<TableShard> {
        let start = Instant::now();
        let out = transform::flatten_shard(shard, flatten_by, output_table, &self.config)?;
        record_flatten_shard(
            start.elapsed().as_micros() as u64,
            shard.row_count(),
            out.row_count(),
        );
        Ok(out)
    }

    /// Flatten `shards` (all shards of `table` when `None`) by `flatten_by`.
    ///
    /// Shards are flattened concurrently, one thread each. The result is
    /// identified by `flatten_id` and remembers the lowest row ids of the
    /// shards it was computed from.
    pub fn flatten_table(
        &self,
        table: &Table,
        shards: Option<&[Arc<TableShard>]>,
        flatten_by: &str,
        flatten_id: FlattenId,
    ) -> StrataResult<FlattenedTable> {
        if table.is_flattened() {
            return Err(FlattenError::AlreadyFlattened {
                table: table.name().to_string(),
            }
            .into());
        }
        let path = parse_flatten_by(flatten_by)?;
        let canonical = path.to_string();
        let flatten_by = canonical.as_str();
        let shards = shards.unwrap_or(table.shards());
        let output_table = flattened_table_name(table.name(), flatten_by);
        let start = Instant::now();

        let results: Vec<StrataResult<TableShard>> = std::thread::scope(|s| {
            let handles: Vec<_> = shards
                .iter()
                .map(|shard| {
                    let path = &path;
                    let output_table = output_table.as_str();
                    s.spawn(move || self.flatten_shard_path(shard, path, output_table))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(StrataError::internal_bug(
                            "E-FLAT-004",
                            "shard flatten thread panicked",
                            format!("table={} flatten_by={}", table.name(), flatten_by),
                        ))
                    })
                })
                .collect()
        });

        let mut flattened = Vec::with_capacity(results.len());
        for (shard, result) in shards.iter().zip(results) {
            match result {
                Ok(out) => flattened.push(Arc::new(out)),
                Err(e) => {
                    debug!(
                        table = table.name(),
                        lowest_row_id = shard.lowest_row_id(),
                        error = %e,
                        "shard flatten failed"
                    );
                    return Err(e);
                }
            }
        }

        let original_first_row_ids: BTreeSet<RowId> =
            shards.iter().map(|s| s.lowest_row_id()).collect();
        let rows_out: u64 = flattened.iter().map(|s| s.row_count()).sum();
        info!(
            table = table.name(),
            flatten_by,
            %flatten_id,
            shards = shards.len(),
            rows_out,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "flattened table"
        );
        Ok(FlattenedTable::new(
            output_table,
            flattened,
            table.name(),
            flatten_by,
            flatten_id,
            original_first_row_ids,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_shard;
    use serde_json::json;

    fn table() -> Table {
        let cfg = FlattenConfig::default();
        let s0 = load_shard("t", 0, &[json!({"a": [1, 2]})], &cfg).unwrap();
        let s1 = load_shard("t", 10, &[json!({"a": [3]}), json!({"a": []})], &cfg).unwrap();
        Table::new("t", vec![Arc::new(s1), Arc::new(s0)])
    }

    #[test]
    fn test_flatten_by_validation() {
        assert!(parse_flatten_by("a[*].b[*]").is_ok());
        assert!(parse_flatten_by("a.b[*]").is_ok());
        for bad in ["a", "a[*].b", "a[0].b[*]", "a[length]", "a[*"] {
            let err = parse_flatten_by(bad).unwrap_err();
            assert!(
                matches!(err, StrataError::Flatten(FlattenError::InvalidFlattenBy { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_flatten_table_keeps_shard_row_ids() {
        let flattener = Flattener::new(FlattenConfig::default());
        let id = FlattenId::random();
        let out = flattener.flatten_table(&table(), None, "a[*]", id).unwrap();
        assert_eq!(out.flatten_id(), id);
        assert_eq!(out.source_table(), "t");
        assert_eq!(out.name(), "t#a[*]");
        assert_eq!(out.original_first_row_ids(), &BTreeSet::from([0, 10]));
        let lowest: Vec<RowId> = out.shards().iter().map(|s| s.lowest_row_id()).collect();
        assert_eq!(lowest, vec![0, 10]);
        assert_eq!(out.table().row_count(), 3);
    }

    #[test]
    fn test_subset_of_shards() {
        let t = table();
        let subset = vec![Arc::clone(&t.shards()[1])];
        let out = Flattener::new(FlattenConfig::default())
            .flatten_table(&t, Some(&subset), "a[*]", FlattenId::random())
            .unwrap();
        assert_eq!(out.original_first_row_ids(), &BTreeSet::from([10]));
        assert_eq!(out.table().row_count(), 1);
    }

    #[test]
    fn test_flattened_table_is_rejected() {
        let flattener = Flattener::new(FlattenConfig::default());
        let out = flattener
            .flatten_table(&table(), None, "a[*]", FlattenId::random())
            .unwrap()
            .into_table();
        for by in ["a[*]", "x[*]"] {
            let err = flattener
                .flatten_table(&out, None, by, FlattenId::random())
                .unwrap_err();
            assert!(matches!(
                err,
                StrataError::Flatten(FlattenError::AlreadyFlattened { .. })
            ));
        }
    }
}
