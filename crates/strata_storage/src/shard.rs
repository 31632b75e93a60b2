//! Table shards: a row range of a table, column by column.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_common::error::{StorageError, StrataResult};
use strata_common::types::RowId;

use crate::column::AnyColumnShard;
use crate::value::Value;

/// An immutable horizontal partition covering rows
/// `[lowest_row_id, lowest_row_id + row_count)`. Every column covers exactly
/// that range.
#[derive(Debug, Clone)]
pub struct TableShard {
    table_name: String,
    lowest_row_id: RowId,
    row_count: u64,
    columns: BTreeMap<String, Arc<AnyColumnShard>>,
}

impl TableShard {
    /// Assemble a shard, checking that all columns are aligned.
    pub fn new(
        table_name: impl Into<String>,
        lowest_row_id: RowId,
        columns: Vec<AnyColumnShard>,
    ) -> StrataResult<Self> {
        let row_count = columns.first().map_or(0, |c| c.row_count());
        let mut map = BTreeMap::new();
        for col in columns {
            if col.row_count() != row_count {
                return Err(StorageError::RowCountMismatch {
                    column: col.name().to_string(),
                    expected: row_count,
                    got: col.row_count(),
                }
                .into());
            }
            if let Some(first) = col.first_row_id() {
                if first != lowest_row_id {
                    return Err(StorageError::MisalignedShard {
                        column: col.name().to_string(),
                        expected: lowest_row_id,
                        got: first,
                    }
                    .into());
                }
            }
            map.insert(col.name().to_string(), Arc::new(col));
        }
        Ok(Self {
            table_name: table_name.into(),
            lowest_row_id,
            row_count,
            columns: map,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn lowest_row_id(&self) -> RowId {
        self.lowest_row_id
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn column(&self, name: &str) -> Option<&AnyColumnShard> {
        self.columns.get(name).map(|c| c.as_ref())
    }

    pub fn columns(&self) -> impl Iterator<Item = &AnyColumnShard> + '_ {
        self.columns.values().map(|c| c.as_ref())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.keys().map(|k| k.as_str())
    }

    /// All column values of one row.
    pub fn row_values(&self, row_id: RowId) -> BTreeMap<String, Value> {
        self.columns
            .iter()
            .filter_map(|(name, col)| col.value_at(row_id).map(|v| (name.clone(), v)))
            .collect()
    }

    /// All rows of the shard, in row id order.
    pub fn rows(&self) -> Vec<BTreeMap<String, Value>> {
        (0..self.row_count as RowId)
            .map(|i| self.row_values(self.lowest_row_id + i))
            .collect()
    }

    /// A private copy whose row ids can be moved. Dictionaries and page
    /// data stay shared; page headers are copied.
    pub fn to_builder(&self) -> TableShardBuilder {
        TableShardBuilder {
            table_name: self.table_name.clone(),
            original_lowest_row_id: self.lowest_row_id,
            lowest_row_id: self.lowest_row_id,
            row_count: self.row_count,
            columns: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.shifted(0)))
                .collect(),
        }
    }
}

/// Owned, not yet shared form of a shard; the only place row ids move.
#[derive(Debug)]
pub struct TableShardBuilder {
    table_name: String,
    original_lowest_row_id: RowId,
    lowest_row_id: RowId,
    row_count: u64,
    columns: BTreeMap<String, AnyColumnShard>,
}

impl TableShardBuilder {
    /// Lowest row id the shard had when the builder was created.
    pub fn original_lowest_row_id(&self) -> RowId {
        self.original_lowest_row_id
    }

    pub fn lowest_row_id(&self) -> RowId {
        self.lowest_row_id
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn set_table_name(&mut self, name: impl Into<String>) {
        self.table_name = name.into();
    }

    /// Move the whole shard so that it starts at `first_row_id`.
    pub fn set_first_row_id(&mut self, first_row_id: RowId) {
        let delta = first_row_id - self.lowest_row_id;
        if delta == 0 {
            return;
        }
        for col in self.columns.values_mut() {
            *col = col.shifted(delta);
        }
        self.lowest_row_id = first_row_id;
    }

    pub fn build(self) -> TableShard {
        TableShard {
            table_name: self.table_name,
            lowest_row_id: self.lowest_row_id,
            row_count: self.row_count,
            columns: self
                .columns
                .into_iter()
                .map(|(k, c)| (k, Arc::new(c)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnShard;
    use strata_common::error::StrataError;

    fn long_col(name: &str, first: RowId, values: Vec<i64>) -> AnyColumnShard {
        AnyColumnShard::Long(ColumnShard::from_values(name, first, values, 16))
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let err = TableShard::new(
            "t",
            0,
            vec![long_col("a", 0, vec![1, 2]), long_col("b", 0, vec![1])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StrataError::Storage(StorageError::RowCountMismatch { .. })
        ));
    }

    #[test]
    fn test_new_rejects_misaligned_columns() {
        let err = TableShard::new("t", 0, vec![long_col("a", 5, vec![1])]).unwrap_err();
        assert!(matches!(
            err,
            StrataError::Storage(StorageError::MisalignedShard { .. })
        ));
    }

    #[test]
    fn test_builder_moves_rows_without_touching_source() {
        let shard = TableShard::new(
            "t",
            10,
            vec![long_col("a", 10, vec![7, 8]), long_col("b", 10, vec![1, 2])],
        )
        .unwrap();
        let mut builder = shard.to_builder();
        builder.set_first_row_id(0);
        let moved = builder.build();
        assert_eq!(moved.lowest_row_id(), 0);
        assert_eq!(moved.row_values(1).get("a"), Some(&Value::Long(8)));
        assert_eq!(shard.lowest_row_id(), 10);
        assert_eq!(shard.row_values(11).get("a"), Some(&Value::Long(8)));
        assert!(shard.row_values(1).is_empty());
    }
}
