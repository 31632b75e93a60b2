//! Tables and flattened tables.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_common::error::{StorageError, StrataResult};
use strata_common::types::{FlattenId, RowId};

use crate::shard::{TableShard, TableShardBuilder};

/// Where a table's data came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOrigin {
    Loaded,
    Flattened {
        source_table: String,
        flatten_by: String,
        flatten_id: FlattenId,
    },
}

/// A named collection of shards, as served by one node.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    shards: Vec<Arc<TableShard>>,
    origin: TableOrigin,
}

impl Table {
    pub fn new(name: impl Into<String>, shards: Vec<Arc<TableShard>>) -> Self {
        Self::with_origin(name, shards, TableOrigin::Loaded)
    }

    fn with_origin(name: impl Into<String>, mut shards: Vec<Arc<TableShard>>, origin: TableOrigin) -> Self {
        shards.sort_by_key(|s| s.lowest_row_id());
        Self {
            name: name.into(),
            shards,
            origin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shards(&self) -> &[Arc<TableShard>] {
        &self.shards
    }

    pub fn origin(&self) -> &TableOrigin {
        &self.origin
    }

    pub fn is_flattened(&self) -> bool {
        matches!(self.origin, TableOrigin::Flattened { .. })
    }

    /// Lowest row ids of all shards: the flatten cache validity key.
    pub fn shard_first_row_ids(&self) -> BTreeSet<RowId> {
        self.shards.iter().map(|s| s.lowest_row_id()).collect()
    }

    pub fn row_count(&self) -> u64 {
        self.shards.iter().map(|s| s.row_count()).sum()
    }
}

/// The result of flattening a table.
///
/// `original_first_row_ids` holds the lowest row ids of the source shards
/// this was computed from. Together with the source table name and the
/// flatten-by field it decides whether the flattening can be reused.
#[derive(Debug, Clone)]
pub struct FlattenedTable {
    table: Table,
    source_table: String,
    flatten_by: String,
    flatten_id: FlattenId,
    original_first_row_ids: BTreeSet<RowId>,
}

impl FlattenedTable {
    pub fn new(
        table_name: impl Into<String>,
        shards: Vec<Arc<TableShard>>,
        source_table: impl Into<String>,
        flatten_by: impl Into<String>,
        flatten_id: FlattenId,
        original_first_row_ids: BTreeSet<RowId>,
    ) -> Self {
        let source_table = source_table.into();
        let flatten_by = flatten_by.into();
        let origin = TableOrigin::Flattened {
            source_table: source_table.clone(),
            flatten_by: flatten_by.clone(),
            flatten_id,
        };
        Self {
            table: Table::with_origin(table_name, shards, origin),
            source_table,
            flatten_by,
            flatten_id,
            original_first_row_ids,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn shards(&self) -> &[Arc<TableShard>] {
        self.table.shards()
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn flatten_by(&self) -> &str {
        &self.flatten_by
    }

    pub fn flatten_id(&self) -> FlattenId {
        self.flatten_id
    }

    pub fn original_first_row_ids(&self) -> &BTreeSet<RowId> {
        &self.original_first_row_ids
    }

    /// True when this flattening was computed from exactly the shards
    /// identified by `current_first_row_ids`.
    pub fn is_valid_for(&self, current_first_row_ids: &BTreeSet<RowId>) -> bool {
        &self.original_first_row_ids == current_first_row_ids
    }

    /// A fresh instance over the same data, identified by `flatten_id`.
    ///
    /// Dictionaries and compressed values are shared; shard and page headers
    /// (which carry row ids) are private to the new instance.
    pub fn rebase(&self, flatten_id: FlattenId) -> FlattenedTable {
        let shards = self
            .shards()
            .iter()
            .map(|s| Arc::new(s.to_builder().build()))
            .collect();
        FlattenedTable::new(
            self.name(),
            shards,
            self.source_table.clone(),
            self.flatten_by.clone(),
            flatten_id,
            self.original_first_row_ids.clone(),
        )
    }

    /// Take ownership of the shards so their row ids can be renumbered.
    pub fn into_builder(self) -> FlattenedTableBuilder {
        let shards = self.shards().iter().map(|s| s.to_builder()).collect();
        FlattenedTableBuilder {
            table_name: self.table.name().to_string(),
            source_table: self.source_table,
            flatten_by: self.flatten_by,
            flatten_id: self.flatten_id,
            original_first_row_ids: self.original_first_row_ids,
            shards,
        }
    }
}

/// Privately owned flattened table under row-id renumbering.
#[derive(Debug)]
pub struct FlattenedTableBuilder {
    table_name: String,
    source_table: String,
    flatten_by: String,
    flatten_id: FlattenId,
    original_first_row_ids: BTreeSet<RowId>,
    shards: Vec<TableShardBuilder>,
}

impl FlattenedTableBuilder {
    /// Move the shard that was flattened from the source shard starting at
    /// `original_lowest_row_id` so that it starts at `first_row_id`.
    pub fn set_first_row_id(&mut self, original_lowest_row_id: RowId, first_row_id: RowId) -> StrataResult<()> {
        let shard = self
            .shards
            .iter_mut()
            .find(|s| s.original_lowest_row_id() == original_lowest_row_id)
            .ok_or_else(|| StorageError::MisalignedShard {
                column: format!("<{}>", self.table_name),
                expected: original_lowest_row_id,
                got: first_row_id,
            })?;
        shard.set_first_row_id(first_row_id);
        Ok(())
    }

    /// Shard row counts keyed by original lowest row id.
    pub fn shard_row_counts(&self) -> Vec<(RowId, u64)> {
        self.shards
            .iter()
            .map(|s| (s.original_lowest_row_id(), s.row_count()))
            .collect()
    }

    pub fn build(self) -> FlattenedTable {
        let shards = self
            .shards
            .into_iter()
            .map(|s| Arc::new(s.build()))
            .collect();
        FlattenedTable::new(
            self.table_name,
            shards,
            self.source_table,
            self.flatten_by,
            self.flatten_id,
            self.original_first_row_ids,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{AnyColumnShard, ColumnShard};
    use crate::value::Value;

    fn shard(lowest: RowId, values: Vec<i64>) -> Arc<TableShard> {
        let col = AnyColumnShard::Long(ColumnShard::from_values("x", lowest, values, 8));
        Arc::new(TableShard::new("f", lowest, vec![col]).unwrap())
    }

    fn flattened() -> FlattenedTable {
        FlattenedTable::new(
            "f",
            vec![shard(10, vec![3]), shard(0, vec![1, 2])],
            "t",
            "a[*]",
            FlattenId::random(),
            [0, 10].into_iter().collect(),
        )
    }

    #[test]
    fn test_validity_key() {
        let f = flattened();
        assert!(f.table().is_flattened());
        assert_eq!(f.shards()[0].lowest_row_id(), 0);
        assert!(f.is_valid_for(&[0, 10].into_iter().collect()));
        assert!(!f.is_valid_for(&[0, 3, 10].into_iter().collect()));
    }

    #[test]
    fn test_rebase_and_renumber_leave_original_intact() {
        let f = flattened();
        let id = FlattenId::random();
        let mut b = f.rebase(id).into_builder();
        b.set_first_row_id(0, 100).unwrap();
        b.set_first_row_id(10, 102).unwrap();
        assert!(b.set_first_row_id(7, 0).is_err());
        let renumbered = b.build();
        assert_eq!(renumbered.flatten_id(), id);
        assert_eq!(
            renumbered.shards()[1].row_values(102).get("x"),
            Some(&Value::Long(3))
        );
        assert_eq!(f.shards()[1].lowest_row_id(), 10);
        assert_eq!(f.shards()[0].row_values(1).get("x"), Some(&Value::Long(2)));
    }
}
