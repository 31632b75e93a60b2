//! Serializable form of a flattened table.
//!
//! Pages are stored as plain column value ids and re-encoded on load;
//! dictionaries are stored as their ascending value lists.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use strata_common::error::StrataResult;
use strata_common::types::{ColumnValueId, FlattenId, RowId};

use crate::column::{AnyColumnShard, ColumnShard};
use crate::dictionary::Dictionary;
use crate::page::ColumnPage;
use crate::shard::TableShard;
use crate::table::FlattenedTable;
use crate::value::ColumnValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenedTableSnapshot {
    pub table_name: String,
    pub source_table: String,
    pub flatten_by: String,
    pub flatten_id: FlattenId,
    pub original_first_row_ids: Vec<RowId>,
    /// Seconds since the unix epoch.
    pub created_at_secs: u64,
    pub shards: Vec<ShardSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub table_name: String,
    pub lowest_row_id: RowId,
    pub columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub name: String,
    pub dictionary: DictionarySnapshot,
    pub pages: Vec<PageSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DictionarySnapshot {
    Long(Vec<i64>),
    String(Vec<String>),
    Double(Vec<f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub first_row_id: RowId,
    pub column_ids: Vec<ColumnValueId>,
}

impl FlattenedTableSnapshot {
    pub fn capture(table: &FlattenedTable, created_at: SystemTime) -> Self {
        Self {
            table_name: table.name().to_string(),
            source_table: table.source_table().to_string(),
            flatten_by: table.flatten_by().to_string(),
            flatten_id: table.flatten_id(),
            original_first_row_ids: table.original_first_row_ids().iter().copied().collect(),
            created_at_secs: created_at
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            shards: table.shards().iter().map(|s| capture_shard(s)).collect(),
        }
    }

    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.created_at_secs)
    }

    /// True if this snapshot was computed for exactly this validity key.
    pub fn matches(&self, source_table: &str, flatten_by: &str, original_first_row_ids: &BTreeSet<RowId>) -> bool {
        self.source_table == source_table
            && self.flatten_by == flatten_by
            && self.original_first_row_ids.len() == original_first_row_ids.len()
            && self
                .original_first_row_ids
                .iter()
                .zip(original_first_row_ids)
                .all(|(a, b)| a == b)
    }

    pub fn restore(self) -> StrataResult<FlattenedTable> {
        let mut shards = Vec::with_capacity(self.shards.len());
        for shard in self.shards {
            let columns = shard
                .columns
                .into_iter()
                .map(restore_column)
                .collect::<StrataResult<Vec<_>>>()?;
            shards.push(Arc::new(TableShard::new(shard.table_name, shard.lowest_row_id, columns)?));
        }
        Ok(FlattenedTable::new(
            self.table_name,
            shards,
            self.source_table,
            self.flatten_by,
            self.flatten_id,
            self.original_first_row_ids.into_iter().collect(),
        ))
    }
}

fn capture_shard(shard: &TableShard) -> ShardSnapshot {
    ShardSnapshot {
        table_name: shard.table_name().to_string(),
        lowest_row_id: shard.lowest_row_id(),
        columns: shard.columns().map(capture_column).collect(),
    }
}

fn capture_column(column: &AnyColumnShard) -> ColumnSnapshot {
    let dictionary = match column {
        AnyColumnShard::Long(c) => DictionarySnapshot::Long(c.dictionary().values().to_vec()),
        AnyColumnShard::String(c) => DictionarySnapshot::String(c.dictionary().values().to_vec()),
        AnyColumnShard::Double(c) => DictionarySnapshot::Double(c.dictionary().values().to_vec()),
    };
    ColumnSnapshot {
        name: column.name().to_string(),
        dictionary,
        pages: column
            .pages()
            .iter()
            .map(|p| PageSnapshot {
                first_row_id: p.first_row_id(),
                column_ids: p.column_value_ids(),
            })
            .collect(),
    }
}

fn restore_column(column: ColumnSnapshot) -> StrataResult<AnyColumnShard> {
    let pages: Vec<ColumnPage> = column
        .pages
        .iter()
        .map(|p| ColumnPage::encode(p.first_row_id, &p.column_ids))
        .collect();
    Ok(match column.dictionary {
        DictionarySnapshot::Long(v) => typed(column.name, v, pages)?,
        DictionarySnapshot::String(v) => typed(column.name, v, pages)?,
        DictionarySnapshot::Double(v) => typed(column.name, v, pages)?,
    })
}

fn typed<T: ColumnValue>(name: String, values: Vec<T>, pages: Vec<ColumnPage>) -> StrataResult<AnyColumnShard> {
    let dictionary = Dictionary::from_sorted(values)?;
    Ok(T::into_any(ColumnShard::new(name, Arc::new(dictionary), pages)))
}
