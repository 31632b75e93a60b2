//! Column shards: one column's dictionary plus its pages for one table shard.

use std::sync::Arc;

use strata_common::types::{ColumnType, ColumnValueId, RowId};

use crate::dictionary::Dictionary;
use crate::page::ColumnPage;
use crate::value::{ColumnValue, Value};

/// A typed column shard. Pages are ordered by first row id and contiguous.
#[derive(Debug, Clone)]
pub struct ColumnShard<T> {
    name: String,
    dictionary: Arc<Dictionary<T>>,
    pages: Vec<ColumnPage>,
}

impl<T: ColumnValue> ColumnShard<T> {
    pub fn new(name: impl Into<String>, dictionary: Arc<Dictionary<T>>, mut pages: Vec<ColumnPage>) -> Self {
        pages.sort_by_key(|p| p.first_row_id());
        Self {
            name: name.into(),
            dictionary,
            pages,
        }
    }

    /// Dictionary-encode `values` into pages of at most `max_page_rows` rows.
    pub fn from_values(
        name: impl Into<String>,
        first_row_id: RowId,
        values: Vec<T>,
        max_page_rows: usize,
    ) -> Self {
        let dictionary = Dictionary::from_unsorted(values.clone());
        let ids: Vec<ColumnValueId> = values
            .iter()
            .map(|v| dictionary.find_id(v).unwrap_or_default())
            .collect();
        let pages = ids
            .chunks(max_page_rows.max(1))
            .enumerate()
            .map(|(i, chunk)| {
                ColumnPage::encode(first_row_id + (i * max_page_rows.max(1)) as RowId, chunk)
            })
            .collect();
        Self::new(name, Arc::new(dictionary), pages)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dictionary(&self) -> &Arc<Dictionary<T>> {
        &self.dictionary
    }

    pub fn pages(&self) -> &[ColumnPage] {
        &self.pages
    }

    pub fn row_count(&self) -> u64 {
        self.pages.iter().map(|p| p.size() as u64).sum()
    }

    pub fn first_row_id(&self) -> Option<RowId> {
        self.pages.first().map(|p| p.first_row_id())
    }

    fn page_for(&self, row_id: RowId) -> Option<&ColumnPage> {
        let idx = self.pages.partition_point(|p| p.first_row_id() <= row_id);
        let page = self.pages.get(idx.checked_sub(1)?)?;
        (row_id < page.end_row_id()).then_some(page)
    }

    pub fn value_id_at(&self, row_id: RowId) -> Option<ColumnValueId> {
        let page = self.page_for(row_id)?;
        page.column_value_id((row_id - page.first_row_id()) as usize)
    }

    pub fn value_at(&self, row_id: RowId) -> Option<&T> {
        self.value_id_at(row_id)
            .and_then(|id| self.dictionary.decode(id))
    }

    /// All values in row order.
    pub fn values(&self) -> Vec<T> {
        self.pages
            .iter()
            .flat_map(|p| p.column_value_ids())
            .filter_map(|id| self.dictionary.decode(id).cloned())
            .collect()
    }

    /// Same dictionary and page data with every page moved by `delta` rows.
    pub(crate) fn shifted(&self, delta: RowId) -> Self {
        Self {
            name: self.name.clone(),
            dictionary: Arc::clone(&self.dictionary),
            pages: self
                .pages
                .iter()
                .map(|p| p.with_first_row_id(p.first_row_id() + delta))
                .collect(),
        }
    }
}

/// A column shard of any scalar type.
#[derive(Debug, Clone)]
pub enum AnyColumnShard {
    Long(ColumnShard<i64>),
    String(ColumnShard<String>),
    Double(ColumnShard<f64>),
}

/// Evaluate `$body` with `$c` bound to the typed shard inside `$shard`.
macro_rules! with_column {
    ($shard:expr, $c:ident => $body:expr) => {
        match $shard {
            AnyColumnShard::Long($c) => $body,
            AnyColumnShard::String($c) => $body,
            AnyColumnShard::Double($c) => $body,
        }
    };
}

impl AnyColumnShard {
    pub fn name(&self) -> &str {
        with_column!(self, c => c.name())
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            AnyColumnShard::Long(_) => ColumnType::Long,
            AnyColumnShard::String(_) => ColumnType::String,
            AnyColumnShard::Double(_) => ColumnType::Double,
        }
    }

    pub fn row_count(&self) -> u64 {
        with_column!(self, c => c.row_count())
    }

    pub fn first_row_id(&self) -> Option<RowId> {
        with_column!(self, c => c.first_row_id())
    }

    pub fn pages(&self) -> &[ColumnPage] {
        with_column!(self, c => c.pages())
    }

    pub fn dictionary_len(&self) -> usize {
        with_column!(self, c => c.dictionary().len())
    }

    pub fn value_at(&self, row_id: RowId) -> Option<Value> {
        with_column!(self, c => c.value_at(row_id).map(|v| v.to_value()))
    }

    pub fn long_value_at(&self, row_id: RowId) -> Option<i64> {
        match self {
            AnyColumnShard::Long(c) => c.value_at(row_id).copied(),
            _ => None,
        }
    }

    pub(crate) fn shifted(&self, delta: RowId) -> Self {
        match self {
            AnyColumnShard::Long(c) => AnyColumnShard::Long(c.shifted(delta)),
            AnyColumnShard::String(c) => AnyColumnShard::String(c.shifted(delta)),
            AnyColumnShard::Double(c) => AnyColumnShard::Double(c.shifted(delta)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_values_paginates() {
        let col = ColumnShard::from_values("c", 100, vec![5i64, 1, 5, 3, 1], 2);
        assert_eq!(col.pages().len(), 3);
        assert_eq!(col.row_count(), 5);
        assert_eq!(col.first_row_id(), Some(100));
        assert_eq!(col.pages()[2].first_row_id(), 104);
        assert_eq!(col.value_at(103), Some(&3));
        assert_eq!(col.value_at(99), None);
        assert_eq!(col.value_at(105), None);
        assert_eq!(col.values(), vec![5, 1, 5, 3, 1]);
        assert_eq!(col.dictionary().len(), 3);
    }

    #[test]
    fn test_shifted_shares_data() {
        let col = AnyColumnShard::String(ColumnShard::from_values(
            "s",
            0,
            vec!["b".to_string(), "a".to_string()],
            10,
        ));
        let moved = col.shifted(50);
        assert_eq!(moved.first_row_id(), Some(50));
        assert_eq!(moved.value_at(51), Some(Value::String("a".into())));
        assert_eq!(col.first_row_id(), Some(0));
        assert_eq!(moved.column_type(), ColumnType::String);
    }
}
