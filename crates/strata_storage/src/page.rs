//! Column pages: a contiguous row range `[first_row_id, first_row_id + size)`
//! storing page-local ids plus a page dictionary translating them into
//! column value ids.
//!
//! Values and dictionaries are `Arc`-shared and never mutated; a page built
//! from another page (flattening) wraps the delegate's structures with
//! index adapters and id-remapping facades instead of copying them.

use std::collections::HashMap;
use std::sync::Arc;

use strata_common::types::{ColumnValueId, RowId};

use crate::ids::CompressedIds;

/// Old-id → new-id translation produced by a dictionary merge.
///
/// Only ids that change are stored; every other id maps to itself, so the
/// empty remap is the identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdRemap {
    changed: HashMap<ColumnValueId, ColumnValueId>,
}

impl IdRemap {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: ColumnValueId, new: ColumnValueId) {
        if old != new {
            self.changed.insert(old, new);
        }
    }

    pub fn map(&self, id: ColumnValueId) -> ColumnValueId {
        self.changed.get(&id).copied().unwrap_or(id)
    }

    pub fn is_identity(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn changed_len(&self) -> usize {
        self.changed.len()
    }
}

/// Page-local id → column value id.
#[derive(Debug, Clone)]
pub enum PageDictionary {
    /// Ascending column ids; the page-local id is the position.
    Plain(Arc<[ColumnValueId]>),
    /// A delegate dictionary whose results are translated through `remap`.
    Remapped {
        delegate: Arc<PageDictionary>,
        remap: Arc<IdRemap>,
    },
    /// Single entry: page-local id 0.
    Constant(ColumnValueId),
}

impl PageDictionary {
    pub fn len(&self) -> usize {
        match self {
            PageDictionary::Plain(ids) => ids.len(),
            PageDictionary::Remapped { delegate, .. } => delegate.len(),
            PageDictionary::Constant(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn decode(&self, page_id: i64) -> Option<ColumnValueId> {
        match self {
            PageDictionary::Plain(ids) => usize::try_from(page_id)
                .ok()
                .and_then(|i| ids.get(i))
                .copied(),
            PageDictionary::Remapped { delegate, remap } => {
                delegate.decode(page_id).map(|id| remap.map(id))
            }
            PageDictionary::Constant(id) => (page_id == 0).then_some(*id),
        }
    }
}

/// Per-row page-local ids.
#[derive(Debug, Clone)]
pub enum PageValues {
    Encoded(Arc<CompressedIds>),
    /// Delegate minus the (ascending) positions in `removed`.
    IndexRemoving {
        delegate: Arc<PageValues>,
        removed: Arc<[u32]>,
    },
    /// Only the (ascending) delegate positions in `kept`.
    IndexFiltering {
        delegate: Arc<PageValues>,
        kept: Arc<[u32]>,
    },
    /// `len` rows, all page-local id 0.
    Constant { len: u32 },
}

impl PageValues {
    pub fn len(&self) -> usize {
        match self {
            PageValues::Encoded(ids) => ids.len(),
            PageValues::IndexRemoving { delegate, removed } => delegate.len() - removed.len(),
            PageValues::IndexFiltering { kept, .. } => kept.len(),
            PageValues::Constant { len } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<i64> {
        if idx >= self.len() {
            return None;
        }
        match self {
            PageValues::Encoded(ids) => ids.get(idx),
            PageValues::IndexRemoving { delegate, removed } => {
                delegate.get(idx + removed_before(removed, idx))
            }
            PageValues::IndexFiltering { delegate, kept } => {
                kept.get(idx).and_then(|&p| delegate.get(p as usize))
            }
            PageValues::Constant { .. } => Some(0),
        }
    }

    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            PageValues::Encoded(ids) => ids.to_vec(),
            PageValues::Constant { len } => vec![0; *len as usize],
            _ => (0..self.len()).filter_map(|i| self.get(i)).collect(),
        }
    }

    pub fn encoding_name(&self) -> &'static str {
        match self {
            PageValues::Encoded(_) => "encoded",
            PageValues::IndexRemoving { .. } => "index_removing",
            PageValues::IndexFiltering { .. } => "index_filtering",
            PageValues::Constant { .. } => "constant",
        }
    }
}

/// Number of removed delegate positions that precede the `idx`-th kept one.
///
/// `removed[j] - j` counts the kept positions before `removed[j]` and is
/// non-decreasing, so a binary search finds the answer.
fn removed_before(removed: &[u32], idx: usize) -> usize {
    let (mut lo, mut hi) = (0usize, removed.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if removed[mid] as usize - mid <= idx {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// One page of a column shard.
#[derive(Debug, Clone)]
pub struct ColumnPage {
    first_row_id: RowId,
    dictionary: Arc<PageDictionary>,
    values: Arc<PageValues>,
}

impl ColumnPage {
    pub fn new(first_row_id: RowId, dictionary: Arc<PageDictionary>, values: Arc<PageValues>) -> Self {
        Self {
            first_row_id,
            dictionary,
            values,
        }
    }

    /// Encode a page from per-row column value ids.
    pub fn encode(first_row_id: RowId, column_ids: &[ColumnValueId]) -> Self {
        let mut distinct = column_ids.to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        let local: Vec<i64> = column_ids
            .iter()
            .map(|id| distinct.partition_point(|d| d < id) as i64)
            .collect();
        Self {
            first_row_id,
            dictionary: Arc::new(PageDictionary::Plain(distinct.into())),
            values: Arc::new(PageValues::Encoded(Arc::new(CompressedIds::encode(&local)))),
        }
    }

    /// A page of `len` rows all holding `column_id`.
    pub fn constant(first_row_id: RowId, len: u32, column_id: ColumnValueId) -> Self {
        Self {
            first_row_id,
            dictionary: Arc::new(PageDictionary::Constant(column_id)),
            values: Arc::new(PageValues::Constant { len }),
        }
    }

    pub fn first_row_id(&self) -> RowId {
        self.first_row_id
    }

    /// Exclusive end of the row range.
    pub fn end_row_id(&self) -> RowId {
        self.first_row_id + self.size() as RowId
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn dictionary(&self) -> &Arc<PageDictionary> {
        &self.dictionary
    }

    pub fn values(&self) -> &Arc<PageValues> {
        &self.values
    }

    /// Column value id of the row at page position `idx`.
    pub fn column_value_id(&self, idx: usize) -> Option<ColumnValueId> {
        self.values
            .get(idx)
            .and_then(|page_id| self.dictionary.decode(page_id))
    }

    /// Column value ids of all rows, in row order.
    pub fn column_value_ids(&self) -> Vec<ColumnValueId> {
        self.values
            .to_vec()
            .into_iter()
            .filter_map(|page_id| self.dictionary.decode(page_id))
            .collect()
    }

    /// Same data, different row range start. Shares all `Arc`s.
    pub(crate) fn with_first_row_id(&self, first_row_id: RowId) -> Self {
        Self {
            first_row_id,
            dictionary: Arc::clone(&self.dictionary),
            values: Arc::clone(&self.values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_builds_sorted_page_dictionary() {
        let page = ColumnPage::encode(10, &[7, 3, 7, 9]);
        assert_eq!(page.size(), 4);
        assert_eq!(page.end_row_id(), 14);
        assert_eq!(page.dictionary().len(), 3);
        assert_eq!(page.column_value_ids(), vec![7, 3, 7, 9]);
        assert_eq!(page.column_value_id(3), Some(9));
        assert_eq!(page.column_value_id(4), None);
    }

    #[test]
    fn test_index_removing_skips_positions() {
        let base = Arc::new(PageValues::Encoded(Arc::new(CompressedIds::encode(&[
            10, 11, 12, 13, 14, 15,
        ]))));
        let v = PageValues::IndexRemoving {
            delegate: base,
            removed: vec![0u32, 2, 3].into(),
        };
        assert_eq!(v.len(), 3);
        assert_eq!(v.to_vec(), vec![11, 14, 15]);
        assert_eq!(v.get(3), None);
    }

    #[test]
    fn test_index_filtering_keeps_positions() {
        let base = Arc::new(PageValues::Encoded(Arc::new(CompressedIds::encode(&[
            10, 11, 12, 13,
        ]))));
        let v = PageValues::IndexFiltering {
            delegate: base,
            kept: vec![1u32, 3].into(),
        };
        assert_eq!(v.to_vec(), vec![11, 13]);
    }

    #[test]
    fn test_remapped_dictionary() {
        let mut remap = IdRemap::identity();
        remap.insert(3, 5);
        remap.insert(7, 7);
        assert_eq!(remap.changed_len(), 1);
        let dict = PageDictionary::Remapped {
            delegate: Arc::new(PageDictionary::Plain(vec![3, 7].into())),
            remap: Arc::new(remap),
        };
        assert_eq!(dict.decode(0), Some(5));
        assert_eq!(dict.decode(1), Some(7));
        assert_eq!(dict.decode(2), None);
    }

    #[test]
    fn test_constant_page() {
        let page = ColumnPage::constant(0, 3, 42);
        assert_eq!(page.column_value_ids(), vec![42, 42, 42]);
        let moved = page.with_first_row_id(100);
        assert_eq!(moved.first_row_id(), 100);
        assert_eq!(page.first_row_id(), 0);
    }
}
