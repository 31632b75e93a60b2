//! K-way dictionary merge.
//!
//! Several ascending dictionaries are merged into one ascending, dense
//! dictionary. Equal values from different sources share one output id.
//! Every source gets an [`IdRemap`] from its own ids to the merged ids.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use strata_common::error::StrataResult;
use strata_common::types::ColumnValueId;

use crate::dictionary::{Dictionary, DictionaryBuilder};
use crate::page::IdRemap;
use crate::value::ColumnValue;

/// Result of [`merge_dictionaries`].
#[derive(Debug)]
pub struct MergedDictionary<K, T> {
    pub dictionary: Arc<Dictionary<T>>,
    remaps: BTreeMap<K, Arc<IdRemap>>,
}

impl<K: Ord, T> MergedDictionary<K, T> {
    /// Remap of source `key`. Sources that need no remapping (and unknown
    /// keys) get the identity.
    pub fn remap(&self, key: &K) -> Arc<IdRemap> {
        self.remaps
            .get(key)
            .cloned()
            .unwrap_or_else(|| Arc::new(IdRemap::identity()))
    }

    /// Only sources whose ids actually change.
    pub fn changed_remaps(&self) -> impl Iterator<Item = (&K, &Arc<IdRemap>)> {
        self.remaps.iter().filter(|(_, r)| !r.is_identity())
    }
}

/// Cursor of one source inside the merge heap. Ordered so that the heap
/// (a max-heap) yields the smallest value first, ties by source order.
struct Cursor<'a, T> {
    value: &'a T,
    source: usize,
    position: usize,
}

impl<T: ColumnValue> Ord for Cursor<'_, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .value
            .compare(self.value)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl<T: ColumnValue> PartialOrd for Cursor<'_, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ColumnValue> PartialEq for Cursor<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: ColumnValue> Eq for Cursor<'_, T> {}

/// Merge `sources` into one dictionary.
///
/// A single source is returned as-is (same `Arc`) with no remaps.
pub fn merge_dictionaries<K, T>(sources: BTreeMap<K, Arc<Dictionary<T>>>) -> StrataResult<MergedDictionary<K, T>>
where
    K: Ord + Clone,
    T: ColumnValue,
{
    if sources.len() <= 1 {
        let dictionary = sources
            .into_values()
            .next()
            .unwrap_or_else(|| Arc::new(Dictionary::empty()));
        return Ok(MergedDictionary {
            dictionary,
            remaps: BTreeMap::new(),
        });
    }

    let keys: Vec<K> = sources.keys().cloned().collect();
    let dicts: Vec<Arc<Dictionary<T>>> = sources.into_values().collect();
    let capacity = dicts.iter().map(|d| d.len()).max().unwrap_or(0);

    let mut heap = BinaryHeap::with_capacity(dicts.len());
    for (source, dict) in dicts.iter().enumerate() {
        if let Some(value) = dict.values().first() {
            heap.push(Cursor {
                value,
                source,
                position: 0,
            });
        }
    }

    let mut builder: DictionaryBuilder<T> = DictionaryBuilder::with_capacity(capacity);
    let mut remaps: Vec<IdRemap> = vec![IdRemap::identity(); dicts.len()];
    let mut last_id: ColumnValueId = -1;
    while let Some(Cursor {
        value,
        source,
        position,
    }) = heap.pop()
    {
        let duplicate = builder
            .last()
            .is_some_and(|last: &T| last.compare(value) == Ordering::Equal);
        if !duplicate {
            last_id = builder.push(value.clone())?;
        }
        remaps[source].insert(position as ColumnValueId, last_id);
        if let Some(next) = dicts[source].values().get(position + 1) {
            heap.push(Cursor {
                value: next,
                source,
                position: position + 1,
            });
        }
    }

    Ok(MergedDictionary {
        dictionary: Arc::new(builder.build()),
        remaps: keys
            .into_iter()
            .zip(remaps)
            .map(|(k, r)| (k, Arc::new(r)))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict<T: ColumnValue>(values: Vec<T>) -> Arc<Dictionary<T>> {
        Arc::new(Dictionary::from_unsorted(values))
    }

    #[test]
    fn test_single_source_is_returned_unchanged() {
        let d = dict(vec![3i64, 1, 2]);
        let merged = merge_dictionaries([("only", Arc::clone(&d))].into_iter().collect()).unwrap();
        assert!(Arc::ptr_eq(&merged.dictionary, &d));
        assert!(merged.remap(&"only").is_identity());
        assert_eq!(merged.changed_remaps().count(), 0);
    }

    #[test]
    fn test_same_dictionary_twice_collapses() {
        let d = dict(vec!["x".to_string(), "y".to_string()]);
        let merged = merge_dictionaries([(0, Arc::clone(&d)), (1, d)].into_iter().collect()).unwrap();
        assert_eq!(merged.dictionary.len(), 2);
        assert!(merged.remap(&0).is_identity());
        assert!(merged.remap(&1).is_identity());
    }

    #[test]
    fn test_interleaved_sources_are_sorted_and_remapped() {
        let a = dict(vec![1i64, 5, 9]);
        let b = dict(vec![2i64, 5]);
        let c = dict(vec![0i64]);
        let merged =
            merge_dictionaries([(0usize, a), (1, b), (2, c)].into_iter().collect()).unwrap();
        assert_eq!(merged.dictionary.values(), &[0, 1, 2, 5, 9]);
        let ra = merged.remap(&0);
        assert_eq!((ra.map(0), ra.map(1), ra.map(2)), (1, 3, 4));
        let rb = merged.remap(&1);
        assert_eq!((rb.map(0), rb.map(1)), (2, 3));
        assert!(merged.remap(&2).is_identity());
    }

    #[test]
    fn test_doubles_and_constants_merge() {
        let a = Arc::new(Dictionary::constant(0.0f64));
        let b = dict(vec![-1.5f64, 0.0, 3.25]);
        let merged = merge_dictionaries([(0, a), (1, b)].into_iter().collect()).unwrap();
        assert_eq!(merged.dictionary.values(), &[-1.5, 0.0, 3.25]);
        assert_eq!(merged.remap(&0).map(0), 1);
    }

    #[test]
    fn test_no_sources() {
        let merged = merge_dictionaries::<usize, String>(BTreeMap::new()).unwrap();
        assert!(merged.dictionary.is_empty());
    }
}
