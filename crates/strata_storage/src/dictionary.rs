//! Column dictionaries: dense ids `0..len` over values kept in ascending
//! order, so `id(a) < id(b)` iff `a < b`.

use std::cmp::Ordering;

use strata_common::error::{StrataError, StrataResult};
use strata_common::types::ColumnValueId;

use crate::value::ColumnValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Dictionary<T> {
    /// Strictly ascending values; a value's id is its position.
    Array(Vec<T>),
    /// Exactly one value with id 0.
    Constant(T),
}

impl<T: ColumnValue> Dictionary<T> {
    pub fn empty() -> Self {
        Dictionary::Array(Vec::new())
    }

    pub fn constant(value: T) -> Self {
        Dictionary::Constant(value)
    }

    /// Build from values that must already be strictly ascending.
    pub fn from_sorted(values: Vec<T>) -> StrataResult<Self> {
        let mut builder = DictionaryBuilder::with_capacity(values.len());
        for v in values {
            builder.push(v)?;
        }
        Ok(builder.build())
    }

    /// Build from arbitrary values: sorts and removes duplicates.
    pub fn from_unsorted(mut values: Vec<T>) -> Self {
        values.sort_by(|a, b| a.compare(b));
        values.dedup_by(|a, b| a.compare(b) == Ordering::Equal);
        Dictionary::Array(values)
    }

    pub fn values(&self) -> &[T] {
        match self {
            Dictionary::Array(v) => v,
            Dictionary::Constant(v) => std::slice::from_ref(v),
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest id, `None` for an empty dictionary.
    pub fn max_id(&self) -> Option<ColumnValueId> {
        self.len().checked_sub(1).map(|m| m as ColumnValueId)
    }

    pub fn decode(&self, id: ColumnValueId) -> Option<&T> {
        usize::try_from(id).ok().and_then(|i| self.values().get(i))
    }

    pub fn find_id(&self, value: &T) -> Option<ColumnValueId> {
        self.values()
            .binary_search_by(|probe| probe.compare(value))
            .ok()
            .map(|i| i as ColumnValueId)
    }

    /// Ordered iteration over `(id, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (ColumnValueId, &T)> + '_ {
        self.values()
            .iter()
            .enumerate()
            .map(|(i, v)| (i as ColumnValueId, v))
    }
}

/// Appends values in ascending order, handing out consecutive ids.
pub struct DictionaryBuilder<T> {
    values: Vec<T>,
}

impl<T: ColumnValue> DictionaryBuilder<T> {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            values: Vec::with_capacity(cap),
        }
    }

    pub fn last(&self) -> Option<&T> {
        self.values.last()
    }

    /// Append `value`, returning its id. Values must arrive strictly
    /// ascending; anything else would renumber existing ids.
    pub fn push(&mut self, value: T) -> StrataResult<ColumnValueId> {
        if let Some(last) = self.values.last() {
            if last.compare(&value) != Ordering::Less {
                return Err(StrataError::internal_bug(
                    "E-DICT-001",
                    "dictionary values arrived out of order",
                    format!("last={:?} next={:?}", last, value),
                ));
            }
        }
        self.values.push(value);
        Ok((self.values.len() - 1) as ColumnValueId)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn build(self) -> Dictionary<T> {
        Dictionary::Array(self.values)
    }
}

impl<T: ColumnValue> Default for DictionaryBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_and_decode() {
        let d = Dictionary::from_unsorted(vec![5i64, 1, 3, 5, 1]);
        assert_eq!(d.values(), &[1, 3, 5]);
        assert_eq!(d.find_id(&3), Some(1));
        assert_eq!(d.find_id(&4), None);
        assert_eq!(d.decode(2), Some(&5));
        assert_eq!(d.decode(3), None);
        assert_eq!(d.decode(-1), None);
        assert_eq!(d.max_id(), Some(2));
    }

    #[test]
    fn test_constant_dictionary() {
        let d = Dictionary::constant("x".to_string());
        assert_eq!(d.len(), 1);
        assert_eq!(d.find_id(&"x".to_string()), Some(0));
        assert_eq!(d.iter().collect::<Vec<_>>(), vec![(0, &"x".to_string())]);
    }

    #[test]
    fn test_double_ordering_is_total() {
        let d = Dictionary::from_unsorted(vec![2.5f64, -1.0, 0.0, 2.5]);
        assert_eq!(d.values(), &[-1.0, 0.0, 2.5]);
        assert_eq!(d.find_id(&0.0), Some(1));
    }

    #[test]
    fn test_builder_rejects_out_of_order() {
        let mut b = DictionaryBuilder::new();
        assert_eq!(b.push(1i64).unwrap(), 0);
        assert_eq!(b.push(4i64).unwrap(), 1);
        let err = b.push(4i64).unwrap_err();
        assert!(err.is_internal_bug());
        assert!(Dictionary::from_sorted(vec![3i64, 2]).is_err());
    }
}
