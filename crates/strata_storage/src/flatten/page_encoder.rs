//! Re-emits a subset of a page's rows as a new page.
//!
//! Strategy by the fraction of rows dropped:
//! - at most 1/3: keep the delegate values, skip dropped positions on read;
//! - at least 2/3: keep the delegate values, store the surviving positions;
//! - in between: decode the surviving rows and encode a fresh page.
//!
//! The new page translates column ids through the merge remap of its source.

use std::sync::Arc;

use strata_common::error::{StrataError, StrataResult};
use strata_common::types::RowId;
use strata_observability::record_page_strategy;

use crate::page::{ColumnPage, IdRemap, PageDictionary, PageValues};

/// Delegate-relative row positions, strictly ascending.
#[derive(Debug, Clone, Copy)]
pub enum RowSelection<'a> {
    Exclude(&'a [u32]),
    Include(&'a [u32]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    IndexRemoving,
    IndexFiltering,
    ReEncode,
}

impl PageStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStrategy::IndexRemoving => "index_removing",
            PageStrategy::IndexFiltering => "index_filtering",
            PageStrategy::ReEncode => "re_encode",
        }
    }
}

/// Pick a strategy for dropping `excluded` of `total` rows. Both bounds
/// are inclusive.
pub fn choose_strategy(excluded: usize, total: usize) -> PageStrategy {
    if excluded * 3 <= total {
        PageStrategy::IndexRemoving
    } else if excluded * 3 >= total * 2 {
        PageStrategy::IndexFiltering
    } else {
        PageStrategy::ReEncode
    }
}

/// Build the page holding the selected rows of `page`, starting at
/// `first_row_id`. Returns `None` when no row survives.
pub fn encode_page(
    page: &ColumnPage,
    first_row_id: RowId,
    selection: RowSelection<'_>,
    remap: &Arc<IdRemap>,
) -> StrataResult<Option<ColumnPage>> {
    let total = page.size();
    let positions = match selection {
        RowSelection::Exclude(p) | RowSelection::Include(p) => p,
    };
    check_positions(positions, total)?;

    let (excluded, kept) = match selection {
        RowSelection::Exclude(p) => (p.len(), total - p.len()),
        RowSelection::Include(p) => (total - p.len(), p.len()),
    };
    if kept == 0 {
        return Ok(None);
    }

    let dictionary = if remap.is_identity() {
        Arc::clone(page.dictionary())
    } else {
        Arc::new(PageDictionary::Remapped {
            delegate: Arc::clone(page.dictionary()),
            remap: Arc::clone(remap),
        })
    };

    let strategy = choose_strategy(excluded, total);
    record_page_strategy(strategy.as_str());
    let values = match strategy {
        PageStrategy::IndexRemoving if excluded == 0 => Arc::clone(page.values()),
        PageStrategy::IndexRemoving => Arc::new(PageValues::IndexRemoving {
            delegate: Arc::clone(page.values()),
            removed: excluded_positions(selection, total).into(),
        }),
        PageStrategy::IndexFiltering => Arc::new(PageValues::IndexFiltering {
            delegate: Arc::clone(page.values()),
            kept: included_positions(selection, total).into(),
        }),
        PageStrategy::ReEncode => {
            let mut ids = Vec::with_capacity(kept);
            for pos in included_positions(selection, total) {
                let id = page
                    .values()
                    .get(pos as usize)
                    .and_then(|local| dictionary.decode(local))
                    .ok_or_else(|| {
                        StrataError::internal_bug(
                            "E-PAGE-001",
                            "page value does not resolve through its dictionary",
                            format!("page_first_row={} position={}", page.first_row_id(), pos),
                        )
                    })?;
                ids.push(id);
            }
            return Ok(Some(ColumnPage::encode(first_row_id, &ids)));
        }
    };
    Ok(Some(ColumnPage::new(first_row_id, dictionary, values)))
}

fn check_positions(positions: &[u32], total: usize) -> StrataResult<()> {
    let ascending = positions.windows(2).all(|w| w[0] < w[1]);
    let in_range = positions.last().map_or(true, |&p| (p as usize) < total);
    if ascending && in_range {
        Ok(())
    } else {
        Err(StrataError::internal_bug(
            "E-PAGE-002",
            "row selection is not strictly ascending within the page",
            format!("page_rows={} selection_len={}", total, positions.len()),
        ))
    }
}

/// Positions `0..total` not in `positions` (ascending).
pub(crate) fn complement(positions: &[u32], total: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(total - positions.len());
    let mut skip = positions.iter().peekable();
    for pos in 0..total as u32 {
        if skip.peek() == Some(&&pos) {
            skip.next();
        } else {
            out.push(pos);
        }
    }
    out
}

fn excluded_positions(selection: RowSelection<'_>, total: usize) -> Vec<u32> {
    match selection {
        RowSelection::Exclude(p) => p.to_vec(),
        RowSelection::Include(p) => complement(p, total),
    }
}

fn included_positions(selection: RowSelection<'_>, total: usize) -> Vec<u32> {
    match selection {
        RowSelection::Include(p) => p.to_vec(),
        RowSelection::Exclude(p) => complement(p, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: i64) -> ColumnPage {
        ColumnPage::encode(0, &(0..n).map(|i| i * 10).collect::<Vec<_>>())
    }

    fn identity() -> Arc<IdRemap> {
        Arc::new(IdRemap::identity())
    }

    #[test]
    fn test_strategy_boundaries_are_inclusive() {
        assert_eq!(choose_strategy(0, 9), PageStrategy::IndexRemoving);
        assert_eq!(choose_strategy(3, 9), PageStrategy::IndexRemoving);
        assert_eq!(choose_strategy(4, 9), PageStrategy::ReEncode);
        assert_eq!(choose_strategy(5, 9), PageStrategy::ReEncode);
        assert_eq!(choose_strategy(6, 9), PageStrategy::IndexFiltering);
        assert_eq!(choose_strategy(9, 9), PageStrategy::IndexFiltering);
        assert_eq!(choose_strategy(1, 2), PageStrategy::ReEncode);
    }

    #[test]
    fn test_one_third_removed_uses_index_removing() {
        let p = page(6);
        let out = encode_page(&p, 100, RowSelection::Exclude(&[1, 4]), &identity())
            .unwrap()
            .unwrap();
        assert_eq!(out.values().encoding_name(), "index_removing");
        assert!(Arc::ptr_eq(out.dictionary(), p.dictionary()));
        assert_eq!(out.first_row_id(), 100);
        assert_eq!(out.column_value_ids(), vec![0, 20, 30, 50]);
    }

    #[test]
    fn test_two_thirds_removed_uses_index_filtering() {
        let p = page(6);
        let out = encode_page(&p, 0, RowSelection::Include(&[2, 5]), &identity())
            .unwrap()
            .unwrap();
        assert_eq!(out.values().encoding_name(), "index_filtering");
        assert_eq!(out.column_value_ids(), vec![20, 50]);
    }

    #[test]
    fn test_middle_fraction_re_encodes_through_remap() {
        let p = page(4);
        let mut remap = IdRemap::identity();
        remap.insert(10, 11);
        let out = encode_page(&p, 7, RowSelection::Exclude(&[0, 3]), &Arc::new(remap))
            .unwrap()
            .unwrap();
        assert_eq!(out.values().encoding_name(), "encoded");
        assert_eq!(out.column_value_ids(), vec![11, 20]);
    }

    #[test]
    fn test_no_exclusions_share_values() {
        let p = page(3);
        let mut remap = IdRemap::identity();
        remap.insert(0, 1);
        let out = encode_page(&p, 0, RowSelection::Exclude(&[]), &Arc::new(remap))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(out.values(), p.values()));
        assert_eq!(out.column_value_ids(), vec![1, 10, 20]);
    }

    #[test]
    fn test_everything_excluded_yields_none() {
        let p = page(2);
        assert!(encode_page(&p, 0, RowSelection::Include(&[]), &identity())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bad_selection_is_internal_bug() {
        let p = page(2);
        let err = encode_page(&p, 0, RowSelection::Exclude(&[5]), &identity()).unwrap_err();
        assert!(err.is_internal_bug());
        let err = encode_page(&p, 0, RowSelection::Include(&[1, 0]), &identity()).unwrap_err();
        assert!(err.is_internal_bug());
    }
}
