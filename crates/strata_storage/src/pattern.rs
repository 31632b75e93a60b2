//! Realized index patterns of a row.
//!
//! For a chain of repeated prefixes (`a[*]`, `a[*].b[*]`) the resolver reads
//! the length columns of one row and enumerates the concrete index tuples
//! that exist at each level: `a[length] = 2`, `a[0].b[length] = 1`,
//! `a[1].b[length] = 0` gives `[[0], [1]]` for `a[*]` and `[[0, 0]]` for
//! `a[*].b[*]`.

use strata_common::error::PatternError;

use crate::repeated::FieldPath;

/// Index tuples realized by one row, one list per prefix level, most
/// specific level first. Tuples within a level are in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizedPatterns {
    levels: Vec<Vec<Vec<u32>>>,
}

impl RealizedPatterns {
    pub fn levels(&self) -> &[Vec<Vec<u32>>] {
        &self.levels
    }

    /// Tuples of the most specific (flatten-by) level.
    pub fn leaf(&self) -> &[Vec<u32>] {
        self.levels.first().map_or(&[], |l| l.as_slice())
    }

    /// Number of output rows this row turns into.
    pub fn multiplication_factor(&self) -> usize {
        self.leaf().len()
    }

    pub fn into_leaf(mut self) -> Vec<Vec<u32>> {
        if self.levels.is_empty() {
            Vec::new()
        } else {
            self.levels.swap_remove(0)
        }
    }
}

/// Resolve the realized patterns of one row.
///
/// `prefixes` are ordered root first. `length_of` returns the value of the
/// named length column for the row, or `None` if no such column exists.
/// Negative lengths count as empty.
pub fn resolve_row<F>(prefixes: &[FieldPath], length_of: F) -> Result<RealizedPatterns, PatternError>
where
    F: Fn(&str) -> Option<i64>,
{
    let mut levels: Vec<Vec<Vec<u32>>> = Vec::with_capacity(prefixes.len());
    let mut parents: Vec<Vec<u32>> = vec![Vec::new()];
    for prefix in prefixes {
        let mut realized = Vec::new();
        for parent in &parents {
            let column = prefix.with_indices(parent).length_column().to_string();
            let len = length_of(&column).ok_or(PatternError::MissingLengthColumn { column })?;
            for i in 0..len.max(0) as u32 {
                let mut tuple = parent.clone();
                tuple.push(i);
                realized.push(tuple);
            }
        }
        levels.push(realized.clone());
        parents = realized;
    }
    levels.reverse();
    Ok(RealizedPatterns { levels })
}
