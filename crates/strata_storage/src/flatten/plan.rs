//! Row layout and column classification of one shard flattening.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use strata_common::error::{FlattenError, StrataError, StrataResult};
use strata_common::types::{ColumnType, RowId};

use crate::pattern::resolve_row;
use crate::repeated::FieldPath;
use crate::shard::TableShard;

/// Consecutive rows of one pass that read from the same leaf instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Run {
    /// Index into [`RowLayout::leaves`].
    pub source: usize,
    /// Slice of the pass's row list.
    pub rows: Range<usize>,
}

/// Where every output row comes from.
///
/// Output rows are emitted pass by pass: pass `k` holds the `k`-th realized
/// leaf entry of every row that has more than `k` entries, in ascending
/// row id order. Every output column follows this same order, which keeps
/// sibling columns aligned.
#[derive(Debug)]
pub(crate) struct RowLayout {
    leaves: Vec<Vec<u32>>,
    pass_rows: Vec<Vec<RowId>>,
    runs: Vec<Vec<Run>>,
    input_rows: u64,
}

impl RowLayout {
    /// Resolve the realized leaf entries of every row of `shard`.
    /// `prefixes` are the repeated prefixes of the flatten-by field, root first.
    pub fn build(shard: &TableShard, prefixes: &[FieldPath]) -> StrataResult<Self> {
        let lowest = shard.lowest_row_id();
        let rows = shard.row_count() as usize;
        // No row of the shard has the root field: every factor is 0.
        let root_absent = prefixes.first().is_some_and(|root| {
            let length = root.with_indices(&[]).length_column().to_string();
            shard.column(&length).is_none()
        });
        let mut per_row: Vec<Vec<Vec<u32>>> = Vec::with_capacity(rows);
        if root_absent {
            per_row.resize(rows, Vec::new());
        } else {
            for offset in 0..rows as RowId {
                let row_id = lowest + offset;
                let realized = resolve_row(prefixes, |name| {
                    shard.column(name).and_then(|c| c.long_value_at(row_id))
                })?;
                per_row.push(realized.into_leaf());
            }
        }

        let leaves: Vec<Vec<u32>> = per_row
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let leaf_index: BTreeMap<&[u32], usize> = leaves
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_slice(), i))
            .collect();

        let max_factor = per_row.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut pass_rows = Vec::with_capacity(max_factor);
        let mut runs = Vec::with_capacity(max_factor);
        for k in 0..max_factor {
            let mut rows: Vec<RowId> = Vec::new();
            let mut pass_runs: Vec<Run> = Vec::new();
            for (offset, tuples) in per_row.iter().enumerate() {
                let Some(tuple) = tuples.get(k) else { continue };
                let source = leaf_index.get(tuple.as_slice()).copied().ok_or_else(|| {
                    StrataError::internal_bug(
                        "E-FLAT-003",
                        "realized leaf missing from the leaf index",
                        format!("row={} leaf={:?}", lowest + offset as RowId, tuple),
                    )
                })?;
                match pass_runs.last_mut() {
                    Some(run) if run.source == source => run.rows.end += 1,
                    _ => pass_runs.push(Run {
                        source,
                        rows: rows.len()..rows.len() + 1,
                    }),
                }
                rows.push(lowest + offset as RowId);
            }
            pass_rows.push(rows);
            runs.push(pass_runs);
        }

        Ok(Self {
            leaves,
            pass_rows,
            runs,
            input_rows: shard.row_count(),
        })
    }

    /// Every leaf index tuple realized by at least one row, ascending.
    pub fn leaves(&self) -> &[Vec<u32>] {
        &self.leaves
    }

    pub fn passes(&self) -> usize {
        self.pass_rows.len()
    }

    pub fn pass_rows(&self, pass: usize) -> &[RowId] {
        &self.pass_rows[pass]
    }

    pub fn runs(&self, pass: usize) -> &[Run] {
        &self.runs[pass]
    }

    pub fn input_rows(&self) -> u64 {
        self.input_rows
    }

    /// Sum of all multiplication factors.
    pub fn output_rows(&self) -> u64 {
        self.pass_rows.iter().map(|p| p.len() as u64).sum()
    }
}

/// What happens to one output column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColumnPlan {
    /// Unrolled from the leaf instances: `sources[i]` is the input column
    /// read for leaf `i` (it may not exist in the shard).
    Flattened {
        output: String,
        column_type: ColumnType,
        is_length: bool,
        sources: Vec<String>,
    },
    /// Input value repeated once per output row of its input row.
    Multiplicating { name: String },
}

impl ColumnPlan {
    pub fn output_name(&self) -> &str {
        match self {
            ColumnPlan::Flattened { output, .. } => output,
            ColumnPlan::Multiplicating { name } => name,
        }
    }
}

/// Classify every column of `shard`.
///
/// Length columns of the flattened prefixes are dropped. Columns under the
/// leaf prefix are flattened and lose the indices of the prefix
/// (`a[1].b[0].c` by `a[*].b[*]` is `a.b.c`). Everything else multiplicates.
pub(crate) fn classify_columns(
    shard: &TableShard,
    prefixes: &[FieldPath],
    layout: &RowLayout,
) -> StrataResult<Vec<ColumnPlan>> {
    let Some(leaf) = prefixes.last() else {
        return Ok(Vec::new());
    };
    let stripped_leaf = leaf.strip(leaf.len());

    let mut flattened: BTreeMap<String, (FieldPath, ColumnType)> = BTreeMap::new();
    let mut multiplicating: Vec<String> = Vec::new();
    for column in shard.columns() {
        let path = FieldPath::parse(column.name())?;
        if prefixes.iter().any(|p| path.is_length_column_of(p)) {
            continue;
        }
        let Some((_, rest)) = path.match_prefix(leaf) else {
            multiplicating.push(column.name().to_string());
            continue;
        };
        let output = stripped_leaf.join(&rest).to_string();
        match flattened.get(&output) {
            Some((_, expected)) if *expected != column.column_type() => {
                return Err(FlattenError::ColumnTypeConflict {
                    column: output,
                    expected: *expected,
                    got: column.column_type(),
                }
                .into());
            }
            Some(_) => {}
            None => {
                flattened.insert(output, (rest, column.column_type()));
            }
        }
    }

    let mut plans = Vec::with_capacity(flattened.len() + multiplicating.len());
    for name in multiplicating {
        if flattened.contains_key(&name) {
            return Err(FlattenError::InvalidFlattenBy {
                flatten_by: leaf.to_string(),
                reason: format!("flattened column '{}' collides with an existing column", name),
            }
            .into());
        }
        plans.push(ColumnPlan::Multiplicating { name });
    }
    for (output, (rest, column_type)) in flattened {
        let sources = layout
            .leaves()
            .iter()
            .map(|t| leaf.with_indices(t).join(&rest).to_string())
            .collect();
        plans.push(ColumnPlan::Flattened {
            output,
            column_type,
            is_length: rest.is_length_column(),
            sources,
        });
    }
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_shard;
    use serde_json::json;
    use strata_common::config::FlattenConfig;

    fn prefixes(s: &str) -> Vec<FieldPath> {
        FieldPath::parse(s).unwrap().repeated_prefixes()
    }

    #[test]
    fn test_layout_passes_and_runs() {
        let docs = vec![
            json!({"a": [1, 2]}),
            json!({"a": []}),
            json!({"a": [3]}),
            json!({"a": [4, 5, 6]}),
        ];
        let shard = load_shard("t", 10, &docs, &FlattenConfig::default()).unwrap();
        let layout = RowLayout::build(&shard, &prefixes("a[*]")).unwrap();
        assert_eq!(layout.leaves(), &[vec![0], vec![1], vec![2]]);
        assert_eq!(layout.passes(), 3);
        assert_eq!(layout.pass_rows(0), &[10, 12, 13]);
        assert_eq!(layout.pass_rows(1), &[10, 13]);
        assert_eq!(layout.pass_rows(2), &[13]);
        assert_eq!(layout.runs(1), &[Run { source: 1, rows: 0..2 }]);
        assert_eq!(layout.output_rows(), 6);
        assert_eq!(layout.input_rows(), 4);
    }

    #[test]
    fn test_nested_runs_split_on_leaf_change() {
        let docs = vec![
            json!({"a": [{"b": [1]}, {"b": [2]}]}),
            json!({"a": [{"b": []}, {"b": [3]}]}),
        ];
        let shard = load_shard("t", 0, &docs, &FlattenConfig::default()).unwrap();
        let layout = RowLayout::build(&shard, &prefixes("a[*].b[*]")).unwrap();
        assert_eq!(layout.leaves(), &[vec![0, 0], vec![1, 0]]);
        assert_eq!(layout.pass_rows(0), &[0, 1]);
        assert_eq!(
            layout.runs(0),
            &[Run { source: 0, rows: 0..1 }, Run { source: 1, rows: 1..2 }]
        );
    }

    #[test]
    fn test_classification() {
        let docs = vec![json!({"a": [{"b": 1, "c": "x"}, {"b": 2}], "d": 9})];
        let shard = load_shard("t", 0, &docs, &FlattenConfig::default()).unwrap();
        let p = prefixes("a[*]");
        let layout = RowLayout::build(&shard, &p).unwrap();
        let plans = classify_columns(&shard, &p, &layout).unwrap();
        let names: Vec<&str> = plans.iter().map(|c| c.output_name()).collect();
        assert_eq!(names, vec!["d", "a.b", "a.c"]);
        match &plans[2] {
            ColumnPlan::Flattened { sources, column_type, .. } => {
                assert_eq!(sources, &vec!["a[0].c".to_string(), "a[1].c".to_string()]);
                assert_eq!(*column_type, ColumnType::String);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_type_conflict_between_instances() {
        let docs = vec![json!({"a": [{"b": 1}, {"b": "two"}]})];
        let shard = load_shard("t", 0, &docs, &FlattenConfig::default()).unwrap();
        let p = prefixes("a[*]");
        let layout = RowLayout::build(&shard, &p).unwrap();
        let err = classify_columns(&shard, &p, &layout).unwrap_err();
        assert!(err.is_user_error());
    }
}
