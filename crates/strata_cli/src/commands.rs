use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value as Json;
use strata_common::config::StrataConfig;
use strata_common::types::FlattenId;
use strata_storage::loader::load_shards;
use strata_storage::{FlattenCacheManager, Table, TableShard};
use tracing::info;

use crate::args::{FlattenArgs, InputArgs};

/// Accepts a JSON array of objects or newline-delimited objects.
fn read_docs(path: &Path) -> Result<Vec<Json>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read input: {}", path.display()))?;
    if text.trim_start().starts_with('[') {
        let docs: Vec<Json> = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON array in {}", path.display()))?;
        return Ok(docs);
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid JSON row", path.display(), n + 1))
        })
        .collect()
}

fn load_table(input: &InputArgs, config: &StrataConfig) -> Result<Table> {
    let docs = read_docs(&input.input)?;
    let shards = load_shards(&input.table, &docs, input.shard_rows, &config.flatten)?;
    info!(table = %input.table, rows = docs.len(), shards = shards.len(), "loaded input");
    Ok(Table::new(input.table.clone(), shards.into_iter().map(Arc::new).collect()))
}

pub fn run_flatten(args: &FlattenArgs, config: &StrataConfig, out: &mut impl Write) -> Result<()> {
    let table = load_table(&args.input, config)?;
    let manager = FlattenCacheManager::from_config(config);
    let outcome = manager.flatten(&table, &args.flatten_by, FlattenId::random())?;
    info!(
        table = outcome.table.name(),
        source = outcome.source.as_str(),
        rows = outcome.table.table().row_count(),
        "flattened"
    );
    if args.columns {
        return write_columns(outcome.table.shards(), out);
    }
    for shard in outcome.table.shards() {
        write_rows(shard, out)?;
    }
    Ok(())
}

pub fn run_columns(args: &InputArgs, config: &StrataConfig, out: &mut impl Write) -> Result<()> {
    let table = load_table(args, config)?;
    write_columns(table.shards(), out)
}

/// One JSON object per row, keyed by column name, plus `_row_id`.
fn write_rows(shard: &TableShard, out: &mut impl Write) -> Result<()> {
    for (offset, row) in shard.rows().into_iter().enumerate() {
        let mut obj = serde_json::to_value(row)?;
        if let Json::Object(map) = &mut obj {
            map.insert(
                "_row_id".to_string(),
                Json::from(shard.lowest_row_id() + offset as i64),
            );
        }
        writeln!(out, "{}", obj)?;
    }
    Ok(())
}

fn write_columns(shards: &[Arc<TableShard>], out: &mut impl Write) -> Result<()> {
    for shard in shards {
        writeln!(out, "shard {} ({} rows)", shard.lowest_row_id(), shard.row_count())?;
        for column in shard.columns() {
            writeln!(
                out,
                "  {:<24} {:<6} dict={} pages={}",
                column.name(),
                format!("{:?}", column.column_type()),
                column.dictionary_len(),
                column.pages().len()
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(dir: &tempfile::TempDir, body: &str) -> InputArgs {
        let path = dir.path().join("rows.json");
        std::fs::write(&path, body).unwrap();
        InputArgs {
            input: path,
            table: "rows".to_string(),
            shard_rows: 1,
        }
    }

    #[test]
    fn test_flatten_prints_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let args = FlattenArgs {
            input: input(&dir, r#"[{"a": [{"b": 1}, {"b": 2}], "c": 9}, {"a": [], "c": 8}]"#),
            flatten_by: "a[*]".to_string(),
            columns: false,
        };
        let mut out = Vec::new();
        run_flatten(&args, &StrataConfig::default(), &mut out).unwrap();
        let lines: Vec<Json> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["a.b"], 1);
        assert_eq!(lines[1]["a.b"], 2);
        assert_eq!(lines[1]["c"], 9);
        assert_eq!(lines[1]["_row_id"], 1);
        assert!(lines[0].get("a[length]").is_none());
    }

    #[test]
    fn test_json_lines_input() {
        let dir = tempfile::tempdir().unwrap();
        let args = input(&dir, "{\"a\": [1]}\n\n{\"a\": [2, 3]}\n");
        let mut out = Vec::new();
        run_columns(&args, &StrataConfig::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("shard 0 (1 rows)"));
        assert!(text.contains("shard 1 (1 rows)"));
        assert!(text.contains("a[length]"));
    }

    #[test]
    fn test_bad_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let args = input(&dir, "{\"a\": 1}\n{oops\n");
        let err = run_columns(&args, &StrataConfig::default(), &mut Vec::new()).unwrap_err();
        assert!(format!("{:#}", err).contains(":2: invalid JSON row"));
    }
}
