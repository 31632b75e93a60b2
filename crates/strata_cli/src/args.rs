use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// strata: load nested JSON rows into columnar shards and flatten them
#[derive(Debug, Parser)]
#[command(name = "strata", version)]
pub struct Args {
    /// TOML configuration file (missing file = defaults)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    pub print_default_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Flatten a repeated field: every entry becomes its own row
    Flatten(FlattenArgs),
    /// Show the column layout of the loaded rows
    Columns(InputArgs),
}

#[derive(Debug, clap::Args)]
pub struct InputArgs {
    /// JSON array of objects, or one object per line
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Table name
    #[arg(short = 't', long, default_value = "rows")]
    pub table: String,

    /// Rows per shard
    #[arg(long, default_value_t = 1024)]
    pub shard_rows: usize,
}

#[derive(Debug, clap::Args)]
pub struct FlattenArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Repeated field to flatten by, ending in `[*]` (e.g. `a[*]`)
    #[arg(short = 'b', long = "by")]
    pub flatten_by: String,

    /// Print the flattened column layout instead of rows
    #[arg(long)]
    pub columns: bool,
}
