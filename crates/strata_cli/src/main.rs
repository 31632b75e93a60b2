mod args;
mod commands;

use std::process;

use anyhow::Result;
use args::{Args, Command};
use clap::Parser;
use strata_common::config::StrataConfig;
use tracing::debug;

fn main() {
    if let Err(e) = run() {
        eprintln!("strata: error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.print_default_config {
        print!("{}", StrataConfig::default().to_toml_string()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => StrataConfig::load_or_default(path),
        None => StrataConfig::default(),
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.command {
        Some(Command::Flatten(flatten)) => {
            debug!(by = %flatten.flatten_by, "flatten");
            commands::run_flatten(&flatten, &config, &mut out)
        }
        Some(Command::Columns(input)) => commands::run_columns(&input, &config, &mut out),
        None => {
            anyhow::bail!("no command given (try `strata flatten --help`)")
        }
    }
}
