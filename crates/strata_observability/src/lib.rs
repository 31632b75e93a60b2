//! Observability setup: structured logging and flatten metrics.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Record one per-shard flatten transform.
pub fn record_flatten_shard(duration_us: u64, rows_in: u64, rows_out: u64) {
    metrics::counter!("strata_flatten_shards_total").increment(1);
    metrics::counter!("strata_flatten_rows_in_total").increment(rows_in);
    metrics::counter!("strata_flatten_rows_out_total").increment(rows_out);
    metrics::histogram!("strata_flatten_shard_duration_us").record(duration_us as f64);
}

/// Record where a flatten request was served from: "memory", "disk" or "computed".
pub fn record_flatten_cache_lookup(source: &str) {
    metrics::counter!("strata_flatten_cache_lookups_total", "source" => source.to_string())
        .increment(1);
}

/// Record a page encoding strategy decision.
pub fn record_page_strategy(strategy: &str) {
    metrics::counter!("strata_flatten_page_strategy_total", "strategy" => strategy.to_string())
        .increment(1);
}

/// Record the outcome of a cluster-wide flatten: "agreed", "flattened",
/// "failed", "timeout", "no_nodes".
pub fn record_cluster_flatten(outcome: &str, duration_us: u64) {
    metrics::counter!("strata_cluster_flatten_total", "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!("strata_cluster_flatten_duration_us").record(duration_us as f64);
}

/// Record the number of flatten computations currently running on this node.
pub fn record_in_flight_flattens(count: usize) {
    metrics::gauge!("strata_flatten_in_flight").set(count as f64);
}
