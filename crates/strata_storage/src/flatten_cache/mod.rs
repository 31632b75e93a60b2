//! Flatten cache manager.
//!
//! A flattening is reusable only for the exact source shard layout it was
//! computed from: the key is `(source table, flatten-by, set of lowest row
//! ids of the source shards)`. Lookups try the in-memory registry, then the
//! disk cache, then compute. A reused flattening is always re-based under
//! the caller's flatten id before it is handed out.

pub mod disk;
pub mod registry;
pub mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_common::config::StrataConfig;
use strata_common::error::{FlattenError, StrataResult};
use strata_common::types::FlattenId;
use strata_observability::record_flatten_cache_lookup;
use tracing::{info, warn};

use crate::flatten::{parse_flatten_by, Flattener};
use crate::table::{FlattenedTable, Table};

pub use disk::{DirectoryDiskCache, FlattenedDiskCache};
pub use registry::{FlattenedInstanceStore, InMemoryFlattenedRegistry};
pub use snapshot::FlattenedTableSnapshot;

/// Where a flattening handed out by the manager came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenSource {
    Memory,
    Disk,
    Computed,
}

impl FlattenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlattenSource::Memory => "memory",
            FlattenSource::Disk => "disk",
            FlattenSource::Computed => "computed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlattenOutcome {
    pub table: Arc<FlattenedTable>,
    pub source: FlattenSource,
}

#[derive(Debug, Default)]
struct CacheCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    computed: AtomicU64,
    disk_errors: AtomicU64,
}

/// Point-in-time copy of the manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenCacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub computed: u64,
    pub disk_errors: u64,
}

pub struct FlattenCacheManager {
    flattener: Flattener,
    store: Arc<dyn FlattenedInstanceStore>,
    disk: Option<Arc<dyn FlattenedDiskCache>>,
    counters: CacheCounters,
}

impl FlattenCacheManager {
    pub fn new(
        flattener: Flattener,
        store: Arc<dyn FlattenedInstanceStore>,
        disk: Option<Arc<dyn FlattenedDiskCache>>,
    ) -> Self {
        Self {
            flattener,
            store,
            disk,
            counters: CacheCounters::default(),
        }
    }

    /// In-memory registry plus, when `cache.disk_dir` is set, a directory
    /// disk cache. A disk cache that cannot be opened is skipped.
    pub fn from_config(config: &StrataConfig) -> Self {
        let store = Arc::new(InMemoryFlattenedRegistry::new(
            config.cache.memory_instances_per_key,
            config.cache.memory_max_flatten_ids,
            config.cache.memory_ttl(),
        ));
        let disk: Option<Arc<dyn FlattenedDiskCache>> = if config.cache.disk_enabled() {
            match DirectoryDiskCache::new(&config.cache.disk_dir, config.cache.disk_max_age()) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    warn!(dir = %config.cache.disk_dir, error = %e, "flatten disk cache disabled");
                    None
                }
            }
        } else {
            None
        };
        Self::new(Flattener::new(config.flatten.clone()), store, disk)
    }

    pub fn flattener(&self) -> &Flattener {
        &self.flattener
    }

    /// A flattening of `table` by `flatten_by` valid for the table's current
    /// shards, identified by `flatten_id`.
    pub fn flatten(&self, table: &Table, flatten_by: &str, flatten_id: FlattenId) -> StrataResult<FlattenOutcome> {
        if table.is_flattened() {
            return Err(FlattenError::AlreadyFlattened {
                table: table.name().to_string(),
            }
            .into());
        }
        let flatten_by = parse_flatten_by(flatten_by)?.to_string();
        let key = table.shard_first_row_ids();

        if let Some(hit) = self
            .store
            .recent(table.name(), &flatten_by)
            .into_iter()
            .find(|f| f.is_valid_for(&key))
        {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.hand_out(hit.rebase(flatten_id), FlattenSource::Memory));
        }

        if let Some(disk) = &self.disk {
            match disk.load(table.name(), &flatten_by, &key) {
                Ok(Some(loaded)) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.hand_out(loaded.rebase(flatten_id), FlattenSource::Disk));
                }
                Ok(None) => {}
                Err(e) => {
                    self.counters.disk_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(table = table.name(), flatten_by = %flatten_by, error = %e, "flatten disk cache load failed");
                }
            }
        }

        let computed = self
            .flattener
            .flatten_table(table, None, &flatten_by, flatten_id)?;
        self.counters.computed.fetch_add(1, Ordering::Relaxed);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.offer(&computed) {
                self.counters.disk_errors.fetch_add(1, Ordering::Relaxed);
                warn!(table = table.name(), flatten_by = %flatten_by, error = %e, "flatten disk cache offer failed");
            }
        }
        Ok(self.hand_out(computed, FlattenSource::Computed))
    }

    fn hand_out(&self, table: FlattenedTable, source: FlattenSource) -> FlattenOutcome {
        let table = Arc::new(table);
        self.store.register(Arc::clone(&table));
        record_flatten_cache_lookup(source.as_str());
        info!(
            table = table.source_table(),
            flatten_by = table.flatten_by(),
            flatten_id = %table.flatten_id(),
            source = source.as_str(),
            "flattening ready"
        );
        FlattenOutcome { table, source }
    }

    /// Id of an in-memory flattening valid for the table's current shards.
    pub fn valid_flatten_id(&self, table: &Table, flatten_by: &str) -> Option<FlattenId> {
        let flatten_by = parse_flatten_by(flatten_by).ok()?.to_string();
        let key = table.shard_first_row_ids();
        self.store
            .recent(table.name(), &flatten_by)
            .into_iter()
            .find(|f| f.is_valid_for(&key))
            .map(|f| f.flatten_id())
    }

    pub fn flattened(&self, flatten_id: FlattenId) -> Option<Arc<FlattenedTable>> {
        self.store.get(flatten_id)
    }

    pub fn stats(&self) -> FlattenCacheStats {
        FlattenCacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            computed: self.counters.computed.load(Ordering::Relaxed),
            disk_errors: self.counters.disk_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_shard;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use strata_common::config::FlattenConfig;
    use strata_common::error::CacheError;
    use strata_common::types::RowId;

    fn table() -> Table {
        let s = load_shard("t", 0, &[json!({"a": [1, 2]})], &FlattenConfig::default()).unwrap();
        Table::new("t", vec![Arc::new(s)])
    }

    struct FailingDisk;

    impl FlattenedDiskCache for FailingDisk {
        fn load(&self, _: &str, _: &str, _: &BTreeSet<RowId>) -> Result<Option<FlattenedTable>, CacheError> {
            Err(CacheError::Io(std::io::Error::other("disk gone")))
        }

        fn offer(&self, _: &FlattenedTable) -> Result<(), CacheError> {
            Err(CacheError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_memory_hit_is_rebased() {
        let manager = FlattenCacheManager::from_config(&StrataConfig::default());
        let t = table();
        let first = manager.flatten(&t, "a[*]", FlattenId::random()).unwrap();
        assert_eq!(first.source, FlattenSource::Computed);
        let id = FlattenId::random();
        let second = manager.flatten(&t, "a[*]", id).unwrap();
        assert_eq!(second.source, FlattenSource::Memory);
        assert_eq!(second.table.flatten_id(), id);
        assert!(!Arc::ptr_eq(&first.table, &second.table));
        assert_eq!(manager.valid_flatten_id(&t, "a[*]"), Some(id));
        assert!(manager.flattened(id).is_some());
    }

    #[test]
    fn test_disk_failures_are_not_fatal() {
        let manager = FlattenCacheManager::new(
            Flattener::new(FlattenConfig::default()),
            Arc::new(InMemoryFlattenedRegistry::new(2, 64, None)),
            Some(Arc::new(FailingDisk)),
        );
        let out = manager.flatten(&table(), "a[*]", FlattenId::random()).unwrap();
        assert_eq!(out.source, FlattenSource::Computed);
        assert_eq!(manager.stats().disk_errors, 2);
    }
}
