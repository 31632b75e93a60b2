//! On-disk flattened-table cache.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use strata_common::error::CacheError;
use strata_common::types::RowId;
use tracing::debug;

use super::snapshot::FlattenedTableSnapshot;
use crate::table::FlattenedTable;

/// Persistent store of flattened tables, keyed like the in-memory registry
/// by `(source table, flatten-by, original first row ids)`.
pub trait FlattenedDiskCache: Send + Sync {
    /// The cached flattening for exactly this key, if any.
    fn load(
        &self,
        table: &str,
        flatten_by: &str,
        original_first_row_ids: &BTreeSet<RowId>,
    ) -> Result<Option<FlattenedTable>, CacheError>;

    /// Persist a flattening. Callers treat failures as non-fatal.
    fn offer(&self, flattened: &FlattenedTable) -> Result<(), CacheError>;
}

const CACHE_MAGIC: &[u8; 4] = b"SFLT";
const HEADER_LEN: usize = 8;

/// One file per key under a directory.
///
/// File format: `[magic:4][crc32:4][bincode snapshot]`, written to a
/// temporary file and renamed into place.
#[derive(Debug)]
pub struct DirectoryDiskCache {
    dir: PathBuf,
    max_age: Option<Duration>,
}

impl DirectoryDiskCache {
    pub fn new(dir: impl Into<PathBuf>, max_age: Option<Duration>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_age })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, table: &str, flatten_by: &str, ids: &BTreeSet<RowId>) -> PathBuf {
        let key = format!("{}\u{0}{}\u{0}{:?}", table, flatten_by, ids);
        let readable: String = table
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        self.dir
            .join(format!("{}-{:08x}.flat", readable, crc32fast::hash(key.as_bytes())))
    }
}

impl FlattenedDiskCache for DirectoryDiskCache {
    fn load(
        &self,
        table: &str,
        flatten_by: &str,
        original_first_row_ids: &BTreeSet<RowId>,
    ) -> Result<Option<FlattenedTable>, CacheError> {
        let path = self.entry_path(table, flatten_by, original_first_row_ids);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let corrupt = |reason: &str| CacheError::Corrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if data.len() < HEADER_LEN || &data[0..4] != CACHE_MAGIC.as_slice() {
            return Err(corrupt("bad header"));
        }
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&data[4..HEADER_LEN]);
        let payload = &data[HEADER_LEN..];
        if crc32fast::hash(payload) != u32::from_le_bytes(crc) {
            return Err(corrupt("checksum mismatch"));
        }
        let snapshot: FlattenedTableSnapshot =
            bincode::deserialize(payload).map_err(|e| CacheError::Serialization(e.to_string()))?;

        if !snapshot.matches(table, flatten_by, original_first_row_ids) {
            debug!(path = %path.display(), "disk cache entry belongs to another key");
            return Ok(None);
        }
        if let Some(max_age) = self.max_age {
            let age = SystemTime::now()
                .duration_since(snapshot.created_at())
                .unwrap_or_default();
            if age > max_age {
                debug!(path = %path.display(), age_secs = age.as_secs(), "disk cache entry too old");
                return Ok(None);
            }
        }
        snapshot
            .restore()
            .map(Some)
            .map_err(|e| corrupt(&e.to_string()))
    }

    fn offer(&self, flattened: &FlattenedTable) -> Result<(), CacheError> {
        let path = self.entry_path(
            flattened.source_table(),
            flattened.flatten_by(),
            flattened.original_first_row_ids(),
        );
        let snapshot = FlattenedTableSnapshot::capture(flattened, SystemTime::now());
        let payload =
            bincode::serialize(&snapshot).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
        data.extend_from_slice(CACHE_MAGIC);
        data.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        data.extend_from_slice(&payload);

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &path)?;
        debug!(path = %path.display(), bytes = data.len(), "offered flattening to disk cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::Flattener;
    use crate::loader::load_shard;
    use crate::table::Table;
    use crate::value::Value;
    use serde_json::json;
    use std::sync::Arc;
    use strata_common::config::FlattenConfig;
    use strata_common::types::FlattenId;

    fn flattened() -> FlattenedTable {
        let cfg = FlattenConfig::default();
        let shard = load_shard(
            "t",
            0,
            &[json!({"a": [{"b": 1.5}, {"b": -2.0}], "s": "x"})],
            &cfg,
        )
        .unwrap();
        let table = Table::new("t", vec![Arc::new(shard)]);
        Flattener::new(cfg)
            .flatten_table(&table, None, "a[*]", FlattenId::random())
            .unwrap()
    }

    #[test]
    fn test_offer_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryDiskCache::new(dir.path(), None).unwrap();
        let f = flattened();
        cache.offer(&f).unwrap();

        let loaded = cache
            .load("t", "a[*]", f.original_first_row_ids())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.flatten_id(), f.flatten_id());
        assert_eq!(loaded.shards()[0].rows(), f.shards()[0].rows());
        assert_eq!(
            loaded.shards()[0].row_values(1).get("a.b"),
            Some(&Value::Double(-2.0))
        );
        assert!(cache
            .load("t", "a[*]", &BTreeSet::from([0, 10]))
            .unwrap()
            .is_none());
        assert!(cache.load("t", "b[*]", f.original_first_row_ids()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryDiskCache::new(dir.path(), None).unwrap();
        let f = flattened();
        cache.offer(&f).unwrap();
        let path = cache.entry_path("t", "a[*]", f.original_first_row_ids());
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, data).unwrap();
        let err = cache.load("t", "a[*]", f.original_first_row_ids()).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[test]
    fn test_max_age_hides_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let f = flattened();
        DirectoryDiskCache::new(dir.path(), None).unwrap().offer(&f).unwrap();
        let strict = DirectoryDiskCache::new(dir.path(), Some(Duration::ZERO)).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(strict.load("t", "a[*]", f.original_first_row_ids()).unwrap().is_none());
    }
}
