//! In-memory registry of flattened table instances.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use strata_common::types::FlattenId;

use crate::table::FlattenedTable;

/// Holds the flattened instances a node currently serves.
pub trait FlattenedInstanceStore: Send + Sync {
    /// Instances of `(table, flatten_by)`, most recently registered first.
    fn recent(&self, table: &str, flatten_by: &str) -> Vec<Arc<FlattenedTable>>;

    fn register(&self, instance: Arc<FlattenedTable>);

    fn get(&self, flatten_id: FlattenId) -> Option<Arc<FlattenedTable>>;
}

#[derive(Debug, Clone)]
struct Entry {
    instance: Arc<FlattenedTable>,
    registered_at: Instant,
}

/// Keeps, per `(table, flatten-by)`, the most recent instance for up to
/// `per_key` distinct shard layouts; a newer instance of a layout that is
/// already present takes its place in that list.
///
/// Flatten ids are tracked separately: every registered id resolves until
/// it is older than `ttl` or more than `max_ids` newer ids were registered.
pub struct InMemoryFlattenedRegistry {
    recent: DashMap<(String, String), VecDeque<Entry>>,
    by_id: DashMap<FlattenId, Entry>,
    /// Registration order of `by_id`, oldest first.
    id_order: Mutex<VecDeque<FlattenId>>,
    per_key: usize,
    max_ids: usize,
    ttl: Option<Duration>,
}

impl InMemoryFlattenedRegistry {
    pub fn new(per_key: usize, max_ids: usize, ttl: Option<Duration>) -> Self {
        Self {
            recent: DashMap::new(),
            by_id: DashMap::new(),
            id_order: Mutex::new(VecDeque::new()),
            per_key: per_key.max(1),
            max_ids: max_ids.max(1),
            ttl,
        }
    }

    fn expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.registered_at.elapsed() > ttl)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn track_id(&self, flatten_id: FlattenId) {
        let mut order = self.id_order.lock();
        order.retain(|id| *id != flatten_id);
        order.push_back(flatten_id);
        while order.len() > self.max_ids {
            if let Some(oldest) = order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
    }
}

impl FlattenedInstanceStore for InMemoryFlattenedRegistry {
    fn recent(&self, table: &str, flatten_by: &str) -> Vec<Arc<FlattenedTable>> {
        let key = (table.to_string(), flatten_by.to_string());
        let Some(mut list) = self.recent.get_mut(&key) else {
            return Vec::new();
        };
        list.retain(|e| !self.expired(e));
        list.iter().map(|e| Arc::clone(&e.instance)).collect()
    }

    fn register(&self, instance: Arc<FlattenedTable>) {
        let entry = Entry {
            instance: Arc::clone(&instance),
            registered_at: Instant::now(),
        };
        let key = (
            instance.source_table().to_string(),
            instance.flatten_by().to_string(),
        );
        {
            let mut list = self.recent.entry(key).or_default();
            list.retain(|e| e.instance.original_first_row_ids() != instance.original_first_row_ids());
            list.push_front(entry.clone());
            list.truncate(self.per_key);
        }
        self.by_id.insert(instance.flatten_id(), entry);
        self.track_id(instance.flatten_id());
    }

    fn get(&self, flatten_id: FlattenId) -> Option<Arc<FlattenedTable>> {
        let entry = self.by_id.get(&flatten_id)?.clone();
        if self.expired(&entry) {
            self.by_id.remove(&flatten_id);
            return None;
        }
        Some(entry.instance)
    }
}
