//! Per-node flatten service.
//!
//! A node flattens all of its local shards of a table through its
//! `FlattenCacheManager`. Computations run on named worker threads; while
//! one is running for `(table, flatten_by)`, further requests for the same
//! pair are attached to it and receive its single result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};
use strata_common::error::{StorageError, StrataError, StrataResult};
use strata_common::types::{FlattenId, NodeId, RequestId};
use strata_observability::record_in_flight_flattens;
use strata_storage::flatten::parse_flatten_by;
use strata_storage::{FlattenCacheManager, FlattenedTable, Table};
use tracing::{debug, error, warn};

use crate::transport::{ClusterTransport, FlattenNodeClient, FlattenNodeRequest};

/// Tables (with their current local shards) served by this node.
pub trait LocalTableProvider: Send + Sync {
    fn table(&self, name: &str) -> Option<Table>;
}

#[derive(Default)]
pub struct InMemoryTableProvider {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryTableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_table(&self, table: Table) {
        self.tables.write().insert(table.name().to_string(), table);
    }

    pub fn remove_table(&self, name: &str) -> Option<Table> {
        self.tables.write().remove(name)
    }
}

impl LocalTableProvider for InMemoryTableProvider {
    fn table(&self, name: &str) -> Option<Table> {
        self.tables.read().get(name).cloned()
    }
}

type FlattenKey = (String, String);

/// A running computation and every request attached to it.
struct InFlight {
    waiters: Vec<(RequestId, Vec<NodeId>)>,
}

struct NodeInner {
    node_id: NodeId,
    tables: Arc<dyn LocalTableProvider>,
    cache: FlattenCacheManager,
    transport: Arc<dyn ClusterTransport>,
    in_flight: Mutex<HashMap<FlattenKey, InFlight>>,
    computations_started: AtomicU64,
    requests_merged: AtomicU64,
}

#[derive(Clone)]
pub struct NodeFlattenService {
    inner: Arc<NodeInner>,
}

impl NodeFlattenService {
    pub fn new(
        node_id: NodeId,
        tables: Arc<dyn LocalTableProvider>,
        cache: FlattenCacheManager,
        transport: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                node_id,
                tables,
                cache,
                transport,
                in_flight: Mutex::new(HashMap::new()),
                computations_started: AtomicU64::new(0),
                requests_merged: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &FlattenCacheManager {
        &self.inner.cache
    }

    /// Worker computations started; merged requests do not count.
    pub fn computations_started(&self) -> u64 {
        self.inner.computations_started.load(Ordering::SeqCst)
    }

    /// Requests attached to an already running computation.
    pub fn requests_merged(&self) -> u64 {
        self.inner.requests_merged.load(Ordering::SeqCst)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// A flattening this node currently holds, by id.
    pub fn flattened_table(&self, flatten_id: FlattenId) -> Option<Arc<FlattenedTable>> {
        self.inner.cache.flattened(flatten_id)
    }
}

fn flatten_key(table: &str, flatten_by: &str) -> FlattenKey {
    let by = parse_flatten_by(flatten_by)
        .map(|p| p.to_string())
        .unwrap_or_else(|_| flatten_by.to_string());
    (table.to_string(), by)
}

impl NodeInner {
    fn compute(&self, key: FlattenKey, request_id: RequestId) {
        let (table_name, flatten_by) = &key;
        let result = match self.tables.table(table_name) {
            Some(table) => self
                .cache
                .flatten(&table, flatten_by, FlattenId::from(request_id))
                .map(|out| out.table.flatten_id()),
            None => Err(StorageError::UnknownTable(table_name.clone()).into()),
        };
        if let Err(e) = &result {
            error!(node = %self.node_id, table = %table_name, flatten_by = %flatten_by, error = %e, "local flatten failed");
        }

        let waiters = {
            let mut in_flight = self.in_flight.lock();
            let waiters = in_flight.remove(&key).map(|f| f.waiters).unwrap_or_default();
            record_in_flight_flattens(in_flight.len());
            waiters
        };
        for (waiting_request, notify) in waiters {
            for target in notify {
                self.report(waiting_request, target, &result);
            }
        }
    }

    fn report(&self, request_id: RequestId, target: NodeId, result: &StrataResult<FlattenId>) {
        let sink = match self.transport.result_sink(target) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(node = %self.node_id, %target, %request_id, error = %e, "cannot deliver flatten result");
                return;
            }
        };
        match result {
            Ok(flatten_id) => sink.flatten_succeeded(request_id, self.node_id, *flatten_id),
            Err(e) => sink.flatten_failed(request_id, self.node_id, e.to_string()),
        }
    }
}

impl FlattenNodeClient for NodeFlattenService {
    fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    fn valid_flatten_id(&self, table: &str, flatten_by: &str) -> StrataResult<Option<FlattenId>> {
        Ok(self
            .inner
            .tables
            .table(table)
            .and_then(|t| self.inner.cache.valid_flatten_id(&t, flatten_by)))
    }

    fn flatten(&self, request: FlattenNodeRequest) -> StrataResult<()> {
        let key = flatten_key(&request.table, &request.flatten_by);
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(running) = in_flight.get_mut(&key) {
            running.waiters.push((request.request_id, request.notify));
            self.inner.requests_merged.fetch_add(1, Ordering::SeqCst);
            debug!(node = %self.inner.node_id, request_id = %request.request_id, table = %key.0, "attached to running flatten");
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let worker_key = key.clone();
        let request_id = request.request_id;
        thread::Builder::new()
            .name(format!("strata-flatten-{}", self.inner.node_id.0))
            .spawn(move || inner.compute(worker_key, request_id))
            .map_err(|e| StrataError::Internal(format!("cannot spawn flatten worker: {}", e)))?;

        in_flight.insert(
            key,
            InFlight {
                waiters: vec![(request.request_id, request.notify)],
            },
        );
        self.inner.computations_started.fetch_add(1, Ordering::SeqCst);
        record_in_flight_flattens(in_flight.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FlattenResultSink, InProcessCluster};
    use parking_lot::Condvar;
    use serde_json::json;
    use std::time::Duration;
    use strata_common::config::{FlattenConfig, StrataConfig};
    use strata_storage::loader::load_shard;

    #[derive(Default)]
    struct Recorder {
        results: Mutex<Vec<(RequestId, Result<FlattenId, String>)>>,
        changed: Condvar,
    }

    impl Recorder {
        fn wait_for(&self, n: usize) -> Vec<(RequestId, Result<FlattenId, String>)> {
            let mut results = self.results.lock();
            while results.len() < n {
                let timed_out = self
                    .changed
                    .wait_for(&mut results, Duration::from_secs(5))
                    .timed_out();
                assert!(!timed_out, "results never arrived");
            }
            results.clone()
        }
    }

    impl FlattenResultSink for Recorder {
        fn flatten_succeeded(&self, request_id: RequestId, _: NodeId, flatten_id: FlattenId) {
            self.results.lock().push((request_id, Ok(flatten_id)));
            self.changed.notify_all();
        }

        fn flatten_failed(&self, request_id: RequestId, _: NodeId, message: String) {
            self.results.lock().push((request_id, Err(message)));
            self.changed.notify_all();
        }
    }

    fn setup() -> (Arc<InProcessCluster>, Arc<InMemoryTableProvider>, NodeFlattenService, Arc<Recorder>) {
        let cluster = Arc::new(InProcessCluster::new());
        let tables = Arc::new(InMemoryTableProvider::new());
        let shard = load_shard("t", 0, &[json!({"a": [1, 2, 3]})], &FlattenConfig::default()).unwrap();
        tables.put_table(Table::new("t", vec![Arc::new(shard)]));
        let service = NodeFlattenService::new(
            NodeId(1),
            tables.clone(),
            FlattenCacheManager::from_config(&StrataConfig::default()),
            cluster.clone(),
        );
        let recorder = Arc::new(Recorder::default());
        cluster.register_sink(NodeId(9), &recorder);
        (cluster, tables, service, recorder)
    }

    fn request(table: &str) -> FlattenNodeRequest {
        FlattenNodeRequest {
            request_id: RequestId::random(),
            table: table.to_string(),
            flatten_by: "a[*]".to_string(),
            notify: vec![NodeId(9)],
        }
    }

    #[test]
    fn test_flatten_reports_request_id_as_flatten_id() {
        let (_cluster, _tables, service, recorder) = setup();
        let req = request("t");
        service.flatten(req.clone()).unwrap();
        let results = recorder.wait_for(1);
        assert_eq!(results[0], (req.request_id, Ok(FlattenId::from(req.request_id))));
        assert_eq!(
            service.valid_flatten_id("t", "a[*]").unwrap(),
            Some(FlattenId::from(req.request_id))
        );
        let flattened = service.flattened_table(FlattenId::from(req.request_id)).unwrap();
        assert_eq!(flattened.table().row_count(), 3);
    }

    #[test]
    fn test_unknown_table_reports_failure() {
        let (_cluster, _tables, service, recorder) = setup();
        service.flatten(request("missing")).unwrap();
        let results = recorder.wait_for(1);
        assert!(results[0].1.as_ref().unwrap_err().contains("missing"));
        assert_eq!(service.valid_flatten_id("missing", "a[*]").unwrap(), None);
    }

    #[test]
    fn test_second_request_after_completion_reuses_cache() {
        let (_cluster, _tables, service, recorder) = setup();
        service.flatten(request("t")).unwrap();
        recorder.wait_for(1);
        let second = request("t");
        service.flatten(second.clone()).unwrap();
        let results = recorder.wait_for(2);
        assert_eq!(results[1].1, Ok(FlattenId::from(second.request_id)));
        assert_eq!(service.cache().stats().computed, 1);
        assert_eq!(service.cache().stats().memory_hits, 1);
    }
}
