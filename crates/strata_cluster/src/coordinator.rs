//! Cluster flatten coordinator.
//!
//! `ensure_flattened` drives one request through
//! `PROBING -> (AGREED | TRIGGERING -> WAITING -> (DONE | FAILED | TIMED_OUT))`.
//! Connection failures while probing or triggering restart the loop at
//! PROBING after a fixed backoff. Nodes that finish with different flatten
//! ids are logged and the loop restarts at PROBING as well; a re-trigger of
//! an existing flattening is a cheap cache hit on every node. The whole call
//! is bounded by the configured timeout.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use strata_common::config::ClusterFlattenConfig;
use strata_common::error::{ClusterError, StrataError, StrataResult};
use strata_common::types::{FlattenId, NodeId, RequestId};
use strata_observability::record_cluster_flatten;
use strata_storage::flatten::parse_flatten_by;
use tracing::{debug, info, warn};

use crate::transport::{ClusterTransport, FlattenNodeRequest, FlattenResultSink, TableTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenPhase {
    Probing,
    Agreed,
    Triggering,
    Waiting,
    Done,
    Failed,
    TimedOut,
}

impl fmt::Display for FlattenPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlattenPhase::Probing => "PROBING",
            FlattenPhase::Agreed => "AGREED",
            FlattenPhase::Triggering => "TRIGGERING",
            FlattenPhase::Waiting => "WAITING",
            FlattenPhase::Done => "DONE",
            FlattenPhase::Failed => "FAILED",
            FlattenPhase::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// A flattening every serving node holds under the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedOnCluster {
    pub flatten_id: FlattenId,
    pub nodes: Vec<NodeId>,
    /// False when the nodes already agreed before anything was triggered.
    pub newly_flattened: bool,
}

#[derive(Debug, Default)]
struct RequestState {
    pending: HashSet<NodeId>,
    results: HashMap<NodeId, FlattenId>,
    failures: Vec<(NodeId, String)>,
}

/// Per-request wait/notify state, shared with result delivery threads.
struct FlattenRequest {
    state: Mutex<RequestState>,
    changed: Condvar,
}

enum Attempt {
    Agreed(FlattenId),
    Flattened(FlattenId),
    Disagreed(Vec<(NodeId, FlattenId)>),
    TimedOut,
}

#[derive(Debug, Default)]
struct CoordinatorCounters {
    triggered: AtomicU64,
    connection_retries: AtomicU64,
    disagreements: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub triggered: u64,
    pub connection_retries: u64,
    pub disagreements: u64,
}

pub struct ClusterFlattenCoordinator {
    node_id: NodeId,
    transport: Arc<dyn ClusterTransport>,
    topology: Arc<dyn TableTopology>,
    config: ClusterFlattenConfig,
    requests: DashMap<RequestId, Arc<FlattenRequest>>,
    counters: CoordinatorCounters,
}

impl ClusterFlattenCoordinator {
    /// `node_id` is the address nodes report results to; register the
    /// coordinator there as a `FlattenResultSink`.
    pub fn new(
        node_id: NodeId,
        transport: Arc<dyn ClusterTransport>,
        topology: Arc<dyn TableTopology>,
        config: ClusterFlattenConfig,
    ) -> Self {
        Self {
            node_id,
            transport,
            topology,
            config,
            requests: DashMap::new(),
            counters: CoordinatorCounters::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            triggered: self.counters.triggered.load(Ordering::Relaxed),
            connection_retries: self.counters.connection_retries.load(Ordering::Relaxed),
            disagreements: self.counters.disagreements.load(Ordering::Relaxed),
        }
    }

    /// Make sure every node serving `table` holds a flattening by
    /// `flatten_by` under one common id. `None` when no node serves the table.
    pub fn ensure_flattened(&self, table: &str, flatten_by: &str) -> StrataResult<Option<FlattenedOnCluster>> {
        let flatten_by = parse_flatten_by(flatten_by)?.to_string();
        let nodes = self.topology.serving_nodes(table);
        let start = Instant::now();
        if nodes.is_empty() {
            debug!(table, "no node serves table, nothing to flatten");
            record_cluster_flatten("no_nodes", start.elapsed().as_micros() as u64);
            return Ok(None);
        }

        let deadline = start + self.config.timeout();
        let result = self.run(table, &flatten_by, &nodes, start, deadline);
        let outcome = match &result {
            Ok(f) if f.newly_flattened => "flattened",
            Ok(_) => "agreed",
            Err(StrataError::Cluster(ClusterError::Timeout { .. })) => "timeout",
            Err(_) => "failed",
        };
        record_cluster_flatten(outcome, start.elapsed().as_micros() as u64);
        result.map(Some)
    }

    fn run(
        &self,
        table: &str,
        flatten_by: &str,
        nodes: &[NodeId],
        start: Instant,
        deadline: Instant,
    ) -> StrataResult<FlattenedOnCluster> {
        let timeout = || -> StrataError {
            warn!(table, flatten_by, phase = %FlattenPhase::TimedOut, "cluster flatten timed out");
            ClusterError::Timeout {
                table: table.to_string(),
                flatten_by: flatten_by.to_string(),
                waited_ms: start.elapsed().as_millis() as u64,
            }
            .into()
        };

        loop {
            if Instant::now() >= deadline {
                return Err(timeout());
            }
            match self.attempt(table, flatten_by, nodes, deadline) {
                Ok(Attempt::Agreed(flatten_id)) => {
                    info!(table, flatten_by, %flatten_id, phase = %FlattenPhase::Agreed, "nodes already agree");
                    return Ok(FlattenedOnCluster {
                        flatten_id,
                        nodes: nodes.to_vec(),
                        newly_flattened: false,
                    });
                }
                Ok(Attempt::Flattened(flatten_id)) => {
                    info!(table, flatten_by, %flatten_id, phase = %FlattenPhase::Done, "cluster flatten done");
                    return Ok(FlattenedOnCluster {
                        flatten_id,
                        nodes: nodes.to_vec(),
                        newly_flattened: true,
                    });
                }
                Ok(Attempt::Disagreed(ids)) => {
                    self.counters.disagreements.fetch_add(1, Ordering::Relaxed);
                    warn!(table, flatten_by, ?ids, "nodes reported different flatten ids, probing again");
                }
                Err(e) if e.is_connection_error() => {
                    self.counters.connection_retries.fetch_add(1, Ordering::Relaxed);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    warn!(table, flatten_by, error = %e, "connection failure, retrying");
                    thread::sleep(self.config.retry_backoff().min(remaining));
                }
                Ok(Attempt::TimedOut) => return Err(timeout()),
                Err(e) => {
                    warn!(table, flatten_by, error = %e, phase = %FlattenPhase::Failed, "cluster flatten failed");
                    return Err(e);
                }
            }
        }
    }

    fn attempt(
        &self,
        table: &str,
        flatten_by: &str,
        nodes: &[NodeId],
        deadline: Instant,
    ) -> StrataResult<Attempt> {
        debug!(table, flatten_by, phase = %FlattenPhase::Probing);
        let probed = self.probe(table, flatten_by, nodes)?;
        let mut distinct: Vec<Option<FlattenId>> = probed.iter().map(|(_, id)| *id).collect();
        distinct.sort();
        distinct.dedup();
        if let [Some(agreed)] = distinct.as_slice() {
            return Ok(Attempt::Agreed(*agreed));
        }

        let request_id = RequestId::random();
        let request = Arc::new(FlattenRequest {
            state: Mutex::new(RequestState {
                pending: nodes.iter().copied().collect(),
                ..RequestState::default()
            }),
            changed: Condvar::new(),
        });
        self.requests.insert(request_id, Arc::clone(&request));
        let result = self
            .trigger(request_id, table, flatten_by, nodes)
            .and_then(|()| self.wait(request_id, &request, deadline));
        self.requests.remove(&request_id);
        let Some(results) = result? else {
            return Ok(Attempt::TimedOut);
        };

        let mut ids: Vec<FlattenId> = results.values().copied().collect();
        ids.sort();
        ids.dedup();
        match ids.as_slice() {
            [flatten_id] => Ok(Attempt::Flattened(*flatten_id)),
            _ => {
                let mut by_node: Vec<(NodeId, FlattenId)> = results.into_iter().collect();
                by_node.sort();
                Ok(Attempt::Disagreed(by_node))
            }
        }
    }

    /// Every node's currently valid flatten id, queried concurrently.
    fn probe(&self, table: &str, flatten_by: &str, nodes: &[NodeId]) -> StrataResult<Vec<(NodeId, Option<FlattenId>)>> {
        let results = thread::scope(|s| {
            let handles: Vec<_> = nodes
                .iter()
                .map(|&node| {
                    s.spawn(move || {
                        let client = self.transport.node_client(node)?;
                        client.valid_flatten_id(table, flatten_by).map(|id| (node, id))
                    })
                })
                .collect();
            join_all(handles, "E-COORD-001")
        })?;
        results.into_iter().collect()
    }

    fn trigger(&self, request_id: RequestId, table: &str, flatten_by: &str, nodes: &[NodeId]) -> StrataResult<()> {
        self.counters.triggered.fetch_add(1, Ordering::Relaxed);
        debug!(table, flatten_by, %request_id, phase = %FlattenPhase::Triggering);
        let results = thread::scope(|s| {
            let handles: Vec<_> = nodes
                .iter()
                .map(|&node| {
                    let request = FlattenNodeRequest {
                        request_id,
                        table: table.to_string(),
                        flatten_by: flatten_by.to_string(),
                        notify: vec![self.node_id],
                    };
                    s.spawn(move || self.transport.node_client(node)?.flatten(request))
                })
                .collect();
            join_all(handles, "E-COORD-002")
        })?;
        results.into_iter().collect()
    }

    fn wait(
        &self,
        request_id: RequestId,
        request: &FlattenRequest,
        deadline: Instant,
    ) -> StrataResult<Option<HashMap<NodeId, FlattenId>>> {
        debug!(%request_id, phase = %FlattenPhase::Waiting);
        let mut state = request.state.lock();
        loop {
            if !state.failures.is_empty() {
                return Err(ClusterError::RemoteFailure {
                    request_id,
                    failures: std::mem::take(&mut state.failures),
                }
                .into());
            }
            if state.pending.is_empty() {
                return Ok(Some(std::mem::take(&mut state.results)));
            }
            if request.changed.wait_until(&mut state, deadline).timed_out()
                && state.failures.is_empty()
                && !state.pending.is_empty()
            {
                return Ok(None);
            }
        }
    }

    fn with_request(&self, request_id: RequestId, apply: impl FnOnce(&mut RequestState)) {
        let Some(request) = self.requests.get(&request_id).map(|r| Arc::clone(r.value())) else {
            debug!(%request_id, "result for a request that is no longer waiting");
            return;
        };
        let mut state = request.state.lock();
        apply(&mut state);
        request.changed.notify_all();
    }
}

fn join_all<T>(
    handles: Vec<thread::ScopedJoinHandle<'_, StrataResult<T>>>,
    code: &'static str,
) -> StrataResult<Vec<StrataResult<T>>> {
    handles
        .into_iter()
        .map(|h| {
            h.join()
                .map_err(|_| StrataError::internal_bug(code, "cluster request thread panicked", ""))
        })
        .collect()
}

impl FlattenResultSink for ClusterFlattenCoordinator {
    fn flatten_succeeded(&self, request_id: RequestId, node: NodeId, flatten_id: FlattenId) {
        self.with_request(request_id, |state| {
            state.pending.remove(&node);
            state.results.insert(node, flatten_id);
        });
    }

    fn flatten_failed(&self, request_id: RequestId, node: NodeId, message: String) {
        self.with_request(request_id, |state| {
            state.pending.remove(&node);
            state.failures.push((node, message));
        });
    }
}

impl fmt::Debug for ClusterFlattenCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterFlattenCoordinator")
            .field("node_id", &self.node_id)
            .field("waiting_requests", &self.requests.len())
            .finish()
    }
}
