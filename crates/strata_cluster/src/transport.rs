//! Cluster transport abstraction.
//!
//! The coordinator talks to nodes through `FlattenNodeClient`; nodes report
//! flatten results to the addresses named in the request through
//! `FlattenResultSink`. Both are resolved per call via `ClusterTransport`,
//! which is where connection failures surface.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use strata_common::error::{ClusterError, StrataResult};
use strata_common::types::{FlattenId, NodeId, RequestId};

/// "Flatten all local shards of `table` by `flatten_by`, then tell `notify`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenNodeRequest {
    pub request_id: RequestId,
    pub table: String,
    pub flatten_by: String,
    pub notify: Vec<NodeId>,
}

/// Per-node flatten service as seen by a coordinator.
pub trait FlattenNodeClient: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Flatten id of a local flattening valid for the node's current shards.
    fn valid_flatten_id(&self, table: &str, flatten_by: &str) -> StrataResult<Option<FlattenId>>;

    /// Start flattening. Returns once the request is accepted; the outcome
    /// is reported to every node in `request.notify`.
    fn flatten(&self, request: FlattenNodeRequest) -> StrataResult<()>;
}

/// Receiver of asynchronous per-node flatten outcomes.
pub trait FlattenResultSink: Send + Sync {
    fn flatten_succeeded(&self, request_id: RequestId, node: NodeId, flatten_id: FlattenId);

    fn flatten_failed(&self, request_id: RequestId, node: NodeId, message: String);
}

pub trait ClusterTransport: Send + Sync {
    fn node_client(&self, node: NodeId) -> StrataResult<Arc<dyn FlattenNodeClient>>;

    fn result_sink(&self, node: NodeId) -> StrataResult<Arc<dyn FlattenResultSink>>;
}

/// Which nodes serve which tables.
pub trait TableTopology: Send + Sync {
    fn serving_nodes(&self, table: &str) -> Vec<NodeId>;
}

/// All nodes live in this process.
///
/// Registrations are weak: dropping a node service makes it unreachable
/// instead of keeping it alive through the cluster.
#[derive(Default)]
pub struct InProcessCluster {
    clients: RwLock<HashMap<NodeId, Weak<dyn FlattenNodeClient>>>,
    sinks: RwLock<HashMap<NodeId, Weak<dyn FlattenResultSink>>>,
    serving: RwLock<HashMap<String, Vec<NodeId>>>,
    faults: ConnectionFaults,
}

/// Connection fault injection for tests.
#[derive(Default)]
struct ConnectionFaults {
    fail_next: AtomicU64,
    disconnected: Mutex<HashSet<NodeId>>,
    fired: AtomicU64,
}

impl InProcessCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node<T: FlattenNodeClient + 'static>(&self, node: NodeId, client: &Arc<T>) {
        let client: Arc<dyn FlattenNodeClient> = client.clone();
        let weak = Arc::downgrade(&client);
        self.clients.write().insert(node, weak);
    }

    pub fn register_sink<T: FlattenResultSink + 'static>(&self, node: NodeId, sink: &Arc<T>) {
        let sink: Arc<dyn FlattenResultSink> = sink.clone();
        let weak = Arc::downgrade(&sink);
        self.sinks.write().insert(node, weak);
    }

    /// Replace the set of nodes serving `table`.
    pub fn serve_table(&self, table: impl Into<String>, nodes: Vec<NodeId>) {
        self.serving.write().insert(table.into(), nodes);
    }

    /// The next `n` node connections fail.
    pub fn fail_next_connections(&self, n: u64) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every connection to `node` fails until `reconnect`.
    pub fn disconnect(&self, node: NodeId) {
        self.faults.disconnected.lock().insert(node);
    }

    pub fn reconnect(&self, node: NodeId) {
        self.faults.disconnected.lock().remove(&node);
    }

    /// Connection failures injected so far.
    pub fn injected_failures(&self) -> u64 {
        self.faults.fired.load(Ordering::Relaxed)
    }

    fn check_connection(&self, node: NodeId) -> StrataResult<()> {
        let reason = if self.faults.disconnected.lock().contains(&node) {
            Some("node disconnected")
        } else if self
            .faults
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Some("injected connection failure")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                self.faults.fired.fetch_add(1, Ordering::Relaxed);
                Err(ClusterError::Connection {
                    node,
                    reason: reason.to_string(),
                }
                .into())
            }
            None => Ok(()),
        }
    }
}

fn upgrade<T: ?Sized>(map: &RwLock<HashMap<NodeId, Weak<T>>>, node: NodeId) -> StrataResult<Arc<T>> {
    let weak = map
        .read()
        .get(&node)
        .cloned()
        .ok_or(ClusterError::UnknownNode(node))?;
    weak.upgrade().ok_or_else(|| {
        ClusterError::Connection {
            node,
            reason: "node shut down".to_string(),
        }
        .into()
    })
}

impl ClusterTransport for InProcessCluster {
    fn node_client(&self, node: NodeId) -> StrataResult<Arc<dyn FlattenNodeClient>> {
        self.check_connection(node)?;
        upgrade(&self.clients, node)
    }

    fn result_sink(&self, node: NodeId) -> StrataResult<Arc<dyn FlattenResultSink>> {
        upgrade(&self.sinks, node)
    }
}

impl TableTopology for InProcessCluster {
    fn serving_nodes(&self, table: &str) -> Vec<NodeId> {
        self.serving.read().get(table).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::error::StrataError;

    struct FixedNode(NodeId);

    impl FlattenNodeClient for FixedNode {
        fn node_id(&self) -> NodeId {
            self.0
        }

        fn valid_flatten_id(&self, _: &str, _: &str) -> StrataResult<Option<FlattenId>> {
            Ok(None)
        }

        fn flatten(&self, _: FlattenNodeRequest) -> StrataResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fail_next_connections_is_consumed() {
        let cluster = InProcessCluster::new();
        let node = Arc::new(FixedNode(NodeId(1)));
        cluster.register_node(NodeId(1), &node);
        cluster.fail_next_connections(2);
        for _ in 0..2 {
            let err = cluster.node_client(NodeId(1)).err().unwrap();
            assert!(err.is_connection_error());
        }
        assert_eq!(cluster.node_client(NodeId(1)).unwrap().node_id(), NodeId(1));
        assert_eq!(cluster.injected_failures(), 2);
    }

    #[test]
    fn test_disconnect_and_drop() {
        let cluster = InProcessCluster::new();
        let node = Arc::new(FixedNode(NodeId(1)));
        cluster.register_node(NodeId(1), &node);
        cluster.disconnect(NodeId(1));
        assert!(cluster.node_client(NodeId(1)).is_err());
        cluster.reconnect(NodeId(1));
        assert!(cluster.node_client(NodeId(1)).is_ok());

        drop(node);
        let err = cluster.node_client(NodeId(1)).err().unwrap();
        assert!(err.is_connection_error());
        let err = cluster.node_client(NodeId(2)).err().unwrap();
        assert!(matches!(err, StrataError::Cluster(ClusterError::UnknownNode(_))));
    }

    #[test]
    fn test_topology() {
        let cluster = InProcessCluster::new();
        cluster.serve_table("t", vec![NodeId(1), NodeId(2)]);
        assert_eq!(cluster.serving_nodes("t"), vec![NodeId(1), NodeId(2)]);
        assert!(cluster.serving_nodes("u").is_empty());
    }
}
