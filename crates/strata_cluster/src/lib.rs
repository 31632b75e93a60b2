//! Cluster-wide flattening.
//!
//! - `transport`: how a coordinator reaches the nodes serving a table, and
//!   how nodes report results back (`InProcessCluster` for single-process
//!   deployments and tests).
//! - `node_service`: the per-node flatten service; merges identical
//!   in-flight requests into one computation.
//! - `coordinator`: `ensure_flattened`, the probe / trigger / wait state
//!   machine with retries inside a timeout budget.

pub mod coordinator;
pub mod node_service;
pub mod transport;

pub use coordinator::{ClusterFlattenCoordinator, CoordinatorStats, FlattenPhase, FlattenedOnCluster};
pub use node_service::{InMemoryTableProvider, LocalTableProvider, NodeFlattenService};
pub use transport::{
    ClusterTransport, FlattenNodeClient, FlattenNodeRequest, FlattenResultSink, InProcessCluster,
    TableTopology,
};
