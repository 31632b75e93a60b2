use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Row identifier. Shards cover contiguous ranges `[lowest, lowest + rows)`.
pub type RowId = i64;

/// Dense identifier of a value inside a column dictionary.
pub type ColumnValueId = i64;

/// Unique identifier for a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Identifier of one cluster-wide flatten request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn random() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

/// Identifier of one flattening result instance.
///
/// A computation started by request `r` produces flatten id `r`; merged
/// requests observe the id of the computation they were attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlattenId(pub Uuid);

impl FlattenId {
    pub fn random() -> Self {
        FlattenId(Uuid::new_v4())
    }
}

impl From<RequestId> for FlattenId {
    fn from(r: RequestId) -> Self {
        FlattenId(r.0)
    }
}

impl fmt::Display for FlattenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flat:{}", self.0)
    }
}

/// Scalar type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Long,
    String,
    Double,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Long => write!(f, "LONG"),
            ColumnType::String => write!(f, "STRING"),
            ColumnType::Double => write!(f, "DOUBLE"),
        }
    }
}
