//! Scalar value types a column can hold.
//!
//! Each column resolves its `ColumnType` once; everything below that point
//! is generic over `ColumnValue`, so no code inspects types per value.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use strata_common::config::FlattenConfig;
use strata_common::types::ColumnType;

use crate::column::{AnyColumnShard, ColumnShard};

/// A value materialised out of a column, e.g. for printing rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Long(i64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Long(_) => ColumnType::Long,
            Value::Double(_) => ColumnType::Double,
            Value::String(_) => ColumnType::String,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

/// Behaviour shared by the three scalar column types.
pub trait ColumnValue: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    const COLUMN_TYPE: ColumnType;

    /// Total order used by dictionaries.
    fn compare(&self, other: &Self) -> Ordering;

    /// Value synthesized for entries that do not exist in a row.
    fn default_value(config: &FlattenConfig) -> Self;

    /// Value synthesized for absent entries of length columns.
    fn zero() -> Self;

    fn to_value(&self) -> Value;

    fn into_any(shard: ColumnShard<Self>) -> AnyColumnShard;

    fn from_any(shard: &AnyColumnShard) -> Option<&ColumnShard<Self>>;
}

impl ColumnValue for i64 {
    const COLUMN_TYPE: ColumnType = ColumnType::Long;

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn default_value(config: &FlattenConfig) -> Self {
        config.default_long
    }

    fn zero() -> Self {
        0
    }

    fn to_value(&self) -> Value {
        Value::Long(*self)
    }

    fn into_any(shard: ColumnShard<Self>) -> AnyColumnShard {
        AnyColumnShard::Long(shard)
    }

    fn from_any(shard: &AnyColumnShard) -> Option<&ColumnShard<Self>> {
        match shard {
            AnyColumnShard::Long(s) => Some(s),
            _ => None,
        }
    }
}

impl ColumnValue for f64 {
    const COLUMN_TYPE: ColumnType = ColumnType::Double;

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }

    fn default_value(config: &FlattenConfig) -> Self {
        config.default_double
    }

    fn zero() -> Self {
        0.0
    }

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn into_any(shard: ColumnShard<Self>) -> AnyColumnShard {
        AnyColumnShard::Double(shard)
    }

    fn from_any(shard: &AnyColumnShard) -> Option<&ColumnShard<Self>> {
        match shard {
            AnyColumnShard::Double(s) => Some(s),
            _ => None,
        }
    }
}

impl ColumnValue for String {
    const COLUMN_TYPE: ColumnType = ColumnType::String;

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn default_value(config: &FlattenConfig) -> Self {
        config.default_string.clone()
    }

    fn zero() -> Self {
        String::new()
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn into_any(shard: ColumnShard<Self>) -> AnyColumnShard {
        AnyColumnShard::String(shard)
    }

    fn from_any(shard: &AnyColumnShard) -> Option<&ColumnShard<Self>> {
        match shard {
            AnyColumnShard::String(s) => Some(s),
            _ => None,
        }
    }
}
