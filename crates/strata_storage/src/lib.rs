//! Columnar, dictionary-encoded table storage and table flattening.
//!
//! Tables are split into shards (row ranges); a shard holds one column shard
//! per column, each with a sorted value dictionary and pages of compressed
//! dictionary ids. Nested documents are stored with repeated-field column
//! names (`a[0].b`, `a[length]`); `flatten` turns every entry of a repeated
//! field into its own row and `flatten_cache` avoids doing that twice.

pub mod column;
pub mod dictionary;
pub mod flatten;
pub mod flatten_cache;
pub mod ids;
pub mod loader;
pub mod page;
pub mod pattern;
pub mod repeated;
pub mod shard;
pub mod table;
pub mod value;

pub use column::{AnyColumnShard, ColumnShard};
pub use dictionary::Dictionary;
pub use flatten::Flattener;
pub use flatten_cache::{FlattenCacheManager, FlattenOutcome, FlattenSource};
pub use shard::{TableShard, TableShardBuilder};
pub use table::{FlattenedTable, FlattenedTableBuilder, Table, TableOrigin};
pub use value::{ColumnValue, Value};
