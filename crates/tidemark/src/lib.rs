//! Time-series metrics over ordinary row and document stores.
#![forbid(unsafe_code)]
//!
//! `tidemark` turns a relational table with a JSON column, a key-value hash
//! store, or a document collection into a bucketed metrics store. A caller
//! emits observations against a logical key at an instant; the engine writes
//! one record per configured granularity bucket (minute, hour, day, week,
//! month, quarter, year) so that range queries return a dense, aligned
//! series without a dedicated TSDB.
//!
//! # Features
//!
//! - **Calendar-aware bucketing**: deterministic flooring and stepping in an
//!   IANA time zone, with a configurable week anchor
//! - **Packed merge**: nested value trees flatten to dotted paths and merge
//!   by increment or set semantics with per-key atomicity
//! - **Write buffering**: size- and time-triggered coalescing that preserves
//!   operation multiplicity for exact system tracking
//! - **Pluggable backends**: in-memory always; Postgres, Redis and MongoDB
//!   adapters behind the `postgres`, `redis` and `mongo` features
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use serde_json::json;
//! use tidemark::{track, values, Config, MemoryDriver, ValueMap};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tidemark::Result<()> {
//! let mut cfg = Config::new(Arc::new(MemoryDriver::new()));
//! cfg.time_zone = "UTC".to_string();
//! cfg.buffer_enabled = false;
//!
//! let mut payload = ValueMap::new();
//! payload.insert("count".to_string(), json!(1));
//!
//! let now = Utc::now();
//! track(&cfg, "page_views", now, &payload).await?;
//!
//! let series = values(&cfg, "page_views", now, now, "1h", false).await?;
//! assert_eq!(series.values.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod aggregate;
pub mod bucket;
pub mod buffer;
pub mod config;
pub mod designator;
pub mod driver;
pub mod error;
pub mod format;
pub mod granularity;
pub mod key;
pub mod merge;
pub mod numeric;
pub mod ops;
pub mod packer;
pub mod paths;
pub mod series;
pub mod transform;

/// A heterogeneous value tree with string keys.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

// Re-export the main types at the crate root.
pub use buffer::{Buffer, BufferOptions};
pub use config::{Config, WriteStorage, DEFAULT_GRANULARITIES};
pub use driver::memory::MemoryDriver;
pub use driver::{Driver, SYSTEM_KEY, UNTRACKED_KEY};
pub use error::{Error, Result};
pub use granularity::{Granularity, Unit};
pub use key::{Identifier, IdentifierMode, Key};
pub use merge::MergeOp;
pub use numeric::to_float;
pub use ops::{assert, assert_with, track, track_with, values, TrackOptions, ValuesResult};
pub use packer::{pack, unpack};
pub use series::Series;

#[cfg(feature = "mongo")]
pub use driver::mongo::MongoDriver;
#[cfg(feature = "postgres")]
pub use driver::postgres::PostgresDriver;
#[cfg(feature = "redis")]
pub use driver::redis::RedisDriver;
