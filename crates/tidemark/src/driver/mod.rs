//! The storage backend contract and its adapters.
//!
//! A driver translates `(keys, values, operation)` into backend-native
//! atomic upserts and performs the system-tracking side write. One adapter
//! exists per backend family: in-memory and Redis hashes for the key-value
//! family, Postgres JSONB for the relational family, MongoDB documents for
//! the document family.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::key::Key;
use crate::ValueMap;

pub mod memory;

#[cfg(feature = "mongo")]
pub mod mongo;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

/// Reserved logical key for the per-bucket system-tracking record.
///
/// A user key equal to this name is indistinguishable from the system
/// record; callers must not use it.
pub const SYSTEM_KEY: &str = "__system__key__";

/// Reserved system-tracking source that merges all opted-out callers into
/// one counter.
pub const UNTRACKED_KEY: &str = "__untracked__";

/// A storage backend adapter.
///
/// `values` arrive as nested trees; drivers flatten them with
/// [`crate::packer::pack`] before writing. Multi-key writes execute inside
/// one backend transaction where the backend has one; failures surface
/// verbatim and are never retried internally.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Increments each packed path of `values` under every key, then
    /// records system tracking.
    async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()>;

    /// Sets each packed path of `values` under every key (preserving
    /// unmentioned paths), then records system tracking.
    async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()>;

    /// As [`Driver::inc`], with the system-tracking delta set to `count`.
    ///
    /// The default implementation repeats [`Driver::inc`]; count-aware
    /// drivers override it with a single write.
    async fn inc_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        for _ in 0..count.max(1) {
            self.inc(keys, values).await?;
        }
        Ok(())
    }

    /// As [`Driver::set`], with the system-tracking delta set to `count`.
    async fn set_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        for _ in 0..count.max(1) {
            self.set(keys, values).await?;
        }
        Ok(())
    }

    /// Fetches one unpacked value tree per key, in request order. Missing
    /// records yield empty maps.
    async fn get(&self, keys: &[Key]) -> Result<Vec<ValueMap>>;

    /// Whether the driver implements the count-aware write surface
    /// natively. Buffers disable aggregation against drivers that do not.
    fn supports_count(&self) -> bool {
        false
    }

    /// Stable human-readable identifier, including the identifier mode.
    fn description(&self) -> String;
}

/// The packed system-tracking payload: `count` plus a per-source counter.
#[must_use]
pub(crate) fn system_values(source: &str, count: i64) -> ValueMap {
    let mut out = ValueMap::new();
    out.insert("count".to_string(), Value::from(count));
    out.insert(format!("keys.{source}"), Value::from(count));
    out
}

/// The system-record key paired with a primary key's bucket.
#[must_use]
pub(crate) fn system_key_for(key: &Key) -> Key {
    Key {
        prefix: key.prefix.clone(),
        key: SYSTEM_KEY.to_string(),
        tracking_key: None,
        granularity: key.granularity.clone(),
        at: key.at,
    }
}
