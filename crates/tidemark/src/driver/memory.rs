//! In-process hash-store backend.
//!
//! Keeps one packed record per full joined key behind a
//! [`parking_lot::RwLock`]. Shares the key-value-hash layout with the Redis
//! adapter, which makes it the natural embedded backend and the test
//! workhorse for everything above the driver seam.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::driver::{system_key_for, system_values, Driver};
use crate::error::Result;
use crate::key::Key;
use crate::merge::{merge_packed, MergeOp};
use crate::packer::{pack, unpack};
use crate::ValueMap;

/// In-memory driver storing packed records keyed by the full joined key.
#[derive(Debug)]
pub struct MemoryDriver {
    records: RwLock<HashMap<String, ValueMap>>,
    prefix: String,
    separator: String,
    system_tracking: bool,
}

impl MemoryDriver {
    /// Creates an empty in-memory store with the default `tdm` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix("tdm")
    }

    /// Creates an empty in-memory store with a custom key prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            prefix: prefix.into(),
            separator: "::".to_string(),
            system_tracking: true,
        }
    }

    /// Disables the system-tracking side writes.
    #[must_use]
    pub fn without_system_tracking(mut self) -> Self {
        self.system_tracking = false;
        self
    }

    /// Number of stored records, system records included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn joined(&self, key: &Key) -> String {
        let mut scoped = key.clone();
        scoped.prefix = self.prefix.clone();
        scoped.join(&self.separator)
    }

    fn write(&self, keys: &[Key], values: &ValueMap, op: MergeOp, count: i64) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let packed = pack(values);
        if packed.is_empty() {
            return Ok(());
        }

        let count = count.max(1);
        let mut records = self.records.write();
        for key in keys {
            let slot = self.joined(key);
            let existing = records.get(&slot).cloned().unwrap_or_default();
            let merged = merge_packed(&existing, &packed, op)?;
            records.insert(slot, merged);

            if self.system_tracking {
                let system_slot = self.joined(&system_key_for(key));
                let existing = records.get(&system_slot).cloned().unwrap_or_default();
                let merged = merge_packed(
                    &existing,
                    &system_values(key.system_tracking_key(), count),
                    MergeOp::Inc,
                )?;
                records.insert(system_slot, merged);
            }
        }
        Ok(())
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.write(keys, values, MergeOp::Inc, 1)
    }

    async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.write(keys, values, MergeOp::Set, 1)
    }

    async fn inc_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        self.write(keys, values, MergeOp::Inc, count)
    }

    async fn set_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        self.write(keys, values, MergeOp::Set, count)
    }

    async fn get(&self, keys: &[Key]) -> Result<Vec<ValueMap>> {
        let records = self.records.read();
        Ok(keys
            .iter()
            .map(|key| {
                records
                    .get(&self.joined(key))
                    .map(unpack)
                    .unwrap_or_default()
            })
            .collect())
    }

    fn supports_count(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        "memory(full)".to_string()
    }
}
