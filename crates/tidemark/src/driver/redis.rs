//! Redis backend over one hash per record.
//!
//! Records live under the full joined key; each packed path is a hash
//! field. Increments use the per-field atomic `HINCRBY`/`HINCRBYFLOAT`
//! commands (integral deltas take the integer command), so concurrent
//! writers to the same field never lose updates. Writes are ordered
//! primary-then-system since hashes have no transaction spanning keys.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::driver::{system_key_for, system_values, Driver};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::numeric::{parse_numeric_str, to_float};
use crate::packer::{pack, unpack};
use crate::ValueMap;

/// Driver for Redis hash storage. Full identifier mode only — the joined
/// key is the hash name.
#[derive(Clone)]
pub struct RedisDriver {
    connection: ConnectionManager,
    prefix: String,
    separator: String,
    system_tracking: bool,
}

impl RedisDriver {
    /// Wraps a connection manager with the default `tdm` key prefix.
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self::with_prefix(connection, "tdm")
    }

    /// Wraps a connection manager with a custom key prefix.
    #[must_use]
    pub fn with_prefix(connection: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            connection,
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

    fn record_key(&self, key: &Key) -> String {
        let mut scoped = key.clone();
        scoped.prefix = self.prefix.clone();
        scoped.join(&self.separator)
    }

    async fn increment_packed(&self, record_key: &str, packed: &ValueMap) -> Result<()> {
        let mut connection = self.connection.clone();
        for (field, value) in packed {
            let delta = to_float(value).ok_or_else(|| {
                Error::validation(format!("increment requires a numeric value for {field:?}"))
            })?;

            if delta.fract() == 0.0 {
                let _: i64 = redis::cmd("HINCRBY")
                    .arg(record_key)
                    .arg(field)
                    .arg(delta as i64)
                    .query_async(&mut connection)
                    .await?;
            } else {
                let _: f64 = redis::cmd("HINCRBYFLOAT")
                    .arg(record_key)
                    .arg(field)
                    .arg(delta)
                    .query_async(&mut connection)
                    .await?;
            }
        }
        Ok(())
    }

    async fn set_packed(&self, record_key: &str, packed: &ValueMap) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("HSET");
        command.arg(record_key);
        for (field, value) in packed {
            command.arg(field).arg(scalar_to_string(value));
        }
        let _: i64 = command.query_async(&mut connection).await?;
        Ok(())
    }

    async fn track_system(&self, key: &Key, count: i64) -> Result<()> {
        if !self.system_tracking {
            return Ok(());
        }
        let system_key = self.record_key(&system_key_for(key));
        self.increment_packed(&system_key, &system_values(key.system_tracking_key(), count))
            .await
    }
}

#[async_trait]
impl Driver for RedisDriver {
    async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.inc_count(keys, values, 1).await
    }

    async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.set_count(keys, values, 1).await
    }

    async fn inc_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let packed = pack(values);
        if packed.is_empty() {
            return Ok(());
        }
        let count = count.max(1);

        for key in keys {
            self.increment_packed(&self.record_key(key), &packed).await?;
            self.track_system(key, count).await?;
        }
        Ok(())
    }

    async fn set_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let packed = pack(values);
        if packed.is_empty() {
            return Ok(());
        }
        let count = count.max(1);

        for key in keys {
            self.set_packed(&self.record_key(key), &packed).await?;
            self.track_system(key, count).await?;
        }
        Ok(())
    }

    async fn get(&self, keys: &[Key]) -> Result<Vec<ValueMap>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = self.connection.clone();
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Vec<(String, String)> = redis::cmd("HGETALL")
                .arg(self.record_key(key))
                .query_async(&mut connection)
                .await?;

            let mut packed = ValueMap::new();
            for (field, value) in raw {
                packed.insert(field, parse_scalar(&value));
            }
            rows.push(unpack(&packed));
        }
        Ok(rows)
    }

    fn supports_count(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        "redis(full)".to_string()
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_scalar(value: &str) -> Value {
    match parse_numeric_str(value) {
        Some(number) => crate::numeric::float_value(number).unwrap_or_else(|| {
            Value::String(value.to_string())
        }),
        None => Value::String(value.to_string()),
    }
}
