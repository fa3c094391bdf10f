//! The public verbs: `track`, `assert`, `values`.
//!
//! A write expands into one bucketed key per effective granularity and is
//! submitted in a single call to the configured write storage (buffer or
//! raw driver). Reads expand a time range into a timeline of bucket
//! instants and always hit the raw driver, so they never observe unflushed
//! buffered writes.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::bucket;
use crate::config::Config;
use crate::driver::UNTRACKED_KEY;
use crate::error::{Error, Result};
use crate::granularity::Granularity;
use crate::key::Key;
use crate::merge::MergeOp;
use crate::ValueMap;

/// Per-call options for [`track`] and [`assert`].
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    tracking_key: Option<String>,
}

impl TrackOptions {
    /// Routes system tracking to the shared [`UNTRACKED_KEY`] source.
    #[must_use]
    pub fn untracked() -> Self {
        Self::with_tracking_key(UNTRACKED_KEY)
    }

    /// Records system tracking under `key` instead of the logical key.
    #[must_use]
    pub fn with_tracking_key(key: impl Into<String>) -> Self {
        Self {
            tracking_key: Some(key.into()),
        }
    }
}

/// A dense, aligned slice of a series: bucket instants paired with their
/// unpacked values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValuesResult {
    /// Bucket boundary instants, ascending, in the configured zone.
    pub at: Vec<DateTime<Tz>>,
    /// One unpacked value tree per instant; empty maps for blank buckets.
    pub values: Vec<ValueMap>,
}

/// Increments `values` for `key` across every effective granularity.
///
/// # Errors
///
/// `Error::Config` without a driver; `Error::Validation` for non-numeric
/// increment payloads (surfaced by the driver); backend errors pass
/// through.
pub async fn track(
    cfg: &Config,
    key: &str,
    at: DateTime<Utc>,
    values: &ValueMap,
) -> Result<()> {
    track_with(cfg, key, at, values, TrackOptions::default()).await
}

/// As [`track`], with per-call options.
pub async fn track_with(
    cfg: &Config,
    key: &str,
    at: DateTime<Utc>,
    values: &ValueMap,
    options: TrackOptions,
) -> Result<()> {
    write(cfg, key, at, values, MergeOp::Inc, options).await
}

/// Sets `values` for `key` across every effective granularity.
///
/// # Errors
///
/// `Error::Config` without a driver; backend errors pass through.
pub async fn assert(
    cfg: &Config,
    key: &str,
    at: DateTime<Utc>,
    values: &ValueMap,
) -> Result<()> {
    assert_with(cfg, key, at, values, TrackOptions::default()).await
}

/// As [`assert`], with per-call options.
pub async fn assert_with(
    cfg: &Config,
    key: &str,
    at: DateTime<Utc>,
    values: &ValueMap,
    options: TrackOptions,
) -> Result<()> {
    write(cfg, key, at, values, MergeOp::Set, options).await
}

async fn write(
    cfg: &Config,
    key: &str,
    at: DateTime<Utc>,
    values: &ValueMap,
    op: MergeOp,
    options: TrackOptions,
) -> Result<()> {
    let storage = cfg.storage().await?;
    let keys = cfg.bucketed_keys(key, at, options.tracking_key.as_deref());
    if keys.is_empty() {
        return Ok(());
    }

    match op {
        MergeOp::Inc => storage.inc(&keys, values).await,
        MergeOp::Set => storage.set(&keys, values).await,
    }
}

/// Reads the series for `key` between `from` and `to` at one granularity.
///
/// The range expands to the timeline of bucket boundaries containing both
/// endpoints; every bucket yields a row, empty maps for blanks unless
/// `skip_blanks` is set. Reads always go to the raw driver.
///
/// # Errors
///
/// `Error::Config` without a driver; `Error::Validation` for an invalid
/// granularity; backend errors fail the whole read — no partial series.
pub async fn values(
    cfg: &Config,
    key: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: &str,
    skip_blanks: bool,
) -> Result<ValuesResult> {
    let driver = cfg
        .driver
        .as_ref()
        .ok_or_else(|| Error::config("a storage driver is required"))?;
    let granularity: Granularity = granularity.parse()?;

    let tz = cfg.location();
    let timeline = bucket::timeline(
        from.with_timezone(&tz),
        to.with_timezone(&tz),
        granularity.offset,
        granularity.unit,
        cfg.beginning_of_week,
    );

    let keys: Vec<Key> = timeline
        .iter()
        .map(|at| Key::new(key, granularity.as_str()).at(*at))
        .collect();

    let rows = driver.get(&keys).await?;

    if skip_blanks {
        let mut result = ValuesResult::default();
        for (at, row) in timeline.into_iter().zip(rows) {
            if row.is_empty() {
                continue;
            }
            result.at.push(at);
            result.values.push(row);
        }
        return Ok(result);
    }

    Ok(ValuesResult {
        at: timeline,
        values: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;
    use crate::driver::{Driver, SYSTEM_KEY};
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn as_map(value: Value) -> ValueMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn direct_config(driver: Arc<MemoryDriver>) -> Config {
        let mut cfg = Config::new(driver);
        cfg.time_zone = "UTC".to_string();
        cfg.buffer_enabled = false;
        cfg.granularities = Some(vec!["1h".to_string()]);
        cfg
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 11, 35, 0).unwrap()
    }

    #[tokio::test]
    async fn track_writes_every_configured_granularity() {
        let driver = Arc::new(MemoryDriver::new());
        let mut cfg = direct_config(driver.clone());
        cfg.granularities = Some(vec![
            "1h".to_string(),
            "1d".to_string(),
            "invalid".to_string(),
            "1h".to_string(),
        ]);

        track(&cfg, "events", at(), &as_map(json!({"count": 1})))
            .await
            .unwrap();

        let hour = values(&cfg, "events", at(), at(), "1h", false).await.unwrap();
        assert_eq!(hour.values[0].get("count"), Some(&json!(1.0)));

        let day = values(&cfg, "events", at(), at(), "1d", false).await.unwrap();
        assert_eq!(day.values[0].get("count"), Some(&json!(1.0)));

        // The minute granularity was not configured, so its bucket is blank.
        let minute = values(&cfg, "events", at(), at(), "1m", false).await.unwrap();
        assert!(minute.values[0].is_empty());
    }

    #[tokio::test]
    async fn empty_granularity_list_writes_nothing() {
        let driver = Arc::new(MemoryDriver::new());
        let mut cfg = direct_config(driver.clone());
        cfg.granularities = Some(Vec::new());

        track(&cfg, "events", at(), &as_map(json!({"count": 1})))
            .await
            .unwrap();
        assert!(driver.is_empty());
    }

    #[tokio::test]
    async fn assert_sets_and_preserves_siblings() {
        let driver = Arc::new(MemoryDriver::new());
        let cfg = direct_config(driver);

        track(
            &cfg,
            "events",
            at(),
            &as_map(json!({"count": 1, "meta": {"duration": 2}})),
        )
        .await
        .unwrap();
        assert_with(
            &cfg,
            "events",
            at(),
            &as_map(json!({"count": 5})),
            TrackOptions::default(),
        )
        .await
        .unwrap();

        let result = values(&cfg, "events", at(), at(), "1h", false).await.unwrap();
        assert_eq!(
            Value::Object(result.values[0].clone()),
            json!({"count": 5, "meta": {"duration": 2.0}})
        );
    }

    #[tokio::test]
    async fn untracked_routes_system_tracking_to_the_shared_source() {
        let driver = Arc::new(MemoryDriver::new());
        let cfg = direct_config(driver.clone());

        track_with(
            &cfg,
            "events",
            at(),
            &as_map(json!({"count": 1})),
            TrackOptions::untracked(),
        )
        .await
        .unwrap();

        let bucket_at = cfg.location().with_ymd_and_hms(2025, 2, 1, 11, 0, 0).unwrap();
        let system = Key::new(SYSTEM_KEY, "1h").at(bucket_at);
        let rows = driver.get(&[system]).await.unwrap();
        let keys = rows[0].get("keys").and_then(Value::as_object).unwrap();
        assert_eq!(keys.get(UNTRACKED_KEY), Some(&json!(1.0)));
        assert!(!keys.contains_key("events"));
    }

    #[tokio::test]
    async fn values_skips_blanks_when_asked() {
        let driver = Arc::new(MemoryDriver::new());
        let cfg = direct_config(driver);

        track(&cfg, "events", at(), &as_map(json!({"count": 1})))
            .await
            .unwrap();

        let from = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 2, 1, 11, 0, 0).unwrap();

        let with_blanks = values(&cfg, "events", from, to, "1h", false).await.unwrap();
        assert_eq!(with_blanks.values.len(), 2);
        assert!(with_blanks.values[0].is_empty());

        let dense = values(&cfg, "events", from, to, "1h", true).await.unwrap();
        assert_eq!(dense.values.len(), 1);
        assert_eq!(dense.at.len(), 1);
        assert_eq!(dense.values[0].get("count"), Some(&json!(1.0)));
    }

    #[tokio::test]
    async fn values_rejects_invalid_granularities() {
        let driver = Arc::new(MemoryDriver::new());
        let cfg = direct_config(driver);

        let result = values(&cfg, "events", at(), at(), "invalid", false).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn missing_driver_is_a_config_error() {
        let cfg = Config::default();
        let result = track(&cfg, "events", at(), &as_map(json!({"count": 1}))).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn buffered_writes_stay_invisible_until_flush() {
        let driver = Arc::new(MemoryDriver::new());
        let mut cfg = Config::new(driver);
        cfg.time_zone = "UTC".to_string();
        cfg.granularities = Some(vec!["1h".to_string()]);
        cfg.buffer_enabled = true;
        cfg.buffer_size = 100;
        cfg.buffer_duration = Duration::ZERO;
        cfg.buffer_async = false;
        cfg.buffer_aggregate = false;

        track(&cfg, "events", at(), &as_map(json!({"count": 1})))
            .await
            .unwrap();

        let before = values(&cfg, "events", at(), at(), "1h", false).await.unwrap();
        assert!(before.values[0].is_empty());

        cfg.flush_buffer().await.unwrap();

        let after = values(&cfg, "events", at(), at(), "1h", false).await.unwrap();
        assert_eq!(after.values[0].get("count"), Some(&json!(1.0)));

        cfg.shutdown_buffer().await.unwrap();
    }
}
