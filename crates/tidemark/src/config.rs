//! Engine configuration and write-storage reconciliation.
//!
//! A [`Config`] owns the option set (driver, zone, granularities, identifier
//! mode, buffer policy) and lazily constructs the write path behind
//! [`Config::storage`]: the raw driver when buffering is disabled, otherwise
//! a buffer matching the current options. Option changes shut the stale
//! buffer down and build a fresh one.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferOptions};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::granularity::Granularity;
use crate::key::{IdentifierMode, Key};
use crate::ValueMap;

/// Granularities used when the configured list is `None`.
pub const DEFAULT_GRANULARITIES: [&str; 7] = ["1m", "1h", "1d", "1w", "1mo", "1q", "1y"];

/// Engine configuration.
///
/// Option fields are public and may be changed between calls; the write
/// path is reconciled on the next [`Config::storage`] call.
pub struct Config {
    /// Storage backend adapter. Required for writes and reads.
    pub driver: Option<Arc<dyn Driver>>,
    /// IANA zone name used for bucketing. Invalid names fall back to UTC
    /// and record the load error.
    pub time_zone: String,
    /// Week anchor for week-granularity bucketing.
    pub beginning_of_week: Weekday,
    /// Granularity list: `None` selects the defaults, an empty list
    /// disables writes entirely.
    pub granularities: Option<Vec<String>>,
    /// Delimiter for joined identifier strings.
    pub separator: String,
    /// Persisted identity layout.
    pub identifier_mode: IdentifierMode,
    /// Routes writes through a buffer when `true`.
    pub buffer_enabled: bool,
    /// Buffer flush period; zero disables time-triggered flushing.
    pub buffer_duration: Duration,
    /// Buffer size trigger; zero selects the default of 256.
    pub buffer_size: usize,
    /// Requests buffer coalescing (effective against count-aware drivers).
    pub buffer_aggregate: bool,
    /// Runs the buffer's background flush worker.
    pub buffer_async: bool,

    buffer: Mutex<Option<Arc<Buffer>>>,
    timezone_load_error: Mutex<Option<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: None,
            time_zone: "GMT".to_string(),
            beginning_of_week: Weekday::Mon,
            granularities: None,
            separator: "::".to_string(),
            identifier_mode: IdentifierMode::Full,
            buffer_enabled: true,
            buffer_duration: Duration::from_secs(1),
            buffer_size: 256,
            buffer_aggregate: true,
            buffer_async: true,
            buffer: Mutex::new(None),
            timezone_load_error: Mutex::new(None),
        }
    }
}

impl Config {
    /// Default configuration over a driver.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver: Some(driver),
            ..Self::default()
        }
    }

    /// Resolves the configured zone, falling back to UTC when the name does
    /// not load. The load error is retained for inspection.
    #[must_use]
    pub fn location(&self) -> Tz {
        if self.time_zone.is_empty() {
            return chrono_tz::UTC;
        }
        match Tz::from_str(&self.time_zone) {
            Ok(tz) => tz,
            Err(error) => {
                let mut slot = self.timezone_load_error.lock();
                if slot.is_none() {
                    warn!(zone = %self.time_zone, %error, "time zone failed to load, using UTC");
                    *slot = Some(error.to_string());
                }
                chrono_tz::UTC
            }
        }
    }

    /// The recorded zone load error, if [`Config::location`] ever fell back.
    #[must_use]
    pub fn timezone_load_error(&self) -> Option<String> {
        self.timezone_load_error.lock().clone()
    }

    /// The configured granularities, validity-filtered and deduplicated in
    /// first-seen order. `None` means the defaults; an empty list stays
    /// empty — invalid entries are skipped, never fatal.
    #[must_use]
    pub fn effective_granularities(&self) -> Vec<Granularity> {
        let defaults: Vec<String>;
        let base: &[String] = match &self.granularities {
            Some(list) => list,
            None => {
                defaults = DEFAULT_GRANULARITIES.iter().map(ToString::to_string).collect();
                &defaults
            }
        };

        let mut seen = std::collections::HashSet::new();
        base.iter()
            .filter(|raw| seen.insert(raw.as_str().to_string()))
            .filter_map(|raw| raw.parse::<Granularity>().ok())
            .collect()
    }

    /// The write path for the current options: the raw driver when
    /// buffering is disabled, otherwise a buffer matching the options. A
    /// stale buffer (options changed) is shut down and replaced.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when no driver is configured.
    pub async fn storage(&self) -> Result<WriteStorage> {
        let driver = self
            .driver
            .clone()
            .ok_or_else(|| Error::config("a storage driver is required"))?;

        let mut stale: Option<Arc<Buffer>> = None;
        let storage = {
            let mut slot = self.buffer.lock();
            if !self.buffer_enabled {
                stale = slot.take();
                WriteStorage::Direct(driver)
            } else if let Some(existing) = slot.as_ref().filter(|buffer| {
                buffer.matches(
                    &driver,
                    self.buffer_duration,
                    self.buffer_size,
                    self.buffer_aggregate,
                    self.buffer_async,
                )
            }) {
                WriteStorage::Buffered(Arc::clone(existing))
            } else {
                stale = slot.take();
                debug!(driver = %driver.description(), "building write buffer");
                let fresh = Buffer::new(
                    driver,
                    BufferOptions {
                        duration: self.buffer_duration,
                        size: self.buffer_size,
                        aggregate: self.buffer_aggregate,
                        async_flush: self.buffer_async,
                    },
                );
                *slot = Some(Arc::clone(&fresh));
                WriteStorage::Buffered(fresh)
            }
        };

        if let Some(old) = stale {
            if let Err(error) = old.shutdown().await {
                warn!(%error, "failed to shut down stale buffer");
            }
        }
        Ok(storage)
    }

    /// Flushes the current buffer, if one exists.
    pub async fn flush_buffer(&self) -> Result<()> {
        let buffer = self.buffer.lock().clone();
        match buffer {
            Some(buffer) => buffer.flush().await,
            None => Ok(()),
        }
    }

    /// Shuts the current buffer down (final flush included) and forgets it.
    /// Safe to call repeatedly and without a buffer.
    pub async fn shutdown_buffer(&self) -> Result<()> {
        let buffer = self.buffer.lock().take();
        match buffer {
            Some(buffer) => buffer.shutdown().await,
            None => Ok(()),
        }
    }

    /// Builds the bucketed write keys for a logical key at an instant, one
    /// per effective granularity.
    pub(crate) fn bucketed_keys(
        &self,
        key: &str,
        at: chrono::DateTime<chrono::Utc>,
        tracking_key: Option<&str>,
    ) -> Vec<Key> {
        let local = at.with_timezone(&self.location());
        self.effective_granularities()
            .iter()
            .map(|granularity| Key {
                key: key.to_string(),
                tracking_key: tracking_key.map(ToString::to_string),
                granularity: granularity.as_str().to_string(),
                at: Some(crate::bucket::floor(
                    local,
                    granularity.offset,
                    granularity.unit,
                    self.beginning_of_week,
                )),
                ..Key::default()
            })
            .collect()
    }
}

/// The write path handed out by [`Config::storage`].
#[derive(Clone)]
pub enum WriteStorage {
    /// Writes go straight to the driver.
    Direct(Arc<dyn Driver>),
    /// Writes are enqueued into a buffer.
    Buffered(Arc<Buffer>),
}

impl WriteStorage {
    /// Submits an increment.
    pub async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        match self {
            Self::Direct(driver) => driver.inc(keys, values).await,
            Self::Buffered(buffer) => buffer.inc(keys, values).await,
        }
    }

    /// Submits a set.
    pub async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        match self {
            Self::Direct(driver) => driver.set(keys, values).await,
            Self::Buffered(buffer) => buffer.set(keys, values).await,
        }
    }
}
