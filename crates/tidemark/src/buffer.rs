//! Size- and time-triggered write coalescing.
//!
//! The buffer sits between the orchestration layer and a driver, batching
//! writes and optionally merging semantically equivalent ones. Aggregated
//! actions remember how many logical calls they absorbed so the driver's
//! system-tracking counts stay exact.
//!
//! Locking: one mutex guards the queue and the closed flag. Dispatch to the
//! driver always happens outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::merge::MergeOp;
use crate::numeric::{float_value, to_float};
use crate::ValueMap;

const DEFAULT_SIZE: usize = 256;

/// Buffer construction parameters.
///
/// A zero `duration` disables time-triggered flushing (and with it the
/// background worker); a zero `size` selects the default of 256.
#[derive(Debug, Clone, Copy)]
pub struct BufferOptions {
    /// Tick period of the background flush worker.
    pub duration: Duration,
    /// Logical operation count that triggers a synchronous flush.
    pub size: usize,
    /// Requests signature coalescing; effective only against count-aware
    /// drivers.
    pub aggregate: bool,
    /// Runs the background worker (requires a positive duration).
    pub async_flush: bool,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(1),
            size: DEFAULT_SIZE,
            aggregate: true,
            async_flush: true,
        }
    }
}

#[derive(Debug, Clone)]
struct BufferedAction {
    op: MergeOp,
    keys: Vec<Key>,
    values: ValueMap,
    count: i64,
}

#[derive(Default)]
struct QueueState {
    by_signature: HashMap<String, BufferedAction>,
    linear: Vec<BufferedAction>,
    operation_count: usize,
    closed: bool,
}

struct WorkerHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A write buffer over a driver.
pub struct Buffer {
    driver: Arc<dyn Driver>,
    duration: Duration,
    size: usize,
    aggregate: bool,
    async_flush: bool,
    state: Mutex<QueueState>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl Buffer {
    /// Creates a buffer over `driver`, spawning the background worker when
    /// `async_flush` is set and the duration is positive.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, options: BufferOptions) -> Arc<Self> {
        let aggregate = options.aggregate && driver.supports_count();
        let buffer = Arc::new(Self {
            driver,
            duration: options.duration,
            size: normalize_size(options.size),
            aggregate,
            async_flush: options.async_flush,
            state: Mutex::new(QueueState::default()),
            worker: Mutex::new(None),
        });
        if buffer.async_flush && !buffer.duration.is_zero() {
            Self::start_worker(&buffer);
        }
        buffer
    }

    /// Whether signature coalescing is in effect.
    #[must_use]
    pub fn aggregates(&self) -> bool {
        self.aggregate
    }

    /// Enqueues an increment.
    ///
    /// # Errors
    ///
    /// Returns `Error::BufferClosed` after shutdown; a size-triggered flush
    /// propagates the driver's first error.
    pub async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.enqueue(MergeOp::Inc, keys, values).await
    }

    /// Enqueues a set.
    ///
    /// # Errors
    ///
    /// Returns `Error::BufferClosed` after shutdown; a size-triggered flush
    /// propagates the driver's first error.
    pub async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.enqueue(MergeOp::Set, keys, values).await
    }

    /// Drains the queue and replays every action against the driver,
    /// returning the first error.
    pub async fn flush(&self) -> Result<()> {
        let actions = self.drain();
        if actions.is_empty() {
            return Ok(());
        }
        debug!(actions = actions.len(), "flushing buffered writes");
        for action in actions {
            self.dispatch(action).await?;
        }
        Ok(())
    }

    /// Marks the buffer closed, stops and joins the worker, then performs a
    /// final flush. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let already_closed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.closed, true)
        };
        if already_closed {
            return Ok(());
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(true);
            let _ = worker.handle.await;
        }
        self.flush().await
    }

    /// Whether this buffer was built from the given driver and options.
    /// Used by configuration reconciliation.
    #[must_use]
    pub fn matches(
        &self,
        driver: &Arc<dyn Driver>,
        duration: Duration,
        size: usize,
        aggregate: bool,
        async_flush: bool,
    ) -> bool {
        Arc::ptr_eq(&self.driver, driver)
            && self.duration == duration
            && self.size == normalize_size(size)
            && self.aggregate == (aggregate && driver.supports_count())
            && self.async_flush == async_flush
    }

    async fn enqueue(&self, op: MergeOp, keys: &[Key], values: &ValueMap) -> Result<()> {
        if keys.is_empty() || values.is_empty() {
            return Ok(());
        }

        let should_flush = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::BufferClosed);
            }
            store_action(&mut state, op, keys, values, self.aggregate);
            state.operation_count >= self.size
        };

        if should_flush {
            self.flush().await
        } else {
            Ok(())
        }
    }

    fn drain(&self) -> Vec<BufferedAction> {
        let mut state = self.state.lock();
        if state.operation_count == 0 {
            return Vec::new();
        }
        state.operation_count = 0;
        let mut actions: Vec<BufferedAction> = state.by_signature.drain().map(|(_, a)| a).collect();
        actions.append(&mut state.linear);
        actions
    }

    async fn dispatch(&self, action: BufferedAction) -> Result<()> {
        let count = action.count.max(1);
        if self.driver.supports_count() {
            return match action.op {
                MergeOp::Inc => {
                    self.driver
                        .inc_count(&action.keys, &action.values, count)
                        .await
                }
                MergeOp::Set => {
                    self.driver
                        .set_count(&action.keys, &action.values, count)
                        .await
                }
            };
        }

        // Repeat over the simple surface so system tracking still sees every
        // logical call.
        for _ in 0..count {
            match action.op {
                MergeOp::Inc => self.driver.inc(&action.keys, &action.values).await?,
                MergeOp::Set => self.driver.set(&action.keys, &action.values).await?,
            }
        }
        Ok(())
    }

    fn start_worker(buffer: &Arc<Self>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(buffer);
        let period = buffer.duration;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(buffer) = weak.upgrade() else { break };
                        if let Err(error) = buffer.flush().await {
                            warn!(%error, "background buffer flush failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        *buffer.worker.lock() = Some(WorkerHandle {
            stop: stop_tx,
            handle,
        });
    }
}

fn store_action(state: &mut QueueState, op: MergeOp, keys: &[Key], values: &ValueMap, aggregate: bool) {
    state.operation_count += 1;

    if aggregate {
        let signature = signature(op, keys);
        if let Some(existing) = state.by_signature.get_mut(&signature) {
            match op {
                MergeOp::Inc => merge_increment(&mut existing.values, values),
                MergeOp::Set => existing.values = values.clone(),
            }
            existing.count += 1;
            return;
        }
        state.by_signature.insert(
            signature,
            BufferedAction {
                op,
                keys: keys.to_vec(),
                values: values.clone(),
                count: 1,
            },
        );
        return;
    }

    state.linear.push(BufferedAction {
        op,
        keys: keys.to_vec(),
        values: values.clone(),
        count: 1,
    });
}

/// Derives the coalescing signature for an operation over a key set.
fn signature(op: MergeOp, keys: &[Key]) -> String {
    let mut parts = Vec::with_capacity(keys.len() + 1);
    parts.push(op.as_str().to_string());
    for key in keys {
        let at = key
            .at
            .map(|at| at.timestamp().to_string())
            .unwrap_or_default();
        parts.push(
            [
                key.prefix.as_str(),
                key.key.as_str(),
                key.granularity.as_str(),
                at.as_str(),
                key.system_tracking_key(),
            ]
            .join(":"),
        );
    }
    parts.join("|")
}

/// Numerically sums `incoming` into `current`, recursing through nested
/// maps. Non-numeric leaves replace the existing value.
fn merge_increment(current: &mut ValueMap, incoming: &ValueMap) {
    for (key, value) in incoming {
        match value {
            Value::Object(nested) => {
                let entry = current
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(ValueMap::new()));
                if !entry.is_object() {
                    *entry = Value::Object(ValueMap::new());
                }
                if let Value::Object(existing) = entry {
                    merge_increment(existing, nested);
                }
            }
            leaf => {
                let next = match to_float(leaf) {
                    Some(delta) => {
                        let base = current.get(key).and_then(to_float).unwrap_or(0.0);
                        float_value(base + delta).unwrap_or_else(|| leaf.clone())
                    }
                    None => leaf.clone(),
                };
                current.insert(key.clone(), next);
            }
        }
    }
}

fn normalize_size(size: usize) -> usize {
    if size == 0 {
        DEFAULT_SIZE
    } else {
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct RecordedWrite {
        op: MergeOp,
        keys: Vec<Key>,
        values: ValueMap,
        count: i64,
    }

    /// Test double capturing every dispatch; count-awareness is togglable
    /// to exercise both queue shapes.
    struct RecordingDriver {
        count_aware: bool,
        writes: Mutex<Vec<RecordedWrite>>,
    }

    impl RecordingDriver {
        fn count_aware() -> Arc<Self> {
            Arc::new(Self {
                count_aware: true,
                writes: Mutex::new(Vec::new()),
            })
        }

        fn simple() -> Arc<Self> {
            Arc::new(Self {
                count_aware: false,
                writes: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, op: MergeOp, keys: &[Key], values: &ValueMap, count: i64) {
            self.writes.lock().push(RecordedWrite {
                op,
                keys: keys.to_vec(),
                values: values.clone(),
                count,
            });
        }

        fn snapshot(&self) -> Vec<RecordedWrite> {
            self.writes.lock().clone()
        }
    }

    #[async_trait]
    impl Driver for RecordingDriver {
        async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
            self.record(MergeOp::Inc, keys, values, 1);
            Ok(())
        }

        async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
            self.record(MergeOp::Set, keys, values, 1);
            Ok(())
        }

        async fn inc_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
            self.record(MergeOp::Inc, keys, values, count);
            Ok(())
        }

        async fn set_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
            self.record(MergeOp::Set, keys, values, count);
            Ok(())
        }

        async fn get(&self, keys: &[Key]) -> Result<Vec<ValueMap>> {
            Ok(keys.iter().map(|_| ValueMap::new()).collect())
        }

        fn supports_count(&self) -> bool {
            self.count_aware
        }

        fn description(&self) -> String {
            "recording".to_string()
        }
    }

    fn as_map(value: serde_json::Value) -> ValueMap {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn event_key() -> Key {
        let at: chrono::DateTime<Tz> = chrono_tz::UTC
            .with_ymd_and_hms(2025, 2, 1, 10, 0, 0)
            .single()
            .expect("valid test instant");
        Key::new("metric", "1h").at(at)
    }

    fn sync_options(size: usize, aggregate: bool) -> BufferOptions {
        BufferOptions {
            duration: Duration::ZERO,
            size,
            aggregate,
            async_flush: false,
        }
    }

    #[tokio::test]
    async fn flushes_when_queue_reaches_size() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver.clone(), sync_options(2, false));

        let key = event_key();
        buffer.inc(&[key.clone()], &as_map(json!({"count": 1}))).await.unwrap();
        buffer.inc(&[key], &as_map(json!({"count": 2}))).await.unwrap();

        let writes = driver.snapshot();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.op == MergeOp::Inc));

        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn aggregates_increments_and_preserves_multiplicity() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver.clone(), sync_options(10, true));

        let key = event_key();
        buffer
            .inc(&[key.clone()], &as_map(json!({"count": 1, "nested": {"requests": 1}})))
            .await
            .unwrap();
        buffer
            .inc(&[key], &as_map(json!({"count": 2, "nested": {"requests": 3}})))
            .await
            .unwrap();
        buffer.flush().await.unwrap();

        let writes = driver.snapshot();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].count, 2);
        assert_eq!(
            serde_json::Value::Object(writes[0].values.clone()),
            json!({"count": 3.0, "nested": {"requests": 4.0}})
        );

        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn aggregated_set_keeps_the_last_value() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver.clone(), sync_options(10, true));

        let key = event_key();
        buffer
            .set(&[key.clone()], &as_map(json!({"state": "processing"})))
            .await
            .unwrap();
        buffer
            .set(&[key], &as_map(json!({"state": "done", "detail": {"attempts": 3}})))
            .await
            .unwrap();
        buffer.flush().await.unwrap();

        let writes = driver.snapshot();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].op, MergeOp::Set);
        assert_eq!(writes[0].count, 2);
        assert_eq!(writes[0].values.get("state"), Some(&json!("done")));

        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn distinct_signatures_do_not_coalesce() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver.clone(), sync_options(10, true));

        let plain = event_key();
        let mut untracked = event_key();
        untracked.tracking_key = Some("__untracked__".to_string());

        buffer.inc(&[plain], &as_map(json!({"count": 1}))).await.unwrap();
        buffer.inc(&[untracked], &as_map(json!({"count": 1}))).await.unwrap();
        buffer.flush().await.unwrap();

        assert_eq!(driver.snapshot().len(), 2);
        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn background_worker_flushes_on_duration() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(
            driver.clone(),
            BufferOptions {
                duration: Duration::from_millis(40),
                size: 10,
                aggregate: false,
                async_flush: true,
            },
        );

        buffer
            .inc(&[event_key()], &as_map(json!({"count": 1})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(driver.snapshot().len(), 1);
        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_flushes_outstanding_writes() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver.clone(), sync_options(10, false));

        buffer
            .inc(&[event_key()], &as_map(json!({"count": 7})))
            .await
            .unwrap();
        buffer.shutdown().await.unwrap();

        let writes = driver.snapshot();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].count, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver, sync_options(10, false));
        buffer.shutdown().await.unwrap();
        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn closed_buffer_rejects_enqueue() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver, sync_options(10, false));
        buffer.shutdown().await.unwrap();

        let result = buffer.inc(&[event_key()], &as_map(json!({"count": 1}))).await;
        assert!(matches!(result, Err(Error::BufferClosed)));
    }

    #[tokio::test]
    async fn non_count_driver_disables_aggregation_and_replays() {
        let driver = RecordingDriver::simple();
        let buffer = Buffer::new(driver.clone(), sync_options(2, true));

        assert!(!buffer.aggregates());

        let key = event_key();
        buffer.inc(&[key.clone()], &as_map(json!({"count": 1}))).await.unwrap();
        buffer.inc(&[key], &as_map(json!({"count": 2}))).await.unwrap();

        // Size trigger dispatched both queued actions over the simple
        // surface, one call each.
        let writes = driver.snapshot();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.count == 1));

        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn empty_enqueues_are_ignored() {
        let driver = RecordingDriver::count_aware();
        let buffer = Buffer::new(driver.clone(), sync_options(1, false));

        buffer.inc(&[], &as_map(json!({"count": 1}))).await.unwrap();
        buffer.inc(&[event_key()], &ValueMap::new()).await.unwrap();
        buffer.flush().await.unwrap();

        assert!(driver.snapshot().is_empty());
        buffer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn matches_compares_normalized_options_and_driver_identity() {
        let driver = RecordingDriver::count_aware();
        let handle: Arc<dyn Driver> = driver;
        let buffer = Buffer::new(
            handle.clone(),
            BufferOptions {
                duration: Duration::ZERO,
                size: 0,
                aggregate: true,
                async_flush: false,
            },
        );

        // Zero size normalizes to the default.
        assert!(buffer.matches(&handle, Duration::ZERO, 0, true, false));
        assert!(buffer.matches(&handle, Duration::ZERO, DEFAULT_SIZE, true, false));
        assert!(!buffer.matches(&handle, Duration::ZERO, 10, true, false));
        assert!(!buffer.matches(&handle, Duration::from_secs(1), 0, true, false));

        let other: Arc<dyn Driver> = RecordingDriver::count_aware();
        assert!(!buffer.matches(&other, Duration::ZERO, 0, true, false));

        buffer.shutdown().await.unwrap();
    }
}
