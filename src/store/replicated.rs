//! Log-backed replicated map.
//!
//! A [`ReplicatedStore`] mirrors one compacted topic into a local map. One
//! dedicated thread per store owns every log read, every map mutation and
//! every observer dispatch; caller threads only read the map or append to
//! the log.
//!
//! # Read-your-writes
//!
//! `put`/`remove` append through the transport, wait for the broker
//! acknowledgement, then block until the tailing thread has consumed the
//! acknowledged offset. When they return, the local map already reflects the
//! write.
//!
//! # Dispatch
//!
//! For each consumed record, after the map is updated:
//!
//! | before            | record    | callback         |
//! |-------------------|-----------|------------------|
//! | absent/tombstoned | value     | `handle_new`     |
//! | present           | value     | `handle_update`  |
//! | present           | tombstone | `handle_remove`  |
//! | absent/tombstoned | tombstone | none             |
//!
//! Legacy no-op records are skipped without dispatch. Any other decode
//! failure, and any transport failure, stops the store for good.

use super::observer::SharedObserver;
use super::serializer::Serializer;
use crate::changelog::{LogPosition, LogRecord, LogTransport};
use crate::core::error::{SerializationError, StoreError, StoreResult};
use crate::core::time::SharedClock;
use parking_lot::{Condvar, Mutex, RwLock};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Store tuning.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on how long a write waits to become locally visible.
    pub sync_timeout: Duration,
    /// How long one poll of the log may block.
    pub poll_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_millis(100),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Records applied to the local map.
    pub records_applied: u64,
    /// Legacy no-op records skipped.
    pub legacy_skipped: u64,
    /// Tombstones applied.
    pub tombstones: u64,
    /// Keys currently holding a value.
    pub live_keys: usize,
    /// Clock time of the last applied record.
    pub last_record_at_ms: Option<u64>,
    /// Whether the initial replay has completed.
    pub caught_up: bool,
}

#[derive(Debug, Default)]
struct Progress {
    /// Next offset to consume, per partition.
    consumed: HashMap<i32, i64>,
    /// End offsets observed when tailing started.
    catch_up_target: Option<HashMap<i32, i64>>,
    caught_up: bool,
    failure: Option<StoreError>,
    stopped: bool,
}

impl Progress {
    fn reached(&self, partition: i32, offset: i64) -> bool {
        self.consumed.get(&partition).copied().unwrap_or(0) > offset
    }

    /// An empty poll means the reader sits at the head of every partition.
    /// It stands in for the end offsets only once every target partition
    /// has delivered a record, since compaction or transaction markers can
    /// leave the last offsets unreachable. Before that, an empty fetch may
    /// just be a slow broker.
    fn idle_poll(&mut self) {
        if self.caught_up {
            return;
        }
        if let Some(target) = &self.catch_up_target {
            self.caught_up = target.keys().all(|p| self.consumed.contains_key(p));
        }
    }

    fn evaluate_catch_up(&mut self) {
        if self.caught_up {
            return;
        }
        if let Some(target) = &self.catch_up_target {
            self.caught_up = target
                .iter()
                .all(|(partition, end)| *end == 0 || self.reached(*partition, end - 1));
        }
    }
}

/// Partitions replay has to consume, with their end offsets. Partitions
/// that retain no records are already caught up.
fn catch_up_target(end: HashMap<i32, i64>, earliest: &HashMap<i32, i64>) -> HashMap<i32, i64> {
    end.into_iter()
        .filter(|(partition, end)| earliest.get(partition).map_or(true, |first| first < end))
        .collect()
}

#[derive(Debug, Default)]
struct Counters {
    records_applied: AtomicU64,
    legacy_skipped: AtomicU64,
    tombstones: AtomicU64,
    last_record_at_ms: AtomicU64,
}

struct Shared<K, V> {
    topic: String,
    /// Tombstoned keys stay in the map as `None`.
    map: RwLock<HashMap<K, Option<V>>>,
    progress: Mutex<Progress>,
    progressed: Condvar,
    shutdown: AtomicBool,
    counters: Counters,
}

impl<K, V> Shared<K, V> {
    fn finish(&self, failure: Option<StoreError>) {
        let mut progress = self.progress.lock();
        if progress.failure.is_none() {
            progress.failure = failure;
        }
        progress.stopped = true;
        drop(progress);
        self.progressed.notify_all();
    }
}

/// Replicated key/value store tailing one compacted topic.
pub struct ReplicatedStore<K, V> {
    shared: Arc<Shared<K, V>>,
    transport: Arc<dyn LogTransport>,
    serializer: Arc<dyn Serializer<K, V>>,
    config: StoreConfig,
    tailer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<K, V> ReplicatedStore<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create the store and start its tailing thread.
    ///
    /// The thread opens a reader on every partition from the earliest offset,
    /// replays the topic into the local map and keeps tailing until
    /// [`close`](Self::close).
    pub fn start(
        transport: Arc<dyn LogTransport>,
        serializer: Arc<dyn Serializer<K, V>>,
        observers: Vec<SharedObserver<K, V>>,
        clock: SharedClock,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let topic = transport.topic().to_string();
        let shared = Arc::new(Shared {
            topic: topic.clone(),
            map: RwLock::new(HashMap::new()),
            progress: Mutex::new(Progress::default()),
            progressed: Condvar::new(),
            shutdown: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let tail = TailLoop {
            shared: Arc::clone(&shared),
            transport: Arc::clone(&transport),
            serializer: Arc::clone(&serializer),
            observers,
            clock,
            poll_timeout: config.poll_timeout,
        };

        let handle = std::thread::Builder::new()
            .name(format!("store-tail-{}", topic))
            .spawn(move || tail.run())
            .map_err(|e| StoreError::io(&topic, e))?;

        tracing::info!(topic = %topic, "replicated store started");

        Ok(Self {
            shared,
            transport,
            serializer,
            config,
            tailer: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Topic this store mirrors.
    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Current value of a key, from the local map.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.map.read().get(key).cloned().flatten()
    }

    /// Whether a key currently holds a value.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        matches!(self.shared.map.read().get(key), Some(Some(_)))
    }

    /// Whether a key has been seen and then tombstoned.
    pub fn is_tombstoned<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        matches!(self.shared.map.read().get(key), Some(None))
    }

    /// Keys currently holding a value.
    pub fn keys(&self) -> Vec<K> {
        self.shared
            .map
            .read()
            .iter()
            .filter(|(_, v)| v.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        self.shared.map.read().values().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every live entry.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.shared
            .map
            .read()
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Write a value and wait until it is visible locally.
    pub fn put(&self, key: K, value: V) -> StoreResult<V> {
        self.ensure_open()?;
        let position = self.append_value(&key, &value)?;
        self.sync(&[position])?;
        Ok(value)
    }

    /// Tombstone a key and wait until the removal is visible locally.
    ///
    /// Returns the value held locally before the removal.
    pub fn remove(&self, key: &K) -> StoreResult<Option<V>> {
        self.ensure_open()?;
        let previous = self.get(key);
        let position = self.append_tombstone(key)?;
        self.sync(&[position])?;
        Ok(previous)
    }

    /// Write several values, then wait once for all of them.
    ///
    /// Other consumers may observe a prefix of the batch.
    pub fn put_all<I>(&self, entries: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.ensure_open()?;
        let mut positions = Vec::new();
        for (key, value) in entries {
            positions.push(self.append_value(&key, &value)?);
        }
        self.sync(&positions)
    }

    /// Tombstone every live key, then wait once.
    pub fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let mut positions = Vec::new();
        for key in self.keys() {
            positions.push(self.append_tombstone(&key)?);
        }
        self.sync(&positions)
    }

    /// Block until the initial replay has completed.
    pub fn wait_until_caught_up(&self, timeout: Duration) -> StoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress.lock();
        loop {
            if progress.caught_up {
                return Ok(());
            }
            if let Some(failure) = &progress.failure {
                return Err(failure.clone());
            }
            if progress.stopped {
                return Err(StoreError::Closed);
            }
            if self
                .shared
                .progressed
                .wait_until(&mut progress, deadline)
                .timed_out()
                && !progress.caught_up
            {
                return Err(StoreError::Failed {
                    message: format!(
                        "topic {} not caught up after {:?}",
                        self.shared.topic, timeout
                    ),
                });
            }
        }
    }

    /// Whether the initial replay has completed.
    pub fn is_caught_up(&self) -> bool {
        self.shared.progress.lock().caught_up
    }

    /// The failure that stopped the tailing thread, if any.
    pub fn failure(&self) -> Option<StoreError> {
        self.shared.progress.lock().failure.clone()
    }

    /// Store statistics.
    pub fn stats(&self) -> StoreStats {
        let counters = &self.shared.counters;
        let last = counters.last_record_at_ms.load(Ordering::Acquire);
        StoreStats {
            records_applied: counters.records_applied.load(Ordering::Relaxed),
            legacy_skipped: counters.legacy_skipped.load(Ordering::Relaxed),
            tombstones: counters.tombstones.load(Ordering::Relaxed),
            live_keys: self.len(),
            last_record_at_ms: (last > 0).then_some(last),
            caught_up: self.is_caught_up(),
        }
    }

    /// Stop the tailing thread and release the transport.
    ///
    /// Waits for the thread to exit, which takes at most one poll timeout
    /// plus the dispatch in flight. Every later call fails with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.tailer.lock().take() {
            if handle.join().is_err() {
                tracing::error!(topic = %self.shared.topic, "tailing thread panicked");
            }
        }
        tracing::info!(topic = %self.shared.topic, "replicated store closed");
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        match &self.shared.progress.lock().failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    fn append_value(&self, key: &K, value: &V) -> StoreResult<LogPosition> {
        let key_bytes = self.serializer.serialize_key(key);
        let value_bytes = self
            .serializer
            .serialize_value(Some(value))
            .map_err(|e| StoreError::serialization(key.to_string(), e))?;
        self.transport.append(&key_bytes, Some(&value_bytes))
    }

    fn append_tombstone(&self, key: &K) -> StoreResult<LogPosition> {
        let key_bytes = self.serializer.serialize_key(key);
        self.transport.append(&key_bytes, None)
    }

    /// Wait until the tailing thread has consumed every position.
    fn sync(&self, positions: &[LogPosition]) -> StoreResult<()> {
        let mut targets: HashMap<i32, i64> = HashMap::new();
        for position in positions {
            let entry = targets.entry(position.partition).or_insert(position.offset);
            *entry = (*entry).max(position.offset);
        }

        let deadline = Instant::now() + self.config.sync_timeout;
        let mut progress = self.shared.progress.lock();
        loop {
            if let Some(failure) = &progress.failure {
                return Err(failure.clone());
            }
            if progress.stopped {
                return Err(StoreError::Closed);
            }
            let pending = targets
                .iter()
                .find(|(partition, offset)| !progress.reached(**partition, **offset))
                .map(|(partition, offset)| (*partition, *offset));
            let Some((partition, offset)) = pending else {
                return Ok(());
            };
            if Instant::now() >= deadline {
                return Err(StoreError::SyncTimeout { partition, offset });
            }
            self.shared.progressed.wait_until(&mut progress, deadline);
        }
    }
}

impl<K, V> Drop for ReplicatedStore<K, V> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.tailer.get_mut().take() {
            let _ = handle.join();
        }
    }
}

/// State owned by the tailing thread.
struct TailLoop<K, V> {
    shared: Arc<Shared<K, V>>,
    transport: Arc<dyn LogTransport>,
    serializer: Arc<dyn Serializer<K, V>>,
    observers: Vec<SharedObserver<K, V>>,
    clock: SharedClock,
    poll_timeout: Duration,
}

impl<K, V> TailLoop<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn run(self) {
        let shared = Arc::clone(&self.shared);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.replay_and_tail()));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                tracing::error!(topic = %shared.topic, error = %e, "tailing stopped on fatal error");
                Some(e)
            }
            Err(_) => {
                tracing::error!(topic = %shared.topic, "tailing thread panicked");
                Some(StoreError::Failed {
                    message: "tailing thread panicked".to_string(),
                })
            }
        };
        shared.finish(failure);
    }

    fn replay_and_tail(&self) -> StoreResult<()> {
        let mut reader = self.transport.open_reader()?;
        let end = self.transport.end_offsets()?;
        let earliest = self.transport.earliest_offsets()?;
        let target = catch_up_target(end, &earliest);
        tracing::debug!(topic = %self.shared.topic, target = ?target, "replaying topic");
        {
            let mut progress = self.shared.progress.lock();
            progress.catch_up_target = Some(target);
            progress.evaluate_catch_up();
            if progress.caught_up {
                tracing::info!(topic = %self.shared.topic, "store caught up (empty topic)");
            }
        }
        self.shared.progressed.notify_all();

        while !self.shared.shutdown.load(Ordering::Acquire) {
            let batch = reader.poll(self.poll_timeout)?;
            let idle = batch.is_empty();

            for record in batch {
                let (partition, offset) = (record.partition, record.offset);
                self.apply(record)?;
                self.shared
                    .progress
                    .lock()
                    .consumed
                    .insert(partition, offset + 1);
            }

            let mut progress = self.shared.progress.lock();
            let was_caught_up = progress.caught_up;
            progress.evaluate_catch_up();
            if idle {
                progress.idle_poll();
            }
            if progress.caught_up && !was_caught_up {
                tracing::info!(
                    topic = %self.shared.topic,
                    keys = self.shared.map.read().len(),
                    "store caught up"
                );
            }
            drop(progress);
            self.shared.progressed.notify_all();
        }
        Ok(())
    }

    fn apply(&self, record: LogRecord) -> StoreResult<()> {
        let key = match self.serializer.deserialize_key(&record.key) {
            Ok(key) => key,
            Err(e) => return self.skip_or_fail(String::from_utf8_lossy(&record.key), &record, e),
        };

        let value = match &record.value {
            None => None,
            Some(bytes) => match self.serializer.deserialize_value(bytes) {
                Ok(value) => value,
                Err(e) => return self.skip_or_fail(key.to_string(), &record, e),
            },
        };

        let previous = self
            .shared
            .map
            .write()
            .insert(key.clone(), value.clone())
            .flatten();

        let counters = &self.shared.counters;
        counters.records_applied.fetch_add(1, Ordering::Relaxed);
        counters
            .last_record_at_ms
            .store(self.clock.now_ms(), Ordering::Release);
        if value.is_none() {
            counters.tombstones.fetch_add(1, Ordering::Relaxed);
        }

        tracing::trace!(
            topic = %self.shared.topic,
            key = %key,
            partition = record.partition,
            offset = record.offset,
            "applied record"
        );

        match (previous, value) {
            (None, Some(new)) => {
                for observer in &self.observers {
                    observer.handle_new(&key, &new);
                }
            }
            (Some(old), Some(new)) => {
                for observer in &self.observers {
                    observer.handle_update(&key, &old, &new);
                }
            }
            (Some(old), None) => {
                for observer in &self.observers {
                    observer.handle_remove(&key, &old);
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn skip_or_fail(
        &self,
        key: impl Into<String>,
        record: &LogRecord,
        error: SerializationError,
    ) -> StoreResult<()> {
        let key = key.into();
        if error.is_ignorable() {
            self.shared
                .counters
                .legacy_skipped
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                topic = %self.shared.topic,
                key = %key,
                partition = record.partition,
                offset = record.offset,
                "skipping legacy no-op record"
            );
            return Ok(());
        }
        tracing::error!(
            topic = %self.shared.topic,
            key = %key,
            partition = record.partition,
            offset = record.offset,
            error = %error,
            "undecodable record"
        );
        Err(StoreError::serialization(key, error))
    }
}
