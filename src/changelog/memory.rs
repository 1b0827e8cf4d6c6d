//! In-process partitioned log.
//!
//! Behaves like a compacted Kafka topic for a single process: records are
//! routed to partitions by key hash, offsets are dense per partition until
//! [`MemoryLog::compact`] drops superseded records, and readers always start
//! from the earliest retained offset.

use super::{LogPosition, LogReader, LogRecord, LogTransport};
use crate::core::error::{StoreError, StoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash64;

#[derive(Debug, Default)]
struct Partition {
    records: Vec<LogRecord>,
    next_offset: i64,
}

#[derive(Debug)]
struct LogState {
    partitions: Vec<Partition>,
    /// Injected failure returned by every append and poll.
    unavailable: Option<String>,
}

#[derive(Debug)]
struct Shared {
    topic: String,
    state: Mutex<LogState>,
    appended: Condvar,
}

/// In-memory compacted topic.
///
/// Cloning yields another handle to the same log, the way several processes
/// share one Kafka topic.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    /// Create a single-partition log.
    pub fn new(topic: impl Into<String>) -> Self {
        Self::with_partitions(topic, 1)
    }

    /// Create a log with the given partition count (at least one).
    pub fn with_partitions(topic: impl Into<String>, partitions: usize) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| Partition::default())
            .collect();
        Self {
            shared: Arc::new(Shared {
                topic: topic.into(),
                state: Mutex::new(LogState {
                    partitions,
                    unavailable: None,
                }),
                appended: Condvar::new(),
            }),
        }
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        self.shared.state.lock().partitions.len()
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &[u8]) -> i32 {
        let count = self.partition_count() as u64;
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        (hasher.finish() % count) as i32
    }

    /// Total retained records across partitions.
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state.partitions.iter().map(|p| p.records.len()).sum()
    }

    /// Whether no records are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained records of one partition, in offset order.
    pub fn records(&self, partition: i32) -> Vec<LogRecord> {
        let state = self.shared.state.lock();
        state
            .partitions
            .get(partition as usize)
            .map(|p| p.records.clone())
            .unwrap_or_default()
    }

    /// Drop every record superseded by a later record with the same key.
    ///
    /// Offsets of surviving records are preserved. Returns the number of
    /// records removed.
    pub fn compact(&self) -> usize {
        let mut state = self.shared.state.lock();
        let mut removed = 0;
        for partition in &mut state.partitions {
            let mut seen = HashSet::new();
            let mut kept = Vec::with_capacity(partition.records.len());
            for record in partition.records.drain(..).rev() {
                if seen.insert(record.key.clone()) {
                    kept.push(record);
                } else {
                    removed += 1;
                }
            }
            kept.reverse();
            partition.records = kept;
        }
        removed
    }

    /// Drop every record of `partition` below `before`, the way a
    /// delete-records request or time retention would. Offsets are kept.
    pub fn delete_records(&self, partition: i32, before: i64) -> usize {
        let mut state = self.shared.state.lock();
        match state.partitions.get_mut(partition as usize) {
            Some(part) => {
                let retained = part.records.len();
                part.records.retain(|r| r.offset >= before);
                retained - part.records.len()
            }
            None => 0,
        }
    }

    /// Make every subsequent append and poll fail with an i/o error.
    pub fn set_unavailable(&self, message: impl Into<String>) {
        self.shared.state.lock().unavailable = Some(message.into());
        self.shared.appended.notify_all();
    }

    /// Clear an injected failure.
    pub fn set_available(&self) {
        self.shared.state.lock().unavailable = None;
    }

    fn check_available(&self, state: &LogState) -> StoreResult<()> {
        match &state.unavailable {
            Some(message) => Err(StoreError::io(&self.shared.topic, message)),
            None => Ok(()),
        }
    }
}

impl LogTransport for MemoryLog {
    fn topic(&self) -> &str {
        &self.shared.topic
    }

    fn append(&self, key: &[u8], value: Option<&[u8]>) -> StoreResult<LogPosition> {
        let partition = self.partition_for(key);
        let mut state = self.shared.state.lock();
        self.check_available(&state)?;

        let part = &mut state.partitions[partition as usize];
        let offset = part.next_offset;
        part.next_offset += 1;
        part.records.push(LogRecord {
            partition,
            offset,
            key: key.to_vec(),
            value: value.map(<[u8]>::to_vec),
        });
        drop(state);

        self.shared.appended.notify_all();
        Ok(LogPosition { partition, offset })
    }

    fn end_offsets(&self) -> StoreResult<HashMap<i32, i64>> {
        let state = self.shared.state.lock();
        self.check_available(&state)?;
        Ok(state
            .partitions
            .iter()
            .enumerate()
            .map(|(id, p)| (id as i32, p.next_offset))
            .collect())
    }

    fn earliest_offsets(&self) -> StoreResult<HashMap<i32, i64>> {
        let state = self.shared.state.lock();
        self.check_available(&state)?;
        Ok(state
            .partitions
            .iter()
            .enumerate()
            .map(|(id, p)| {
                let earliest = p.records.first().map_or(p.next_offset, |r| r.offset);
                (id as i32, earliest)
            })
            .collect())
    }

    fn open_reader(&self) -> StoreResult<Box<dyn LogReader>> {
        let state = self.shared.state.lock();
        self.check_available(&state)?;
        Ok(Box::new(MemoryLogReader {
            log: self.clone(),
            positions: vec![0; state.partitions.len()],
        }))
    }
}

/// Reader over a [`MemoryLog`].
#[derive(Debug)]
pub struct MemoryLogReader {
    log: MemoryLog,
    /// Next offset to read per partition.
    positions: Vec<i64>,
}

impl MemoryLogReader {
    fn collect(&mut self, state: &LogState) -> Vec<LogRecord> {
        let mut batch = Vec::new();
        for (id, partition) in state.partitions.iter().enumerate() {
            let position = self.positions[id];
            let fresh = partition
                .records
                .iter()
                .filter(|r| r.offset >= position)
                .cloned();
            let before = batch.len();
            batch.extend(fresh);
            if let Some(last) = batch[before..].last() {
                self.positions[id] = last.offset + 1;
            }
        }
        batch
    }
}

impl LogReader for MemoryLogReader {
    fn poll(&mut self, timeout: Duration) -> StoreResult<Vec<LogRecord>> {
        let shared = Arc::clone(&self.log.shared);
        let mut state = shared.state.lock();
        self.log.check_available(&state)?;

        let batch = self.collect(&state);
        if !batch.is_empty() {
            return Ok(batch);
        }

        shared.appended.wait_for(&mut state, timeout);
        self.log.check_available(&state)?;
        Ok(self.collect(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_dense_offsets() {
        let log = MemoryLog::new("_roads");
        let a = log.append(b"a", Some(b"1")).unwrap();
        let b = log.append(b"b", Some(b"2")).unwrap();
        assert_eq!(a, LogPosition { partition: 0, offset: 0 });
        assert_eq!(b, LogPosition { partition: 0, offset: 1 });
        assert_eq!(log.end_offsets().unwrap()[&0], 2);
    }

    #[test]
    fn reader_starts_from_earliest_and_advances() {
        let log = MemoryLog::new("_roads");
        log.append(b"a", Some(b"1")).unwrap();
        log.append(b"a", None).unwrap();

        let mut reader = log.open_reader().unwrap();
        let batch = reader.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[1].is_tombstone());

        assert!(reader.poll(Duration::from_millis(1)).unwrap().is_empty());

        log.append(b"b", Some(b"2")).unwrap();
        let batch = reader.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, b"b");
    }

    #[test]
    fn compaction_keeps_latest_per_key_and_offsets() {
        let log = MemoryLog::new("_roads");
        log.append(b"a", Some(b"1")).unwrap();
        log.append(b"b", Some(b"1")).unwrap();
        log.append(b"a", Some(b"2")).unwrap();

        assert_eq!(log.compact(), 1);
        let records = log.records(0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 1);
        assert_eq!(records[1].offset, 2);
        assert_eq!(records[1].value.as_deref(), Some(&b"2"[..]));
        assert_eq!(log.end_offsets().unwrap()[&0], 3);
    }

    #[test]
    fn deleted_records_move_the_earliest_offset() {
        let log = MemoryLog::new("_roads");
        log.append(b"a", Some(b"1")).unwrap();
        log.append(b"b", Some(b"1")).unwrap();
        assert_eq!(log.earliest_offsets().unwrap()[&0], 0);

        assert_eq!(log.delete_records(0, 1), 1);
        assert_eq!(log.earliest_offsets().unwrap()[&0], 1);

        assert_eq!(log.delete_records(0, 2), 1);
        assert_eq!(log.earliest_offsets().unwrap()[&0], 2);
        assert_eq!(log.end_offsets().unwrap()[&0], 2);
        assert!(log.is_empty());
    }

    #[test]
    fn keys_route_to_a_stable_partition() {
        let log = MemoryLog::with_partitions("_roads", 4);
        let p = log.partition_for(b"road-1");
        for _ in 0..3 {
            let pos = log.append(b"road-1", Some(b"x")).unwrap();
            assert_eq!(pos.partition, p);
        }
        assert_eq!(log.records(p).len(), 3);
    }

    #[test]
    fn unavailable_log_fails_appends_and_polls() {
        let log = MemoryLog::new("_roads");
        let mut reader = log.open_reader().unwrap();
        log.set_unavailable("broker down");

        assert!(matches!(
            log.append(b"a", Some(b"1")),
            Err(StoreError::Io { .. })
        ));
        assert!(reader.poll(Duration::from_millis(1)).is_err());

        log.set_available();
        assert!(log.append(b"a", Some(b"1")).is_ok());
    }
}
