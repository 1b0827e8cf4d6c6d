//! Changelog transport.
//!
//! The replicated store never talks to a broker directly. It appends and
//! tails through a [`LogTransport`], which abstracts one compacted topic:
//! - [`memory::MemoryLog`] - in-process partitioned log (tests, `memory` mode)
//! - [`kafka::KafkaTransport`] - Kafka broker (feature `kafka`)
//!
//! Values are `Option<Vec<u8>>`: `None` is a transport-level tombstone, the
//! record a compacting broker uses to drop a key.

use crate::core::error::StoreResult;
use std::collections::HashMap;
use std::time::Duration;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

/// A record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Framed key bytes.
    pub key: Vec<u8>,
    /// Framed value bytes, or `None` for a tombstone.
    pub value: Option<Vec<u8>>,
}

impl LogRecord {
    /// Whether this record is a transport-level tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Position of an acknowledged append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogPosition {
    pub partition: i32,
    pub offset: i64,
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// Access to one compacted topic.
pub trait LogTransport: Send + Sync {
    /// Topic name, for diagnostics.
    fn topic(&self) -> &str;

    /// Append a record and wait for the broker acknowledgement.
    fn append(&self, key: &[u8], value: Option<&[u8]>) -> StoreResult<LogPosition>;

    /// Next offset to be written on every partition.
    ///
    /// A reader that has consumed every partition up to these offsets has
    /// replayed everything committed before the call.
    fn end_offsets(&self) -> StoreResult<HashMap<i32, i64>>;

    /// Earliest retained offset on every partition. Equal to the end offset
    /// when retention or record deletion has emptied the partition.
    fn earliest_offsets(&self) -> StoreResult<HashMap<i32, i64>>;

    /// Open a reader assigned to every partition, starting at the earliest
    /// retained offset.
    fn open_reader(&self) -> StoreResult<Box<dyn LogReader>>;
}

/// Sequential reader over all partitions of a topic.
pub trait LogReader: Send {
    /// Fetch the next batch of records, waiting up to `timeout` when none are
    /// available. Records of one partition are returned in offset order.
    fn poll(&mut self, timeout: Duration) -> StoreResult<Vec<LogRecord>>;
}
