//! Kafka broker transport.
//!
//! Appends go through a synchronous producer with `RequiredAcks::All`, so an
//! [`LogPosition`] is only returned once the broker has committed the
//! record. Readers are plain partition consumers without a consumer group:
//! every process replays the whole topic from the earliest offset and never
//! commits a position.
//!
//! The topic is provisioned externally with compaction enabled.

use super::{LogPosition, LogReader, LogRecord, LogTransport};
use crate::core::error::{StoreError, StoreResult};
use kafka::client::{FetchOffset, KafkaClient};
use kafka::consumer::Consumer;
use kafka::producer::{Producer, Record, RequiredAcks};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Default broker acknowledgement timeout.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka-backed [`LogTransport`].
pub struct KafkaTransport {
    hosts: Vec<String>,
    topic: String,
    producer: Mutex<Producer>,
}

impl KafkaTransport {
    /// Connect a producer to the given bootstrap servers.
    ///
    /// `bootstrap` is a comma-separated `host:port` list.
    pub fn connect(bootstrap: &str, topic: impl Into<String>) -> StoreResult<Self> {
        let topic = topic.into();
        let hosts = parse_hosts(bootstrap);
        let producer = Producer::from_hosts(hosts.clone())
            .with_ack_timeout(DEFAULT_ACK_TIMEOUT)
            .with_required_acks(RequiredAcks::All)
            .create()
            .map_err(|e| StoreError::io(&topic, e))?;

        tracing::info!(topic = %topic, hosts = ?hosts, "kafka producer connected");
        Ok(Self {
            hosts,
            topic,
            producer: Mutex::new(producer),
        })
    }

    /// Bootstrap hosts this transport connects to.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    fn io(&self, e: impl std::fmt::Display) -> StoreError {
        StoreError::io(&self.topic, e)
    }

    fn offsets(&self, at: FetchOffset) -> StoreResult<HashMap<i32, i64>> {
        let mut client = KafkaClient::new(self.hosts.clone());
        client
            .load_metadata(&[self.topic.as_str()])
            .map_err(|e| self.io(e))?;
        let offsets = client
            .fetch_topic_offsets(self.topic.as_str(), at)
            .map_err(|e| self.io(e))?;
        Ok(offsets
            .into_iter()
            .map(|po| (po.partition, po.offset))
            .collect())
    }
}

impl LogTransport for KafkaTransport {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn append(&self, key: &[u8], value: Option<&[u8]>) -> StoreResult<LogPosition> {
        // An empty value is encoded as a null message, which is the broker's
        // tombstone. Framed values are never empty.
        let value = value.unwrap_or(&[]);
        let record = Record::from_key_value(self.topic.as_str(), key, value);

        let confirms = self
            .producer
            .lock()
            .send_all(&[record])
            .map_err(|e| self.io(e))?;

        let confirm = confirms
            .into_iter()
            .flat_map(|c| c.partition_confirms)
            .next()
            .ok_or_else(|| self.io("broker returned no produce confirmation"))?;

        let offset = confirm
            .offset
            .map_err(|code| self.io(format!("produce rejected: {:?}", code)))?;

        Ok(LogPosition {
            partition: confirm.partition,
            offset,
        })
    }

    fn end_offsets(&self) -> StoreResult<HashMap<i32, i64>> {
        self.offsets(FetchOffset::Latest)
    }

    fn earliest_offsets(&self) -> StoreResult<HashMap<i32, i64>> {
        self.offsets(FetchOffset::Earliest)
    }

    fn open_reader(&self) -> StoreResult<Box<dyn LogReader>> {
        let consumer = Consumer::from_hosts(self.hosts.clone())
            .with_topic(self.topic.clone())
            .with_fallback_offset(FetchOffset::Earliest)
            .create()
            .map_err(|e| self.io(e))?;

        Ok(Box::new(KafkaLogReader {
            topic: self.topic.clone(),
            consumer,
        }))
    }
}

/// Consumer-backed reader.
pub struct KafkaLogReader {
    topic: String,
    consumer: Consumer,
}

impl LogReader for KafkaLogReader {
    fn poll(&mut self, timeout: Duration) -> StoreResult<Vec<LogRecord>> {
        let sets = self
            .consumer
            .poll()
            .map_err(|e| StoreError::io(&self.topic, e))?;

        if sets.is_empty() {
            // The consumer already waits for the broker's fetch max wait;
            // only sleep the remainder when it returned immediately.
            std::thread::sleep(timeout.min(Duration::from_millis(50)));
            return Ok(Vec::new());
        }

        let mut batch = Vec::new();
        for set in sets.iter() {
            let partition = set.partition();
            for message in set.messages() {
                batch.push(LogRecord {
                    partition,
                    offset: message.offset,
                    key: message.key.to_vec(),
                    value: if message.value.is_empty() {
                        None
                    } else {
                        Some(message.value.to_vec())
                    },
                });
            }
            self.consumer
                .consume_messageset(set)
                .map_err(|e| StoreError::io(&self.topic, e))?;
        }
        Ok(batch)
    }
}

/// Split a comma-separated bootstrap list.
pub fn parse_hosts(bootstrap: &str) -> Vec<String> {
    bootstrap
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}
