//! Topic administration seam.
//!
//! The road agent never talks to the broker's admin surface directly. It
//! describes and creates topics through [`TopicAdmin`], implemented by
//! [`InMemoryTopicAdmin`] for tests and `memory` mode, and by
//! [`MetadataTopicAdmin`] against a live cluster (feature `kafka`).

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// What the cluster reports about a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescription {
    pub name: String,
    pub partitions: u32,
    /// Replication factor, when the admin surface exposes it.
    pub replication_factor: Option<u16>,
}

/// Describe and create topics.
pub trait TopicAdmin: Send + Sync {
    /// Describe a topic, or `None` if it does not exist.
    fn describe(&self, topic: &str) -> Result<Option<TopicDescription>>;

    /// Create a topic. Creating an existing topic is not an error.
    fn create(&self, topic: &str, partitions: u32, replication_factor: u16) -> Result<()>;
}

/// Topic admin holding topics in memory.
#[derive(Debug, Default)]
pub struct InMemoryTopicAdmin {
    topics: Mutex<BTreeMap<String, TopicDescription>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryTopicAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing topic.
    pub fn insert(&self, topic: &str, partitions: u32) {
        self.topics.lock().insert(
            topic.to_string(),
            TopicDescription {
                name: topic.to_string(),
                partitions,
                replication_factor: Some(1),
            },
        );
    }

    /// Drop a topic behind the registry's back.
    pub fn delete(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic).is_some()
    }

    /// Names of all topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().keys().cloned().collect()
    }

    /// Make every later call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    fn check(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(message) => anyhow::bail!("topic admin unavailable: {}", message),
            None => Ok(()),
        }
    }
}

impl TopicAdmin for InMemoryTopicAdmin {
    fn describe(&self, topic: &str) -> Result<Option<TopicDescription>> {
        self.check()?;
        Ok(self.topics.lock().get(topic).cloned())
    }

    fn create(&self, topic: &str, partitions: u32, replication_factor: u16) -> Result<()> {
        self.check()?;
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| TopicDescription {
                name: topic.to_string(),
                partitions,
                replication_factor: Some(replication_factor),
            });
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use self::metadata::MetadataTopicAdmin;

#[cfg(feature = "kafka")]
mod metadata {
    use super::{TopicAdmin, TopicDescription};
    use anyhow::{Context, Result};
    use kafka::client::KafkaClient;
    use parking_lot::Mutex;

    /// Topic admin backed by cluster metadata requests.
    ///
    /// The Kafka wire client has no admin API. Topics are created by the
    /// broker's auto-creation on the first metadata request naming them;
    /// `create` fails when the cluster has auto-creation disabled.
    pub struct MetadataTopicAdmin {
        client: Mutex<KafkaClient>,
    }

    impl MetadataTopicAdmin {
        pub fn new(hosts: Vec<String>) -> Self {
            Self {
                client: Mutex::new(KafkaClient::new(hosts)),
            }
        }

        fn lookup(&self, topic: &str) -> Result<Option<TopicDescription>> {
            let mut client = self.client.lock();
            client
                .load_metadata(&[topic])
                .with_context(|| format!("failed to load metadata for {}", topic))?;
            let partitions = client
                .topics()
                .partitions(topic)
                .map(|p| p.len() as u32)
                .filter(|n| *n > 0);
            Ok(partitions.map(|partitions| TopicDescription {
                name: topic.to_string(),
                partitions,
                replication_factor: None,
            }))
        }
    }

    impl TopicAdmin for MetadataTopicAdmin {
        fn describe(&self, topic: &str) -> Result<Option<TopicDescription>> {
            self.lookup(topic)
        }

        fn create(&self, topic: &str, partitions: u32, replication_factor: u16) -> Result<()> {
            if self.lookup(topic)?.is_some() {
                return Ok(());
            }
            tracing::warn!(
                topic = %topic,
                partitions,
                replication_factor,
                "topic not auto-created; requested settings are left to the cluster"
            );
            anyhow::bail!("topic {} does not exist and could not be created", topic)
        }
    }
}
