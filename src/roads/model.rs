//! Road documents.
//!
//! A road is a named event stream plus its metadata. The registry stores
//! one JSON document per road, keyed by road name; `status` is written back
//! by agents through patches and never by the road's owner.

use crate::core::error::SerializationError;
use crate::store::serializer::{JsonSerializer, ModelReader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle of a road's backing infrastructure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoadPhase {
    /// No agent has looked at the road yet.
    #[default]
    Unknown,
    /// Infrastructure has been requested but not yet verified.
    Pending,
    /// Infrastructure matches the document.
    Ready,
    /// Infrastructure no longer matches the document.
    Drifted,
    /// The road has been retired.
    Deleted,
}

impl RoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Drifted => "DRIFTED",
            Self::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for RoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Agent-maintained status of a road.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadStatus {
    pub phase: RoadPhase,
    /// Kafka topic carrying the road's events.
    pub topic_name: String,
    /// Partition count observed on the topic, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RoadStatus {
    pub fn new(phase: RoadPhase, topic_name: impl Into<String>) -> Self {
        Self {
            phase,
            topic_name: topic_name.into(),
            partitions: None,
            message: None,
        }
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A road document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Road {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Set by the owner to retire the road.
    #[serde(default)]
    pub deleted: bool,
    /// Requested partition count; the agent default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    /// Registered schemas by version.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, Value>,
    /// Opaque authorisation block, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorisation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoadStatus>,
}

fn default_enabled() -> bool {
    true
}

impl Road {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            team: None,
            enabled: true,
            deleted: false,
            partitions: None,
            schemas: BTreeMap::new(),
            authorisation: None,
            status: None,
        }
    }

    /// Current phase, `Unknown` until an agent has written a status.
    pub fn phase(&self) -> RoadPhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(RoadPhase::Unknown)
    }

    /// Kafka topic backing this road.
    pub fn topic_name(&self) -> String {
        match &self.status {
            Some(status) => status.topic_name.clone(),
            None => format!("road.{}", self.name),
        }
    }
}

/// Reads road documents, rejecting ones without a name.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoadReader;

impl ModelReader<Road> for RoadReader {
    fn read(&self, tree: Value) -> Result<Road, SerializationError> {
        let road: Road = serde_json::from_value(tree)?;
        if road.name.trim().is_empty() {
            return Err(SerializationError::invalid_value("road name is empty"));
        }
        Ok(road)
    }
}

/// Serializer for the road topic.
pub type RoadSerializer = JsonSerializer<Road, RoadReader>;

/// Build the road topic serializer.
pub fn road_serializer() -> RoadSerializer {
    JsonSerializer::with_reader(RoadReader)
}
