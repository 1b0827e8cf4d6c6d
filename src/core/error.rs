//! Error types and failure classification.
//!
//! The control plane distinguishes three kinds of failure:
//! - [`SerializationError`]: a record could not be decoded. Fatal for the
//!   record, except the legacy no-op prefix which is ignorable.
//! - [`StoreError`]: the replicated store could not talk to its log, or was
//!   used after it stopped. Fatal for the store instance; there is no
//!   automatic resubscribe.
//! - Agent failures: surfaced as `anyhow::Error` by agents and isolated per
//!   document by the observer binding and the inspector.

use thiserror::Error;

/// Framing or payload decode failure for a single log record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    /// Zero-length input. Framed payloads always carry at least the tag byte.
    #[error("cannot deserialize an empty byte array")]
    Empty,

    /// The tag byte is not one of the known prefixes.
    #[error("unknown frame prefix 0x{prefix:02x}")]
    UnknownPrefix { prefix: u8 },

    /// Record written before framing existed. Callers skip it.
    #[error("legacy no-op record")]
    LegacyNoop,

    /// A key was framed as an explicit null.
    #[error("keys cannot be null")]
    NullKey,

    /// The key payload is not valid for the key type.
    #[error("invalid key: {message}")]
    InvalidKey { message: String },

    /// The value payload could not be decoded into the model type.
    #[error("invalid value: {message}")]
    InvalidValue { message: String },
}

impl SerializationError {
    /// Create an InvalidKey error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create an InvalidValue error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Whether the record should be skipped rather than treated as corrupt.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::LegacyNoop)
    }
}

impl From<serde_json::Error> for SerializationError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_value(e.to_string())
    }
}

/// Replicated store failures.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A key or value could not be encoded or decoded.
    #[error("serialization failed for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: SerializationError,
    },

    /// The log transport failed to send, fetch or describe the topic.
    #[error("log i/o failure on topic {topic}: {message}")]
    Io { topic: String, message: String },

    /// The tailing thread did not reach the acknowledged offset in time.
    #[error("timed out waiting for partition {partition} to reach offset {offset}")]
    SyncTimeout { partition: i32, offset: i64 },

    /// The tailing thread stopped on a fatal error.
    #[error("store failed: {message}")]
    Failed { message: String },

    /// The store was closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Create an Io error for the given topic.
    pub fn io(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Io {
            topic: topic.into(),
            message: message.to_string(),
        }
    }

    /// Create a Serialization error attributed to a key.
    pub fn serialization(key: impl Into<String>, source: SerializationError) -> Self {
        Self::Serialization {
            key: key.into(),
            source,
        }
    }

    /// Whether the store instance is unusable after this error.
    ///
    /// A sync timeout leaves the store healthy; the write may still land.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SyncTimeout { .. })
    }
}

/// Result type using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_noop_is_the_only_ignorable_error() {
        assert!(SerializationError::LegacyNoop.is_ignorable());
        assert!(!SerializationError::Empty.is_ignorable());
        assert!(!SerializationError::UnknownPrefix { prefix: 7 }.is_ignorable());
        assert!(!SerializationError::invalid_value("x").is_ignorable());
    }

    #[test]
    fn sync_timeout_is_not_fatal() {
        let timeout = StoreError::SyncTimeout {
            partition: 0,
            offset: 3,
        };
        assert!(!timeout.is_fatal());
        assert!(StoreError::Closed.is_fatal());
        assert!(StoreError::io("_roads", "broker down").is_fatal());
    }

    #[test]
    fn serialization_error_carries_key() {
        let err = StoreError::serialization("r1", SerializationError::Empty);
        assert!(err.to_string().contains("r1"));
    }
}
