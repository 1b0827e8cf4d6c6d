//! Record framing and document serialization.
//!
//! Every key and value written to the road topic is framed with a one-byte
//! tag followed by the payload:
//!
//! ```text
//! 0x01 <payload>   data
//! 0x02             explicit null
//! 0x00 ...         legacy no-op, written before framing existed
//! ```
//!
//! Decoding never accepts empty input. A legacy prefix decodes to
//! [`SerializationError::LegacyNoop`], which callers recognise via
//! [`SerializationError::is_ignorable`] and skip.

use crate::core::error::SerializationError;
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Frame tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Legacy record, never written by this crate.
    Noop = 0x00,
    /// Payload follows.
    Data = 0x01,
    /// Explicit null, no payload.
    Null = 0x02,
}

impl FrameTag {
    /// Parse a tag byte.
    pub fn from_byte(byte: u8) -> Result<Self, SerializationError> {
        match byte {
            0x00 => Ok(Self::Noop),
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Null),
            prefix => Err(SerializationError::UnknownPrefix { prefix }),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Data(&'a [u8]),
    Null,
}

/// Frame a payload as data.
pub fn frame_data(payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_u8(FrameTag::Data as u8);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Frame an explicit null.
pub fn frame_null() -> Vec<u8> {
    vec![FrameTag::Null as u8]
}

/// Strip the tag byte.
pub fn unframe(bytes: &[u8]) -> Result<Frame<'_>, SerializationError> {
    let (&tag, payload) = bytes.split_first().ok_or(SerializationError::Empty)?;
    match FrameTag::from_byte(tag)? {
        FrameTag::Data => Ok(Frame::Data(payload)),
        FrameTag::Null => Ok(Frame::Null),
        FrameTag::Noop => Err(SerializationError::LegacyNoop),
    }
}

/// Symmetric key/value codec used by the replicated store.
///
/// `V` values are optional on the wire: `None` encodes as an explicit null.
pub trait Serializer<K, V>: Send + Sync {
    /// Encode a key.
    fn serialize_key(&self, key: &K) -> Vec<u8>;

    /// Encode a value, or an explicit null.
    fn serialize_value(&self, value: Option<&V>) -> Result<Vec<u8>, SerializationError>;

    /// Decode a key. Keys are never null.
    fn deserialize_key(&self, bytes: &[u8]) -> Result<K, SerializationError>;

    /// Decode a value, `None` for an explicit null.
    fn deserialize_value(&self, bytes: &[u8]) -> Result<Option<V>, SerializationError>;
}

/// Converts a parsed JSON tree into a typed model.
pub trait ModelReader<M>: Send + Sync {
    fn read(&self, tree: serde_json::Value) -> Result<M, SerializationError>;
}

/// [`ModelReader`] backed by the model's `Deserialize` impl.
pub struct JsonModelReader<M> {
    _model: PhantomData<fn() -> M>,
}

impl<M> JsonModelReader<M> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<M> Default for JsonModelReader<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: DeserializeOwned> ModelReader<M> for JsonModelReader<M> {
    fn read(&self, tree: serde_json::Value) -> Result<M, SerializationError> {
        Ok(serde_json::from_value(tree)?)
    }
}

/// String keys, JSON documents.
pub struct JsonSerializer<M, R = JsonModelReader<M>> {
    reader: R,
    _model: PhantomData<fn() -> M>,
}

impl<M: DeserializeOwned> JsonSerializer<M> {
    /// Serializer using the model's own `Deserialize` impl.
    pub fn new() -> Self {
        Self::with_reader(JsonModelReader::new())
    }
}

impl<M: DeserializeOwned> Default for JsonSerializer<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, R> JsonSerializer<M, R> {
    /// Serializer decoding documents through a custom reader.
    pub fn with_reader(reader: R) -> Self {
        Self {
            reader,
            _model: PhantomData,
        }
    }
}

impl<M, R> Serializer<String, M> for JsonSerializer<M, R>
where
    M: Serialize,
    R: ModelReader<M>,
{
    fn serialize_key(&self, key: &String) -> Vec<u8> {
        frame_data(key.as_bytes())
    }

    fn serialize_value(&self, value: Option<&M>) -> Result<Vec<u8>, SerializationError> {
        match value {
            Some(model) => Ok(frame_data(&serde_json::to_vec(model)?)),
            None => Ok(frame_null()),
        }
    }

    fn deserialize_key(&self, bytes: &[u8]) -> Result<String, SerializationError> {
        match unframe(bytes)? {
            Frame::Data(payload) => String::from_utf8(payload.to_vec())
                .map_err(|e| SerializationError::invalid_key(e.to_string())),
            Frame::Null => Err(SerializationError::NullKey),
        }
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<Option<M>, SerializationError> {
        match unframe(bytes)? {
            Frame::Data(payload) => {
                let tree: serde_json::Value = serde_json::from_slice(payload)?;
                self.reader.read(tree).map(Some)
            }
            Frame::Null => Ok(None),
        }
    }
}
