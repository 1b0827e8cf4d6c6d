//! Replicated road registry store.
//!
//! - [`serializer`] - record framing and document codecs
//! - [`replicated`] - the log-backed replicated map
//! - [`observer`] - change notification SPI
//! - [`mute`] - startup gate for observers

pub mod mute;
pub mod observer;
pub mod replicated;
pub mod serializer;

pub use mute::MuteableObserver;
pub use observer::{ChangeObserver, SharedObserver};
pub use replicated::{ReplicatedStore, StoreConfig, StoreStats};
pub use serializer::{JsonModelReader, JsonSerializer, ModelReader, Serializer};
