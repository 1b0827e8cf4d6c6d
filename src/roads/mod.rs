//! The road registry domain.
//!
//! - [`model`] - road documents and their serializer
//! - [`admin`] - topic administration seam
//! - [`agent`] - the reference [`TopicAgent`]

pub mod admin;
pub mod agent;
pub mod model;

pub use admin::{InMemoryTopicAdmin, TopicAdmin, TopicDescription};
pub use agent::{TopicAgent, TopicDefaults};
pub use model::{road_serializer, Road, RoadPhase, RoadReader, RoadSerializer, RoadStatus};
