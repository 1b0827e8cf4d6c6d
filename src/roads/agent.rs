//! Reference agent keeping each road's Kafka topic in line with its document.
//!
//! Phases move `UNKNOWN → PENDING → READY ⇄ DRIFTED → DELETED`:
//!
//! - a new or changed road whose topic is missing gets it created and is
//!   marked `PENDING`
//! - an inspection that finds the topic as requested marks it `READY`
//! - an inspection that finds the topic missing or under-partitioned marks
//!   it `DRIFTED`, recreating a missing topic on the way
//! - a road flagged `deleted` is marked `DELETED`; its topic is left for
//!   archival
//!
//! Every patch is a single `add /status`, emitted only when the computed
//! status differs from the one the document already carries. Status
//! messages hold no timestamps so that a merged correction compares equal.

use super::admin::TopicAdmin;
use super::model::{Road, RoadPhase, RoadStatus};
use crate::reconcile::agent::Agent;
use crate::reconcile::patch::PatchOperation;
use anyhow::{bail, Context, Result};
use std::sync::Arc;

/// Topic settings applied to roads that do not request their own.
#[derive(Debug, Clone)]
pub struct TopicDefaults {
    pub partitions: u32,
    pub replication_factor: u16,
}

impl Default for TopicDefaults {
    fn default() -> Self {
        Self {
            partitions: 3,
            replication_factor: 3,
        }
    }
}

/// Reconciles roads against their backing topics.
pub struct TopicAgent {
    admin: Arc<dyn TopicAdmin>,
    defaults: TopicDefaults,
}

impl TopicAgent {
    pub fn new(admin: Arc<dyn TopicAdmin>, defaults: TopicDefaults) -> Self {
        Self { admin, defaults }
    }

    fn wanted_partitions(&self, road: &Road) -> u32 {
        road.partitions.unwrap_or(self.defaults.partitions)
    }

    /// Make sure the topic exists, creating it when missing.
    fn provision(&self, road: &Road) -> Result<RoadStatus> {
        let topic = road.topic_name();
        match self.admin.describe(&topic)? {
            Some(description) => Ok(self.assess(road, &topic, description.partitions)),
            None => {
                let partitions = self.wanted_partitions(road);
                self.admin
                    .create(&topic, partitions, self.defaults.replication_factor)
                    .with_context(|| format!("failed to create topic {}", topic))?;
                tracing::info!(road = %road.name, topic = %topic, partitions, "topic requested");
                Ok(RoadStatus::new(RoadPhase::Pending, topic).with_partitions(partitions))
            }
        }
    }

    fn assess(&self, road: &Road, topic: &str, actual: u32) -> RoadStatus {
        let wanted = self.wanted_partitions(road);
        let status = RoadStatus::new(RoadPhase::Ready, topic).with_partitions(actual);
        if actual < wanted {
            return RoadStatus {
                phase: RoadPhase::Drifted,
                message: Some(format!("topic has {} partitions, road requests {}", actual, wanted)),
                ..status
            };
        }
        status
    }

    fn retire(&self, road: &Road) -> RoadStatus {
        RoadStatus::new(RoadPhase::Deleted, road.topic_name())
    }

    /// React to a road the agent has just seen in a new state.
    fn converge(&self, road: &Road) -> Result<Vec<PatchOperation>> {
        let desired = if road.deleted {
            self.retire(road)
        } else if road.phase() == RoadPhase::Deleted {
            // Retired roads stay retired until their status is reset.
            return Ok(Vec::new());
        } else {
            self.provision(road)?
        };
        Ok(status_patch(road, desired))
    }
}

/// Topics derive from the road name, which must match its registry key.
fn check_key(key: &str, road: &Road) -> Result<()> {
    if road.name != key {
        bail!("road {:?} is registered under key {:?}", road.name, key);
    }
    Ok(())
}

/// A single `add /status`, or nothing when the document already agrees.
fn status_patch(road: &Road, desired: RoadStatus) -> Vec<PatchOperation> {
    if road.status.as_ref() == Some(&desired) {
        return Vec::new();
    }
    tracing::debug!(
        road = %road.name,
        from = %road.phase(),
        to = %desired.phase,
        "road status changed"
    );
    match serde_json::to_value(&desired) {
        Ok(value) => vec![PatchOperation::add("/status", value)],
        Err(e) => {
            tracing::error!(road = %road.name, error = %e, "failed to encode road status");
            Vec::new()
        }
    }
}

impl Agent<Road> for TopicAgent {
    fn new_model(&self, key: &str, model: &Road) -> Result<Vec<PatchOperation>> {
        check_key(key, model)?;
        self.converge(model)
    }

    fn updated_model(&self, key: &str, _old: &Road, new: &Road) -> Result<Vec<PatchOperation>> {
        check_key(key, new)?;
        self.converge(new)
    }

    fn deleted_model(&self, key: &str, old: &Road) -> Result<()> {
        tracing::info!(road = %key, topic = %old.topic_name(), "road removed from registry");
        Ok(())
    }

    fn inspect_model(&self, key: &str, model: &Road) -> Result<Vec<PatchOperation>> {
        check_key(key, model)?;
        if model.deleted || model.phase() == RoadPhase::Deleted {
            return self.converge(model);
        }

        let topic = model.topic_name();
        let desired = match self.admin.describe(&topic)? {
            Some(description) => self.assess(model, &topic, description.partitions),
            None => {
                let partitions = self.wanted_partitions(model);
                tracing::warn!(road = %model.name, topic = %topic, "topic missing, recreating");
                self.admin
                    .create(&topic, partitions, self.defaults.replication_factor)
                    .with_context(|| format!("failed to recreate topic {}", topic))?;
                RoadStatus::new(RoadPhase::Drifted, topic).with_message("topic was missing")
            }
        };
        Ok(status_patch(model, desired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roads::admin::InMemoryTopicAdmin;

    fn agent() -> (Arc<InMemoryTopicAdmin>, TopicAgent) {
        let admin = Arc::new(InMemoryTopicAdmin::new());
        let agent = TopicAgent::new(admin.clone(), TopicDefaults::default());
        (admin, agent)
    }

    fn merged(road: &Road, patches: &[PatchOperation]) -> Road {
        let mut road = road.clone();
        for patch in patches {
            if let PatchOperation::Add { path, value } = patch {
                assert_eq!(path, "/status");
                road.status = Some(serde_json::from_value(value.clone()).unwrap());
            }
        }
        road
    }

    #[test]
    fn new_road_provisions_topic_and_goes_pending() {
        let (admin, agent) = agent();
        let road = Road::new("r1");

        let patches = agent.new_model("r1", &road).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(admin.topics(), vec!["road.r1".to_string()]);
        assert_eq!(merged(&road, &patches).phase(), RoadPhase::Pending);
    }

    #[test]
    fn inspection_promotes_pending_to_ready_then_settles() {
        let (_admin, agent) = agent();
        let road = Road::new("r1");
        let road = merged(&road, &agent.new_model("r1", &road).unwrap());

        let patches = agent.inspect_model("r1", &road).unwrap();
        let road = merged(&road, &patches);
        assert_eq!(road.phase(), RoadPhase::Ready);

        assert!(agent.inspect_model("r1", &road).unwrap().is_empty());
        assert!(agent.updated_model("r1", &road, &road).unwrap().is_empty());
    }

    #[test]
    fn missing_topic_drifts_and_recovers() {
        let (admin, agent) = agent();
        let mut road = Road::new("r1");
        road.status = Some(RoadStatus::new(RoadPhase::Ready, "road.r1").with_partitions(3));

        let road = merged(&road, &agent.inspect_model("r1", &road).unwrap());
        assert_eq!(road.phase(), RoadPhase::Drifted);
        assert!(admin.describe("road.r1").unwrap().is_some());

        let road = merged(&road, &agent.inspect_model("r1", &road).unwrap());
        assert_eq!(road.phase(), RoadPhase::Ready);
    }

    #[test]
    fn under_partitioned_topic_is_drifted() {
        let (admin, agent) = agent();
        admin.insert("road.r1", 1);
        let mut road = Road::new("r1");
        road.partitions = Some(4);

        let road = merged(&road, &agent.new_model("r1", &road).unwrap());
        assert_eq!(road.phase(), RoadPhase::Drifted);
        assert!(road.status.unwrap().message.unwrap().contains("1 partitions"));
    }

    #[test]
    fn deleted_road_is_retired_once() {
        let (admin, agent) = agent();
        let mut road = Road::new("r1");
        road.deleted = true;

        let road = merged(&road, &agent.updated_model("r1", &Road::new("r1"), &road).unwrap());
        assert_eq!(road.phase(), RoadPhase::Deleted);
        assert!(admin.topics().is_empty());
        assert!(agent.inspect_model("r1", &road).unwrap().is_empty());
    }

    #[test]
    fn road_filed_under_another_key_is_rejected() {
        let (admin, agent) = agent();
        let road = Road::new("r2");

        let err = agent.new_model("r1", &road).unwrap_err();
        assert!(err.to_string().contains("r1"));
        assert!(agent.updated_model("r1", &road, &road).is_err());
        assert!(agent.inspect_model("r1", &road).is_err());
        assert!(admin.topics().is_empty());
    }

    #[test]
    fn admin_failure_surfaces_as_error() {
        let (admin, agent) = agent();
        admin.fail_with("down");
        assert!(agent.new_model("r1", &Road::new("r1")).is_err());
        assert!(agent.inspect_model("r1", &Road::new("r1")).is_err());
    }
}
