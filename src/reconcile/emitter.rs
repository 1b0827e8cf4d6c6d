//! Patch sinks.
//!
//! Patches leave the process through a [`PatchEmitter`]. Delivery is
//! fire-and-forget and at-least-once; there is no ordering guarantee across
//! documents. An external merge process applies them to the road topic.

use super::patch::PatchSet;
use crate::changelog::LogTransport;
use anyhow::Context;
use std::sync::Arc;

/// Publishes patch sets.
pub trait PatchEmitter: Send + Sync {
    fn emit(&self, patch: PatchSet) -> anyhow::Result<()>;
}

/// Publishes patch sets as JSON to the modification topic, keyed by
/// document id so that patches for one road stay in one partition.
pub struct LogPatchEmitter {
    transport: Arc<dyn LogTransport>,
}

impl LogPatchEmitter {
    pub fn new(transport: Arc<dyn LogTransport>) -> Self {
        Self { transport }
    }

    /// Topic patches are published to.
    pub fn topic(&self) -> &str {
        self.transport.topic()
    }
}

impl PatchEmitter for LogPatchEmitter {
    fn emit(&self, patch: PatchSet) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&patch).context("failed to encode patch set")?;
        let position = self
            .transport
            .append(patch.document_id.as_bytes(), Some(&payload))
            .with_context(|| format!("failed to publish patch for {}", patch.document_id))?;

        tracing::debug!(
            topic = %self.transport.topic(),
            document_id = %patch.document_id,
            operations = patch.operations.len(),
            position = %position,
            "patch emitted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::memory::MemoryLog;
    use crate::reconcile::patch::PatchOperation;

    #[test]
    fn log_emitter_writes_json_keyed_by_document() {
        let log = MemoryLog::new("_roadmodification");
        let emitter = LogPatchEmitter::new(Arc::new(log.clone()));

        emitter
            .emit(PatchSet::new(
                "r1",
                vec![PatchOperation::add("/status", serde_json::json!({}))],
            ))
            .unwrap();

        let records = log.records(0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, b"r1");
        let decoded: PatchSet =
            serde_json::from_slice(records[0].value.as_deref().unwrap()).unwrap();
        assert_eq!(decoded.document_id, "r1");
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn log_emitter_reports_transport_failure() {
        let log = MemoryLog::new("_roadmodification");
        let emitter = LogPatchEmitter::new(Arc::new(log.clone()));
        log.set_unavailable("broker down");

        let err = emitter.emit(PatchSet::new("r1", Vec::new())).unwrap_err();
        assert!(format!("{:#}", err).contains("broker down"));
    }
}
