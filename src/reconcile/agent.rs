//! Domain reconciliation SPI.
//!
//! An [`Agent`] owns the lifecycle semantics of a document type. The
//! framework only guarantees ordered, once-per-record delivery of change
//! notifications and periodic inspection; every state transition lives in
//! the agent.
//!
//! Returned patches must be idempotent. Once a correction has been merged
//! back into the document, the agent must return an empty list for it, or
//! the emit → observe → emit loop never settles. An empty list suppresses
//! emission entirely.

use super::patch::PatchOperation;

/// Reconciliation logic for documents of type `M`.
pub trait Agent<M>: Send + Sync {
    /// A document appeared for the first time.
    fn new_model(&self, key: &str, model: &M) -> anyhow::Result<Vec<PatchOperation>>;

    /// A document changed. Only called when `old != new`.
    fn updated_model(&self, key: &str, old: &M, new: &M) -> anyhow::Result<Vec<PatchOperation>>;

    /// A document was tombstoned. Nothing can be patched anymore.
    fn deleted_model(&self, key: &str, old: &M) -> anyhow::Result<()>;

    /// Compare a document with the infrastructure it describes and return
    /// the corrections, or an empty list when they agree.
    fn inspect_model(&self, key: &str, model: &M) -> anyhow::Result<Vec<PatchOperation>>;
}
