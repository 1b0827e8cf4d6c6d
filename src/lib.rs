//! Roadworks - replicated road registry with self-healing reconciliation.
//!
//! Every service that needs road metadata (schema, authorisation, status)
//! keeps its own replica of one compacted changelog topic. Agents react to
//! changes in that replica and periodically compare each road with the
//! infrastructure behind it, publishing corrections as patch sets that an
//! external merge process folds back into the changelog.
//!
//! # Architecture
//!
//! ```text
//!        road topic (compacted)                 patch topic
//!   ┌──────────────────────────────┐     ┌──────────────────────┐
//!   │  framed key │ framed value   │     │ {documentId, ops[]}  │
//!   └──────────────────────────────┘     └──────────────────────┘
//!            │ tail          ▲ append                ▲
//!            ▼               │                       │
//! ┌─────────────────────────────────┐    ┌──────────────────────┐
//! │ ReplicatedStore (tailing thread)│    │ PatchEmitter         │
//! │   local map │ read-your-writes  │    └──────────────────────┘
//! └─────────────────────────────────┘               ▲
//!            │ ChangeObserver                       │
//!            ▼                                      │
//! ┌─────────────────────────────────┐    ┌──────────────────────┐
//! │ MuteableObserver → Reaction     │───▶│ Agent (TopicAgent)   │
//! └─────────────────────────────────┘    └──────────────────────┘
//!                                                   ▲
//!                              ModelInspector (timer)┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Process composition and lifecycle
//! - [`core::time`] - Clock abstraction
//! - [`core::error`] - Error types and classification
//!
//! ## Changelog
//! - [`changelog`] - Log transport seam
//! - [`changelog::memory`] - In-process partitioned log
//!
//! ## Store
//! - [`store::serializer`] - Record framing and document codecs
//! - [`store::replicated`] - Log-backed replicated map
//! - [`store::observer`] - Change notification SPI
//! - [`store::mute`] - Startup gate for observers
//!
//! ## Reconciliation
//! - [`reconcile::agent`] - Domain SPI
//! - [`reconcile::binding`] - Agent binding to store notifications
//! - [`reconcile::inspector`] - Scheduled drift detection
//! - [`reconcile::emitter`] - Patch sinks
//!
//! ## Roads
//! - [`roads::model`] - Road documents
//! - [`roads::agent`] - Topic reconciliation agent
//! - [`roads::admin`] - Topic administration seam
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - The local map equals the compaction of the log up to the last consumed
//!   offset.
//! - A write is visible to its writer's reads before the write returns.
//! - Observers see every committed record exactly once, in log order, after
//!   the map reflects it.
//! - Agent patches are idempotent: a satisfied correction yields no patch.

// Core infrastructure
pub mod core;

// Changelog transports
pub mod changelog;

// Replicated store
pub mod store;

// Reconciliation framework
pub mod reconcile;

// Road domain
pub mod roads;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use changelog::{LogPosition, LogReader, LogRecord, LogTransport};
pub use reconcile::{Agent, ModelInspector, PatchEmitter, PatchOperation, PatchSet, Reaction};
pub use store::{ChangeObserver, MuteableObserver, ReplicatedStore, Serializer};
