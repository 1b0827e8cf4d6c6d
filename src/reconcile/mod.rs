//! Reconciliation framework.
//!
//! Agents react to registry changes and periodically compare documents with
//! the infrastructure they describe. Corrections leave as patch sets; they
//! are never written to the registry directly.
//!
//! - [`agent`] - the domain SPI
//! - [`binding`] - routing store notifications to an agent
//! - [`inspector`] - scheduled drift detection
//! - [`emitter`] / [`patch`] - patch sets and where they go

pub mod agent;
pub mod binding;
pub mod emitter;
pub mod inspector;
pub mod patch;

pub use agent::Agent;
pub use binding::{AgentChangeObserver, BindingStats, Reaction};
pub use emitter::{LogPatchEmitter, PatchEmitter};
pub use inspector::{DocumentSnapshot, ModelInspector, ScanReport};
pub use patch::{PatchOperation, PatchSet};
