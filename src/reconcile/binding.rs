//! Binding agents to store notifications.
//!
//! [`AgentChangeObserver`] turns store callbacks into agent calls and
//! publishes non-empty results. Agent errors and panics are logged with the
//! document key and swallowed: they run on the store's tailing thread, and
//! one bad document must not stall replication for every other road.
//!
//! Whether a service reacts at all is decided once, at composition time,
//! through [`Reaction`].

use super::agent::Agent;
use super::emitter::PatchEmitter;
use super::patch::{PatchOperation, PatchSet};
use crate::store::observer::ChangeObserver;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters kept by an [`AgentChangeObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingStats {
    /// Patch sets handed to the emitter.
    pub emitted: u64,
    /// Agent calls that returned an error or panicked.
    pub agent_failures: u64,
    /// Patch sets the emitter rejected.
    pub emit_failures: u64,
    /// Updates skipped because old and new were equal.
    pub unchanged: u64,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    agent_failures: AtomicU64,
    emit_failures: AtomicU64,
    unchanged: AtomicU64,
}

/// Routes store notifications to an agent and emits its patches.
pub struct AgentChangeObserver<M> {
    agent: Arc<dyn Agent<M>>,
    emitter: Arc<dyn PatchEmitter>,
    counters: Counters,
}

impl<M> AgentChangeObserver<M> {
    pub fn new(agent: Arc<dyn Agent<M>>, emitter: Arc<dyn PatchEmitter>) -> Self {
        Self {
            agent,
            emitter,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> BindingStats {
        BindingStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            agent_failures: self.counters.agent_failures.load(Ordering::Relaxed),
            emit_failures: self.counters.emit_failures.load(Ordering::Relaxed),
            unchanged: self.counters.unchanged.load(Ordering::Relaxed),
        }
    }

    /// Run an agent call, isolating errors and panics.
    fn guarded<T>(&self, key: &str, phase: &str, call: impl FnOnce() -> anyhow::Result<T>) -> Option<T> {
        match std::panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.agent_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %key, phase, error = %format!("{:#}", e), "agent call failed");
                None
            }
            Err(_) => {
                self.counters.agent_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %key, phase, "agent call panicked");
                None
            }
        }
    }

    fn emit(&self, key: &str, operations: Vec<PatchOperation>) {
        if operations.is_empty() {
            return;
        }
        match self.emitter.emit(PatchSet::new(key, operations)) {
            Ok(()) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.emit_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %key, error = %format!("{:#}", e), "failed to emit patch");
            }
        }
    }
}

impl<M> ChangeObserver<String, M> for AgentChangeObserver<M>
where
    M: PartialEq + Send + Sync,
{
    fn handle_new(&self, key: &String, value: &M) {
        if let Some(operations) = self.guarded(key, "new", || self.agent.new_model(key, value)) {
            self.emit(key, operations);
        }
    }

    fn handle_update(&self, key: &String, old: &M, new: &M) {
        if old == new {
            self.counters.unchanged.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Some(operations) =
            self.guarded(key, "update", || self.agent.updated_model(key, old, new))
        {
            self.emit(key, operations);
        }
    }

    fn handle_remove(&self, key: &String, old: &M) {
        self.guarded(key, "delete", || self.agent.deleted_model(key, old));
    }
}

/// How a service reacts to road changes, fixed when the process is composed.
pub enum Reaction<M> {
    /// Changes are routed to an agent.
    Agent(AgentChangeObserver<M>),
    /// Read-only consumer of the registry.
    Passive,
}

impl<M> Reaction<M> {
    /// React through `agent` when one is configured, otherwise stay passive.
    pub fn from_agent(agent: Option<Arc<dyn Agent<M>>>, emitter: Arc<dyn PatchEmitter>) -> Self {
        match agent {
            Some(agent) => Self::Agent(AgentChangeObserver::new(agent, emitter)),
            None => Self::Passive,
        }
    }

    pub fn is_passive(&self) -> bool {
        matches!(self, Self::Passive)
    }

    /// Binding statistics, zero for a passive reaction.
    pub fn stats(&self) -> BindingStats {
        match self {
            Self::Agent(observer) => observer.stats(),
            Self::Passive => BindingStats::default(),
        }
    }
}

impl<M> ChangeObserver<String, M> for Reaction<M>
where
    M: PartialEq + Send + Sync,
{
    fn handle_new(&self, key: &String, value: &M) {
        if let Self::Agent(observer) = self {
            observer.handle_new(key, value);
        }
    }

    fn handle_update(&self, key: &String, old: &M, new: &M) {
        if let Self::Agent(observer) = self {
            observer.handle_update(key, old, new);
        }
    }

    fn handle_remove(&self, key: &String, old: &M) {
        if let Self::Agent(observer) = self {
            observer.handle_remove(key, old);
        }
    }
}
