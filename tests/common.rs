//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use parking_lot::Mutex;
use roadworks::changelog::memory::MemoryLog;
use roadworks::core::time::{ManualClock, SharedClock};
use roadworks::reconcile::{Agent, PatchEmitter, PatchOperation, PatchSet};
use roadworks::store::{ChangeObserver, JsonSerializer, ReplicatedStore, SharedObserver, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Small document type for store tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    pub name: String,
    #[serde(default)]
    pub version: u32,
}

impl Doc {
    pub fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
        }
    }
}

pub type DocStore = ReplicatedStore<String, Doc>;

/// Store tuning that keeps tests fast.
pub fn fast_store_config() -> StoreConfig {
    StoreConfig {
        sync_timeout: Duration::from_secs(5),
        poll_timeout: Duration::from_millis(10),
    }
}

pub fn clock() -> SharedClock {
    Arc::new(ManualClock::new(1_000))
}

/// Start a document store on `log` and wait for its replay.
pub fn doc_store(log: &MemoryLog, observers: Vec<SharedObserver<String, Doc>>) -> DocStore {
    let store = ReplicatedStore::start(
        Arc::new(log.clone()),
        Arc::new(JsonSerializer::<Doc>::new()),
        observers,
        clock(),
        fast_store_config(),
    )
    .expect("store start");
    store
        .wait_until_caught_up(Duration::from_secs(5))
        .expect("store catch-up");
    store
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// Observers
// ============================================================================

/// A notification as seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event<V> {
    New(String, V),
    Update(String, V, V),
    Remove(String, V),
}

/// Observer recording every callback in order.
pub struct RecordingObserver<V> {
    events: Mutex<Vec<Event<V>>>,
}

impl<V: Clone> RecordingObserver<V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Event<V>> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl<V: Clone + Send + Sync> ChangeObserver<String, V> for RecordingObserver<V> {
    fn handle_new(&self, key: &String, value: &V) {
        self.events
            .lock()
            .push(Event::New(key.clone(), value.clone()));
    }

    fn handle_update(&self, key: &String, old: &V, new: &V) {
        self.events
            .lock()
            .push(Event::Update(key.clone(), old.clone(), new.clone()));
    }

    fn handle_remove(&self, key: &String, old: &V) {
        self.events
            .lock()
            .push(Event::Remove(key.clone(), old.clone()));
    }
}

// ============================================================================
// Emitters and agents
// ============================================================================

/// Emitter keeping every patch set it is handed.
#[derive(Default)]
pub struct RecordingEmitter {
    emitted: Mutex<Vec<PatchSet>>,
    failing: Mutex<bool>,
}

impl RecordingEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emitted(&self) -> Vec<PatchSet> {
        self.emitted.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.emitted.lock().len()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl PatchEmitter for RecordingEmitter {
    fn emit(&self, patch: PatchSet) -> anyhow::Result<()> {
        if *self.failing.lock() {
            anyhow::bail!("emitter offline");
        }
        self.emitted.lock().push(patch);
        Ok(())
    }
}

/// How a [`ScriptedAgent`] treats a key.
#[derive(Debug, Clone)]
pub enum Script {
    Patches(Vec<PatchOperation>),
    Fail(String),
    Panic,
}

/// Agent answering from per-key scripts and recording its calls.
#[derive(Default)]
pub struct ScriptedAgent {
    on_change: Mutex<HashMap<String, Script>>,
    on_inspect: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
    deleted: Mutex<HashSet<String>>,
}

impl ScriptedAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script `new_model`/`updated_model` for a key.
    pub fn on_change(&self, key: &str, script: Script) {
        self.on_change.lock().insert(key.to_string(), script);
    }

    /// Script `inspect_model` for a key.
    pub fn on_inspect(&self, key: &str, script: Script) {
        self.on_inspect.lock().insert(key.to_string(), script);
    }

    /// Calls as `"<method>:<key>"`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn was_deleted(&self, key: &str) -> bool {
        self.deleted.lock().contains(key)
    }

    fn answer(
        &self,
        method: &str,
        key: &str,
        scripts: &Mutex<HashMap<String, Script>>,
    ) -> anyhow::Result<Vec<PatchOperation>> {
        self.calls.lock().push(format!("{}:{}", method, key));
        let script = scripts.lock().get(key).cloned();
        match script {
            None => Ok(Vec::new()),
            Some(Script::Patches(patches)) => Ok(patches),
            Some(Script::Fail(message)) => anyhow::bail!(message),
            Some(Script::Panic) => panic!("scripted panic for {}", key),
        }
    }
}

impl<M> Agent<M> for ScriptedAgent {
    fn new_model(&self, key: &str, _model: &M) -> anyhow::Result<Vec<PatchOperation>> {
        self.answer("new", key, &self.on_change)
    }

    fn updated_model(&self, key: &str, _old: &M, _new: &M) -> anyhow::Result<Vec<PatchOperation>> {
        self.answer("update", key, &self.on_change)
    }

    fn deleted_model(&self, key: &str, _old: &M) -> anyhow::Result<()> {
        self.calls.lock().push(format!("delete:{}", key));
        self.deleted.lock().insert(key.to_string());
        Ok(())
    }

    fn inspect_model(&self, key: &str, _model: &M) -> anyhow::Result<Vec<PatchOperation>> {
        self.answer("inspect", key, &self.on_inspect)
    }
}

// ============================================================================
// Config files
// ============================================================================

/// Write `content` to a temporary config file.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a minimal valid configuration file using the memory changelog.
pub fn create_memory_config() -> NamedTempFile {
    create_config(
        r#"
[log]
mode = "memory"
"#,
    )
}
