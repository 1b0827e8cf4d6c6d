//! Periodic drift detection.
//!
//! A [`ModelInspector`] walks a snapshot of every known document and asks
//! the agent to compare it with reality. Failures are isolated per document:
//! one road whose inspection errors or panics does not abort the scan.
//!
//! Scans never overlap. The scheduler awaits each scan before it waits for
//! the next tick, and a tick that falls due during a long scan is delayed
//! rather than queued.

use super::agent::Agent;
use super::emitter::PatchEmitter;
use super::patch::PatchSet;
use crate::core::time::SharedClock;
use crate::store::replicated::ReplicatedStore;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Point-in-time view of the documents to inspect.
pub trait DocumentSnapshot<M>: Send + Sync {
    /// Every live document, ordered by key.
    fn documents(&self) -> Vec<(String, M)>;
}

impl<M> DocumentSnapshot<M> for ReplicatedStore<String, M>
where
    M: Clone + Send + Sync + 'static,
{
    fn documents(&self) -> Vec<(String, M)> {
        let mut documents: Vec<_> = self.snapshot().into_iter().collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        documents
    }
}

/// Outcome of one inspection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Documents handed to the agent.
    pub inspected: usize,
    /// Patch sets emitted.
    pub emitted: usize,
    /// Documents whose inspection or emission failed.
    pub failed: usize,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
}

/// Runs the agent's drift check over every document.
pub struct ModelInspector<M> {
    source: Arc<dyn DocumentSnapshot<M>>,
    agent: Arc<dyn Agent<M>>,
    emitter: Arc<dyn PatchEmitter>,
    clock: SharedClock,
}

impl<M> ModelInspector<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn DocumentSnapshot<M>>,
        agent: Arc<dyn Agent<M>>,
        emitter: Arc<dyn PatchEmitter>,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            agent,
            emitter,
            clock,
        }
    }

    /// Inspect every document once.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport {
            started_at_ms: self.clock.now_ms(),
            ..ScanReport::default()
        };

        for (key, model) in self.source.documents() {
            report.inspected += 1;
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.agent.inspect_model(&key, &model)
            }));
            let operations = match outcome {
                Ok(Ok(operations)) => operations,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::error!(key = %key, error = %format!("{:#}", e), "inspection failed");
                    continue;
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(key = %key, "inspection panicked");
                    continue;
                }
            };
            if operations.is_empty() {
                continue;
            }

            tracing::info!(key = %key, operations = operations.len(), "drift detected");
            match self.emitter.emit(PatchSet::new(key.clone(), operations)) {
                Ok(()) => report.emitted += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(key = %key, error = %format!("{:#}", e), "failed to emit correction");
                }
            }
        }

        report.finished_at_ms = self.clock.now_ms();
        tracing::debug!(
            inspected = report.inspected,
            emitted = report.emitted,
            failed = report.failed,
            elapsed_ms = report.finished_at_ms.saturating_sub(report.started_at_ms),
            "inspection pass complete"
        );
        report
    }

    /// Scan on a fixed cadence until `shutdown` flips to true.
    ///
    /// The first scan runs after one full interval. Each scan runs on the
    /// blocking pool, since agents call out to synchronous infrastructure.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis() as u64, "inspector scheduled");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let inspector = Arc::clone(&self);
                if let Err(e) = tokio::task::spawn_blocking(move || inspector.scan()).await {
                    tracing::error!(error = %e, "inspection task aborted");
                }
            }
            tracing::info!("inspector stopped");
        })
    }
}
