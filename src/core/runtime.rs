//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: changelog → store (reaction muted) → catch-up → unmute →
//!   reconciler
//! - Shutdown order: reconciler → reaction (muted) → store → changelog
//!
//! The reaction stays muted through the initial replay, so agents only see
//! changes that happen while this process is live. Documents that changed
//! while it was down are picked up by the first inspection pass.

use crate::changelog::memory::MemoryLog;
use crate::changelog::LogTransport;
use crate::core::config::{Config, LogMode};
use crate::core::time::{system_clock, SharedClock};
use crate::reconcile::binding::{BindingStats, Reaction};
use crate::reconcile::emitter::{LogPatchEmitter, PatchEmitter};
use crate::reconcile::inspector::{DocumentSnapshot, ModelInspector};
use crate::reconcile::Agent;
use crate::roads::admin::{InMemoryTopicAdmin, TopicAdmin};
use crate::roads::agent::{TopicAgent, TopicDefaults};
use crate::roads::model::{road_serializer, Road};
use crate::store::mute::MuteableObserver;
use crate::store::observer::SharedObserver;
use crate::store::replicated::{ReplicatedStore, StoreConfig};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The road registry store.
pub type RoadStore = ReplicatedStore<String, Road>;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
    /// Component is not configured for this process.
    Disabled,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Changelog transports.
    pub changelog: ComponentHealth,
    /// Replicated road store.
    pub store: ComponentHealth,
    /// Agent reaction to road changes.
    pub reaction: ComponentHealth,
    /// Periodic drift inspection.
    pub reconciler: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            changelog: ComponentHealth::Starting,
            store: ComponentHealth::Starting,
            reaction: ComponentHealth::Starting,
            reconciler: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the registry is caught up and serving reads.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.changelog, self.store, self.reaction, self.reconciler),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy | ComponentHealth::Disabled,
                ComponentHealth::Healthy | ComponentHealth::Disabled
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.changelog, self.store),
            (ComponentHealth::Failed, _) | (_, ComponentHealth::Failed)
        )
    }
}

/// Externally built collaborators, for embedding and tests.
pub struct Components {
    pub road_log: Arc<dyn LogTransport>,
    pub patch_log: Arc<dyn LogTransport>,
    pub admin: Arc<dyn TopicAdmin>,
    pub clock: SharedClock,
}

/// Roadworks runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Collaborators supplied by the caller instead of built from config.
    components: Option<Components>,

    /// Road topic transport.
    road_log: Option<Arc<dyn LogTransport>>,

    /// Patch topic transport.
    patch_log: Option<Arc<dyn LogTransport>>,

    /// Road store handle.
    store: Option<Arc<RoadStore>>,

    /// Agent binding, muted during replay and shutdown.
    reaction: Option<Arc<MuteableObserver<Reaction<Road>>>>,

    /// Reconciler task handle.
    reconciler_handle: Option<JoinHandle<()>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            components: None,
            road_log: None,
            patch_log: None,
            store: None,
            reaction: None,
            reconciler_handle: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Create a runtime around caller-supplied transports and topic admin.
    ///
    /// `config.log` is only used for diagnostics.
    pub fn with_components(config: Config, components: Components) -> Result<Self> {
        let mut runtime = Self::new(config)?;
        runtime.components = Some(components);
        Ok(runtime)
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the road store (if started).
    pub fn store(&self) -> Option<&Arc<RoadStore>> {
        self.store.as_ref()
    }

    /// Get the patch topic transport (if started).
    pub fn patch_log(&self) -> Option<&Arc<dyn LogTransport>> {
        self.patch_log.as_ref()
    }

    /// Agent binding statistics, zero for a passive process.
    pub fn reaction_stats(&self) -> BindingStats {
        self.reaction
            .as_ref()
            .map(|r| r.inner().stats())
            .unwrap_or_default()
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the registry is ready to serve reads.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    ///
    /// Components are started in order:
    /// 1. Changelog transports
    /// 2. Road store, with the agent reaction muted
    /// 3. Initial replay, then unmute
    /// 4. Reconciler
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            mode = %self.config.log.mode,
            road_topic = %self.config.log.road_topic,
            patch_topic = %self.config.log.patch_topic,
            "starting Roadworks runtime"
        );

        let (admin, clock) = self.init_changelog()?;
        let agent = self.build_agent(admin);
        self.init_store(agent.clone(), clock.clone()).await?;
        self.init_reconciler(agent, clock)?;

        self.running.store(true, Ordering::Release);
        tracing::info!("Roadworks runtime started");
        Ok(())
    }

    /// Build or adopt the transports.
    fn init_changelog(&mut self) -> Result<(Arc<dyn TopicAdmin>, SharedClock)> {
        tracing::debug!("initializing changelog");

        let (road_log, patch_log, admin, clock) = match self.components.take() {
            Some(c) => (c.road_log, c.patch_log, c.admin, c.clock),
            None => {
                let (road_log, patch_log, admin) = build_transports(&self.config)?;
                (road_log, patch_log, admin, system_clock())
            }
        };

        tracing::info!(
            road_topic = %road_log.topic(),
            patch_topic = %patch_log.topic(),
            "changelog initialized"
        );
        self.road_log = Some(road_log);
        self.patch_log = Some(patch_log);
        self.health.changelog = ComponentHealth::Healthy;
        Ok((admin, clock))
    }

    fn build_agent(&self, admin: Arc<dyn TopicAdmin>) -> Option<Arc<dyn Agent<Road>>> {
        if !self.config.agent.enabled {
            tracing::info!("agent disabled, running as a passive registry consumer");
            return None;
        }
        let defaults = TopicDefaults {
            partitions: self.config.agent.default_partitions,
            replication_factor: self.config.agent.default_replication_factor,
        };
        Some(Arc::new(TopicAgent::new(admin, defaults)))
    }

    /// Start the store and wait for the initial replay.
    async fn init_store(
        &mut self,
        agent: Option<Arc<dyn Agent<Road>>>,
        clock: SharedClock,
    ) -> Result<()> {
        tracing::debug!("initializing road store");

        let (road_log, emitter) = self.transports()?;
        let reaction = Arc::new(MuteableObserver::muted(Reaction::from_agent(agent, emitter)));
        self.health.reaction = if reaction.inner().is_passive() {
            ComponentHealth::Disabled
        } else {
            ComponentHealth::Starting
        };

        let observers = vec![reaction.clone() as SharedObserver<String, Road>];
        let store_config = StoreConfig {
            sync_timeout: self.config.store.sync_timeout(),
            poll_timeout: self.config.store.poll_timeout(),
        };
        let store = ReplicatedStore::start(
            road_log,
            Arc::new(road_serializer()),
            observers,
            clock,
            store_config,
        )
        .context("failed to start road store")?;
        let store = Arc::new(store);
        self.store = Some(store.clone());

        let timeout = self.config.store.catch_up_timeout();
        let replay = store.clone();
        let caught_up = tokio::task::spawn_blocking(move || replay.wait_until_caught_up(timeout))
            .await
            .context("catch-up task aborted")?;
        if let Err(e) = caught_up {
            self.health.store = ComponentHealth::Failed;
            return Err(e).context("road store failed to catch up");
        }
        self.health.store = ComponentHealth::Healthy;

        reaction.unmute();
        if !reaction.inner().is_passive() {
            self.health.reaction = ComponentHealth::Healthy;
        }
        self.reaction = Some(reaction);

        tracing::info!(roads = store.len(), "road store initialized");
        Ok(())
    }

    /// Schedule drift inspection.
    fn init_reconciler(
        &mut self,
        agent: Option<Arc<dyn Agent<Road>>>,
        clock: SharedClock,
    ) -> Result<()> {
        let agent = match agent {
            Some(agent) if self.config.reconciler.enabled => agent,
            _ => {
                self.health.reconciler = ComponentHealth::Disabled;
                tracing::info!("reconciler disabled");
                return Ok(());
            }
        };

        let (_, emitter) = self.transports()?;
        let store = self
            .store
            .clone()
            .context("road store not initialized")?;
        let source: Arc<dyn DocumentSnapshot<Road>> = store;
        let inspector = Arc::new(ModelInspector::new(source, agent, emitter, clock));
        let interval = self.config.reconciler.interval();
        self.reconciler_handle = Some(inspector.spawn(interval, self.shutdown_rx.clone()));
        self.health.reconciler = ComponentHealth::Healthy;

        tracing::info!(interval_seconds = interval.as_secs(), "reconciler initialized");
        Ok(())
    }

    fn transports(&self) -> Result<(Arc<dyn LogTransport>, Arc<dyn PatchEmitter>)> {
        let road_log = self.road_log.clone().context("changelog not initialized")?;
        let patch_log = self.patch_log.clone().context("changelog not initialized")?;
        Ok((road_log, Arc::new(LogPatchEmitter::new(patch_log))))
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until shutdown.
    ///
    /// Returns an error if the road store fails while running, so the
    /// process exits non-zero.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.supervise().await
    }

    /// Wait for a shutdown request while watching the road store, then stop.
    ///
    /// A store that stops tailing on a fatal error ends supervision early
    /// and the error is returned after the remaining components stop.
    pub async fn supervise(&mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut watchdog = tokio::time::interval(self.config.store.poll_timeout());
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let outcome = loop {
            if *shutdown_rx.borrow_and_update() {
                tracing::info!("shutdown requested by component");
                break Ok(());
            }
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::warn!("shutdown signal received (SIGINT)");
                    break Ok(());
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                _ = watchdog.tick() => {
                    if let Err(e) = self.refresh_health() {
                        break Err(e);
                    }
                }
            }
        };

        let stopped = self.stop().await;
        outcome.and(stopped)
    }

    /// Fold a store failure latched by the tail thread into the health report.
    pub fn refresh_health(&mut self) -> Result<()> {
        let failure = self.store.as_ref().and_then(|store| store.failure());
        if let Some(e) = failure {
            if self.health.store != ComponentHealth::Failed {
                tracing::error!(error = %e, "road store stopped tailing");
                self.health.store = ComponentHealth::Failed;
            }
            return Err(e).context("road store failed");
        }
        Ok(())
    }

    /// Stop all runtime components.
    ///
    /// Components are stopped in reverse order:
    /// 1. Reconciler
    /// 2. Agent reaction
    /// 3. Road store
    /// 4. Changelog transports
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Roadworks runtime");
        self.running.store(false, Ordering::Release);

        // Signal shutdown to all components
        let _ = self.shutdown_tx.send(true);

        self.stop_reconciler().await;
        self.stop_reaction();
        self.stop_store().await?;
        self.stop_changelog();

        tracing::info!("Roadworks runtime stopped");
        Ok(())
    }

    async fn stop_reconciler(&mut self) {
        tracing::debug!("stopping reconciler");
        if let Some(handle) = self.reconciler_handle.take() {
            self.health.reconciler = ComponentHealth::Stopping;
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "reconciler task panicked");
            }
            self.health.reconciler = ComponentHealth::Stopped;
        }
    }

    fn stop_reaction(&mut self) {
        tracing::debug!("muting agent reaction");
        if let Some(reaction) = self.reaction.take() {
            reaction.mute();
            tracing::info!(stats = ?reaction.inner().stats(), "agent reaction stopped");
        }
        if self.health.reaction != ComponentHealth::Disabled {
            self.health.reaction = ComponentHealth::Stopped;
        }
    }

    async fn stop_store(&mut self) -> Result<()> {
        tracing::debug!("stopping road store");
        let mut failed = self.health.store == ComponentHealth::Failed;
        if let Some(store) = self.store.take() {
            failed |= store.failure().is_some();
            self.health.store = ComponentHealth::Stopping;
            let closing = store.clone();
            let closed = tokio::task::spawn_blocking(move || closing.close())
                .await
                .context("store close task aborted")?;
            if let Err(e) = closed {
                tracing::warn!(error = %e, "road store already closed");
            }
            tracing::info!(stats = ?store.stats(), "road store stopped");
        }
        self.health.store = if failed {
            ComponentHealth::Failed
        } else {
            ComponentHealth::Stopped
        };
        Ok(())
    }

    fn stop_changelog(&mut self) {
        tracing::debug!("releasing changelog");
        self.road_log = None;
        self.patch_log = None;
        self.health.changelog = ComponentHealth::Stopped;
    }
}

/// Build transports and topic admin for the configured mode.
fn build_transports(
    config: &Config,
) -> Result<(Arc<dyn LogTransport>, Arc<dyn LogTransport>, Arc<dyn TopicAdmin>)> {
    let road_log = open_transport(config, &config.log.road_topic)?;
    let patch_log = open_transport(config, &config.log.patch_topic)?;
    let admin: Arc<dyn TopicAdmin> = match config.log.mode {
        LogMode::Memory => Arc::new(InMemoryTopicAdmin::new()),
        #[cfg(feature = "kafka")]
        LogMode::Kafka => Arc::new(crate::roads::admin::MetadataTopicAdmin::new(
            crate::changelog::kafka::parse_hosts(&config.log.bootstrap_servers),
        )),
        #[cfg(not(feature = "kafka"))]
        LogMode::Kafka => anyhow::bail!("kafka mode requires the kafka feature"),
    };
    Ok((road_log, patch_log, admin))
}

/// Open a transport on `topic` for the configured mode.
///
/// In memory mode every call yields a fresh, empty log.
pub fn open_transport(config: &Config, topic: &str) -> Result<Arc<dyn LogTransport>> {
    match config.log.mode {
        LogMode::Memory => {
            tracing::warn!(topic = %topic, "memory changelog in use, state is not durable");
            Ok(Arc::new(MemoryLog::new(topic)))
        }
        #[cfg(feature = "kafka")]
        LogMode::Kafka => {
            let transport =
                crate::changelog::kafka::KafkaTransport::connect(&config.log.bootstrap_servers, topic)
                    .with_context(|| format!("failed to connect producer for {}", topic))?;
            Ok(Arc::new(transport))
        }
        #[cfg(not(feature = "kafka"))]
        LogMode::Kafka => anyhow::bail!("kafka mode requires the kafka feature"),
    }
}
