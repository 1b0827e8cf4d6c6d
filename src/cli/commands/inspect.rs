//! Inspect command implementation.

use crate::core::config::Config;
use crate::core::runtime::{open_transport, RoadStore};
use crate::core::time::system_clock;
use crate::roads::model::{road_serializer, Road};
use crate::store::replicated::{ReplicatedStore, StoreConfig};
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Replay the road topic and print what it holds.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Print a single road as JSON.
    #[arg(long)]
    pub road: Option<String>,

    /// Print every road as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Run the inspect command.
///
/// Builds a private replica with no observers, so nothing is emitted.
pub fn run_inspect(config_path: &Path, args: InspectArgs) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;

    let transport = open_transport(&config, &config.log.road_topic)?;
    let store: RoadStore = ReplicatedStore::start(
        transport,
        std::sync::Arc::new(road_serializer()),
        Vec::new(),
        system_clock(),
        StoreConfig {
            sync_timeout: config.store.sync_timeout(),
            poll_timeout: config.store.poll_timeout(),
        },
    )
    .context("failed to start road replica")?;

    let replayed = store.wait_until_caught_up(config.store.catch_up_timeout());
    let output = replayed
        .context("road topic replay failed")
        .and_then(|()| render(&store, &args));
    let _ = store.close();
    println!("{}", output?);
    Ok(())
}

fn render(store: &RoadStore, args: &InspectArgs) -> Result<String> {
    if let Some(name) = &args.road {
        let road = store
            .get(name.as_str())
            .with_context(|| format!("road {} not found", name))?;
        return serde_json::to_string_pretty(&road).context("failed to render road");
    }

    let mut roads: Vec<Road> = store.snapshot().into_values().collect();
    roads.sort_by(|a, b| a.name.cmp(&b.name));

    if args.json {
        return serde_json::to_string_pretty(&roads).context("failed to render roads");
    }

    let stats = store.stats();
    let mut out = format!(
        "{} roads ({} records, {} tombstones, {} legacy skipped)\n",
        roads.len(),
        stats.records_applied,
        stats.tombstones,
        stats.legacy_skipped
    );
    out.push_str(&format!("{:<32} {:<10} {}\n", "NAME", "PHASE", "TOPIC"));
    for road in &roads {
        out.push_str(&format!(
            "{:<32} {:<10} {}\n",
            road.name,
            road.phase(),
            road.topic_name()
        ));
    }
    Ok(out)
}
