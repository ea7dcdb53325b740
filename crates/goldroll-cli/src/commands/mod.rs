pub mod config;
pub mod history;
pub mod rollback;
pub mod simulate;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use goldroll_core::GoldrollConfig;
use goldroll_rollout::{Services, SimulatedFleet};
use goldroll_state::StateStore;

const STORE_FILE: &str = "goldroll.redb";

/// Read a config file, overlay the environment and validate.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<GoldrollConfig> {
    let mut config = GoldrollConfig::from_file(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Like `load_config`, falling back to defaults when no file is given.
pub(crate) fn load_config_or_default(path: Option<&Path>) -> anyhow::Result<GoldrollConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(GoldrollConfig::default()),
    }
}

pub(crate) fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    Ok(StateStore::open(&data_dir.join(STORE_FILE))?)
}

/// A simulated fleet whose templates currently launch the recorded image.
pub(crate) fn seeded_fleet(config: &GoldrollConfig, store: &StateStore) -> anyhow::Result<Arc<SimulatedFleet>> {
    let current = store
        .get_parameter(&config.image.parameter_name)?
        .map(|p| p.value)
        .unwrap_or_else(|| config.image.placeholder.clone());
    let fleet = SimulatedFleet::new();
    for template_id in &config.templates.ids {
        fleet.add_template(template_id, &current);
    }
    Ok(fleet)
}

/// Fleet ports for the cloud side, the store for everything durable.
pub(crate) fn services(fleet: &Arc<SimulatedFleet>, store: &StateStore) -> Services {
    fleet
        .services()
        .with_parameters(Arc::new(store.clone()))
        .with_leases(Arc::new(store.clone()))
}

pub(crate) fn holder() -> String {
    format!("goldroll-cli-{}", std::process::id())
}
