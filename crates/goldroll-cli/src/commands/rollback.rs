use std::path::Path;

use goldroll_core::LeaseStore;
use goldroll_rollout::RollbackExecutor;
use tracing::warn;

pub fn rollback(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(data_dir)?;
    let fleet = super::seeded_fleet(&config, &store)?;
    let executor = RollbackExecutor::new(
        super::services(&fleet, &store),
        config.templates.ids.clone(),
        config.image.clone(),
    );

    let lease = store.acquire(&config.lease.name, &super::holder(), config.lease.ttl_secs)?;
    let result = executor.execute(&lease);
    if let Err(e) = store.release(&lease) {
        warn!(error = %e, "failed to release rollout lease");
    }

    let outcome = result?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
