use std::path::Path;

use goldroll_core::RolloutStateStore;

pub fn state(data_dir: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config_or_default(config)?;
    let store = super::open_store(data_dir)?;

    match store.load(&config.lease.name)? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("no rollout in progress for {}", config.lease.name),
    }
    Ok(())
}
