use std::path::Path;

pub fn history(data_dir: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config_or_default(config)?;
    let store = super::open_store(data_dir)?;

    let slots = [
        ("current", config.image.parameter_name.clone()),
        ("previous", config.image.previous_parameter_name()),
    ];
    for (label, key) in slots {
        match store.get_parameter(&key)? {
            Some(p) => println!("{label:<9} {}  (v{}, updated {})", p.value, p.version, p.updated_at),
            None => println!("{label:<9} -"),
        }
    }
    Ok(())
}
