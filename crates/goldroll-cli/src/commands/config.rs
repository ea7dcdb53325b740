use std::path::Path;

use goldroll_core::GoldrollConfig;

pub fn check(path: &Path) -> anyhow::Result<()> {
    match super::load_config(path) {
        Ok(config) => {
            println!("✓ {} is valid", path.display());
            println!("  Image parameter:   {}", config.image.parameter_name);
            println!("  Consumer accounts: {}", config.sharing.consumer_accounts.len());
            println!("  Launch templates:  {}", config.templates.ids.join(", "));
            println!("  Scaling groups:    {}", config.groups.names.join(", "));
            println!(
                "  Refresh policy:    min healthy {}%, warmup {}s",
                config.refresh.min_healthy_percentage, config.refresh.instance_warmup_secs
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Config check failed: {e:#}");
            Err(e)
        }
    }
}

pub fn print_default() -> anyhow::Result<()> {
    print!("{}", GoldrollConfig::default().to_toml_string()?);
    Ok(())
}
