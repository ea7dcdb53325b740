//! goldroll: golden-image rollout driver.
//!
//! Runs rollouts against the simulated fleet and inspects the durable
//! state they leave behind.
//!
//! # Usage
//!
//! ```text
//! goldroll simulate --config goldroll.toml --image ami-0abc --data-dir .goldroll
//! goldroll simulate --config goldroll.toml --event build-complete.json
//! goldroll history --data-dir .goldroll
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "goldroll",
    about = "Goldroll: golden-image rollout across launch templates and scaling groups",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full rollout of an image against the simulated fleet.
    Simulate {
        /// Configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Image id produced by the build.
        #[arg(short, long, required_unless_present = "event", conflicts_with = "event")]
        image: Option<String>,
        /// Image-builder completion event (JSON) to take the image id from.
        #[arg(long)]
        event: Option<PathBuf>,
        /// Data directory for history slots, lease and rollout state.
        #[arg(long, default_value = ".goldroll")]
        data_dir: PathBuf,
        /// Make the refresh of this group fail (repeatable).
        #[arg(long)]
        fail_group: Vec<String>,
        /// Make the refresh of this group get cancelled (repeatable).
        #[arg(long)]
        cancel_group: Vec<String>,
        /// Delay between refresh polls, overriding the configured interval.
        #[arg(long, default_value = "100")]
        poll_ms: u64,
    },
    /// Restore the previous image into every managed template.
    Rollback {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, default_value = ".goldroll")]
        data_dir: PathBuf,
    },
    /// Show the current and previous image slots.
    History {
        #[arg(long, default_value = ".goldroll")]
        data_dir: PathBuf,
        /// Configuration file naming the history parameter.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the persisted rollout state, if a rollout is in flight.
    State {
        #[arg(long, default_value = ".goldroll")]
        data_dir: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Work with configuration files.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a configuration file (with environment overrides applied).
    Check { path: PathBuf },
    /// Print the default configuration.
    Default,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Commands::Simulate {
            config,
            image,
            event,
            data_dir,
            fail_group,
            cancel_group,
            poll_ms,
        } => {
            commands::simulate::simulate(commands::simulate::SimulateArgs {
                config_path: &config,
                image: image.as_deref(),
                event: event.as_deref(),
                data_dir: &data_dir,
                fail_groups: &fail_group,
                cancel_groups: &cancel_group,
                poll_ms,
            })
            .await
        }
        Commands::Rollback { config, data_dir } => commands::rollback::rollback(&config, &data_dir),
        Commands::History { data_dir, config } => {
            commands::history::history(&data_dir, config.as_deref())
        }
        Commands::State { data_dir, config } => commands::state::state(&data_dir, config.as_deref()),
        Commands::Config { action } => match action {
            ConfigAction::Check { path } => commands::config::check(&path),
            ConfigAction::Default => commands::config::print_default(),
        },
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,goldroll=debug"))?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}
