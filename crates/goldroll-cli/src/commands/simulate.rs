use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use goldroll_core::{LeaseStore, RefreshStatus};
use goldroll_rollout::{PublishRequest, RolloutPhase, Sequencer};
use tracing::{info, warn};

pub struct SimulateArgs<'a> {
    pub config_path: &'a Path,
    pub image: Option<&'a str>,
    pub event: Option<&'a Path>,
    pub data_dir: &'a Path,
    pub fail_groups: &'a [String],
    pub cancel_groups: &'a [String],
    pub poll_ms: u64,
}

/// The image comes either straight from `--image` or out of a build event file.
pub(crate) fn publish_request(image: Option<&str>, event: Option<&Path>) -> anyhow::Result<PublishRequest> {
    match (image, event) {
        (Some(image), None) => Ok(PublishRequest::new(image)),
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading build event {}", path.display()))?;
            let event: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("parsing build event {}", path.display()))?;
            Ok(PublishRequest::from_build_event(&event)?)
        }
        _ => bail!("pass exactly one of --image or --event"),
    }
}

pub async fn simulate(args: SimulateArgs<'_>) -> anyhow::Result<()> {
    let request = publish_request(args.image, args.event)?;
    let config = super::load_config(args.config_path)?;
    let store = super::open_store(args.data_dir)?;
    let fleet = super::seeded_fleet(&config, &store)?;

    let scripted = [
        (args.fail_groups, vec![RefreshStatus::InProgress, RefreshStatus::Failed]),
        (
            args.cancel_groups,
            vec![RefreshStatus::InProgress, RefreshStatus::Cancelling, RefreshStatus::Cancelled],
        ),
    ];
    for (groups, script) in scripted {
        for group in groups {
            if !config.groups.names.contains(group) {
                bail!("{group} is not a configured scaling group");
            }
            fleet.script_refresh(group, script.clone());
        }
    }

    let mut sequencer = Sequencer::from_config(super::services(&fleet, &store), &config)
        .with_state_store(Arc::new(store.clone()))
        .with_poll_interval(Duration::from_millis(args.poll_ms));

    let lease = store.acquire(&config.lease.name, &super::holder(), config.lease.ttl_secs)?;
    info!(lease = %lease.name, holder = %lease.holder, "acquired rollout lease");
    let result = sequencer.run(&lease, &request).await;
    if let Err(e) = store.release(&lease) {
        warn!(error = %e, "failed to release rollout lease");
    }

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    match &report.phase {
        RolloutPhase::Done => Ok(()),
        RolloutPhase::Halted { reason } => bail!("rollout halted: {reason}"),
        other => bail!("rollout stopped in unexpected phase {other:?}"),
    }
}
