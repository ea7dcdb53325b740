//! End-to-end rollout scenarios against the simulated fleet, with history
//! slots, leases and rollout state kept in a redb-backed store.

use std::sync::Arc;
use std::time::Duration;

use goldroll_core::{GoldrollConfig, LeaseStore, RefreshStatus, RolloutStateStore};
use goldroll_rollout::{
    ErrorKind, ImagePublisher, PublishRequest, RefreshCursor, RefreshOutcome,
    RefreshStatusClassifier, RollbackExecutor, RolloutPhase, Sequencer, Services, SimulatedFleet,
    TemplatePropagator,
};
use goldroll_state::StateStore;

const CURRENT: &str = "/amis/latest-golden-ami";
const PREVIOUS: &str = "/amis/latest-golden-ami-previous";

fn config() -> GoldrollConfig {
    let mut config = GoldrollConfig::default();
    config.sharing.consumer_accounts = vec!["111111111111".into(), "222222222222".into()];
    config.sharing.key_id = "key-1".into();
    config.templates.ids = vec!["lt-1".into(), "lt-2".into()];
    config.groups.names = vec!["asg-a".into(), "asg-b".into()];
    config
}

/// Simulated fleet for the cloud side, redb for everything durable.
fn environment() -> (Arc<SimulatedFleet>, StateStore, Services) {
    let fleet = SimulatedFleet::new();
    fleet.add_template("lt-1", "ami-old");
    fleet.add_template("lt-2", "ami-old");
    let store = StateStore::open_in_memory().unwrap();
    let services = fleet
        .services()
        .with_parameters(Arc::new(store.clone()))
        .with_leases(Arc::new(store.clone()));
    (fleet, store, services)
}

#[test]
fn cursor_walks_groups_with_classifier_in_between() {
    let (fleet, store, services) = environment();
    let cfg = config();
    let lease = store.acquire(&cfg.lease.name, "it", 600).unwrap();
    let cursor = RefreshCursor::new(services.clone(), cfg.groups.names.clone(), cfg.refresh.clone());
    let classifier = RefreshStatusClassifier::new(services);

    let first = cursor.advance(&lease, None).unwrap();
    assert_eq!(first.state.cursor, 0);
    assert_eq!(first.group_id.as_deref(), Some("asg-a"));
    assert!(!first.state.complete);
    let refresh_id = first.refresh_id.clone().unwrap();
    while !classifier.classify(&lease, "asg-a", &refresh_id).unwrap().is_complete {}

    let second = cursor.advance(&lease, Some(&first.state)).unwrap();
    assert_eq!(second.state.cursor, 1);
    assert_eq!(second.group_id.as_deref(), Some("asg-b"));
    let refresh_id = second.refresh_id.clone().unwrap();
    let last = loop {
        let report = classifier.classify(&lease, "asg-b", &refresh_id).unwrap();
        if report.is_complete {
            break report;
        }
    };
    assert_eq!(last.outcome(), RefreshOutcome::Successful);

    let third = cursor.advance(&lease, Some(&second.state)).unwrap();
    assert_eq!(third.state.cursor, 2);
    assert!(third.state.complete);
    assert!(third.group_id.is_none());
    assert_eq!(fleet.started_refreshes().len(), 2);
}

#[test]
fn propagation_points_both_templates_at_new_versions() {
    let (fleet, store, services) = environment();
    let cfg = config();
    let lease = store.acquire(&cfg.lease.name, "it", 600).unwrap();
    let before: Vec<_> = ["lt-1", "lt-2"]
        .iter()
        .map(|t| fleet.default_of(t).unwrap().0)
        .collect();

    let propagator = TemplatePropagator::new(services, cfg.templates.ids.clone(), cfg.image.clone());
    let out = propagator.propagate(&lease, "img-9").unwrap();

    assert_eq!(out.updated_templates.len(), 2);
    for (update, prior) in out.updated_templates.iter().zip(before) {
        assert!(update.version > prior);
        assert_eq!(
            fleet.default_of(&update.template_id),
            Some((update.version, "img-9".to_string()))
        );
    }
}

#[test]
fn history_survives_in_the_durable_store() {
    let (_fleet, store, services) = environment();
    let cfg = config();
    let lease = store.acquire(&cfg.lease.name, "it", 600).unwrap();
    let publisher = ImagePublisher::new(services, cfg.image.clone(), cfg.sharing.clone());

    for id in ["ami-a", "ami-b", "ami-c"] {
        publisher.publish(&lease, &PublishRequest::new(id)).unwrap();
    }

    let current = store.get_parameter(CURRENT).unwrap().unwrap();
    let previous = store.get_parameter(PREVIOUS).unwrap().unwrap();
    assert_eq!(current.value, "ami-c");
    assert_eq!(current.version, 3);
    assert_eq!(previous.value, "ami-b");
}

#[test]
fn rollback_without_previous_image_is_refused() {
    let (fleet, store, services) = environment();
    let cfg = config();
    let lease = store.acquire(&cfg.lease.name, "it", 600).unwrap();
    let executor = RollbackExecutor::new(services, cfg.templates.ids.clone(), cfg.image.clone());

    let err = executor.execute(&lease).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(fleet.version_count("lt-1"), 1);
    assert_eq!(fleet.version_count("lt-2"), 1);
}

#[test]
fn second_holder_cannot_drive_components() {
    let (_fleet, store, services) = environment();
    let cfg = config();
    let lease = store.acquire(&cfg.lease.name, "first", 600).unwrap();
    assert!(store.acquire(&cfg.lease.name, "second", 600).is_err());

    store.release(&lease).unwrap();
    let propagator = TemplatePropagator::new(services, cfg.templates.ids.clone(), cfg.image.clone());
    let err = propagator.propagate(&lease, "img-9").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lease);
}

#[tokio::test]
async fn full_rollout_then_failed_rollout_restores_previous_image() {
    let (fleet, store, services) = environment();
    let cfg = config();
    let lease = store.acquire(&cfg.lease.name, "it", 600).unwrap();
    let mut sequencer = Sequencer::from_config(services, &cfg)
        .with_poll_interval(Duration::ZERO)
        .with_state_store(Arc::new(store.clone()));

    let report = sequencer.run(&lease, &PublishRequest::new("ami-1")).await.unwrap();
    assert!(report.is_done());
    assert_eq!(fleet.launch_permissions("ami-1").len(), 2);
    assert!(store.load(&cfg.lease.name).unwrap().is_none());

    fleet.script_refresh("asg-b", vec![RefreshStatus::InProgress, RefreshStatus::Failed]);
    let report = sequencer.run(&lease, &PublishRequest::new("ami-2")).await.unwrap();
    assert!(matches!(report.phase, RolloutPhase::Halted { .. }));
    assert_eq!(report.rollback.unwrap().restored_image_id, "ami-1");

    assert_eq!(fleet.default_of("lt-1").unwrap().1, "ami-1");
    assert_eq!(fleet.default_of("lt-2").unwrap().1, "ami-1");
    assert_eq!(store.get_parameter(CURRENT).unwrap().unwrap().value, "ami-1");
    assert!(store.get_parameter(PREVIOUS).unwrap().is_none());
    assert!(store.load(&cfg.lease.name).unwrap().is_none());
}
