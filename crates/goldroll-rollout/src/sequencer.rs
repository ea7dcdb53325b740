//! Rollout sequencer: drives the rollout phase machine.
//!
//! Publish, propagate, then refresh the scaling groups one at a time,
//! polling each refresh until it is terminal. A failed or cancelled refresh,
//! or any error after publishing, rolls the templates back to the previous
//! image and halts the rollout.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use goldroll_core::{GoldrollConfig, GroupId, ImageId, Lease, RolloutState, RolloutStateStore};

use crate::classifier::{RefreshOutcome, RefreshReport, RefreshStatusClassifier};
use crate::cursor::RefreshCursor;
use crate::error::{ErrorKind, RolloutError, RolloutResult, upstream};
use crate::propagator::{PropagationOutcome, TemplatePropagator};
use crate::publisher::{ImagePublisher, PublishOutcome, PublishRequest};
use crate::rollback::{RollbackExecutor, RollbackOutcome};
use crate::services::Services;

/// Current phase of a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Rollout not started.
    NotStarted,
    /// Sharing the image and shifting history.
    Publishing,
    /// Pointing launch templates at the new image.
    Propagating,
    /// Waiting on the refresh of group `index` of the group list.
    Refreshing { index: i64, group_id: GroupId },
    /// Restoring the previous image after a failure.
    RollingBack { reason: String },
    /// Stopped after a failure.
    Halted { reason: String },
    /// Every group refreshed successfully.
    Done,
}

/// Everything a run did, in the order it did it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutReport {
    pub image_id: ImageId,
    pub phase: RolloutPhase,
    pub publish: Option<PublishOutcome>,
    pub propagation: Option<PropagationOutcome>,
    pub refreshes: Vec<RefreshReport>,
    pub rollback: Option<RollbackOutcome>,
}

impl RolloutReport {
    fn new(image_id: &str) -> Self {
        Self {
            image_id: image_id.to_string(),
            phase: RolloutPhase::NotStarted,
            publish: None,
            propagation: None,
            refreshes: Vec::new(),
            rollback: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == RolloutPhase::Done
    }
}

pub struct Sequencer {
    publisher: ImagePublisher,
    propagator: TemplatePropagator,
    cursor: RefreshCursor,
    classifier: RefreshStatusClassifier,
    rollback: RollbackExecutor,
    poll_interval: Duration,
    state_store: Option<Arc<dyn RolloutStateStore>>,
    rollout_name: String,
    phase: RolloutPhase,
}

impl Sequencer {
    pub fn from_config(services: Services, config: &GoldrollConfig) -> Self {
        let templates = config.templates.ids.clone();
        Self {
            publisher: ImagePublisher::new(
                services.clone(),
                config.image.clone(),
                config.sharing.clone(),
            ),
            propagator: TemplatePropagator::new(
                services.clone(),
                templates.clone(),
                config.image.clone(),
            ),
            cursor: RefreshCursor::new(
                services.clone(),
                config.groups.names.clone(),
                config.refresh.clone(),
            ),
            classifier: RefreshStatusClassifier::new(services.clone()),
            rollback: RollbackExecutor::new(services, templates, config.image.clone()),
            poll_interval: config.refresh.poll_interval(),
            state_store: None,
            rollout_name: config.lease.name.clone(),
            phase: RolloutPhase::NotStarted,
        }
    }

    /// Persist the rollout state after every cursor step.
    pub fn with_state_store(mut self, store: Arc<dyn RolloutStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn phase(&self) -> &RolloutPhase {
        &self.phase
    }

    /// Run one rollout of `request.image_id` to completion.
    ///
    /// Returns `Ok` with phase `Done` on success and `Ok` with phase `Halted`
    /// after a successful rollback. Returns `Err` when publishing fails
    /// (nothing to undo), when the lease is lost, or when the rollback itself
    /// fails (`RollbackFailed`).
    pub async fn run(&mut self, lease: &Lease, request: &PublishRequest) -> RolloutResult<RolloutReport> {
        let mut report = RolloutReport::new(&request.image_id);
        info!(image = %request.image_id, rollout = %self.rollout_name, "starting rollout");

        self.set_phase(RolloutPhase::Publishing);
        let image_id = match self.publisher.publish(lease, request) {
            Ok(outcome) => {
                let published = outcome.image_id.clone();
                report.publish = Some(outcome);
                published
            }
            Err(e) => {
                error!(image = %request.image_id, error = %e, "publish failed, halting");
                self.set_phase(RolloutPhase::Halted {
                    reason: format!("publish failed: {e}"),
                });
                return Err(e);
            }
        };

        self.set_phase(RolloutPhase::Propagating);
        match self.propagator.propagate(lease, &image_id) {
            Ok(outcome) => report.propagation = Some(outcome),
            Err(e) => return self.fail(lease, format!("propagation failed: {e}"), e, report),
        }

        let refreshed = self.refresh_all(lease, &mut report).await;
        match refreshed {
            Ok(None) => {
                self.set_phase(RolloutPhase::Done);
                self.clear_state();
                info!(
                    image = %image_id,
                    groups = report.refreshes.len(),
                    "rollout complete"
                );
                report.phase = self.phase.clone();
                Ok(report)
            }
            Ok(Some(reason)) => self.roll_back(lease, reason, report),
            Err(e) => self.fail(lease, format!("refresh failed: {e}"), e, report),
        }
    }

    /// Walk the groups. `Ok(Some(reason))` when a refresh ended unsuccessfully.
    async fn refresh_all(&mut self, lease: &Lease, report: &mut RolloutReport) -> RolloutResult<Option<String>> {
        self.discard_stale_state()?;
        let mut state: Option<RolloutState> = None;
        loop {
            let step = self.cursor.advance(lease, state.as_ref())?;
            self.save_state(&step.state)?;

            let (Some(group_id), Some(refresh_id)) = (step.group_id, step.refresh_id) else {
                return Ok(None);
            };
            self.set_phase(RolloutPhase::Refreshing {
                index: step.state.cursor,
                group_id: group_id.clone(),
            });

            let refresh = self.await_refresh(lease, &group_id, &refresh_id).await?;
            let outcome = refresh.outcome();
            report.refreshes.push(refresh);
            match outcome {
                RefreshOutcome::Successful => {}
                RefreshOutcome::Failed | RefreshOutcome::Cancelled => {
                    return Ok(Some(format!(
                        "instance refresh {refresh_id} on {group_id} ended {outcome:?}"
                    )));
                }
                RefreshOutcome::Pending => {
                    return Err(RolloutError::Precondition(format!(
                        "refresh {refresh_id} reported terminal without an outcome"
                    )));
                }
            }
            state = Some(step.state);
        }
    }

    async fn await_refresh(&self, lease: &Lease, group_id: &str, refresh_id: &str) -> RolloutResult<RefreshReport> {
        let mut polls = 0u32;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            let report = self.classifier.classify(lease, group_id, refresh_id)?;
            if report.is_complete {
                debug!(group = %group_id, refresh = %refresh_id, polls, "refresh reached terminal status");
                return Ok(report);
            }
        }
    }

    /// Roll back unless the lease itself was lost; a rollback without the
    /// lease would be rejected anyway and may race the new holder.
    fn fail(
        &mut self,
        lease: &Lease,
        reason: String,
        err: RolloutError,
        report: RolloutReport,
    ) -> RolloutResult<RolloutReport> {
        if err.kind() == ErrorKind::Lease {
            error!(error = %err, "rollout lease lost, halting without rollback");
            self.set_phase(RolloutPhase::Halted { reason });
            return Err(err);
        }
        if !err.partial_progress().is_empty() {
            warn!(
                templates = err.partial_progress().len(),
                "templates already point at the new image"
            );
        }
        self.roll_back(lease, reason, report)
    }

    fn roll_back(&mut self, lease: &Lease, reason: String, mut report: RolloutReport) -> RolloutResult<RolloutReport> {
        warn!(%reason, "rolling back");
        self.set_phase(RolloutPhase::RollingBack {
            reason: reason.clone(),
        });

        match self.rollback.execute(lease) {
            Ok(outcome) => {
                info!(
                    rolled_back = outcome.rolled_back,
                    image = %outcome.restored_image_id,
                    "rollback finished, rollout halted"
                );
                report.rollback = Some(outcome);
                self.set_phase(RolloutPhase::Halted { reason });
                self.clear_state();
                report.phase = self.phase.clone();
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, %reason, "rollback failed, manual intervention required");
                self.set_phase(RolloutPhase::Halted {
                    reason: format!("rollback failed: {e}"),
                });
                Err(RolloutError::RollbackFailed {
                    reason,
                    source: Box::new(e),
                })
            }
        }
    }

    fn set_phase(&mut self, phase: RolloutPhase) {
        debug!(rollout = %self.rollout_name, ?phase, "phase transition");
        self.phase = phase;
    }

    fn save_state(&self, state: &RolloutState) -> RolloutResult<()> {
        if let Some(store) = &self.state_store {
            store
                .save(&self.rollout_name, state)
                .map_err(upstream("save rollout state"))?;
        }
        Ok(())
    }

    /// A new image always walks every group again, so state left by an
    /// interrupted run is reported and then overwritten by the first step.
    fn discard_stale_state(&self) -> RolloutResult<()> {
        if let Some(store) = &self.state_store {
            let stale = store
                .load(&self.rollout_name)
                .map_err(upstream("load rollout state"))?;
            if let Some(stale) = stale {
                warn!(
                    rollout = %self.rollout_name,
                    cursor = stale.cursor,
                    groups = stale.all_groups.len(),
                    "discarding rollout state left by an interrupted run"
                );
            }
        }
        Ok(())
    }

    fn clear_state(&self) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.clear(&self.rollout_name) {
                warn!(rollout = %self.rollout_name, error = %e, "failed to clear rollout state");
            }
        }
    }
}
