//! Refresh cursor: walk the scaling groups one refresh at a time.
//!
//! Iteration is a state-passing protocol rather than a loop: every call
//! takes the state returned by the previous call and returns the next one.
//! [`plan`] is the pure transition; [`RefreshCursor::advance`] executes the
//! single refresh start it asks for. Nothing is retained between calls.
//!
//! The caller must not advance again until the previously started refresh
//! is terminal; doing so would start a duplicate refresh on the same group.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use goldroll_core::config::RefreshConfig;
use goldroll_core::{CURSOR_NOT_STARTED, GroupId, Lease, RolloutState};

use crate::error::{RolloutError, RolloutResult, upstream};
use crate::services::Services;

/// What the caller should do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorAction {
    /// Start a rolling refresh on this group.
    Start { group_id: GroupId },
    /// Every group has been visited.
    Complete,
}

/// Output of the pure transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorStep {
    pub state: RolloutState,
    pub action: CursorAction,
}

/// `(state, groups) → (state', action)`.
///
/// An absent state is a rollout that has not started. An empty group list
/// completes immediately with the cursor left at -1. Past the last group the
/// cursor rests one past the end and the rollout is complete.
pub fn plan(state: Option<&RolloutState>, groups: &[GroupId]) -> RolloutResult<CursorStep> {
    if groups.is_empty() {
        return Ok(CursorStep {
            state: RolloutState {
                all_groups: Vec::new(),
                cursor: CURSOR_NOT_STARTED,
                complete: true,
            },
            action: CursorAction::Complete,
        });
    }

    let cursor = match state {
        Some(s) => {
            if s.cursor < CURSOR_NOT_STARTED {
                return Err(RolloutError::Precondition(format!(
                    "cursor {} is below the not-started value",
                    s.cursor
                )));
            }
            if s.is_started() && !s.all_groups.is_empty() && s.all_groups != groups {
                return Err(RolloutError::Precondition(
                    "managed group list changed during the rollout".into(),
                ));
            }
            s.cursor
        }
        None => CURSOR_NOT_STARTED,
    };

    // A cursor already at i64::MAX is past any list: saturate and complete.
    let next = cursor.saturating_add(1);
    let group = usize::try_from(next).ok().and_then(|i| groups.get(i));
    let Some(group_id) = group.cloned() else {
        return Ok(CursorStep {
            state: RolloutState {
                all_groups: groups.to_vec(),
                cursor: next,
                complete: true,
            },
            action: CursorAction::Complete,
        });
    };

    Ok(CursorStep {
        state: RolloutState {
            all_groups: groups.to_vec(),
            cursor: next,
            complete: false,
        },
        action: CursorAction::Start { group_id },
    })
}

/// Result of one cursor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorOutput {
    #[serde(flatten)]
    pub state: RolloutState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_id: Option<String>,
}

pub struct RefreshCursor {
    services: Services,
    groups: Vec<GroupId>,
    refresh: RefreshConfig,
}

impl RefreshCursor {
    pub fn new(services: Services, groups: Vec<GroupId>, refresh: RefreshConfig) -> Self {
        Self {
            services,
            groups,
            refresh,
        }
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// Move to the next group and start its refresh. Starts at most one.
    pub fn advance(&self, lease: &Lease, state: Option<&RolloutState>) -> RolloutResult<CursorOutput> {
        self.services.check_lease(lease)?;
        let step = plan(state, &self.groups)?;

        match step.action {
            CursorAction::Complete => {
                if self.groups.is_empty() {
                    info!("no scaling groups configured");
                } else {
                    info!(cursor = step.state.cursor, "all scaling groups processed");
                }
                Ok(CursorOutput {
                    state: step.state,
                    group_id: None,
                    refresh_id: None,
                })
            }
            CursorAction::Start { group_id } => {
                let policy = self.refresh.policy();
                debug!(
                    group = %group_id,
                    cursor = step.state.cursor,
                    min_healthy = policy.min_healthy_percentage,
                    warmup = policy.instance_warmup_secs,
                    "starting instance refresh"
                );
                let refresh_id = self
                    .services
                    .refreshes
                    .start_refresh(&group_id, &policy)
                    .map_err(upstream("start instance refresh"))?;
                info!(group = %group_id, refresh = %refresh_id, "started instance refresh");
                Ok(CursorOutput {
                    state: step.state,
                    group_id: Some(group_id),
                    refresh_id: Some(refresh_id),
                })
            }
        }
    }
}
