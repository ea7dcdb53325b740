//! Refresh status classifier: poll one in-flight refresh.

use serde::{Deserialize, Serialize};
use tracing::info;

use goldroll_core::{GroupId, Lease, RefreshDescription, RefreshStatus};

use crate::error::{RolloutError, RolloutResult, upstream};
use crate::services::Services;

/// Where a refresh stands from the sequencer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    Pending,
    Successful,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub group_id: GroupId,
    pub refresh_id: String,
    pub status: RefreshStatus,
    pub percentage_complete: u8,
    pub is_complete: bool,
    pub is_successful: bool,
}

impl RefreshReport {
    /// Derive the report from a raw description. Pure.
    pub fn from_description(group_id: &str, refresh_id: &str, desc: RefreshDescription) -> Self {
        Self {
            group_id: group_id.to_string(),
            refresh_id: refresh_id.to_string(),
            is_complete: desc.status.is_terminal(),
            is_successful: desc.status.is_successful(),
            percentage_complete: desc.percentage_complete.min(100),
            status: desc.status,
        }
    }

    pub fn outcome(&self) -> RefreshOutcome {
        match self.status {
            RefreshStatus::Successful => RefreshOutcome::Successful,
            RefreshStatus::Failed => RefreshOutcome::Failed,
            RefreshStatus::Cancelled => RefreshOutcome::Cancelled,
            _ => RefreshOutcome::Pending,
        }
    }
}

pub struct RefreshStatusClassifier {
    services: Services,
}

impl RefreshStatusClassifier {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Fetch and classify a refresh. No side effects; poll freely.
    ///
    /// An unknown refresh is `NotFound`, which means the input was wrong,
    /// not that the refresh failed.
    pub fn classify(&self, lease: &Lease, group_id: &str, refresh_id: &str) -> RolloutResult<RefreshReport> {
        self.services.check_lease(lease)?;
        let desc = self
            .services
            .refreshes
            .describe_refresh(group_id, refresh_id)
            .map_err(upstream("describe instance refresh"))?
            .ok_or_else(|| {
                RolloutError::NotFound(format!("instance refresh {refresh_id} on group {group_id}"))
            })?;

        let report = RefreshReport::from_description(group_id, refresh_id, desc);
        info!(
            group = %group_id,
            refresh = %refresh_id,
            status = %report.status,
            percent = report.percentage_complete,
            "instance refresh status"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sim::SimulatedFleet;
    use goldroll_core::{LeaseStore, RefreshPolicy, RefreshService};

    fn report(status: &str) -> RefreshReport {
        RefreshReport::from_description(
            "asg-a",
            "r-1",
            RefreshDescription {
                status: RefreshStatus::from(status),
                percentage_complete: 40,
            },
        )
    }

    #[test]
    fn successful_is_complete_and_successful() {
        let r = report("Successful");
        assert!(r.is_complete);
        assert!(r.is_successful);
        assert_eq!(r.outcome(), RefreshOutcome::Successful);
    }

    #[test]
    fn failed_and_cancelled_are_complete_but_unsuccessful() {
        for (status, outcome) in [
            ("Failed", RefreshOutcome::Failed),
            ("Cancelled", RefreshOutcome::Cancelled),
        ] {
            let r = report(status);
            assert!(r.is_complete, "{status}");
            assert!(!r.is_successful, "{status}");
            assert_eq!(r.outcome(), outcome);
        }
    }

    #[test]
    fn everything_else_is_pending() {
        for status in [
            "Pending",
            "InProgress",
            "Cancelling",
            "RollbackInProgress",
            "RollbackSuccessful",
            "Baking",
            "SomethingNew",
        ] {
            let r = report(status);
            assert!(!r.is_complete, "{status}");
            assert!(!r.is_successful, "{status}");
            assert_eq!(r.outcome(), RefreshOutcome::Pending);
        }
    }

    #[test]
    fn classify_polls_live_refresh() {
        let fleet = SimulatedFleet::new();
        let lease = fleet.acquire("rollout", "test", 600).unwrap();
        let id = fleet.start_refresh("asg-a", &RefreshPolicy::default()).unwrap();
        let classifier = RefreshStatusClassifier::new(fleet.services());

        let first = classifier.classify(&lease, "asg-a", &id).unwrap();
        assert_eq!(first.outcome(), RefreshOutcome::Pending);
        let second = classifier.classify(&lease, "asg-a", &id).unwrap();
        assert_eq!(second.outcome(), RefreshOutcome::Successful);
        assert_eq!(second.percentage_complete, 100);
    }

    #[test]
    fn missing_refresh_is_not_found() {
        let fleet = SimulatedFleet::new();
        let lease = fleet.acquire("rollout", "test", 600).unwrap();
        let classifier = RefreshStatusClassifier::new(fleet.services());

        let err = classifier.classify(&lease, "asg-a", "refresh-404").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
