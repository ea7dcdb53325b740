//! Image publisher: share a freshly built image and record it as current.
//!
//! Publishing grants launch permission to the consumer accounts, rewrites
//! the consumer-access statement of the encryption key policy, then shifts
//! the image history: the old current image moves into the single rollback
//! slot and the new image becomes current. History is only touched after
//! sharing succeeded, so a failed publish leaves it exactly as the last
//! successful one left it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use goldroll_core::config::{ImageConfig, SharingConfig};
use goldroll_core::{ImageId, Lease, PolicyStatement};

use crate::error::{RolloutError, RolloutResult, upstream};
use crate::services::Services;

/// Input to a publish: the image produced by the upstream build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub image_id: ImageId,
}

impl PublishRequest {
    /// Surrounding whitespace is stripped so history and templates agree.
    pub fn new(image_id: impl Into<ImageId>) -> Self {
        let image_id: ImageId = image_id.into();
        Self {
            image_id: image_id.trim().to_string(),
        }
    }

    /// Extract the image id from an image-builder completion event
    /// (`imageStatus.Image.OutputResources.Amis[0].Image`).
    pub fn from_build_event(event: &Value) -> RolloutResult<Self> {
        let image_id = event
            .pointer("/imageStatus/Image/OutputResources/Amis/0/Image")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                RolloutError::Precondition(
                    "build event has no imageStatus.Image.OutputResources.Amis[0].Image".into(),
                )
            })?;
        Ok(Self::new(image_id))
    }
}

/// Result of a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub image_id: ImageId,
    pub shared: bool,
    pub consumer_accounts: Vec<String>,
    /// Image demoted into the rollback slot, if one was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demoted_image_id: Option<ImageId>,
}

pub struct ImagePublisher {
    services: Services,
    image: ImageConfig,
    sharing: SharingConfig,
}

impl ImagePublisher {
    pub fn new(services: Services, image: ImageConfig, sharing: SharingConfig) -> Self {
        Self {
            services,
            image,
            sharing,
        }
    }

    /// Share `request.image_id` and record it as the current image.
    pub fn publish(&self, lease: &Lease, request: &PublishRequest) -> RolloutResult<PublishOutcome> {
        self.services.check_lease(lease)?;
        let image_id = request.image_id.trim();
        if image_id.is_empty() {
            return Err(RolloutError::Precondition("image id is empty".into()));
        }

        let accounts = &self.sharing.consumer_accounts;
        let shared = if accounts.is_empty() {
            info!(image = %image_id, "no consumer accounts configured, skipping image sharing");
            false
        } else {
            self.services
                .images
                .authorize(image_id, accounts)
                .map_err(upstream("authorize image"))?;
            info!(image = %image_id, accounts = ?accounts, "shared image with consumer accounts");
            self.sync_key_policy()?;
            true
        };

        let demoted_image_id = self.shift_history(image_id)?;

        Ok(PublishOutcome {
            image_id: image_id.to_string(),
            shared,
            consumer_accounts: if shared { accounts.clone() } else { Vec::new() },
            demoted_image_id,
        })
    }

    /// Replace the tagged consumer statement with one granting exactly the
    /// configured accounts. Conditional on the revision read; retried on
    /// conflict up to `policy_write_attempts` times.
    fn sync_key_policy(&self) -> RolloutResult<()> {
        let key_id = self.sharing.key_id.as_str();
        if key_id.is_empty() {
            return Err(RolloutError::Precondition(
                "consumer accounts configured without a key id".into(),
            ));
        }
        let attempts = self.sharing.policy_write_attempts.max(1);

        let mut attempt = 1;
        loop {
            let mut read = self
                .services
                .keys
                .get_policy(key_id)
                .map_err(upstream("get key policy"))?;
            let removed = read.policy.replace_tagged(PolicyStatement::consumer_grant(
                &self.sharing.statement_tag,
                &self.sharing.consumer_accounts,
            ));

            match self
                .services
                .keys
                .put_policy(key_id, &read.policy, read.revision)
                .map_err(upstream("put key policy"))
            {
                Ok(revision) => {
                    info!(key = %key_id, revision, replaced = removed, "updated key policy");
                    return Ok(());
                }
                Err(RolloutError::Conflict { message, .. }) if attempt < attempts => {
                    warn!(key = %key_id, attempt, %message, "key policy changed underneath us, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Demote the recorded current image, then record `image_id` as current.
    ///
    /// If recording the current image fails, the rollback slot is put back
    /// to what it held before so the two slots never disagree.
    fn shift_history(&self, image_id: &str) -> RolloutResult<Option<ImageId>> {
        let current_key = self.image.parameter_name.as_str();
        let previous_key = self.image.previous_parameter_name();
        let params = &self.services.parameters;

        let demoted = match params.get(current_key).map_err(upstream("read current image"))? {
            Some(current) if current != self.image.placeholder => Some(current),
            Some(_) => {
                debug!("current image is the placeholder, nothing to demote");
                None
            }
            None => {
                info!("no previous image to store");
                None
            }
        };

        let replaced = match &demoted {
            Some(current) => {
                let replaced = params
                    .get(&previous_key)
                    .map_err(upstream("read previous image"))?;
                params
                    .put(&previous_key, current)
                    .map_err(upstream("store previous image"))?;
                info!(image = %current, slot = %previous_key, "stored previous image for rollback");
                Some(replaced)
            }
            None => None,
        };

        if let Err(e) = params.put(current_key, image_id) {
            if let Some(replaced) = replaced {
                self.restore_previous(&previous_key, replaced.as_deref());
            }
            return Err(upstream("store current image")(e));
        }
        info!(image = %image_id, slot = %current_key, "recorded current image");
        Ok(demoted)
    }

    fn restore_previous(&self, previous_key: &str, value: Option<&str>) {
        let params = &self.services.parameters;
        let restored = match value {
            Some(value) => params.put(previous_key, value),
            None => params.delete(previous_key).map(|_| ()),
        };
        match restored {
            Ok(()) => warn!(slot = %previous_key, "current image not recorded, restored rollback slot"),
            Err(e) => warn!(slot = %previous_key, error = %e, "failed to restore rollback slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sim::{SimOp, SimulatedFleet};
    use goldroll_core::{KeyPolicy, LeaseStore};
    use serde_json::json;
    use std::sync::Arc;

    const CURRENT: &str = "/amis/latest-golden-ami";
    const PREVIOUS: &str = "/amis/latest-golden-ami-previous";
    const TAG: &str = "AllowConsumerAccounts";

    fn sharing(accounts: &[&str]) -> SharingConfig {
        SharingConfig {
            consumer_accounts: accounts.iter().map(|s| s.to_string()).collect(),
            key_id: "key-1".to_string(),
            ..Default::default()
        }
    }

    fn setup(accounts: &[&str]) -> (Arc<SimulatedFleet>, ImagePublisher, Lease) {
        let fleet = SimulatedFleet::new();
        let lease = fleet.acquire("rollout", "test", 600).unwrap();
        let publisher =
            ImagePublisher::new(fleet.services(), ImageConfig::default(), sharing(accounts));
        (fleet, publisher, lease)
    }

    #[test]
    fn empty_accounts_skip_sharing_but_record_history() {
        let (fleet, publisher, lease) = setup(&[]);
        let out = publisher.publish(&lease, &PublishRequest::new("ami-1")).unwrap();

        assert!(!out.shared);
        assert!(out.consumer_accounts.is_empty());
        let calls = fleet.calls();
        assert_eq!(calls.authorize, 0);
        assert_eq!(calls.get_policy, 0);
        assert_eq!(calls.put_policy, 0);
        assert_eq!(fleet.parameter(CURRENT).as_deref(), Some("ami-1"));
    }

    #[test]
    fn shares_image_and_grants_key() {
        let (fleet, publisher, lease) = setup(&["111", "222"]);
        let out = publisher.publish(&lease, &PublishRequest::new("ami-1")).unwrap();

        assert!(out.shared);
        assert_eq!(out.consumer_accounts, vec!["111", "222"]);
        assert_eq!(fleet.launch_permissions("ami-1"), vec!["111", "222"]);

        let policy = fleet.policy("key-1").unwrap();
        let tagged: Vec<_> = policy.tagged(TAG).collect();
        assert_eq!(tagged.len(), 1);
        assert_eq!(
            tagged[0].aws_principals(),
            vec!["arn:aws:iam::111:root", "arn:aws:iam::222:root"]
        );
    }

    #[test]
    fn republishing_keeps_one_tagged_statement() {
        let (fleet, publisher, lease) = setup(&["111"]);
        publisher.publish(&lease, &PublishRequest::new("ami-1")).unwrap();
        publisher.publish(&lease, &PublishRequest::new("ami-2")).unwrap();

        let policy = fleet.policy("key-1").unwrap();
        assert_eq!(policy.tagged(TAG).count(), 1);
        assert_eq!(policy.statements.len(), 1);
    }

    #[test]
    fn unrelated_statements_survive_policy_rewrite() {
        let (fleet, publisher, lease) = setup(&["333"]);
        let existing = KeyPolicy::from_json(
            r#"{"Version":"2012-10-17","Statement":[
                {"Sid":"EnableRoot","Effect":"Allow","Principal":{"AWS":"arn:aws:iam::999:root"},"Action":"kms:*","Resource":"*"},
                {"Sid":"AllowConsumerAccounts","Effect":"Allow","Principal":{"AWS":"arn:aws:iam::111:root"},"Action":"kms:Decrypt","Resource":"*"}
            ]}"#,
        )
        .unwrap();
        fleet.add_key("key-1", existing);

        publisher.publish(&lease, &PublishRequest::new("ami-1")).unwrap();

        let policy = fleet.policy("key-1").unwrap();
        assert_eq!(policy.statements.len(), 2);
        assert_eq!(policy.tagged("EnableRoot").count(), 1);
        let grant: Vec<_> = policy.tagged(TAG).collect();
        assert_eq!(grant.len(), 1);
        assert_eq!(grant[0].aws_principals(), vec!["arn:aws:iam::333:root"]);
    }

    #[test]
    fn current_slot_failure_restores_rollback_slot() {
        let (fleet, publisher, lease) = setup(&[]);
        publisher.publish(&lease, &PublishRequest::new("ami-a")).unwrap();
        publisher.publish(&lease, &PublishRequest::new("ami-b")).unwrap();

        fleet.fail(SimOp::PutParameter(CURRENT.to_string()));
        let err = publisher.publish(&lease, &PublishRequest::new("ami-c")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(fleet.parameter(CURRENT).as_deref(), Some("ami-b"));
        assert_eq!(fleet.parameter(PREVIOUS).as_deref(), Some("ami-a"));
    }

    #[test]
    fn current_slot_failure_clears_fresh_rollback_slot() {
        let (fleet, publisher, lease) = setup(&[]);
        publisher.publish(&lease, &PublishRequest::new("ami-a")).unwrap();

        fleet.fail(SimOp::PutParameter(CURRENT.to_string()));
        assert!(publisher.publish(&lease, &PublishRequest::new("ami-b")).is_err());
        assert_eq!(fleet.parameter(CURRENT).as_deref(), Some("ami-a"));
        assert_eq!(fleet.parameter(PREVIOUS), None);
    }

    #[test]
    fn request_id_is_trimmed() {
        assert_eq!(PublishRequest::new("  ami-1 \n").image_id, "ami-1");
    }

    #[test]
    fn history_depth_is_one() {
        let (fleet, publisher, lease) = setup(&["111"]);
        for id in ["ami-a", "ami-b", "ami-c"] {
            publisher.publish(&lease, &PublishRequest::new(id)).unwrap();
        }
        assert_eq!(fleet.parameter(CURRENT).as_deref(), Some("ami-c"));
        assert_eq!(fleet.parameter(PREVIOUS).as_deref(), Some("ami-b"));
    }

    #[test]
    fn placeholder_is_never_demoted() {
        let (fleet, publisher, lease) = setup(&[]);
        fleet.seed_parameter(CURRENT, "ami-placeholder");

        let out = publisher.publish(&lease, &PublishRequest::new("ami-1")).unwrap();
        assert_eq!(out.demoted_image_id, None);
        assert_eq!(fleet.parameter(PREVIOUS), None);
        assert_eq!(fleet.parameter(CURRENT).as_deref(), Some("ami-1"));
    }

    #[test]
    fn authorization_failure_leaves_history_untouched() {
        let (fleet, publisher, lease) = setup(&["111"]);
        publisher.publish(&lease, &PublishRequest::new("ami-a")).unwrap();

        fleet.fail(SimOp::Authorize);
        let err = publisher.publish(&lease, &PublishRequest::new("ami-b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(fleet.parameter(CURRENT).as_deref(), Some("ami-a"));
        assert_eq!(fleet.parameter(PREVIOUS), None);
    }

    #[test]
    fn policy_write_failure_leaves_history_untouched() {
        let (fleet, publisher, lease) = setup(&["111"]);
        fleet.fail(SimOp::PutPolicy);
        assert!(publisher.publish(&lease, &PublishRequest::new("ami-a")).is_err());
        assert_eq!(fleet.parameter(CURRENT), None);
    }

    #[test]
    fn policy_conflict_is_retried() {
        let (fleet, publisher, lease) = setup(&["111"]);
        fleet.inject_policy_conflicts(2);

        publisher.publish(&lease, &PublishRequest::new("ami-a")).unwrap();
        assert_eq!(fleet.calls().put_policy, 3);
        assert_eq!(fleet.policy("key-1").unwrap().tagged(TAG).count(), 1);
    }

    #[test]
    fn persistent_policy_conflict_surfaces_as_conflict() {
        let (fleet, publisher, lease) = setup(&["111"]);
        fleet.inject_policy_conflicts(10);

        let err = publisher.publish(&lease, &PublishRequest::new("ami-a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(fleet.calls().put_policy, 3);
        assert_eq!(fleet.parameter(CURRENT), None);
    }

    #[test]
    fn stale_lease_is_rejected_before_side_effects() {
        let (fleet, publisher, lease) = setup(&["111"]);
        fleet.release(&lease).unwrap();

        let err = publisher.publish(&lease, &PublishRequest::new("ami-a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lease);
        assert_eq!(fleet.calls().authorize, 0);
    }

    #[test]
    fn build_event_extraction() {
        let event = json!({
            "imageStatus": {"Image": {"OutputResources": {"Amis": [{"Image": "ami-0abc", "Region": "us-east-1"}]}}}
        });
        assert_eq!(PublishRequest::from_build_event(&event).unwrap().image_id, "ami-0abc");

        let err = PublishRequest::from_build_event(&json!({"imageStatus": {}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }
}
