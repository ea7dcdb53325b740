//! Service ports: the boundary to the external infrastructure.
//!
//! Each trait is a thin request/response contract against one external
//! service. Production adapters wrap the real cloud APIs; tests and the
//! CLI simulator use in-memory implementations. All calls are synchronous
//! and return after a single request/response.

use crate::error::ServiceResult;
use crate::policy::{KeyPolicy, VersionedPolicy};
use crate::types::{Lease, RefreshDescription, RefreshPolicy, RolloutState, TemplateVersion};

/// Image registry: launch permissions on a machine image.
pub trait ImageRegistry: Send + Sync {
    /// Grant launch permission on `image_id` to every account. Granting an
    /// account that already holds permission is a no-op.
    fn authorize(&self, image_id: &str, accounts: &[String]) -> ServiceResult<()>;
}

/// Key-management service holding the image encryption key policy.
pub trait KeyManagement: Send + Sync {
    fn get_policy(&self, key_id: &str) -> ServiceResult<VersionedPolicy>;

    /// Replace the whole policy document. Fails with `Conflict` when the
    /// stored revision no longer equals `expected_revision`.
    fn put_policy(
        &self,
        key_id: &str,
        policy: &KeyPolicy,
        expected_revision: u64,
    ) -> ServiceResult<u64>;
}

/// Launch-template service.
pub trait TemplateService: Send + Sync {
    /// Create a new version whose only override is the image id. Returns
    /// the new version number, strictly greater than any previous one.
    fn create_version(&self, template_id: &str, image_id: &str) -> ServiceResult<u64>;

    fn set_default(&self, template_id: &str, version: u64) -> ServiceResult<()>;

    fn describe_default(&self, template_id: &str) -> ServiceResult<TemplateVersion>;
}

/// Scaling-group instance refresh service.
pub trait RefreshService: Send + Sync {
    /// Start a rolling instance refresh. Returns the refresh identifier.
    fn start_refresh(&self, group_id: &str, policy: &RefreshPolicy) -> ServiceResult<String>;

    /// Describe one refresh. `Ok(None)` when the service has no such refresh.
    fn describe_refresh(
        &self,
        group_id: &str,
        refresh_id: &str,
    ) -> ServiceResult<Option<RefreshDescription>>;
}

/// Durable key-value parameters (the image history slots live here).
pub trait ParameterStore: Send + Sync {
    fn get(&self, key: &str) -> ServiceResult<Option<String>>;

    /// Write with overwrite semantics.
    fn put(&self, key: &str, value: &str) -> ServiceResult<()>;

    /// Remove a parameter. Returns true if it existed.
    fn delete(&self, key: &str) -> ServiceResult<bool>;
}

/// Exclusive rollout lease. At most one unexpired lease per name.
pub trait LeaseStore: Send + Sync {
    /// Take the lease, or fail with `Conflict` while another holder owns it.
    fn acquire(&self, name: &str, holder: &str, ttl_secs: u64) -> ServiceResult<Lease>;

    /// Fail with `Conflict` unless `lease` is the current, unexpired holder.
    fn validate(&self, lease: &Lease) -> ServiceResult<()>;

    fn release(&self, lease: &Lease) -> ServiceResult<()>;
}

/// Durable home of the threaded Rollout State between sequencer steps.
pub trait RolloutStateStore: Send + Sync {
    fn load(&self, name: &str) -> ServiceResult<Option<RolloutState>>;

    fn save(&self, name: &str, state: &RolloutState) -> ServiceResult<()>;

    fn clear(&self, name: &str) -> ServiceResult<()>;
}
