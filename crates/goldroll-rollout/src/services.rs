//! The bundle of service ports every component draws from.

use std::sync::Arc;

use goldroll_core::{
    ImageRegistry, KeyManagement, Lease, LeaseStore, ParameterStore, RefreshService,
    ServiceError, TemplateService,
};

use crate::error::{RolloutError, RolloutResult};

/// Handles to the external collaborators. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub images: Arc<dyn ImageRegistry>,
    pub keys: Arc<dyn KeyManagement>,
    pub templates: Arc<dyn TemplateService>,
    pub refreshes: Arc<dyn RefreshService>,
    pub parameters: Arc<dyn ParameterStore>,
    pub leases: Arc<dyn LeaseStore>,
}

impl Services {
    /// Swap in a different parameter store (e.g. a durable one).
    pub fn with_parameters(mut self, parameters: Arc<dyn ParameterStore>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Swap in a different lease store.
    pub fn with_leases(mut self, leases: Arc<dyn LeaseStore>) -> Self {
        self.leases = leases;
        self
    }

    /// Reject the call unless `lease` is the live rollout lease.
    pub(crate) fn check_lease(&self, lease: &Lease) -> RolloutResult<()> {
        match self.leases.validate(lease) {
            Ok(()) => Ok(()),
            Err(ServiceError::Request(msg)) => Err(RolloutError::Upstream {
                operation: "validate lease",
                source: ServiceError::Request(msg),
            }),
            Err(e) => Err(RolloutError::Lease(format!("{} ({}): {e}", lease.name, lease.holder))),
        }
    }
}
