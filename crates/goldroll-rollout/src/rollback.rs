//! Rollback executor: restore the previously published image.
//!
//! History is one slot deep. A rollback propagates the previous image to
//! every template, makes it current, and clears the slot, so a second
//! rollback without a publish in between has nothing to restore and fails.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use goldroll_core::config::ImageConfig;
use goldroll_core::{ImageId, Lease, TemplateUpdate};

use crate::error::{RolloutError, RolloutResult, upstream};
use crate::propagator::TemplatePropagator;
use crate::services::Services;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub rolled_back: bool,
    /// The image restored (or that would have been, with no templates).
    pub restored_image_id: ImageId,
    pub updated_templates: Vec<TemplateUpdate>,
}

pub struct RollbackExecutor {
    services: Services,
    propagator: TemplatePropagator,
    image: ImageConfig,
}

impl RollbackExecutor {
    pub fn new(services: Services, template_ids: Vec<String>, image: ImageConfig) -> Self {
        let propagator = TemplatePropagator::new(services.clone(), template_ids, image.clone());
        Self {
            services,
            propagator,
            image,
        }
    }

    pub fn execute(&self, lease: &Lease) -> RolloutResult<RollbackOutcome> {
        self.services.check_lease(lease)?;
        let previous_key = self.image.previous_parameter_name();
        let params = &self.services.parameters;

        let previous = params
            .get(&previous_key)
            .map_err(upstream("read previous image"))?
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                RolloutError::Precondition(format!(
                    "no previous image recorded in {previous_key}, nothing to roll back to"
                ))
            })?;
        info!(image = %previous, "rolling back to previous image");

        if self.propagator.template_ids().is_empty() {
            warn!("no launch templates to roll back");
            return Ok(RollbackOutcome {
                rolled_back: false,
                restored_image_id: previous,
                updated_templates: Vec::new(),
            });
        }

        let outcome = self
            .propagator
            .apply(&previous, self.propagator.template_ids())?;

        params
            .put(&self.image.parameter_name, &previous)
            .map_err(upstream("restore current image"))?;
        params
            .delete(&previous_key)
            .map_err(upstream("clear previous image"))?;
        info!(
            image = %previous,
            templates = outcome.updated_templates.len(),
            "rollback complete"
        );

        Ok(RollbackOutcome {
            rolled_back: true,
            restored_image_id: previous,
            updated_templates: outcome.updated_templates,
        })
    }
}
