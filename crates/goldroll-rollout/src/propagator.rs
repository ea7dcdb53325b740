//! Template propagator: stamp an image into every managed launch template.
//!
//! For each template a new version is created whose only override is the
//! image id, and that version becomes the template default. Templates are
//! independent; a failure stops the walk and reports the templates already
//! updated. Not idempotent: each call creates fresh versions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use goldroll_core::config::ImageConfig;
use goldroll_core::{ImageId, Lease, TemplateId, TemplateUpdate};

use crate::error::{RolloutError, RolloutResult, upstream};
use crate::services::Services;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationOutcome {
    pub image_id: ImageId,
    pub updated_templates: Vec<TemplateUpdate>,
}

pub struct TemplatePropagator {
    services: Services,
    template_ids: Vec<TemplateId>,
    image: ImageConfig,
}

impl TemplatePropagator {
    pub fn new(services: Services, template_ids: Vec<TemplateId>, image: ImageConfig) -> Self {
        Self {
            services,
            template_ids,
            image,
        }
    }

    pub fn template_ids(&self) -> &[TemplateId] {
        &self.template_ids
    }

    /// Point every managed template at `image_id`.
    ///
    /// On failure after some templates were updated, the error is
    /// `RolloutError::PartialPropagation` carrying those templates.
    pub fn propagate(&self, lease: &Lease, image_id: &str) -> RolloutResult<PropagationOutcome> {
        self.services.check_lease(lease)?;
        self.apply(image_id, &self.template_ids)
    }

    /// Propagate whatever image the current-image slot holds.
    pub fn propagate_current(&self, lease: &Lease) -> RolloutResult<PropagationOutcome> {
        self.services.check_lease(lease)?;
        let key = self.image.parameter_name.as_str();
        let image_id = self
            .services
            .parameters
            .get(key)
            .map_err(upstream("read current image"))?
            .ok_or_else(|| RolloutError::NotFound(format!("current image parameter {key}")))?;
        info!(image = %image_id, "retrieved current image");
        self.apply(&image_id, &self.template_ids)
    }

    /// Like `propagate`, but skips templates whose default version already
    /// references `image_id`. Safe to call again after a partial failure.
    pub fn propagate_missing(&self, lease: &Lease, image_id: &str) -> RolloutResult<PropagationOutcome> {
        self.services.check_lease(lease)?;
        let mut pending = Vec::new();
        for template_id in &self.template_ids {
            let current = self
                .services
                .templates
                .describe_default(template_id)
                .map_err(upstream("describe launch template"))?;
            if current.image_id == image_id {
                debug!(template = %template_id, version = current.version, "default already references image");
            } else {
                pending.push(template_id.clone());
            }
        }
        self.apply(image_id, &pending)
    }

    /// Shared by rollback: no lease check, the caller already did it.
    pub(crate) fn apply(&self, image_id: &str, template_ids: &[TemplateId]) -> RolloutResult<PropagationOutcome> {
        if template_ids.is_empty() {
            info!("no launch templates configured");
            return Ok(PropagationOutcome {
                image_id: image_id.to_string(),
                updated_templates: Vec::new(),
            });
        }

        let mut updated = Vec::with_capacity(template_ids.len());
        for template_id in template_ids {
            match self.update_one(template_id, image_id) {
                Ok(update) => updated.push(update),
                Err(e) if updated.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        template = %template_id,
                        done = updated.len(),
                        total = template_ids.len(),
                        error = %e,
                        "propagation stopped partway"
                    );
                    return Err(RolloutError::PartialPropagation {
                        updated,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(PropagationOutcome {
            image_id: image_id.to_string(),
            updated_templates: updated,
        })
    }

    fn update_one(&self, template_id: &str, image_id: &str) -> RolloutResult<TemplateUpdate> {
        let templates = &self.services.templates;
        let version = templates
            .create_version(template_id, image_id)
            .map_err(upstream("create launch template version"))?;
        templates
            .set_default(template_id, version)
            .map_err(upstream("set default launch template version"))?;
        info!(template = %template_id, version, image = %image_id, "updated launch template");
        Ok(TemplateUpdate {
            template_id: template_id.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sim::{SimOp, SimulatedFleet};
    use goldroll_core::LeaseStore;
    use std::sync::Arc;

    fn setup(templates: &[&str]) -> (Arc<SimulatedFleet>, TemplatePropagator, Lease) {
        let fleet = SimulatedFleet::new();
        for t in templates {
            fleet.add_template(t, "ami-old");
        }
        let lease = fleet.acquire("rollout", "test", 600).unwrap();
        let propagator = TemplatePropagator::new(
            fleet.services(),
            templates.iter().map(|s| s.to_string()).collect(),
            ImageConfig::default(),
        );
        (fleet, propagator, lease)
    }

    #[test]
    fn every_template_gets_a_new_default() {
        let (fleet, propagator, lease) = setup(&["lt-1", "lt-2"]);
        let out = propagator.propagate(&lease, "img-9").unwrap();

        assert_eq!(out.updated_templates.len(), 2);
        for update in &out.updated_templates {
            assert!(update.version > 1);
            assert_eq!(
                fleet.default_of(&update.template_id),
                Some((update.version, "img-9".to_string()))
            );
        }
    }

    #[test]
    fn empty_template_list_is_a_noop() {
        let (fleet, propagator, lease) = setup(&[]);
        let out = propagator.propagate(&lease, "img-9").unwrap();
        assert!(out.updated_templates.is_empty());
        assert_eq!(fleet.calls().create_version, 0);
    }

    #[test]
    fn repeated_call_creates_a_second_version() {
        let (fleet, propagator, lease) = setup(&["lt-1"]);
        let first = propagator.propagate(&lease, "img-9").unwrap();
        let second = propagator.propagate(&lease, "img-9").unwrap();

        assert!(second.updated_templates[0].version > first.updated_templates[0].version);
        assert_eq!(fleet.version_count("lt-1"), 3);
        assert_eq!(fleet.default_of("lt-1").unwrap().0, second.updated_templates[0].version);
    }

    #[test]
    fn partial_failure_reports_progress() {
        let (fleet, propagator, lease) = setup(&["lt-1", "lt-2", "lt-3"]);
        fleet.fail(SimOp::CreateVersion("lt-2".to_string()));

        let err = propagator.propagate(&lease, "img-9").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        let done = err.partial_progress();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].template_id, "lt-1");
        // Later templates untouched.
        assert_eq!(fleet.default_of("lt-3"), Some((1, "ami-old".to_string())));
    }

    #[test]
    fn first_template_failure_is_surfaced_unchanged() {
        let (fleet, propagator, lease) = setup(&["lt-1", "lt-2"]);
        fleet.fail(SimOp::SetDefault("lt-1".to_string()));

        let err = propagator.propagate(&lease, "img-9").unwrap_err();
        assert!(matches!(err, RolloutError::Upstream { .. }));
        assert!(err.partial_progress().is_empty());
    }

    #[test]
    fn unknown_template_is_not_found() {
        let fleet = SimulatedFleet::new();
        let lease = fleet.acquire("rollout", "test", 600).unwrap();
        let propagator =
            TemplatePropagator::new(fleet.services(), vec!["lt-missing".into()], ImageConfig::default());
        let err = propagator.propagate(&lease, "img-9").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn propagate_missing_resumes_after_partial_failure() {
        let (fleet, propagator, lease) = setup(&["lt-1", "lt-2"]);
        fleet.fail(SimOp::CreateVersion("lt-2".to_string()));
        assert!(propagator.propagate(&lease, "img-9").is_err());

        fleet.heal(&SimOp::CreateVersion("lt-2".to_string()));
        let out = propagator.propagate_missing(&lease, "img-9").unwrap();
        assert_eq!(out.updated_templates.len(), 1);
        assert_eq!(out.updated_templates[0].template_id, "lt-2");
        assert_eq!(fleet.version_count("lt-1"), 2);
    }

    #[test]
    fn propagate_current_reads_slot() {
        let (fleet, propagator, lease) = setup(&["lt-1"]);
        let err = propagator.propagate_current(&lease).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        fleet.seed_parameter("/amis/latest-golden-ami", "ami-cur");
        let out = propagator.propagate_current(&lease).unwrap();
        assert_eq!(out.image_id, "ami-cur");
        assert_eq!(fleet.default_of("lt-1").unwrap().1, "ami-cur");
    }
}
