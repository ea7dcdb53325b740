//! Goldroll golden-image rollout: the orchestration core.
//!
//! Coordinates a new machine image across a fleet: consumer-account
//! sharing, launch-template propagation, sequential rolling refresh of
//! scaling groups, and single-level rollback when a refresh fails.
//!
//! # Components
//!
//! - **`publisher`**: share the image, sync the key policy, shift image history
//! - **`propagator`**: stamp an image into every managed launch template
//! - **`cursor`**: advance over scaling groups, one refresh per call
//! - **`classifier`**: classify one in-flight refresh
//! - **`rollback`**: restore the previous image into every template
//! - **`sequencer`**: the phase machine chaining the components together
//! - **`sim`**: in-memory infrastructure for tests and dry runs

pub mod classifier;
pub mod cursor;
pub mod error;
pub mod propagator;
pub mod publisher;
pub mod rollback;
pub mod sequencer;
pub mod services;
pub mod sim;

pub use classifier::{RefreshOutcome, RefreshReport, RefreshStatusClassifier};
pub use cursor::{CursorAction, CursorOutput, CursorStep, RefreshCursor, plan};
pub use error::{ErrorKind, RolloutError, RolloutResult};
pub use propagator::{PropagationOutcome, TemplatePropagator};
pub use publisher::{ImagePublisher, PublishOutcome, PublishRequest};
pub use rollback::{RollbackExecutor, RollbackOutcome};
pub use sequencer::{RolloutPhase, RolloutReport, Sequencer};
pub use services::Services;
pub use sim::{SimOp, SimulatedFleet};
