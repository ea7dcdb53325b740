//! goldroll-state: durable state for Goldroll.
//!
//! Backed by [redb](https://docs.rs/redb), holds the image history slots
//! (as named parameters), the exclusive rollout lease, and the threaded
//! rollout state document between sequencer invocations.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and
//! implements the `ParameterStore`, `LeaseStore` and `RolloutStateStore` ports from
//! `goldroll-core`.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{StateStore, StoredParameter};
