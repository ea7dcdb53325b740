pub mod config;
pub mod error;
pub mod policy;
pub mod ports;
pub mod types;

pub use config::GoldrollConfig;
pub use error::{ConfigError, ServiceError, ServiceResult};
pub use policy::{KeyPolicy, PolicyStatement, VersionedPolicy};
pub use ports::*;
pub use types::*;
