//! redb table definitions for the Goldroll state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Named parameters (`/amis/latest-golden-ami`, `...-previous`) keyed by name.
pub const PARAMETERS: TableDefinition<&str, &[u8]> = TableDefinition::new("parameters");

/// Threaded rollout state documents keyed by rollout name.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Exclusive leases keyed by lease name.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
