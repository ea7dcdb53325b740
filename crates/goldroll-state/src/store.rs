//! StateStore: redb-backed state persistence for Goldroll.
//!
//! Provides named parameters (the image history slots), exclusive leases,
//! and rollout state documents. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use goldroll_core::{
    Lease, LeaseStore, ParameterStore, RolloutState, RolloutStateStore, ServiceResult, epoch_secs,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A stored parameter value with its overwrite counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredParameter {
    pub value: String,
    /// Starts at 1 and increases on every overwrite.
    pub version: u64,
    /// Unix timestamp (seconds) of the last write.
    pub updated_at: u64,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PARAMETERS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Parameters ─────────────────────────────────────────────────

    /// Get a parameter with its metadata.
    pub fn get_parameter(&self, name: &str) -> StateResult<Option<StoredParameter>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PARAMETERS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let param: StoredParameter =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(param))
            }
            None => Ok(None),
        }
    }

    /// Insert or overwrite a parameter. Returns the new version.
    pub fn put_parameter(&self, name: &str, value: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version;
        {
            let mut table = txn.open_table(PARAMETERS).map_err(map_err!(Table))?;
            let previous = table
                .get(name)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let previous_version = match previous {
                Some(bytes) => {
                    let param: StoredParameter =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    param.version
                }
                None => 0,
            };
            version = previous_version + 1;
            let record = StoredParameter {
                value: value.to_string(),
                version,
                updated_at: epoch_secs(),
            };
            let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(name, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, version, "parameter stored");
        Ok(version)
    }

    /// Delete a parameter. Returns true if it existed.
    pub fn delete_parameter(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PARAMETERS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, "parameter deleted");
        Ok(existed)
    }

    // ── Rollout state ──────────────────────────────────────────────

    /// Persist the threaded control document for a rollout.
    pub fn put_rollout_state(&self, name: &str, state: &RolloutState) -> StateResult<()> {
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, cursor = state.cursor, complete = state.complete, "rollout state stored");
        Ok(())
    }

    pub fn get_rollout_state(&self, name: &str) -> StateResult<Option<RolloutState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let state: RolloutState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Delete a rollout state document. Returns true if it existed.
    pub fn delete_rollout_state(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Take the named lease at time `now`. An expired lease is taken over.
    pub fn acquire_lease_at(
        &self,
        name: &str,
        holder: &str,
        ttl_secs: u64,
        now: u64,
    ) -> StateResult<Lease> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let lease;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let existing = table
                .get(name)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            if let Some(bytes) = existing {
                let current: Lease =
                    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                if !current.is_expired(now) {
                    return Err(StateError::LeaseHeld {
                        name: name.to_string(),
                        holder: current.holder,
                        expires_at: current.expires_at,
                    });
                }
                info!(%name, previous_holder = %current.holder, "taking over expired lease");
            }
            lease = Lease::issue(name, holder, now, ttl_secs);
            let bytes = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;
            table
                .insert(name, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, %holder, expires_at = lease.expires_at, "lease acquired");
        Ok(lease)
    }

    /// Check that `lease` is still the current holder at time `now`.
    pub fn validate_lease_at(&self, lease: &Lease, now: u64) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        let current: Option<Lease> = match table.get(lease.name.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
            None => None,
        };
        match current {
            Some(current) if current.token == lease.token && !current.is_expired(now) => Ok(()),
            _ => Err(StateError::LeaseLost(lease.name.clone())),
        }
    }

    /// Release the lease if `lease` still holds it. Releasing a lease that
    /// was already taken over leaves the new holder untouched.
    pub fn release_lease(&self, lease: &Lease) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let existing = table
                .get(lease.name.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let held_by_us = match existing {
                Some(bytes) => {
                    let current: Lease =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    current.token == lease.token
                }
                None => false,
            };
            if held_by_us {
                table
                    .remove(lease.name.as_str())
                    .map_err(map_err!(Write))?;
            }
            released = held_by_us;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %lease.name, released, "lease released");
        Ok(released)
    }
}

impl ParameterStore for StateStore {
    fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        Ok(self.get_parameter(key)?.map(|p| p.value))
    }

    fn put(&self, key: &str, value: &str) -> ServiceResult<()> {
        self.put_parameter(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> ServiceResult<bool> {
        Ok(self.delete_parameter(key)?)
    }
}

impl LeaseStore for StateStore {
    fn acquire(&self, name: &str, holder: &str, ttl_secs: u64) -> ServiceResult<Lease> {
        Ok(self.acquire_lease_at(name, holder, ttl_secs, epoch_secs())?)
    }

    fn validate(&self, lease: &Lease) -> ServiceResult<()> {
        Ok(self.validate_lease_at(lease, epoch_secs())?)
    }

    fn release(&self, lease: &Lease) -> ServiceResult<()> {
        self.release_lease(lease)?;
        Ok(())
    }
}

impl RolloutStateStore for StateStore {
    fn load(&self, name: &str) -> ServiceResult<Option<RolloutState>> {
        Ok(self.get_rollout_state(name)?)
    }

    fn save(&self, name: &str, state: &RolloutState) -> ServiceResult<()> {
        Ok(self.put_rollout_state(name, state)?)
    }

    fn clear(&self, name: &str) -> ServiceResult<()> {
        self.delete_rollout_state(name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldroll_core::ServiceError;

    // ── Parameters ─────────────────────────────────────────────────

    #[test]
    fn parameter_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.put_parameter("/amis/current", "ami-1").unwrap(), 1);

        let param = store.get_parameter("/amis/current").unwrap().unwrap();
        assert_eq!(param.value, "ami-1");
        assert_eq!(param.version, 1);
    }

    #[test]
    fn parameter_overwrite_bumps_version() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_parameter("p", "a").unwrap();
        assert_eq!(store.put_parameter("p", "b").unwrap(), 2);
        assert_eq!(ParameterStore::get(&store, "p").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn parameter_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_parameter("nope").unwrap().is_none());
        assert!(ParameterStore::get(&store, "nope").unwrap().is_none());
    }

    #[test]
    fn parameter_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_parameter("p", "a").unwrap();

        assert!(ParameterStore::delete(&store, "p").unwrap());
        assert!(!ParameterStore::delete(&store, "p").unwrap());
        assert!(store.get_parameter("p").unwrap().is_none());
    }

    // ── Rollout state ──────────────────────────────────────────────

    #[test]
    fn rollout_state_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let mut state = RolloutState::new(vec!["asg-a".to_string(), "asg-b".to_string()]);
        state.cursor = 1;

        store.put_rollout_state("golden", &state).unwrap();
        assert_eq!(store.get_rollout_state("golden").unwrap(), Some(state));

        assert!(store.delete_rollout_state("golden").unwrap());
        assert!(store.get_rollout_state("golden").unwrap().is_none());
    }

    // ── Leases ─────────────────────────────────────────────────────

    #[test]
    fn lease_is_exclusive_until_expiry() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.acquire_lease_at("rollout", "ci-1", 60, 1000).unwrap();

        let err = store.acquire_lease_at("rollout", "ci-2", 60, 1030).unwrap_err();
        assert!(matches!(err, StateError::LeaseHeld { ref holder, .. } if holder == "ci-1"));

        // Expired: taken over, old token invalid.
        let second = store.acquire_lease_at("rollout", "ci-2", 60, 1060).unwrap();
        assert_ne!(first.token, second.token);
        assert!(store.validate_lease_at(&first, 1061).is_err());
        assert!(store.validate_lease_at(&second, 1061).is_ok());
    }

    #[test]
    fn lease_validate_fails_after_expiry() {
        let store = StateStore::open_in_memory().unwrap();
        let lease = store.acquire_lease_at("rollout", "ci", 10, 100).unwrap();
        assert!(store.validate_lease_at(&lease, 109).is_ok());
        assert!(matches!(
            store.validate_lease_at(&lease, 110),
            Err(StateError::LeaseLost(_))
        ));
    }

    #[test]
    fn lease_release_only_by_holder() {
        let store = StateStore::open_in_memory().unwrap();
        let stale = store.acquire_lease_at("rollout", "a", 10, 0).unwrap();
        let current = store.acquire_lease_at("rollout", "b", 10, 20).unwrap();

        assert!(!store.release_lease(&stale).unwrap());
        assert!(store.validate_lease_at(&current, 21).is_ok());
        assert!(store.release_lease(&current).unwrap());

        // Free again.
        store.acquire_lease_at("rollout", "c", 10, 22).unwrap();
    }

    #[test]
    fn lease_errors_map_to_conflict() {
        let store = StateStore::open_in_memory().unwrap();
        let _held = LeaseStore::acquire(&store, "rollout", "a", 3600).unwrap();
        let err = LeaseStore::acquire(&store, "rollout", "b", 3600).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("goldroll.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_parameter("/amis/latest-golden-ami", "ami-1").unwrap();
            store
                .put_rollout_state("golden", &RolloutState::new(vec!["asg-a".to_string()]))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let param = store.get_parameter("/amis/latest-golden-ami").unwrap();
        assert_eq!(param.map(|p| p.value).as_deref(), Some("ami-1"));
        assert!(store.get_rollout_state("golden").unwrap().is_some());
    }
}
