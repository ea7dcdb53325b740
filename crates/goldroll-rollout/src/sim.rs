//! In-memory simulated infrastructure.
//!
//! `SimulatedFleet` implements every service port over plain collections so
//! the whole rollout can run without touching real cloud APIs. Refresh
//! outcomes are scripted per group, and any operation can be made to fail.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use goldroll_core::{
    ImageRegistry, KeyManagement, KeyPolicy, Lease, LeaseStore, ParameterStore,
    RefreshDescription, RefreshPolicy, RefreshService, RefreshStatus, RolloutState,
    RolloutStateStore, ServiceError, ServiceResult, TemplateService, TemplateVersion,
    VersionedPolicy, epoch_secs,
};

use crate::services::Services;

/// An operation that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimOp {
    Authorize,
    GetPolicy,
    PutPolicy,
    CreateVersion(String),
    SetDefault(String),
    StartRefresh(String),
    DescribeRefresh,
    PutParameter(String),
}

/// Per-operation call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimCalls {
    pub authorize: u32,
    pub get_policy: u32,
    pub put_policy: u32,
    pub create_version: u32,
    pub set_default: u32,
    pub start_refresh: u32,
    pub describe_refresh: u32,
}

#[derive(Debug)]
struct SimTemplate {
    /// (version, image) in creation order.
    versions: Vec<(u64, String)>,
    default_version: u64,
}

#[derive(Debug)]
struct SimRefresh {
    group_id: String,
    script: VecDeque<RefreshStatus>,
    status: RefreshStatus,
    polls: u8,
}

#[derive(Debug, Default)]
struct SimState {
    launch_permissions: HashMap<String, BTreeSet<String>>,
    policies: HashMap<String, (KeyPolicy, u64)>,
    templates: HashMap<String, SimTemplate>,
    refreshes: HashMap<String, SimRefresh>,
    /// Group → statuses each new refresh on that group will report, in order.
    refresh_scripts: HashMap<String, Vec<RefreshStatus>>,
    started: Vec<(String, String)>,
    parameters: HashMap<String, String>,
    leases: HashMap<String, Lease>,
    rollouts: HashMap<String, RolloutState>,
    failures: HashSet<SimOp>,
    policy_conflicts: u32,
    next_refresh: u64,
    calls: SimCalls,
}

/// Simulated cloud account holding images, keys, templates, groups and parameters.
#[derive(Debug, Default)]
pub struct SimulatedFleet {
    state: Mutex<SimState>,
}

impl SimulatedFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All ports backed by this fleet.
    pub fn services(self: &Arc<Self>) -> Services {
        Services {
            images: self.clone(),
            keys: self.clone(),
            templates: self.clone(),
            refreshes: self.clone(),
            parameters: self.clone(),
            leases: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Setup ──────────────────────────────────────────────────────

    /// Register a launch template whose version 1 references `image_id`.
    pub fn add_template(&self, template_id: &str, image_id: &str) {
        self.lock().templates.insert(
            template_id.to_string(),
            SimTemplate {
                versions: vec![(1, image_id.to_string())],
                default_version: 1,
            },
        );
    }

    /// Create a key with the given starting policy.
    pub fn add_key(&self, key_id: &str, policy: KeyPolicy) {
        self.lock().policies.insert(key_id.to_string(), (policy, 1));
    }

    /// Statuses every refresh started on `group_id` walks through. The last
    /// status sticks once the script is exhausted. Default: InProgress, Successful.
    pub fn script_refresh(&self, group_id: &str, statuses: Vec<RefreshStatus>) {
        self.lock()
            .refresh_scripts
            .insert(group_id.to_string(), statuses);
    }

    /// Make `op` fail with a request error until `heal` is called.
    pub fn fail(&self, op: SimOp) {
        self.lock().failures.insert(op);
    }

    pub fn heal(&self, op: &SimOp) {
        self.lock().failures.remove(op);
    }

    /// The next `n` policy writes lose against a simulated concurrent writer.
    pub fn inject_policy_conflicts(&self, n: u32) {
        self.lock().policy_conflicts = n;
    }

    pub fn seed_parameter(&self, key: &str, value: &str) {
        self.lock()
            .parameters
            .insert(key.to_string(), value.to_string());
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn calls(&self) -> SimCalls {
        self.lock().calls.clone()
    }

    pub fn parameter(&self, key: &str) -> Option<String> {
        self.lock().parameters.get(key).cloned()
    }

    pub fn policy(&self, key_id: &str) -> Option<KeyPolicy> {
        self.lock().policies.get(key_id).map(|(p, _)| p.clone())
    }

    pub fn launch_permissions(&self, image_id: &str) -> Vec<String> {
        self.lock()
            .launch_permissions
            .get(image_id)
            .map(|accounts| accounts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// (version, image) of the template's default version.
    pub fn default_of(&self, template_id: &str) -> Option<(u64, String)> {
        let state = self.lock();
        let tpl = state.templates.get(template_id)?;
        tpl.versions
            .iter()
            .find(|(v, _)| *v == tpl.default_version)
            .cloned()
    }

    pub fn rollout_state(&self, name: &str) -> Option<RolloutState> {
        self.lock().rollouts.get(name).cloned()
    }

    pub fn version_count(&self, template_id: &str) -> usize {
        self.lock()
            .templates
            .get(template_id)
            .map(|t| t.versions.len())
            .unwrap_or(0)
    }

    /// (group, refresh id) of every refresh started, in order.
    pub fn started_refreshes(&self) -> Vec<(String, String)> {
        self.lock().started.clone()
    }
}

fn check(state: &SimState, op: SimOp) -> ServiceResult<()> {
    if state.failures.contains(&op) {
        return Err(ServiceError::Request(format!("simulated failure: {op:?}")));
    }
    Ok(())
}

impl ImageRegistry for SimulatedFleet {
    fn authorize(&self, image_id: &str, accounts: &[String]) -> ServiceResult<()> {
        let mut state = self.lock();
        state.calls.authorize += 1;
        check(&state, SimOp::Authorize)?;
        state
            .launch_permissions
            .entry(image_id.to_string())
            .or_default()
            .extend(accounts.iter().cloned());
        Ok(())
    }
}

impl KeyManagement for SimulatedFleet {
    fn get_policy(&self, key_id: &str) -> ServiceResult<VersionedPolicy> {
        let mut state = self.lock();
        state.calls.get_policy += 1;
        check(&state, SimOp::GetPolicy)?;
        let (policy, revision) = state
            .policies
            .entry(key_id.to_string())
            .or_insert_with(|| (KeyPolicy::default(), 1));
        Ok(VersionedPolicy {
            policy: policy.clone(),
            revision: *revision,
        })
    }

    fn put_policy(
        &self,
        key_id: &str,
        policy: &KeyPolicy,
        expected_revision: u64,
    ) -> ServiceResult<u64> {
        let mut state = self.lock();
        state.calls.put_policy += 1;
        check(&state, SimOp::PutPolicy)?;
        if state.policy_conflicts > 0 {
            state.policy_conflicts -= 1;
            // Someone else wrote in between: bump the stored revision.
            if let Some((_, rev)) = state.policies.get_mut(key_id) {
                *rev += 1;
            }
        }
        let entry = state
            .policies
            .get_mut(key_id)
            .ok_or_else(|| ServiceError::NotFound(format!("key {key_id}")))?;
        if entry.1 != expected_revision {
            return Err(ServiceError::Conflict(format!(
                "key {key_id} is at revision {}, expected {expected_revision}",
                entry.1
            )));
        }
        entry.0 = policy.clone();
        entry.1 += 1;
        Ok(entry.1)
    }
}

impl TemplateService for SimulatedFleet {
    fn create_version(&self, template_id: &str, image_id: &str) -> ServiceResult<u64> {
        let mut state = self.lock();
        state.calls.create_version += 1;
        check(&state, SimOp::CreateVersion(template_id.to_string()))?;
        let tpl = state
            .templates
            .get_mut(template_id)
            .ok_or_else(|| ServiceError::NotFound(format!("launch template {template_id}")))?;
        let next = tpl.versions.last().map(|(v, _)| v + 1).unwrap_or(1);
        tpl.versions.push((next, image_id.to_string()));
        Ok(next)
    }

    fn set_default(&self, template_id: &str, version: u64) -> ServiceResult<()> {
        let mut state = self.lock();
        state.calls.set_default += 1;
        check(&state, SimOp::SetDefault(template_id.to_string()))?;
        let tpl = state
            .templates
            .get_mut(template_id)
            .ok_or_else(|| ServiceError::NotFound(format!("launch template {template_id}")))?;
        if !tpl.versions.iter().any(|(v, _)| *v == version) {
            return Err(ServiceError::NotFound(format!(
                "launch template {template_id} version {version}"
            )));
        }
        tpl.default_version = version;
        Ok(())
    }

    fn describe_default(&self, template_id: &str) -> ServiceResult<TemplateVersion> {
        self.default_of(template_id)
            .map(|(version, image_id)| TemplateVersion { version, image_id })
            .ok_or_else(|| ServiceError::NotFound(format!("launch template {template_id}")))
    }
}

impl RefreshService for SimulatedFleet {
    fn start_refresh(&self, group_id: &str, policy: &RefreshPolicy) -> ServiceResult<String> {
        let mut state = self.lock();
        state.calls.start_refresh += 1;
        check(&state, SimOp::StartRefresh(group_id.to_string()))?;
        state.next_refresh += 1;
        let refresh_id = format!("refresh-{:04}", state.next_refresh);
        let script: VecDeque<RefreshStatus> = state
            .refresh_scripts
            .get(group_id)
            .cloned()
            .unwrap_or_else(|| vec![RefreshStatus::InProgress, RefreshStatus::Successful])
            .into();
        state.refreshes.insert(
            refresh_id.clone(),
            SimRefresh {
                group_id: group_id.to_string(),
                script,
                status: RefreshStatus::Pending,
                polls: 0,
            },
        );
        state
            .started
            .push((group_id.to_string(), refresh_id.clone()));
        debug!(
            group = %group_id,
            refresh = %refresh_id,
            min_healthy = policy.min_healthy_percentage,
            warmup = policy.instance_warmup_secs,
            "simulated refresh started"
        );
        Ok(refresh_id)
    }

    fn describe_refresh(
        &self,
        group_id: &str,
        refresh_id: &str,
    ) -> ServiceResult<Option<RefreshDescription>> {
        let mut state = self.lock();
        state.calls.describe_refresh += 1;
        check(&state, SimOp::DescribeRefresh)?;
        let Some(refresh) = state.refreshes.get_mut(refresh_id) else {
            return Ok(None);
        };
        if refresh.group_id != group_id {
            return Ok(None);
        }
        if let Some(next) = refresh.script.pop_front() {
            refresh.status = next;
        }
        refresh.polls = refresh.polls.saturating_add(1);
        let percentage_complete = match refresh.status {
            RefreshStatus::Successful => 100,
            RefreshStatus::Pending => 0,
            _ => (refresh.polls.saturating_mul(25)).min(99),
        };
        Ok(Some(RefreshDescription {
            status: refresh.status.clone(),
            percentage_complete,
        }))
    }
}

impl ParameterStore for SimulatedFleet {
    fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        Ok(self.lock().parameters.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> ServiceResult<()> {
        let mut state = self.lock();
        check(&state, SimOp::PutParameter(key.to_string()))?;
        state
            .parameters
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> ServiceResult<bool> {
        Ok(self.lock().parameters.remove(key).is_some())
    }
}

impl LeaseStore for SimulatedFleet {
    fn acquire(&self, name: &str, holder: &str, ttl_secs: u64) -> ServiceResult<Lease> {
        let now = epoch_secs();
        let mut state = self.lock();
        if let Some(current) = state.leases.get(name) {
            if !current.is_expired(now) {
                return Err(ServiceError::Conflict(format!(
                    "lease {name} held by {}",
                    current.holder
                )));
            }
        }
        let lease = Lease::issue(name, holder, now, ttl_secs);
        state.leases.insert(name.to_string(), lease.clone());
        Ok(lease)
    }

    fn validate(&self, lease: &Lease) -> ServiceResult<()> {
        let state = self.lock();
        match state.leases.get(&lease.name) {
            Some(current) if current.token == lease.token && !current.is_expired(epoch_secs()) => {
                Ok(())
            }
            _ => Err(ServiceError::Conflict(format!(
                "lease {} not held by this token",
                lease.name
            ))),
        }
    }

    fn release(&self, lease: &Lease) -> ServiceResult<()> {
        let mut state = self.lock();
        if state
            .leases
            .get(&lease.name)
            .is_some_and(|current| current.token == lease.token)
        {
            state.leases.remove(&lease.name);
        }
        Ok(())
    }
}

impl RolloutStateStore for SimulatedFleet {
    fn load(&self, name: &str) -> ServiceResult<Option<RolloutState>> {
        Ok(self.lock().rollouts.get(name).cloned())
    }

    fn save(&self, name: &str, state: &RolloutState) -> ServiceResult<()> {
        self.lock().rollouts.insert(name.to_string(), state.clone());
        Ok(())
    }

    fn clear(&self, name: &str) -> ServiceResult<()> {
        self.lock().rollouts.remove(name);
        Ok(())
    }
}
