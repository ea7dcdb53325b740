//! Shared types used across Goldroll crates.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a machine image (e.g. `ami-0abc...`).
pub type ImageId = String;

/// Identifier of a managed launch template.
pub type TemplateId = String;

/// Name of a managed scaling group.
pub type GroupId = String;

/// Cursor value before the first group has been visited.
pub const CURSOR_NOT_STARTED: i64 = -1;

// ── Rollout State ──────────────────────────────────────────────────

/// The control document threaded between Refresh Cursor invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutState {
    #[serde(alias = "all_asgs", default)]
    pub all_groups: Vec<GroupId>,
    #[serde(alias = "current_index", default = "not_started")]
    pub cursor: i64,
    #[serde(default)]
    pub complete: bool,
}

fn not_started() -> i64 {
    CURSOR_NOT_STARTED
}

impl RolloutState {
    /// A fresh rollout over `groups` that has not visited any group yet.
    pub fn new(groups: Vec<GroupId>) -> Self {
        Self {
            all_groups: groups,
            cursor: CURSOR_NOT_STARTED,
            complete: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.cursor > CURSOR_NOT_STARTED
    }

    /// Group at the cursor, if the cursor points inside the group list.
    pub fn current_group(&self) -> Option<&str> {
        usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.all_groups.get(i))
            .map(String::as_str)
    }
}

impl Default for RolloutState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// ── Instance refresh ───────────────────────────────────────────────

/// Fixed rolling-replacement policy applied to every refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPolicy {
    /// Fraction of capacity (percent) that must stay healthy during replacement.
    pub min_healthy_percentage: u8,
    /// Seconds a new instance warms up before it counts as healthy.
    pub instance_warmup_secs: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            min_healthy_percentage: 90,
            instance_warmup_secs: 300,
        }
    }
}

/// Status of an instance refresh as reported by the group-refresh service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RefreshStatus {
    Pending,
    InProgress,
    Successful,
    Failed,
    Cancelling,
    Cancelled,
    RollbackInProgress,
    RollbackFailed,
    RollbackSuccessful,
    Baking,
    /// A status value this build does not know about. Never terminal.
    Other(String),
}

impl RefreshStatus {
    /// Terminal statuses: Successful, Failed, Cancelled. Nothing else.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Cancelled)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Successful)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Successful => "Successful",
            Self::Failed => "Failed",
            Self::Cancelling => "Cancelling",
            Self::Cancelled => "Cancelled",
            Self::RollbackInProgress => "RollbackInProgress",
            Self::RollbackFailed => "RollbackFailed",
            Self::RollbackSuccessful => "RollbackSuccessful",
            Self::Baking => "Baking",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for RefreshStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Successful" => Self::Successful,
            "Failed" => Self::Failed,
            "Cancelling" => Self::Cancelling,
            "Cancelled" => Self::Cancelled,
            "RollbackInProgress" => Self::RollbackInProgress,
            "RollbackFailed" => Self::RollbackFailed,
            "RollbackSuccessful" => Self::RollbackSuccessful,
            "Baking" => Self::Baking,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for RefreshStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<RefreshStatus> for String {
    fn from(status: RefreshStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw refresh record returned by `describe_refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshDescription {
    pub status: RefreshStatus,
    /// 0..=100. Services omit it early in a refresh; treat as 0.
    #[serde(default)]
    pub percentage_complete: u8,
}

// ── Launch templates ───────────────────────────────────────────────

/// The version a template's default pointer references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub version: u64,
    pub image_id: ImageId,
}

/// One template successfully re-pointed by a propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateUpdate {
    pub template_id: TemplateId,
    pub version: u64,
}

// ── Lease ──────────────────────────────────────────────────────────

/// Proof that the holder owns the single active rollout slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub token: String,
    /// Unix timestamp (seconds) after which the lease may be taken over.
    pub expires_at: u64,
}

static LEASE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl Lease {
    /// Issue a fresh lease with a unique token.
    pub fn issue(name: &str, holder: &str, now: u64, ttl_secs: u64) -> Self {
        let seq = LEASE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(holder.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        Self {
            name: name.to_string(),
            holder: holder.to_string(),
            token: hex::encode(hasher.finalize()),
            expires_at: now.saturating_add(ttl_secs),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
