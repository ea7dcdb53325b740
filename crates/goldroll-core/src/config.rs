//! goldroll.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::RefreshPolicy;

pub const DEFAULT_PARAMETER_NAME: &str = "/amis/latest-golden-ami";
pub const DEFAULT_PLACEHOLDER: &str = "ami-placeholder";
pub const DEFAULT_STATEMENT_TAG: &str = "AllowConsumerAccounts";
pub const DEFAULT_LEASE_NAME: &str = "golden-image-rollout";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldrollConfig {
    pub image: ImageConfig,
    pub sharing: SharingConfig,
    pub templates: TemplatesConfig,
    pub groups: GroupsConfig,
    pub refresh: RefreshConfig,
    pub lease: LeaseConfig,
}

/// Where the current/previous image history slots live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub parameter_name: String,
    /// Sentinel value seeded before the first real publish. Never demoted.
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub consumer_accounts: Vec<String>,
    pub key_id: String,
    pub statement_tag: String,
    pub policy_write_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub min_healthy_percentage: u8,
    pub instance_warmup_secs: u32,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub name: String,
    pub ttl_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            parameter_name: DEFAULT_PARAMETER_NAME.to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl ImageConfig {
    /// Name of the rollback slot paired with the current-image parameter.
    pub fn previous_parameter_name(&self) -> String {
        format!("{}-previous", self.parameter_name)
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            consumer_accounts: Vec::new(),
            key_id: String::new(),
            statement_tag: DEFAULT_STATEMENT_TAG.to_string(),
            policy_write_attempts: 3,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_healthy_percentage: 90,
            instance_warmup_secs: 300,
            poll_interval_secs: 30,
        }
    }
}

impl RefreshConfig {
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            min_healthy_percentage: self.min_healthy_percentage,
            instance_warmup_secs: self.instance_warmup_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LEASE_NAME.to_string(),
            ttl_secs: 3600,
        }
    }
}

impl GoldrollConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GoldrollConfig = toml::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overlay the process environment (comma-separated lists).
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Unset keys leave the file value alone.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CONSUMER_ACCOUNT_IDS") {
            self.sharing.consumer_accounts = split_list(&v);
        }
        if let Some(v) = lookup("KMS_KEY_ID") {
            self.sharing.key_id = v.trim().to_string();
        }
        if let Some(v) = lookup("LAUNCH_TEMPLATE_IDS") {
            self.templates.ids = split_list(&v);
        }
        if let Some(v) = lookup("AUTO_SCALING_GROUP_NAMES") {
            self.groups.names = split_list(&v);
        }
        if let Some(v) = lookup("SSM_PARAMETER_NAME") {
            self.image.parameter_name = v.trim().to_string();
        }
        self.normalize();
    }

    /// Trim identifier lists and drop blank entries.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.sharing.consumer_accounts,
            &mut self.templates.ids,
            &mut self.groups.names,
        ] {
            *list = list
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.parameter_name.trim().is_empty() {
            return Err(ConfigError::EmptyParameterName);
        }
        if !self.sharing.consumer_accounts.is_empty() && self.sharing.key_id.trim().is_empty() {
            return Err(ConfigError::MissingKeyId);
        }
        if self.refresh.min_healthy_percentage > 100 {
            return Err(ConfigError::MinHealthyOutOfRange(
                self.refresh.min_healthy_percentage,
            ));
        }
        if self.sharing.policy_write_attempts == 0 {
            return Err(ConfigError::NoPolicyWriteAttempts);
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
