//! Key-management policy document and the tagged consumer-access statement.
//!
//! The document is the JSON policy attached to the image encryption key.
//! Only the statement carrying the consumer tag is ever rewritten; every
//! other statement, and any field this crate does not model, round-trips
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Actions granted to consumer accounts on the image encryption key.
pub const CONSUMER_KEY_ACTIONS: [&str; 3] = ["kms:Decrypt", "kms:DescribeKey", "kms:CreateGrant"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPolicy {
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Statement", default)]
    pub statements: Vec<PolicyStatement>,
}

fn default_version() -> String {
    "2012-10-17".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: String,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A policy together with the revision it was read at.
///
/// Writes are conditional on that revision so a concurrent writer is
/// detected instead of silently overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedPolicy {
    pub policy: KeyPolicy,
    pub revision: u64,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            version: default_version(),
            id: None,
            statements: Vec::new(),
        }
    }
}

impl KeyPolicy {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Statements whose `Sid` equals `tag`.
    pub fn tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a PolicyStatement> + 'a {
        self.statements
            .iter()
            .filter(move |s| s.sid.as_deref() == Some(tag))
    }

    /// Drop every statement sharing the new statement's tag, then append it.
    ///
    /// Returns how many statements were removed. After this call exactly one
    /// statement carries the tag.
    pub fn replace_tagged(&mut self, statement: PolicyStatement) -> usize {
        let before = self.statements.len();
        if let Some(tag) = statement.sid.as_deref() {
            self.statements.retain(|s| s.sid.as_deref() != Some(tag));
        }
        let removed = before - self.statements.len();
        self.statements.push(statement);
        removed
    }
}

impl PolicyStatement {
    /// Grant `accounts` decrypt, describe-key and create-grant on the key.
    pub fn consumer_grant(tag: &str, accounts: &[String]) -> Self {
        let principals: Vec<String> = accounts.iter().map(|a| account_principal(a)).collect();
        Self {
            sid: Some(tag.to_string()),
            effect: "Allow".to_string(),
            principal: Some(json!({ "AWS": principals })),
            action: Some(json!(CONSUMER_KEY_ACTIONS)),
            resource: Some(json!("*")),
            extra: Map::new(),
        }
    }

    /// `Principal.AWS` entries, whether written as a string or a list.
    pub fn aws_principals(&self) -> Vec<String> {
        self.principal
            .as_ref()
            .and_then(|p| p.get("AWS"))
            .map(string_or_list)
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.action.as_ref().map(string_or_list).unwrap_or_default()
    }
}

/// Root principal ARN for an account.
pub fn account_principal(account_id: &str) -> String {
    format!("arn:aws:iam::{account_id}:root")
}

fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
