//! WebhookTrigger domain types.
//!
//! A WebhookTrigger maps inbound HTTP webhooks to Task creation. It carries
//! optional request authentication, a filter expression, a concurrency policy,
//! and either a single task template or a list of independently filtered
//! rules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriggerSpecError;
use crate::meta::{HasStatus, ObjectMeta, ObjectRef, Resource};
use crate::task::{ContextItem, OutputSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTrigger {
    pub metadata: ObjectMeta,
    pub spec: WebhookTriggerSpec,
    #[serde(default)]
    pub status: WebhookTriggerStatus,
}

impl Resource for WebhookTrigger {
    const KIND: &'static str = "WebhookTrigger";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl HasStatus for WebhookTrigger {
    type Status = WebhookTriggerStatus;

    fn status(&self) -> &WebhookTriggerStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut WebhookTriggerStatus {
        &mut self.status
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookTriggerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,
    /// Boolean expression over `body` and `headers`. Empty accepts everything.
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    /// Single template used when `rules` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_template: Option<TaskBlueprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<WebhookRule>,
}

impl WebhookTriggerSpec {
    /// Check the structural invariants of a trigger spec.
    pub fn validate(&self) -> Result<(), TriggerSpecError> {
        match (&self.task_template, self.rules.is_empty()) {
            (None, true) => return Err(TriggerSpecError::MissingTemplate),
            (Some(_), false) => return Err(TriggerSpecError::TemplateAndRules),
            _ => {}
        }

        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(TriggerSpecError::UnnamedRule);
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(TriggerSpecError::DuplicateRule(rule.name.clone()));
            }
        }
        Ok(())
    }
}

/// A rule pairing its own filter with a task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRule {
    pub name: String,
    #[serde(default)]
    pub filter: String,
    /// Overrides the trigger-level policy for this rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<ConcurrencyPolicy>,
    pub task_template: TaskBlueprint,
}

/// The Task a trigger creates. `description` is a text template rendered
/// against the webhook payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskBlueprint {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ref: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<ContextItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<ObjectRef>,
    /// Extra labels copied onto created Tasks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// How overlapping webhook-triggered Tasks are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// Always create a new Task.
    #[default]
    Allow,
    /// Skip creation while any Task from this trigger is active.
    Forbid,
    /// Stop active Tasks from this trigger, then create a new one.
    Replace,
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Request authentication. Exactly one scheme per trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAuth {
    /// Shared-secret HMAC signature over the raw body.
    Hmac {
        secret_ref: SecretKeyRef,
        /// Header carrying the signature (default `X-Hub-Signature-256`).
        #[serde(default = "default_signature_header")]
        header: String,
        #[serde(default)]
        algorithm: HmacAlgorithm,
    },
    /// `Authorization: Bearer <token>`.
    Bearer { secret_ref: SecretKeyRef },
    /// A named header whose raw value must equal the secret.
    Header { name: String, secret_ref: SecretKeyRef },
}

fn default_signature_header() -> String {
    "X-Hub-Signature-256".to_string()
}

/// Reference to one key inside a namespaced secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Informational trigger status. Counters are approximate (last write wins)
/// and never used for admission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTriggerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_triggered: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_statuses: Vec<RuleStatus>,
}

impl WebhookTriggerStatus {
    /// Get or create the status entry for a rule.
    pub fn rule_mut(&mut self, name: &str) -> &mut RuleStatus {
        if let Some(idx) = self.rule_statuses.iter().position(|r| r.name == name) {
            return &mut self.rule_statuses[idx];
        }
        self.rule_statuses.push(RuleStatus {
            name: name.to_string(),
            ..Default::default()
        });
        let last = self.rule_statuses.len() - 1;
        &mut self.rule_statuses[last]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_triggered: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_resources: Vec<String>,
}
