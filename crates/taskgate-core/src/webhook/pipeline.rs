//! Webhook pipeline: registry lookup, authentication, filtering, concurrency
//! policy, rendering and Task creation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, ObjectMeta, Resource, LABEL_WEBHOOK_RULE, LABEL_WEBHOOK_TRIGGER};
use taskgate_types::task::{Task, TaskSpec};
use taskgate_types::trigger::{ConcurrencyPolicy, TaskBlueprint, WebhookTrigger};
use uuid::Uuid;

use super::auth::{AuthError, WebhookAuthenticator};
use super::concurrency::{ConcurrencyEnforcer, PolicyOutcome};
use super::expression::{FilterEngine, FilterError};
use super::registry::TriggerRegistry;
use super::template::{render_blueprint, RenderError};
use super::Headers;
use crate::repository::{TaskRepository, TriggerRepository};

/// Attempts made when a trigger status write hits a version conflict.
const STATUS_CONFLICT_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// Request / outcome / error
// ---------------------------------------------------------------------------

/// An inbound webhook, already size-capped by the HTTP layer.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Path after the `/webhooks/` prefix, e.g. `team-a/github-prs`.
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A filter rejected the payload (or no rule matched).
    Filtered,
    /// The concurrency policy skipped every candidate Task.
    Skipped,
    /// At least one Task was created.
    Created { tasks: Vec<ObjectKey> },
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("malformed webhook path '{0}', expected <namespace>/<name>")]
    BadPath(String),

    #[error("no webhook trigger {0}")]
    NotFound(ObjectKey),

    #[error("authentication failed: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("template render failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// A Task the request may create: the single template or one matching rule.
struct Candidate<'a> {
    rule: Option<&'a str>,
    policy: ConcurrencyPolicy,
    blueprint: &'a TaskBlueprint,
}

// ---------------------------------------------------------------------------
// WebhookPipeline
// ---------------------------------------------------------------------------

pub struct WebhookPipeline<T, G, A> {
    registry: Arc<TriggerRegistry>,
    filters: FilterEngine,
    tasks: T,
    triggers: G,
    authenticator: A,
    enforcer: ConcurrencyEnforcer<T>,
}

impl<T, G, A> WebhookPipeline<T, G, A>
where
    T: TaskRepository + Clone,
    G: TriggerRepository,
    A: WebhookAuthenticator,
{
    pub fn new(registry: Arc<TriggerRegistry>, tasks: T, triggers: G, authenticator: A) -> Self {
        Self {
            registry,
            filters: FilterEngine::new(),
            enforcer: ConcurrencyEnforcer::new(tasks.clone()),
            tasks,
            triggers,
            authenticator,
        }
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    pub fn filters(&self) -> &FilterEngine {
        &self.filters
    }

    pub async fn handle(&self, request: WebhookRequest) -> Result<WebhookOutcome, WebhookError> {
        let key = parse_webhook_path(&request.path)?;
        let trigger = self
            .registry
            .get(&key)
            .await
            .ok_or_else(|| WebhookError::NotFound(key.clone()))?;

        if let Some(auth) = &trigger.spec.auth {
            self.authenticator
                .authenticate(&key.namespace, auth, &request.headers, &request.body)
                .await
                .inspect_err(|e| tracing::warn!(trigger = %key, error = %e, "webhook rejected"))?;
        }

        let body: Value = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::InvalidJson(e.to_string()))?;
        let headers = headers_value(&request.headers);

        if !self.filters.evaluate(&trigger.spec.filter, &body, &headers)? {
            tracing::debug!(trigger = %key, "payload filtered");
            return Ok(WebhookOutcome::Filtered);
        }

        let candidates = self.candidates(&trigger, &body, &headers)?;
        if candidates.is_empty() {
            tracing::debug!(trigger = %key, "no rule matched");
            return Ok(WebhookOutcome::Filtered);
        }

        // Render everything up front so a bad template leaves no partial
        // effects: no stopped peers and no subset of Tasks.
        let rendered = candidates
            .iter()
            .map(|candidate| Ok((candidate, render_blueprint(candidate.blueprint, &body)?)))
            .collect::<Result<Vec<_>, RenderError>>()?;

        let mut created: Vec<(Option<&str>, Task)> = Vec::new();
        for (candidate, spec) in rendered {
            match self.admit_candidate(&trigger, candidate, spec).await {
                Ok(Some(task)) => {
                    tracing::info!(trigger = %key, rule = candidate.rule, task = %task.key(), "task created from webhook");
                    created.push((candidate.rule, task));
                }
                Ok(None) => {}
                Err(e) => {
                    // Tasks already created stay; account for them.
                    if !created.is_empty() {
                        self.record_triggered(&key, &created).await;
                    }
                    return Err(e);
                }
            }
        }

        if created.is_empty() {
            return Ok(WebhookOutcome::Skipped);
        }
        self.record_triggered(&key, &created).await;
        Ok(WebhookOutcome::Created {
            tasks: created.iter().map(|(_, t)| t.key()).collect(),
        })
    }

    /// Apply the candidate's concurrency policy and create its Task unless
    /// the policy skips it.
    async fn admit_candidate(
        &self,
        trigger: &WebhookTrigger,
        candidate: &Candidate<'_>,
        spec: TaskSpec,
    ) -> Result<Option<Task>, WebhookError> {
        let outcome = self
            .enforcer
            .enforce(
                candidate.policy,
                &trigger.metadata.namespace,
                &trigger.metadata.name,
                candidate.rule,
            )
            .await?;
        if outcome == PolicyOutcome::Skip {
            return Ok(None);
        }
        let task = self.tasks.create(&new_task(trigger, candidate, spec)).await?;
        Ok(Some(task))
    }

    fn candidates<'a>(
        &self,
        trigger: &'a WebhookTrigger,
        body: &Value,
        headers: &Value,
    ) -> Result<Vec<Candidate<'a>>, FilterError> {
        let spec = &trigger.spec;
        if let Some(blueprint) = &spec.task_template {
            return Ok(vec![Candidate {
                rule: None,
                policy: spec.concurrency_policy,
                blueprint,
            }]);
        }

        let mut matched = Vec::new();
        for rule in &spec.rules {
            if self.filters.evaluate(&rule.filter, body, headers)? {
                matched.push(Candidate {
                    rule: Some(&rule.name),
                    policy: rule.concurrency_policy.unwrap_or(spec.concurrency_policy),
                    blueprint: &rule.task_template,
                });
            }
        }
        Ok(matched)
    }

    /// Best-effort status bookkeeping. Failures are logged; the Tasks stay.
    async fn record_triggered(&self, key: &ObjectKey, created: &[(Option<&str>, Task)]) {
        for attempt in 1..=STATUS_CONFLICT_ATTEMPTS {
            match self.try_record_triggered(key, created).await {
                Ok(()) => return,
                Err(RepositoryError::Conflict { .. }) if attempt < STATUS_CONFLICT_ATTEMPTS => {}
                Err(e) => {
                    tracing::warn!(trigger = %key, error = %e, "failed to update webhook trigger status");
                    return;
                }
            }
        }
    }

    async fn try_record_triggered(
        &self,
        key: &ObjectKey,
        created: &[(Option<&str>, Task)],
    ) -> Result<(), RepositoryError> {
        let Some(mut trigger) = self.triggers.get(key).await? else {
            return Ok(());
        };
        let now = Utc::now();
        let status = &mut trigger.status;
        status.last_triggered_time = Some(now);
        status.total_triggered += created.len() as u64;
        for (rule, task) in created {
            let name = &task.metadata.name;
            if !status.active_tasks.contains(name) {
                status.active_tasks.push(name.clone());
            }
            if let Some(rule) = rule {
                let rule_status = status.rule_mut(rule);
                rule_status.last_triggered_time = Some(now);
                rule_status.total_triggered += 1;
                if !rule_status.active_resources.contains(name) {
                    rule_status.active_resources.push(name.clone());
                }
            }
        }
        self.triggers.update_status(&trigger).await?;
        Ok(())
    }
}

/// Split `<namespace>/<name>` (no empty segments, nothing more).
pub fn parse_webhook_path(path: &str) -> Result<ObjectKey, WebhookError> {
    let mut parts = path.trim_start_matches('/').split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
            Ok(ObjectKey::new(ns, name))
        }
        _ => Err(WebhookError::BadPath(path.to_string())),
    }
}

fn headers_value(headers: &Headers) -> Value {
    Value::Object(
        headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
            .collect(),
    )
}

fn new_task(trigger: &WebhookTrigger, candidate: &Candidate<'_>, spec: TaskSpec) -> Task {
    let mut metadata = ObjectMeta::new(&trigger.metadata.namespace, task_name(&trigger.metadata.name));
    metadata.labels = candidate.blueprint.labels.clone();
    metadata
        .labels
        .insert(LABEL_WEBHOOK_TRIGGER.to_string(), trigger.metadata.name.clone());
    if let Some(rule) = candidate.rule {
        metadata
            .labels
            .insert(LABEL_WEBHOOK_RULE.to_string(), rule.to_string());
    }
    Task::new(metadata, spec)
}

/// `<trigger>-<8 hex chars>`, taken from the random tail of a UUIDv7.
fn task_name(trigger: &str) -> String {
    let id = Uuid::now_v7().simple().to_string();
    format!("{trigger}-{}", &id[id.len() - 8..])
}
