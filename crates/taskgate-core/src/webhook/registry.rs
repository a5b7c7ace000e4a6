//! In-process registry of WebhookTriggers served by this instance.
//!
//! Written only by the trigger watch loop, read by every webhook request.
//! Readers get their own copy, so a concurrent re-registration never changes
//! a trigger under a request that is already being processed.

use std::collections::HashMap;

use taskgate_types::error::TriggerSpecError;
use taskgate_types::meta::{ObjectKey, Resource};
use taskgate_types::trigger::WebhookTrigger;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct TriggerRegistry {
    triggers: RwLock<HashMap<ObjectKey, WebhookTrigger>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a trigger. A trigger with an invalid spec is removed
    /// instead, so requests for it get 404 rather than a half-configured run.
    pub async fn register(&self, trigger: WebhookTrigger) -> Result<(), TriggerSpecError> {
        let key = trigger.key();
        if let Err(e) = trigger.spec.validate() {
            self.triggers.write().await.remove(&key);
            tracing::warn!(trigger = %key, error = %e, "not serving invalid webhook trigger");
            return Err(e);
        }
        let replaced = self.triggers.write().await.insert(key.clone(), trigger);
        tracing::debug!(trigger = %key, replaced = replaced.is_some(), "webhook trigger registered");
        Ok(())
    }

    pub async fn unregister(&self, key: &ObjectKey) -> bool {
        let removed = self.triggers.write().await.remove(key).is_some();
        if removed {
            tracing::debug!(trigger = %key, "webhook trigger unregistered");
        }
        removed
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<WebhookTrigger> {
        self.triggers.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<ObjectKey> {
        self.triggers.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.triggers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.triggers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgate_types::meta::ObjectMeta;
    use taskgate_types::trigger::{TaskBlueprint, WebhookTriggerSpec};

    fn trigger(name: &str, description: &str) -> WebhookTrigger {
        WebhookTrigger {
            metadata: ObjectMeta::new("default", name),
            spec: WebhookTriggerSpec {
                task_template: Some(TaskBlueprint {
                    description: description.to_string(),
                    ..TaskBlueprint::default()
                }),
                ..WebhookTriggerSpec::default()
            },
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_register_get_unregister() {
        let registry = TriggerRegistry::new();
        registry.register(trigger("gh", "v1")).await.unwrap();
        assert_eq!(registry.len().await, 1);

        let key = ObjectKey::new("default", "gh");
        assert!(registry.get(&key).await.is_some());
        assert!(registry.unregister(&key).await);
        assert!(!registry.unregister(&key).await);
        assert!(registry.get(&key).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reads_are_isolated_copies() {
        let registry = TriggerRegistry::new();
        registry.register(trigger("gh", "v1")).await.unwrap();
        let key = ObjectKey::new("default", "gh");

        let mut copy = registry.get(&key).await.unwrap();
        copy.spec.filter = "body.x == 1".to_string();
        assert!(registry.get(&key).await.unwrap().spec.filter.is_empty());

        let held = registry.get(&key).await.unwrap();
        registry.register(trigger("gh", "v2")).await.unwrap();
        let description = |t: &WebhookTrigger| t.spec.task_template.as_ref().unwrap().description.clone();
        assert_eq!(description(&held), "v1");
        assert_eq!(description(&registry.get(&key).await.unwrap()), "v2");
    }

    #[tokio::test]
    async fn test_invalid_trigger_is_dropped() {
        let registry = TriggerRegistry::new();
        registry.register(trigger("gh", "v1")).await.unwrap();

        let mut broken = trigger("gh", "v2");
        broken.spec.task_template = None;
        assert!(registry.register(broken).await.is_err());
        assert!(registry.get(&ObjectKey::new("default", "gh")).await.is_none());
    }
}
