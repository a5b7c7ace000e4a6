//! Object store ports.
//!
//! The store is a namespaced, versioned object database with change
//! notification. taskgate-infra ships an in-process implementation; the core
//! crate only depends on these traits.

pub mod secret;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use taskgate_types::agent::Agent;
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{HasStatus, ObjectKey, Resource};
use taskgate_types::task::Task;
use taskgate_types::template::TaskTemplate;
use taskgate_types::trigger::WebhookTrigger;
use tokio::sync::broadcast;

pub use secret::{DynSecretLookup, SecretLookup, SecretLookupDyn};

/// Selection criteria for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// Restrict to one namespace. `None` lists across all namespaces.
    pub namespace: Option<String>,
    /// Every entry must match exactly.
    pub labels: BTreeMap<String, String>,
}

impl ListParams {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches<R: Resource>(&self, object: &R) -> bool {
        let meta = object.meta();
        self.namespace.as_deref().is_none_or(|ns| ns == meta.namespace)
            && meta.matches_labels(&self.labels)
    }
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    /// The object was created or updated; carries the stored state.
    Applied(R),
    /// The object was removed; carries its last stored state.
    Deleted(R),
}

impl<R: Resource> WatchEvent<R> {
    pub fn key(&self) -> ObjectKey {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj.key(),
        }
    }
}

/// Storage contract for one resource kind.
///
/// Writes are guarded by `metadata.resource_version`: an update whose version
/// differs from the stored one fails with `RepositoryError::Conflict`.
pub trait ObjectRepository<R: Resource>: Send + Sync {
    /// Store a new object. The store assigns uid, versions and creation time.
    fn create(&self, object: &R) -> impl Future<Output = Result<R, RepositoryError>> + Send;

    fn get(&self, key: &ObjectKey) -> impl Future<Output = Result<Option<R>, RepositoryError>> + Send;

    fn list(&self, params: &ListParams) -> impl Future<Output = Result<Vec<R>, RepositoryError>> + Send;

    /// Replace metadata and spec. Status is left untouched.
    fn update(&self, object: &R) -> impl Future<Output = Result<R, RepositoryError>> + Send;

    /// Returns `false` if there was nothing to delete.
    fn delete(&self, key: &ObjectKey) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>>;
}

/// Status subresource for kinds that carry one.
pub trait StatusRepository<R: HasStatus>: ObjectRepository<R> {
    /// Replace only the status. Still version-checked.
    fn update_status(&self, object: &R) -> impl Future<Output = Result<R, RepositoryError>> + Send;
}

impl<R: Resource, T: ObjectRepository<R>> ObjectRepository<R> for Arc<T> {
    fn create(&self, object: &R) -> impl Future<Output = Result<R, RepositoryError>> + Send {
        (**self).create(object)
    }

    fn get(&self, key: &ObjectKey) -> impl Future<Output = Result<Option<R>, RepositoryError>> + Send {
        (**self).get(key)
    }

    fn list(&self, params: &ListParams) -> impl Future<Output = Result<Vec<R>, RepositoryError>> + Send {
        (**self).list(params)
    }

    fn update(&self, object: &R) -> impl Future<Output = Result<R, RepositoryError>> + Send {
        (**self).update(object)
    }

    fn delete(&self, key: &ObjectKey) -> impl Future<Output = Result<bool, RepositoryError>> + Send {
        (**self).delete(key)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        (**self).watch()
    }
}

impl<R: HasStatus, T: StatusRepository<R>> StatusRepository<R> for Arc<T> {
    fn update_status(&self, object: &R) -> impl Future<Output = Result<R, RepositoryError>> + Send {
        (**self).update_status(object)
    }
}

// ---------------------------------------------------------------------------
// Per-kind names
// ---------------------------------------------------------------------------

/// Task persistence, including the status subresource.
pub trait TaskRepository: StatusRepository<Task> {}
impl<T: StatusRepository<Task>> TaskRepository for T {}

pub trait AgentRepository: ObjectRepository<Agent> {}
impl<T: ObjectRepository<Agent>> AgentRepository for T {}

pub trait TemplateRepository: ObjectRepository<TaskTemplate> {}
impl<T: ObjectRepository<TaskTemplate>> TemplateRepository for T {}

/// WebhookTrigger persistence, including the status subresource.
pub trait TriggerRepository: StatusRepository<WebhookTrigger> {}
impl<T: StatusRepository<WebhookTrigger>> TriggerRepository for T {}
