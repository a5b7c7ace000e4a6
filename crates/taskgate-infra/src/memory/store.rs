//! In-process object store.
//!
//! One `DashMap` per kind plus a broadcast channel for watchers. Every write
//! takes a fresh resource version from a store-wide counter and is checked
//! against the version the caller read (`0` writes unconditionally). Spec
//! writes keep the stored status and bump `generation`; status writes keep
//! everything else.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use secrecy::SecretString;
use taskgate_core::repository::{
    ListParams, ObjectRepository, SecretLookup, StatusRepository, WatchEvent,
};
use taskgate_types::agent::Agent;
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{HasStatus, ObjectKey, Resource};
use taskgate_types::secret::Secret;
use taskgate_types::task::Task;
use taskgate_types::template::TaskTemplate;
use taskgate_types::trigger::{SecretKeyRef, WebhookTrigger};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Watch buffer per kind. Slow watchers see `Lagged` and resync.
const WATCH_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

struct Collection<R> {
    objects: DashMap<ObjectKey, R>,
    events: broadcast::Sender<WatchEvent<R>>,
}

impl<R: Resource> Collection<R> {
    fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: DashMap::new(),
            events,
        }
    }

    fn notify(&self, event: WatchEvent<R>) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn create(&self, object: &R, version: u64) -> Result<R, RepositoryError> {
        let key = object.key();
        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(RepositoryError::Invalid(format!(
                "{} requires a namespace and a name",
                R::KIND
            )));
        }
        match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::AlreadyExists {
                kind: R::KIND,
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                let mut stored = object.clone();
                let meta = stored.meta_mut();
                meta.uid = Uuid::now_v7();
                meta.resource_version = version;
                meta.generation = 1;
                meta.creation_timestamp.get_or_insert_with(Utc::now);
                slot.insert(stored.clone());
                self.notify(WatchEvent::Applied(stored.clone()));
                Ok(stored)
            }
        }
    }

    fn get(&self, key: &ObjectKey) -> Option<R> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    fn list(&self, params: &ListParams) -> Vec<R> {
        let mut objects: Vec<R> = self
            .objects
            .iter()
            .filter(|entry| params.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by_key(|o| o.key());
        objects
    }

    /// Compare-and-swap write. `merge(stored, incoming)` builds the new state.
    fn replace(
        &self,
        object: &R,
        version: u64,
        bump_generation: bool,
        merge: impl FnOnce(&R, &R) -> R,
    ) -> Result<R, RepositoryError> {
        let key = object.key();
        let Some(mut entry) = self.objects.get_mut(&key) else {
            return Err(RepositoryError::NotFound {
                kind: R::KIND,
                key: key.to_string(),
            });
        };
        let current = entry.value();
        let expected = object.meta().resource_version;
        let stored_version = current.meta().resource_version;
        if expected != 0 && expected != stored_version {
            return Err(RepositoryError::Conflict {
                kind: R::KIND,
                key: key.to_string(),
                message: format!("resource version {expected} is stale (stored {stored_version})"),
            });
        }

        let mut next = merge(current, object);
        let meta = next.meta_mut();
        let previous = current.meta();
        meta.uid = previous.uid;
        meta.creation_timestamp = previous.creation_timestamp;
        meta.resource_version = version;
        meta.generation = previous.generation + u64::from(bump_generation);
        *entry.value_mut() = next.clone();
        drop(entry);

        self.notify(WatchEvent::Applied(next.clone()));
        Ok(next)
    }

    fn delete(&self, key: &ObjectKey) -> bool {
        match self.objects.remove(key) {
            Some((_, object)) => {
                self.notify(WatchEvent::Deleted(object));
                true
            }
            None => false,
        }
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }
}

/// Incoming spec and metadata, stored status.
fn keep_status<R: HasStatus>(stored: &R, incoming: &R) -> R {
    let mut next = incoming.clone();
    *next.status_mut() = stored.status().clone();
    next
}

/// Stored spec and metadata, incoming status.
fn take_status<R: HasStatus>(stored: &R, incoming: &R) -> R {
    let mut next = stored.clone();
    *next.status_mut() = incoming.status().clone();
    next
}

fn replace_all<R: Resource>(_stored: &R, incoming: &R) -> R {
    incoming.clone()
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Store for every kind the control plane handles. Share it behind an `Arc`.
pub struct MemoryStore {
    version: AtomicU64,
    tasks: Collection<Task>,
    agents: Collection<Agent>,
    templates: Collection<TaskTemplate>,
    triggers: Collection<WebhookTrigger>,
    secrets: Collection<Secret>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            tasks: Collection::new(),
            agents: Collection::new(),
            templates: Collection::new(),
            triggers: Collection::new(),
            secrets: Collection::new(),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Total number of stored objects across kinds.
    pub fn len(&self) -> usize {
        self.tasks.objects.len()
            + self.agents.objects.len()
            + self.templates.objects.len()
            + self.triggers.objects.len()
            + self.secrets.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! memory_repository {
    ($kind:ty, $field:ident, $merge:expr) => {
        impl ObjectRepository<$kind> for MemoryStore {
            async fn create(&self, object: &$kind) -> Result<$kind, RepositoryError> {
                self.$field.create(object, self.next_version())
            }

            async fn get(&self, key: &ObjectKey) -> Result<Option<$kind>, RepositoryError> {
                Ok(self.$field.get(key))
            }

            async fn list(&self, params: &ListParams) -> Result<Vec<$kind>, RepositoryError> {
                Ok(self.$field.list(params))
            }

            async fn update(&self, object: &$kind) -> Result<$kind, RepositoryError> {
                self.$field.replace(object, self.next_version(), true, $merge)
            }

            async fn delete(&self, key: &ObjectKey) -> Result<bool, RepositoryError> {
                Ok(self.$field.delete(key))
            }

            fn watch(&self) -> broadcast::Receiver<WatchEvent<$kind>> {
                self.$field.watch()
            }
        }
    };
}

memory_repository!(Task, tasks, keep_status::<Task>);
memory_repository!(Agent, agents, replace_all::<Agent>);
memory_repository!(TaskTemplate, templates, replace_all::<TaskTemplate>);
memory_repository!(WebhookTrigger, triggers, keep_status::<WebhookTrigger>);
memory_repository!(Secret, secrets, replace_all::<Secret>);

impl StatusRepository<Task> for MemoryStore {
    async fn update_status(&self, object: &Task) -> Result<Task, RepositoryError> {
        self.tasks
            .replace(object, self.next_version(), false, take_status::<Task>)
    }
}

impl StatusRepository<WebhookTrigger> for MemoryStore {
    async fn update_status(&self, object: &WebhookTrigger) -> Result<WebhookTrigger, RepositoryError> {
        self.triggers
            .replace(object, self.next_version(), false, take_status::<WebhookTrigger>)
    }
}

/// Stored `Secret` objects as a secret source.
impl SecretLookup for MemoryStore {
    async fn get(
        &self,
        namespace: &str,
        reference: &SecretKeyRef,
    ) -> Result<Option<SecretString>, RepositoryError> {
        let key = ObjectKey::new(namespace, &reference.name);
        Ok(self.secrets.objects.get(&key).and_then(|secret| {
            secret
                .data
                .get(&reference.key)
                .map(|value| SecretString::from(value.clone()))
        }))
    }
}
