//! In-test doubles for the store and workload ports.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use taskgate_types::agent::Agent;
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{HasStatus, ObjectKey, Resource};
use taskgate_types::task::Task;
use taskgate_types::template::TaskTemplate;
use taskgate_types::trigger::WebhookTrigger;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::repository::{ListParams, ObjectRepository, StatusRepository, WatchEvent};
use crate::workload::{WorkloadBackend, WorkloadError, WorkloadSpec, WorkloadState, WorkloadStatus};

pub struct Table<R> {
    objects: Mutex<BTreeMap<ObjectKey, R>>,
    events: broadcast::Sender<WatchEvent<R>>,
}

impl<R: Resource> Table<R> {
    fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            objects: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    fn create(&self, object: &R, version: u64) -> Result<R, RepositoryError> {
        let mut objects = self.objects.lock().unwrap();
        let key = object.key();
        if objects.contains_key(&key) {
            return Err(RepositoryError::AlreadyExists {
                kind: R::KIND,
                key: key.to_string(),
            });
        }
        let mut stored = object.clone();
        let meta = stored.meta_mut();
        meta.uid = Uuid::now_v7();
        meta.resource_version = version;
        meta.generation = 1;
        meta.creation_timestamp.get_or_insert_with(Utc::now);
        objects.insert(key, stored.clone());
        let _ = self.events.send(WatchEvent::Applied(stored.clone()));
        Ok(stored)
    }

    fn replace(
        &self,
        object: &R,
        version: u64,
        merge: impl FnOnce(&R, &R) -> R,
    ) -> Result<R, RepositoryError> {
        let mut objects = self.objects.lock().unwrap();
        let key = object.key();
        let Some(current) = objects.get(&key) else {
            return Err(RepositoryError::NotFound {
                kind: R::KIND,
                key: key.to_string(),
            });
        };
        if current.meta().resource_version != object.meta().resource_version {
            return Err(RepositoryError::Conflict {
                kind: R::KIND,
                key: key.to_string(),
                message: "resource version changed".to_string(),
            });
        }
        let mut next = merge(current, object);
        next.meta_mut().resource_version = version;
        objects.insert(key, next.clone());
        let _ = self.events.send(WatchEvent::Applied(next.clone()));
        Ok(next)
    }

    fn get(&self, key: &ObjectKey) -> Option<R> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn list(&self, params: &ListParams) -> Vec<R> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| params.matches(*o))
            .cloned()
            .collect()
    }

    fn delete(&self, key: &ObjectKey) -> bool {
        let removed = self.objects.lock().unwrap().remove(key);
        match removed {
            Some(obj) => {
                let _ = self.events.send(WatchEvent::Deleted(obj));
                true
            }
            None => false,
        }
    }
}

/// Store double holding every kind the core needs.
pub struct FakeStore {
    version: AtomicU64,
    pub tasks: Table<Task>,
    pub agents: Table<Agent>,
    pub templates: Table<TaskTemplate>,
    pub triggers: Table<WebhookTrigger>,
    /// Makes every `update_status` fail with `Unavailable`.
    pub fail_status_writes: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            version: AtomicU64::new(1),
            tasks: Table::new(),
            agents: Table::new(),
            templates: Table::new(),
            triggers: Table::new(),
            fail_status_writes: AtomicBool::new(false),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_status_writes(&self) -> Result<(), RepositoryError> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("status writes disabled".to_string()));
        }
        Ok(())
    }

    pub fn task(&self, namespace: &str, name: &str) -> Task {
        self.tasks.get(&ObjectKey::new(namespace, name)).unwrap()
    }

    pub fn trigger(&self, namespace: &str, name: &str) -> WebhookTrigger {
        self.triggers.get(&ObjectKey::new(namespace, name)).unwrap()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.list(&ListParams::all())
    }
}

macro_rules! fake_repository {
    ($kind:ty, $table:ident, $merge:expr) => {
        impl ObjectRepository<$kind> for FakeStore {
            async fn create(&self, object: &$kind) -> Result<$kind, RepositoryError> {
                self.$table.create(object, self.next_version())
            }

            async fn get(&self, key: &ObjectKey) -> Result<Option<$kind>, RepositoryError> {
                Ok(self.$table.get(key))
            }

            async fn list(&self, params: &ListParams) -> Result<Vec<$kind>, RepositoryError> {
                Ok(self.$table.list(params))
            }

            async fn update(&self, object: &$kind) -> Result<$kind, RepositoryError> {
                self.$table.replace(object, self.next_version(), $merge)
            }

            async fn delete(&self, key: &ObjectKey) -> Result<bool, RepositoryError> {
                Ok(self.$table.delete(key))
            }

            fn watch(&self) -> broadcast::Receiver<WatchEvent<$kind>> {
                self.$table.events.subscribe()
            }
        }
    };
}

fn keep_status<R: HasStatus>(current: &R, incoming: &R) -> R {
    let mut next = incoming.clone();
    *next.status_mut() = current.status().clone();
    next.meta_mut().generation = current.meta().generation + 1;
    next
}

fn take_status<R: HasStatus>(current: &R, incoming: &R) -> R {
    let mut next = current.clone();
    *next.status_mut() = incoming.status().clone();
    next
}

fn replace_all<R: Resource>(current: &R, incoming: &R) -> R {
    let mut next = incoming.clone();
    next.meta_mut().generation = current.meta().generation + 1;
    next
}

fake_repository!(Task, tasks, keep_status::<Task>);
fake_repository!(WebhookTrigger, triggers, keep_status::<WebhookTrigger>);
fake_repository!(Agent, agents, replace_all::<Agent>);
fake_repository!(TaskTemplate, templates, replace_all::<TaskTemplate>);

impl StatusRepository<Task> for FakeStore {
    async fn update_status(&self, object: &Task) -> Result<Task, RepositoryError> {
        self.check_status_writes()?;
        self.tasks.replace(object, self.next_version(), take_status::<Task>)
    }
}

impl StatusRepository<WebhookTrigger> for FakeStore {
    async fn update_status(&self, object: &WebhookTrigger) -> Result<WebhookTrigger, RepositoryError> {
        self.check_status_writes()?;
        self.triggers
            .replace(object, self.next_version(), take_status::<WebhookTrigger>)
    }
}

/// Workload backend double. Workloads stay `Running` until finished by a test.
#[derive(Default)]
pub struct FakeWorkloads {
    workloads: Mutex<HashMap<ObjectKey, WorkloadStatus>>,
    pub created: Mutex<Vec<WorkloadSpec>>,
    pub reject_creates: AtomicBool,
}

impl FakeWorkloads {
    pub fn finish(&self, key: &ObjectKey, status: WorkloadStatus) {
        self.workloads.lock().unwrap().insert(key.clone(), status);
    }

    pub fn exists(&self, key: &ObjectKey) -> bool {
        self.workloads.lock().unwrap().contains_key(key)
    }
}

impl WorkloadBackend for FakeWorkloads {
    async fn create(&self, spec: &WorkloadSpec) -> Result<(), WorkloadError> {
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(WorkloadError::Rejected("image pull denied".to_string()));
        }
        self.created.lock().unwrap().push(spec.clone());
        self.workloads
            .lock()
            .unwrap()
            .entry(spec.key.clone())
            .or_insert_with(|| WorkloadStatus::new(WorkloadState::Running));
        Ok(())
    }

    async fn status(&self, key: &ObjectKey) -> Result<Option<WorkloadStatus>, WorkloadError> {
        Ok(self.workloads.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), WorkloadError> {
        self.workloads.lock().unwrap().remove(key);
        Ok(())
    }
}
