//! Application state wiring the store, pipeline and controllers together.
//!
//! The core services are generic over repository and backend traits; the
//! aliases below pin them to the in-memory infra implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use taskgate_core::controller::{TaskController, TriggerController};
use taskgate_core::task::TaskReconciler;
use taskgate_core::webhook::{TriggerRegistry, WebhookPipeline};
use taskgate_infra::config::{reconcile_timing, resync_interval};
use taskgate_infra::manifest::{apply_manifests, load_manifests};
use taskgate_infra::memory::{MemoryStore, MemoryWorkloads};
use taskgate_infra::secret::{build_secret_chain, SecretChain};
use taskgate_infra::webhook::SecretAuthenticator;
use taskgate_types::config::GlobalConfig;

pub type ConcreteReconciler =
    TaskReconciler<Arc<MemoryStore>, Arc<MemoryStore>, Arc<MemoryStore>, Arc<MemoryWorkloads>>;

pub type ConcretePipeline =
    WebhookPipeline<Arc<MemoryStore>, Arc<MemoryStore>, SecretAuthenticator<SecretChain>>;

pub type ConcreteTaskController =
    TaskController<Arc<MemoryStore>, Arc<MemoryStore>, Arc<MemoryStore>, Arc<MemoryWorkloads>>;

pub type ConcreteTriggerController = TriggerController<Arc<MemoryStore>, Arc<MemoryStore>>;

/// Shared state handed to HTTP handlers and used to build the controllers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GlobalConfig>,
    pub store: Arc<MemoryStore>,
    pub workloads: Arc<MemoryWorkloads>,
    pub registry: Arc<TriggerRegistry>,
    pub pipeline: Arc<ConcretePipeline>,
}

impl AppState {
    pub fn new(
        config: GlobalConfig,
        store: Arc<MemoryStore>,
        workloads: Arc<MemoryWorkloads>,
        include_env_secrets: bool,
    ) -> Self {
        let registry = Arc::new(TriggerRegistry::new());
        let authenticator =
            SecretAuthenticator::new(build_secret_chain(store.clone(), include_env_secrets));
        let pipeline = WebhookPipeline::new(
            registry.clone(),
            store.clone(),
            store.clone(),
            authenticator,
        );
        Self {
            config: Arc::new(config),
            store,
            workloads,
            registry,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Build a fresh store, seed it from `manifests` and wire everything up.
    pub async fn init(
        config: GlobalConfig,
        manifests: Option<&Path>,
        include_env_secrets: bool,
        simulated_runtime: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        if let Some(path) = manifests {
            let loaded = load_manifests(path).await?;
            let applied = apply_manifests(&store, loaded).await?;
            tracing::info!(path = %path.display(), objects = applied, "manifests applied");
        }

        let workloads = match simulated_runtime {
            Some(runtime) => MemoryWorkloads::with_simulated_runtime(runtime),
            None => MemoryWorkloads::new(),
        };
        Ok(Self::new(config, store, Arc::new(workloads), include_env_secrets))
    }

    pub fn task_controller(&self) -> ConcreteTaskController {
        let reconciler = TaskReconciler::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.workloads.clone(),
            self.config.retry,
            reconcile_timing(&self.config),
        );
        TaskController::new(
            Arc::new(reconciler),
            self.store.clone(),
            self.store.clone(),
            self.config.controller.workers,
            resync_interval(&self.config),
        )
    }

    pub fn trigger_controller(&self) -> ConcreteTriggerController {
        TriggerController::new(
            self.registry.clone(),
            self.store.clone(),
            self.store.clone(),
            self.config.server.base_url(),
            resync_interval(&self.config),
        )
    }
}
