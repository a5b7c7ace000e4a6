//! Object metadata shared by every stored resource.
//!
//! Mirrors the metadata a hosting orchestration platform attaches to its
//! objects: identity (namespace + name), labels, annotations, and the
//! `resource_version` token used for optimistic concurrency.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label set on every Task created by a webhook trigger.
pub const LABEL_WEBHOOK_TRIGGER: &str = "taskgate.io/webhook-trigger";

/// Label set on Tasks created by a rule of a multi-rule trigger.
pub const LABEL_WEBHOOK_RULE: &str = "taskgate.io/webhook-rule";

/// Annotation requesting that a Task be stopped. Honoured when set to `"true"`.
pub const ANNOTATION_STOP: &str = "taskgate.io/stop";

/// Namespace used when a manifest omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Standard metadata carried by every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default = "Uuid::nil")]
    pub uid: Uuid,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Optimistic concurrency token. Bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store on spec (non-status) writes only.
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl ObjectMeta {
    /// Metadata for a not-yet-stored object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::nil(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resource_version: 0,
            generation: 0,
            creation_timestamp: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Whether every `selector` entry is present with an equal value.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Namespaced identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to another object, defaulting to the referrer's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Resolve against the namespace of the referring object.
    pub fn resolve(&self, referrer_namespace: &str) -> ObjectKey {
        ObjectKey::new(
            self.namespace.as_deref().unwrap_or(referrer_namespace),
            &self.name,
        )
    }
}

/// Common accessors for stored resources.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name as used in manifests and log fields.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Implemented by resources that carry a separately-updated status.
pub trait HasStatus: Resource {
    type Status: Clone + Default + Send + Sync + 'static;

    fn status(&self) -> &Self::Status;

    fn status_mut(&mut self) -> &mut Self::Status;
}
