//! Manifest loading: seed objects from YAML or JSON files.
//!
//! Each YAML document (or JSON object / array element) carries a `kind`
//! field naming one of `Agent`, `Task`, `TaskTemplate`, `WebhookTrigger` or
//! `Secret`, followed by the object's own fields. A directory is read in file
//! name order; files other than `.yaml`, `.yml` and `.json` are skipped.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use taskgate_core::repository::ObjectRepository;
use taskgate_types::agent::Agent;
use taskgate_types::meta::Resource;
use taskgate_types::secret::Secret;
use taskgate_types::task::Task;
use taskgate_types::template::TaskTemplate;
use taskgate_types::trigger::WebhookTrigger;

use crate::memory::MemoryStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    Agent(Agent),
    Task(Task),
    TaskTemplate(TaskTemplate),
    WebhookTrigger(WebhookTrigger),
    Secret(Secret),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::Agent(_) => Agent::KIND,
            Manifest::Task(_) => Task::KIND,
            Manifest::TaskTemplate(_) => TaskTemplate::KIND,
            Manifest::WebhookTrigger(_) => WebhookTrigger::KIND,
            Manifest::Secret(_) => Secret::KIND,
        }
    }

    pub fn describe(&self) -> String {
        let key = match self {
            Manifest::Agent(o) => o.key(),
            Manifest::Task(o) => o.key(),
            Manifest::TaskTemplate(o) => o.key(),
            Manifest::WebhookTrigger(o) => o.key(),
            Manifest::Secret(o) => o.key(),
        };
        format!("{} {key}", self.kind())
    }
}

/// Parse every document in a YAML stream. Empty documents are skipped.
pub fn parse_yaml(content: &str) -> anyhow::Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (index, document) in serde_yaml_ng::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml_ng::Value::deserialize(document)
            .with_context(|| format!("document {index} is not valid YAML"))?;
        if value.is_null() {
            continue;
        }
        let manifest: Manifest = serde_yaml_ng::from_value(value)
            .with_context(|| format!("document {index} is not a valid manifest"))?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// Parse a JSON object or an array of objects.
pub fn parse_json(content: &str) -> anyhow::Result<Vec<Manifest>> {
    let value: serde_json::Value = serde_json::from_str(content).context("invalid JSON")?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item)
                    .with_context(|| format!("element {index} is not a valid manifest"))
            })
            .collect(),
        object => Ok(vec![
            serde_json::from_value(object).context("not a valid manifest")?,
        ]),
    }
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

async fn load_file(path: &Path) -> anyhow::Result<Vec<Manifest>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        parse_json(&content)
    } else {
        parse_yaml(&content)
    };
    parsed.with_context(|| format!("failed to parse {}", path.display()))
}

/// Load a manifest file, or every manifest file in a directory.
pub async fn load_manifests(path: &Path) -> anyhow::Result<Vec<Manifest>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("manifest path {} not found", path.display()))?;
    if !metadata.is_dir() {
        return load_file(path).await;
    }

    let mut files: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("failed to list {}", path.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        if is_manifest_file(&file) && entry.file_type().await?.is_file() {
            files.push(file);
        }
    }
    files.sort();

    let mut manifests = Vec::new();
    for file in &files {
        manifests.extend(load_file(file).await?);
    }
    tracing::debug!(files = files.len(), objects = manifests.len(), path = %path.display(), "manifests loaded");
    Ok(manifests)
}

/// Create the object, or replace the stored one if it already exists.
async fn apply_object<R, S>(store: &S, mut object: R) -> anyhow::Result<()>
where
    R: Resource,
    S: ObjectRepository<R>,
{
    let key = object.key();
    match store.get(&key).await? {
        Some(existing) => {
            object.meta_mut().resource_version = existing.meta().resource_version;
            store.update(&object).await?;
        }
        None => {
            store.create(&object).await?;
        }
    }
    Ok(())
}

/// Apply manifests in order. Invalid trigger specs are rejected up front.
pub async fn apply_manifests(store: &MemoryStore, manifests: Vec<Manifest>) -> anyhow::Result<usize> {
    let count = manifests.len();
    for manifest in manifests {
        let what = manifest.describe();
        let result = match manifest {
            Manifest::Agent(o) => apply_object(store, o).await,
            Manifest::Task(o) => apply_object(store, o).await,
            Manifest::TaskTemplate(o) => apply_object(store, o).await,
            Manifest::WebhookTrigger(o) => {
                if let Err(e) = o.spec.validate() {
                    bail!("{what}: {e}");
                }
                apply_object(store, o).await
            }
            Manifest::Secret(o) => apply_object(store, o).await,
        };
        result.with_context(|| format!("failed to apply {what}"))?;
        tracing::info!(object = %what, "manifest applied");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use taskgate_core::repository::ListParams;
    use taskgate_types::meta::ObjectKey;
    use taskgate_types::trigger::{ConcurrencyPolicy, HmacAlgorithm, WebhookAuth};
    use tempfile::TempDir;

    use super::*;

    const SEED: &str = r#"
kind: Agent
metadata:
  name: coder
  namespace: team-a
spec:
  image: coder:latest
  max_concurrent_tasks: 2
---
kind: WebhookTrigger
metadata:
  name: github-prs
  namespace: team-a
spec:
  filter: body.action == "opened"
  concurrency_policy: Forbid
  auth:
    hmac:
      secret_ref:
        name: github
        key: token
  task_template:
    description: "PR #{{.pull_request.number}}"
    agent_ref:
      name: coder
---
kind: Secret
metadata:
  name: github
  namespace: team-a
data:
  token: hunter2
---
"#;

    #[test]
    fn test_parse_yaml_stream() {
        let manifests = parse_yaml(SEED).unwrap();
        let kinds: Vec<&str> = manifests.iter().map(Manifest::kind).collect();
        assert_eq!(kinds, vec!["Agent", "WebhookTrigger", "Secret"]);
        match &manifests[1] {
            Manifest::WebhookTrigger(t) => {
                assert_eq!(t.spec.concurrency_policy, ConcurrencyPolicy::Forbid);
                assert_eq!(t.metadata.namespace, "team-a");
                match &t.spec.auth {
                    Some(WebhookAuth::Hmac { secret_ref, header, algorithm }) => {
                        assert_eq!(secret_ref.name, "github");
                        assert_eq!(header, "X-Hub-Signature-256");
                        assert_eq!(*algorithm, HmacAlgorithm::Sha256);
                    }
                    other => panic!("expected hmac auth, got {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let err = parse_yaml("kind: Pod\nmetadata:\n  name: x\n").unwrap_err();
        assert!(format!("{err:#}").contains("document 0"));
    }

    #[test]
    fn test_parse_json_object_and_array() {
        let one = r#"{"kind":"Task","metadata":{"name":"t1"},"spec":{"description":"hi"}}"#;
        let parsed = parse_json(one).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].describe(), "Task default/t1");

        let many = format!("[{one}, {one}]");
        assert_eq!(parse_json(&many).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_directory_and_apply_twice() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("10-seed.yaml"), SEED).await.unwrap();
        tokio::fs::write(
            dir.path().join("20-task.json"),
            r#"{"kind":"Task","metadata":{"name":"t1","namespace":"team-a"},"spec":{"description":"hi","agent_ref":{"name":"coder"}}}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("README.md"), "ignored").await.unwrap();

        let manifests = load_manifests(dir.path()).await.unwrap();
        assert_eq!(manifests.len(), 4);

        let store = MemoryStore::new();
        assert_eq!(apply_manifests(&store, manifests.clone()).await.unwrap(), 4);
        // Re-applying replaces instead of failing on AlreadyExists.
        apply_manifests(&store, manifests).await.unwrap();

        let agent = ObjectRepository::<Agent>::get(&store, &ObjectKey::new("team-a", "coder"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.spec.max_concurrent_tasks, Some(2));
        assert_eq!(agent.metadata.generation, 2);

        let tasks = ObjectRepository::<Task>::list(&store, &ListParams::in_namespace("team-a"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_trigger() {
        let yaml = "kind: WebhookTrigger\nmetadata:\n  name: broken\nspec:\n  filter: \"\"\n";
        let manifests = parse_yaml(yaml).unwrap();
        let store = MemoryStore::new();
        assert!(apply_manifests(&store, manifests).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_path() {
        let dir = TempDir::new().unwrap();
        assert!(load_manifests(&dir.path().join("nope.yaml")).await.is_err());
    }
}
