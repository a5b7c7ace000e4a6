//! Reusable Task templates.
//!
//! A Task may reference a TaskTemplate. When merged, the Task's own fields
//! win, Template contexts are prepended, and outputs are merged by name.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, ObjectRef, Resource};
use crate::task::{ContextItem, OutputSpec, TaskSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub metadata: ObjectMeta,
    pub spec: TaskTemplateSpec,
}

impl Resource for TaskTemplate {
    const KIND: &'static str = "TaskTemplate";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ref: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<ContextItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

impl TaskTemplateSpec {
    /// Produce the effective spec of `task` layered over this template.
    pub fn merge_into(&self, task: &TaskSpec) -> TaskSpec {
        let description = if task.description.is_empty() {
            self.description.clone().unwrap_or_default()
        } else {
            task.description.clone()
        };

        let mut contexts = self.contexts.clone();
        contexts.extend(task.contexts.iter().cloned());

        let mut outputs: Vec<OutputSpec> = self
            .outputs
            .iter()
            .filter(|o| !task.outputs.iter().any(|t| t.name == o.name))
            .cloned()
            .collect();
        outputs.extend(task.outputs.iter().cloned());

        TaskSpec {
            description,
            agent_ref: task.agent_ref.clone().or_else(|| self.agent_ref.clone()),
            contexts,
            outputs,
            template_ref: task.template_ref.clone(),
            retry_policy: task.retry_policy,
        }
    }
}
