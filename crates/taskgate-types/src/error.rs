use thiserror::Error;

/// Errors from repository (object store) operations.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// The stored object's resource version differs from the one written.
    #[error("conflict updating {kind} {key}: {message}")]
    Conflict {
        kind: &'static str,
        key: String,
        message: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid object: {0}")]
    Invalid(String),
}

impl RepositoryError {
    /// Conflicts and unavailability are retried by requeueing, never surfaced
    /// as task failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Conflict { .. } | RepositoryError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Structural errors in a WebhookTrigger spec.
#[derive(Debug, Clone, Error)]
pub enum TriggerSpecError {
    #[error("trigger defines neither task_template nor rules")]
    MissingTemplate,

    #[error("trigger defines both task_template and rules")]
    TemplateAndRules,

    #[error("rule name must not be empty")]
    UnnamedRule,

    #[error("duplicate rule name '{0}'")]
    DuplicateRule(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::NotFound {
            kind: "Task",
            key: "default/t1".to_string(),
        };
        assert_eq!(err.to_string(), "Task default/t1 not found");
    }

    #[test]
    fn test_transient_classification() {
        let conflict = RepositoryError::Conflict {
            kind: "Task",
            key: "default/t1".to_string(),
            message: "version 3 != 4".to_string(),
        };
        assert!(conflict.is_transient());
        assert!(RepositoryError::Unavailable("down".into()).is_transient());
        assert!(!RepositoryError::Invalid("bad".into()).is_transient());
    }
}
