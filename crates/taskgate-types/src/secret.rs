//! Secret objects referenced by webhook authentication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// Namespaced bag of secret values, keyed by entry name.
///
/// Only lives long enough to be loaded into a secret provider; providers keep
/// the values wrapped.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("metadata", &self.metadata)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_values() {
        let mut secret = Secret {
            metadata: ObjectMeta::new("default", "gh"),
            data: BTreeMap::new(),
        };
        secret.data.insert("token".to_string(), "hunter2".to_string());

        let printed = format!("{secret:?}");
        assert!(printed.contains("token"));
        assert!(!printed.contains("hunter2"));
    }
}
