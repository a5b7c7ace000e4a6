//! Secret chain: providers in priority order, first match wins.

use std::sync::Arc;

use secrecy::SecretString;
use taskgate_core::repository::{DynSecretLookup, SecretLookup};
use taskgate_types::error::RepositoryError;
use taskgate_types::trigger::SecretKeyRef;

use crate::memory::MemoryStore;
use crate::secret::env::EnvSecrets;

#[derive(Clone, Default)]
pub struct SecretChain {
    providers: Vec<DynSecretLookup>,
}

impl SecretChain {
    pub fn new(providers: Vec<DynSecretLookup>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl SecretLookup for SecretChain {
    async fn get(
        &self,
        namespace: &str,
        reference: &SecretKeyRef,
    ) -> Result<Option<SecretString>, RepositoryError> {
        for provider in &self.providers {
            if let Some(value) = provider.get_boxed(namespace, reference).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Build the default chain:
/// 1. Environment variables (if `include_env` is true)
/// 2. `Secret` objects in the store
pub fn build_secret_chain(store: Arc<MemoryStore>, include_env: bool) -> SecretChain {
    let mut providers: Vec<DynSecretLookup> = Vec::new();
    if include_env {
        providers.push(Arc::new(EnvSecrets::new()));
    }
    providers.push(store);
    SecretChain::new(providers)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use secrecy::ExposeSecret;
    use taskgate_core::repository::ObjectRepository;
    use taskgate_types::meta::ObjectMeta;
    use taskgate_types::secret::Secret;

    use super::*;

    /// Always fails, to check error propagation.
    struct Broken;

    impl SecretLookup for Broken {
        async fn get(
            &self,
            _namespace: &str,
            _reference: &SecretKeyRef,
        ) -> Result<Option<SecretString>, RepositoryError> {
            Err(RepositoryError::Unavailable("vault sealed".to_string()))
        }
    }

    fn reference(key: &str) -> SecretKeyRef {
        SecretKeyRef {
            name: "chain".to_string(),
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_env_wins_over_store() {
        let store = Arc::new(MemoryStore::new());
        let secret = Secret {
            metadata: ObjectMeta::new("chaintest", "chain"),
            data: BTreeMap::from([
                ("token".to_string(), "from-store".to_string()),
                ("only-store".to_string(), "stored".to_string()),
            ]),
        };
        ObjectRepository::<Secret>::create(&*store, &secret).await.unwrap();
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("TASKGATE_SECRET_CHAINTEST_CHAIN_TOKEN", "from-env") };

        let chain = build_secret_chain(store, true);
        assert_eq!(chain.len(), 2);

        let token = chain.get("chaintest", &reference("token")).await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "from-env");
        let stored = chain.get("chaintest", &reference("only-store")).await.unwrap().unwrap();
        assert_eq!(stored.expose_secret(), "stored");
        assert!(chain.get("chaintest", &reference("none")).await.unwrap().is_none());

        // SAFETY: set above in this test.
        unsafe { std::env::remove_var("TASKGATE_SECRET_CHAINTEST_CHAIN_TOKEN") };
    }

    #[tokio::test]
    async fn test_provider_error_stops_the_chain() {
        let providers: Vec<DynSecretLookup> = vec![Arc::new(Broken), Arc::new(MemoryStore::new())];
        let chain = SecretChain::new(providers);
        let result = chain.get("default", &reference("token")).await;
        assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
    }
}
