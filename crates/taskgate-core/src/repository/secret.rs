//! Secret lookup port used by webhook authentication.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use secrecy::SecretString;
use taskgate_types::error::RepositoryError;
use taskgate_types::trigger::SecretKeyRef;

/// Resolves `{name, key}` references within a namespace.
///
/// Implementations are chained in priority order by taskgate-infra.
pub trait SecretLookup: Send + Sync {
    /// `Ok(None)` when this provider has no such secret or key.
    fn get(
        &self,
        namespace: &str,
        reference: &SecretKeyRef,
    ) -> impl Future<Output = Result<Option<SecretString>, RepositoryError>> + Send;
}

/// Object-safe form of [`SecretLookup`], so differently typed providers can
/// sit in one chain.
pub trait SecretLookupDyn: Send + Sync {
    fn get_boxed<'a>(
        &'a self,
        namespace: &'a str,
        reference: &'a SecretKeyRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SecretString>, RepositoryError>> + Send + 'a>>;
}

impl<T: SecretLookup> SecretLookupDyn for T {
    fn get_boxed<'a>(
        &'a self,
        namespace: &'a str,
        reference: &'a SecretKeyRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SecretString>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.get(namespace, reference))
    }
}

pub type DynSecretLookup = Arc<dyn SecretLookupDyn>;
