//! Request authentication port.
//!
//! The secret-backed implementation lives in taskgate-infra.

use std::future::Future;

use taskgate_types::trigger::WebhookAuth;

use super::Headers;

/// Why a request was rejected. Every variant maps to 401.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing header '{0}'")]
    MissingHeader(String),

    #[error("malformed credentials: {0}")]
    Malformed(String),

    #[error("secret {0} unavailable")]
    SecretUnavailable(String),

    #[error("credentials do not match")]
    Mismatch,
}

pub trait WebhookAuthenticator: Send + Sync {
    /// Verify a request against a trigger's auth settings. Secrets are looked
    /// up in `namespace` (the trigger's namespace).
    fn authenticate(
        &self,
        namespace: &str,
        auth: &WebhookAuth,
        headers: &Headers,
        body: &[u8],
    ) -> impl Future<Output = Result<(), AuthError>> + Send;
}
