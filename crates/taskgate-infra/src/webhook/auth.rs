//! Secret-backed webhook request authentication.
//!
//! - HMAC (`sha1`, `sha256`, `sha512`) over the raw body, hex signature with
//!   an optional `<algo>=` prefix, verified in constant time
//! - `Authorization: Bearer <token>`
//! - a named header whose value must equal the secret
//!
//! Header names are matched lower-cased.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use taskgate_core::repository::SecretLookup;
use taskgate_core::webhook::{AuthError, Headers, WebhookAuthenticator};
use taskgate_types::trigger::{HmacAlgorithm, SecretKeyRef, WebhookAuth};

const AUTHORIZATION: &str = "authorization";
const BEARER_PREFIX: &str = "Bearer ";

pub struct SecretAuthenticator<S> {
    secrets: S,
}

impl<S: SecretLookup> SecretAuthenticator<S> {
    pub fn new(secrets: S) -> Self {
        Self { secrets }
    }

    async fn secret(&self, namespace: &str, reference: &SecretKeyRef) -> Result<SecretString, AuthError> {
        let label = format!("{namespace}/{}#{}", reference.name, reference.key);
        match self.secrets.get(namespace, reference).await {
            Ok(Some(secret)) => Ok(secret),
            Ok(None) => Err(AuthError::SecretUnavailable(label)),
            Err(e) => {
                tracing::warn!(secret = %label, error = %e, "secret lookup failed");
                Err(AuthError::SecretUnavailable(label))
            }
        }
    }
}

impl<S: SecretLookup> WebhookAuthenticator for SecretAuthenticator<S> {
    async fn authenticate(
        &self,
        namespace: &str,
        auth: &WebhookAuth,
        headers: &Headers,
        body: &[u8],
    ) -> Result<(), AuthError> {
        match auth {
            WebhookAuth::Hmac {
                secret_ref,
                header,
                algorithm,
            } => {
                let signature = header_value(headers, header)?;
                let secret = self.secret(namespace, secret_ref).await?;
                verify_signature(*algorithm, secret.expose_secret().as_bytes(), body, signature)
            }
            WebhookAuth::Bearer { secret_ref } => {
                let value = header_value(headers, AUTHORIZATION)?;
                let token = value
                    .strip_prefix(BEARER_PREFIX)
                    .ok_or_else(|| AuthError::Malformed("expected a Bearer token".to_string()))?;
                let secret = self.secret(namespace, secret_ref).await?;
                constant_time_match(secret.expose_secret(), token)
            }
            WebhookAuth::Header { name, secret_ref } => {
                let value = header_value(headers, name)?;
                let secret = self.secret(namespace, secret_ref).await?;
                constant_time_match(secret.expose_secret(), value)
            }
        }
    }
}

fn header_value<'a>(headers: &'a Headers, name: &str) -> Result<&'a str, AuthError> {
    headers
        .get(&name.to_ascii_lowercase())
        .map(String::as_str)
        .ok_or_else(|| AuthError::MissingHeader(name.to_string()))
}

fn constant_time_match(expected: &str, provided: &str) -> Result<(), AuthError> {
    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

/// Verify `signature` (hex, optionally `<algo>=`-prefixed) over `body`.
pub fn verify_signature(
    algorithm: HmacAlgorithm,
    secret: &[u8],
    body: &[u8],
    signature: &str,
) -> Result<(), AuthError> {
    let hex = signature
        .split_once('=')
        .map_or(signature, |(_, hex)| hex)
        .trim();
    let expected = hex_decode(hex)
        .ok_or_else(|| AuthError::Malformed("signature is not hex".to_string()))?;
    match algorithm {
        HmacAlgorithm::Sha1 => verify_mac::<Hmac<Sha1>>(secret, body, &expected),
        HmacAlgorithm::Sha256 => verify_mac::<Hmac<Sha256>>(secret, body, &expected),
        HmacAlgorithm::Sha512 => verify_mac::<Hmac<Sha512>>(secret, body, &expected),
    }
}

fn verify_mac<M: Mac + KeyInit>(secret: &[u8], body: &[u8], expected: &[u8]) -> Result<(), AuthError> {
    let mut mac = <M as KeyInit>::new_from_slice(secret)
        .map_err(|e| AuthError::Malformed(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    // `verify_slice` compares in constant time.
    mac.verify_slice(expected).map_err(|_| AuthError::Mismatch)
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Lower-case hex HMAC of `body`, as a sender would compute it.
pub fn sign(algorithm: HmacAlgorithm, secret: &[u8], body: &[u8]) -> String {
    fn digest<M: Mac + KeyInit>(secret: &[u8], body: &[u8]) -> Vec<u8> {
        match <M as KeyInit>::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(body);
                mac.finalize().into_bytes().to_vec()
            }
            // HMAC accepts keys of any length.
            Err(_) => Vec::new(),
        }
    }
    let bytes = match algorithm {
        HmacAlgorithm::Sha1 => digest::<Hmac<Sha1>>(secret, body),
        HmacAlgorithm::Sha256 => digest::<Hmac<Sha256>>(secret, body),
        HmacAlgorithm::Sha512 => digest::<Hmac<Sha512>>(secret, body),
    };
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use taskgate_types::error::RepositoryError;

    use super::*;

    /// Secrets keyed by `name/key`, namespace ignored.
    struct StaticSecrets(HashMap<String, String>);

    impl SecretLookup for StaticSecrets {
        async fn get(
            &self,
            _namespace: &str,
            reference: &SecretKeyRef,
        ) -> Result<Option<SecretString>, RepositoryError> {
            Ok(self
                .0
                .get(&format!("{}/{}", reference.name, reference.key))
                .map(|v| SecretString::from(v.clone())))
        }
    }

    fn authenticator() -> SecretAuthenticator<StaticSecrets> {
        SecretAuthenticator::new(StaticSecrets(HashMap::from([(
            "gh/token".to_string(),
            "It's a Secret to Everybody".to_string(),
        )])))
    }

    fn secret_ref(key: &str) -> SecretKeyRef {
        SecretKeyRef {
            name: "gh".to_string(),
            key: key.to_string(),
        }
    }

    fn hmac(algorithm: HmacAlgorithm, header: &str) -> WebhookAuth {
        WebhookAuth::Hmac {
            secret_ref: secret_ref("token"),
            header: header.to_string(),
            algorithm,
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_known_sha256_vector() {
        // Published example for GitHub webhook signatures.
        assert_eq!(
            sign(HmacAlgorithm::Sha256, b"It's a Secret to Everybody", b"Hello, World!"),
            "757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn test_verify_signature_accepts_prefix_and_plain_hex() {
        let sig = sign(HmacAlgorithm::Sha256, b"k", b"body");
        assert!(verify_signature(HmacAlgorithm::Sha256, b"k", b"body", &sig).is_ok());
        assert!(verify_signature(HmacAlgorithm::Sha256, b"k", b"body", &format!("sha256={sig}")).is_ok());
        assert!(matches!(
            verify_signature(HmacAlgorithm::Sha256, b"k", b"other", &sig),
            Err(AuthError::Mismatch)
        ));
        assert!(matches!(
            verify_signature(HmacAlgorithm::Sha256, b"k", b"body", "sha256=zz"),
            Err(AuthError::Malformed(_))
        ));
        assert!(matches!(
            verify_signature(HmacAlgorithm::Sha256, b"k", b"body", "sha256=é1"),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn test_any_flipped_body_byte_invalidates_signature() {
        let body = br#"{"action":"opened","number":42}"#;
        for algorithm in [HmacAlgorithm::Sha1, HmacAlgorithm::Sha256, HmacAlgorithm::Sha512] {
            let sig = sign(algorithm, b"k", body);
            assert!(verify_signature(algorithm, b"k", body, &sig).is_ok());
            for i in 0..body.len() {
                let mut tampered = body.to_vec();
                tampered[i] ^= 0x01;
                assert!(
                    matches!(
                        verify_signature(algorithm, b"k", &tampered, &sig),
                        Err(AuthError::Mismatch)
                    ),
                    "{algorithm:?} byte {i}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_hmac_algorithms() {
        let auth = authenticator();
        let body = br#"{"action":"opened"}"#;
        for (algorithm, prefix) in [
            (HmacAlgorithm::Sha1, "sha1="),
            (HmacAlgorithm::Sha256, "sha256="),
            (HmacAlgorithm::Sha512, "sha512="),
        ] {
            let sig = format!("{prefix}{}", sign(algorithm, b"It's a Secret to Everybody", body));
            let h = headers(&[("x-signature", sig.as_str())]);
            assert!(
                auth.authenticate("default", &hmac(algorithm, "X-Signature"), &h, body)
                    .await
                    .is_ok(),
                "{algorithm:?}"
            );
        }

        // A sha1 signature does not satisfy a sha256 trigger.
        let sig = sign(HmacAlgorithm::Sha1, b"It's a Secret to Everybody", body);
        let h = headers(&[("x-signature", sig.as_str())]);
        assert!(matches!(
            auth.authenticate("default", &hmac(HmacAlgorithm::Sha256, "X-Signature"), &h, body)
                .await,
            Err(AuthError::Mismatch)
        ));
    }

    #[tokio::test]
    async fn test_missing_header_and_secret() {
        let auth = authenticator();
        assert!(matches!(
            auth.authenticate("default", &hmac(HmacAlgorithm::Sha256, "X-Hub-Signature-256"), &Headers::new(), b"")
                .await,
            Err(AuthError::MissingHeader(_))
        ));

        let missing_secret = WebhookAuth::Bearer {
            secret_ref: secret_ref("absent"),
        };
        let h = headers(&[("authorization", "Bearer x")]);
        assert!(matches!(
            auth.authenticate("default", &missing_secret, &h, b"").await,
            Err(AuthError::SecretUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_bearer() {
        let auth = authenticator();
        let bearer = WebhookAuth::Bearer {
            secret_ref: secret_ref("token"),
        };
        let ok = headers(&[("authorization", "Bearer It's a Secret to Everybody")]);
        assert!(auth.authenticate("default", &bearer, &ok, b"").await.is_ok());

        let wrong = headers(&[("authorization", "Bearer nope")]);
        assert!(matches!(
            auth.authenticate("default", &bearer, &wrong, b"").await,
            Err(AuthError::Mismatch)
        ));

        let basic = headers(&[("authorization", "Basic abc")]);
        assert!(matches!(
            auth.authenticate("default", &bearer, &basic, b"").await,
            Err(AuthError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_named_header() {
        let auth = authenticator();
        let header = WebhookAuth::Header {
            name: "X-Gitlab-Token".to_string(),
            secret_ref: secret_ref("token"),
        };
        let ok = headers(&[("x-gitlab-token", "It's a Secret to Everybody")]);
        assert!(auth.authenticate("default", &header, &ok, b"").await.is_ok());

        let wrong = headers(&[("x-gitlab-token", "It's a Secret")]);
        assert!(matches!(
            auth.authenticate("default", &header, &wrong, b"").await,
            Err(AuthError::Mismatch)
        ));
    }
}
