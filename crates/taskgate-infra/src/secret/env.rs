//! Environment variable secret provider.
//!
//! A reference `{name, key}` in namespace `ns` resolves to
//! `TASKGATE_SECRET_{NS}_{NAME}_{KEY}`, each part upper-cased with every
//! non-alphanumeric character replaced by `_`.

use secrecy::SecretString;
use taskgate_core::repository::SecretLookup;
use taskgate_types::error::RepositoryError;
use taskgate_types::trigger::SecretKeyRef;

const PREFIX: &str = "TASKGATE_SECRET";

#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl EnvSecrets {
    pub fn new() -> Self {
        Self
    }

    pub fn var_name(namespace: &str, reference: &SecretKeyRef) -> String {
        format!(
            "{PREFIX}_{}_{}_{}",
            env_part(namespace),
            env_part(&reference.name),
            env_part(&reference.key)
        )
    }
}

fn env_part(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl SecretLookup for EnvSecrets {
    async fn get(
        &self,
        namespace: &str,
        reference: &SecretKeyRef,
    ) -> Result<Option<SecretString>, RepositoryError> {
        match std::env::var(Self::var_name(namespace, reference)) {
            Ok(value) => Ok(Some(SecretString::from(value))),
            // Not valid Unicode counts as absent; secrets must be strings.
            Err(std::env::VarError::NotPresent | std::env::VarError::NotUnicode(_)) => Ok(None),
        }
    }
}
