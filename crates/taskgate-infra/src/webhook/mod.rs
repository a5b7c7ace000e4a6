//! Webhook request authentication backed by the secret chain.

pub mod auth;

pub use auth::{sign, verify_signature, SecretAuthenticator};
