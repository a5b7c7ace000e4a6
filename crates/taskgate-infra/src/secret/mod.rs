//! Secret lookup providers.
//!
//! - `env`: environment variables (read-only, highest priority)
//! - `chain`: first-match-wins chain over any number of providers
//!
//! Stored `Secret` objects are served by `MemoryStore` itself.

pub mod chain;
pub mod env;

pub use chain::{build_secret_chain, SecretChain};
pub use env::EnvSecrets;
