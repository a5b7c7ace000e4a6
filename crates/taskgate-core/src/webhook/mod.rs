//! Webhook-to-Task trigger pipeline.
//!
//! Inbound webhooks are matched to a registered WebhookTrigger, authenticated,
//! filtered, checked against the trigger's concurrency policy and finally
//! turned into a Task via the trigger's template.

pub mod auth;
pub mod concurrency;
pub mod expression;
pub mod pipeline;
pub mod registry;
pub mod template;

use std::collections::BTreeMap;

pub use auth::{AuthError, WebhookAuthenticator};
pub use concurrency::{ActiveTaskQuery, ConcurrencyEnforcer, PolicyOutcome};
pub use expression::{CompiledFilter, FilterEngine, FilterError};
pub use pipeline::{WebhookError, WebhookOutcome, WebhookPipeline, WebhookRequest};
pub use registry::TriggerRegistry;
pub use template::{render, render_blueprint, RenderError};

/// Request headers keyed by lower-cased name, first value only.
pub type Headers = BTreeMap<String, String>;

/// URL path prefix under which triggers are served.
pub const WEBHOOK_PATH_PREFIX: &str = "/webhooks";
