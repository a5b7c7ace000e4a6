//! Task lifecycle: admission, retries and failure classification.

pub mod reconciler;
pub mod retry;
pub mod stop;
pub mod terminal;

pub use reconciler::{ReconcileAction, ReconcileError, ReconcileTiming, TaskReconciler};
pub use retry::{RetryDecision, RetryHandler};
pub use terminal::classify_termination;
