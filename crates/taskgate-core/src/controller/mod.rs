//! Watch-driven control loops.
//!
//! `TaskController` feeds Task keys to `TaskReconciler` workers through a
//! deduplicating `WorkQueue`; `TriggerController` keeps the in-process
//! webhook registry and trigger status current.

pub mod queue;
pub mod task;
pub mod trigger;

pub use queue::WorkQueue;
pub use task::TaskController;
pub use trigger::TriggerController;
