//! Lifecycle hook plane for the workflow runtime.
//!
//! Hooks are ordered handler chains attached to well-known lifecycle points
//! (run, node, agent, tool, LLM, user-input, graph, meta-error). Each handler
//! runs under a timeout and steers the chain through CONTINUE / SKIP /
//! REPLACE / ABORT / RETRY.
//!
//! The three layers:
//! - [`registry`]: process-wide, thread-safe registration keyed by
//!   [`types::HookName`], priority-ordered.
//! - [`executor`]: chain execution with the sync-in-pool / async-awaited
//!   split, timeouts, `on_hook_error` dispatch, and retry backoff.
//! - [`integration`]: a run-scoped facade exposing one typed method per
//!   lifecycle point.

pub mod error;
pub mod executor;
pub mod integration;
pub mod registry;
pub mod types;

pub use error::{HookError, Result};
pub use executor::HookExecutor;
pub use integration::HooksIntegration;
pub use registry::{global_registry, reset_global_registry, HooksRegistry};
pub use types::{
    HookAction, HookContext, HookEmitFn, HookHandler, HookName, HookResult, HookReturn, HookSpec,
    JsonMap, RetryConfig, SharedState,
};
