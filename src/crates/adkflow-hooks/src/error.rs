//! Error types for hook registration and execution.

use thiserror::Error;

use crate::types::HookName;

pub type Result<T> = std::result::Result<T, HookError>;

#[derive(Error, Debug)]
pub enum HookError {
    /// A handler returned ABORT; carries the handler identity for diagnosis.
    #[error("Hook '{hook_name}' aborted by extension '{extension_id}': {message}")]
    Abort {
        message: String,
        hook_name: HookName,
        extension_id: String,
    },

    /// A handler exceeded its configured timeout.
    #[error(
        "Hook '{hook_name}' handler from '{extension_id}' timed out after {timeout_seconds}s"
    )]
    Timeout {
        hook_name: HookName,
        extension_id: String,
        timeout_seconds: f64,
    },

    /// A handler failed and no `on_hook_error` chain suppressed it.
    #[error("Hook '{hook_name}' handler from '{extension_id}' failed: {message}")]
    Handler {
        hook_name: HookName,
        extension_id: String,
        message: String,
    },

    /// The same extension registered twice for one hook.
    #[error("Extension '{extension_id}' already registered for hook '{hook_name}'")]
    DuplicateRegistration {
        hook_name: HookName,
        extension_id: String,
    },

    #[error("Unknown hook name: {0}")]
    UnknownHook(String),
}
