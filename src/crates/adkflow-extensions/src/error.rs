//! Error types for extension discovery and execution.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExtensionError>;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid extension manifest at {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("Unknown behavior '{behavior}' referenced by unit '{unit_id}'")]
    UnknownBehavior { unit_id: String, behavior: String },

    #[error("FlowUnit not found: {0}")]
    UnitNotFound(String),

    #[error("Invalid unit config for '{unit_id}': {message}")]
    InvalidConfig { unit_id: String, message: String },

    #[error("Unit '{unit_id}' execution failed: {message}")]
    Execution { unit_id: String, message: String },

    #[error("Failed to generate schema for '{unit_id}': {message}")]
    Schema { unit_id: String, message: String },

    #[error("Hook registration failed: {0}")]
    Hook(#[from] adkflow_hooks::HookError),
}

impl ExtensionError {
    pub fn execution(unit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            unit_id: unit_id.into(),
            message: message.into(),
        }
    }
}
