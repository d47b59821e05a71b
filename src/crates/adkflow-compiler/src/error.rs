//! Compilation error types.
//!
//! Every stage of the pipeline reports through [`CompilationError`]; errors
//! carry an [`ErrorLocation`] where a specific node or file can be named.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompilationError>;

/// Where in the project an error originated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorLocation {
    pub node_id: Option<String>,
    pub tab_id: Option<String>,
    pub file_path: Option<String>,
}

impl ErrorLocation {
    pub fn node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(node_id) = &self.node_id {
            parts.push(format!("node '{node_id}'"));
        }
        if let Some(tab_id) = &self.tab_id {
            parts.push(format!("tab '{tab_id}'"));
        }
        if let Some(file_path) = &self.file_path {
            parts.push(format!("file '{file_path}'"));
        }
        f.write_str(&parts.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("Project path does not exist: {0}")]
    ProjectNotFound(PathBuf),

    #[error("Project path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid manifest at {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Project has no tabs")]
    NoTabs,

    #[error("Prompt load failed at {location}: {message}")]
    PromptLoad {
        message: String,
        location: ErrorLocation,
    },

    #[error("Tool load failed at {location}: {message}")]
    ToolLoad {
        message: String,
        location: ErrorLocation,
    },

    #[error("Graph build failed: {0}")]
    GraphBuild(String),

    #[error("IR transform failed: {message}")]
    Transform {
        message: String,
        location: Option<ErrorLocation>,
    },

    #[error("Workflow validation failed: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompilationError {
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
            location: None,
        }
    }

    pub fn transform_at(message: impl Into<String>, location: ErrorLocation) -> Self {
        Self::Transform {
            message: message.into(),
            location: Some(location),
        }
    }
}
