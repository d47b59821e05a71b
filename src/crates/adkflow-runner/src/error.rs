//! Runner error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Compilation(#[from] adkflow_compiler::CompilationError),

    #[error(transparent)]
    Hook(#[from] adkflow_hooks::HookError),

    #[error(transparent)]
    Extension(#[from] adkflow_extensions::ExtensionError),

    #[error("Callback chain aborted: {0}")]
    CallbackAborted(String),

    #[error("Node '{node}' execution failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Cycle detected in execution graph. Remaining nodes: {0:?}")]
    CycleDetected(Vec<String>),

    #[error(
        "Agent execution through the graph executor is not supported. \
         Agent '{0}' is driven by the workflow runner"
    )]
    AgentInGraph(String),

    #[error("User input '{node}' timed out after {timeout_seconds}s")]
    UserInputTimeout { node: String, timeout_seconds: f64 },

    #[error("Shell command blocked: {0}")]
    ShellBlocked(String),

    #[error("Shell command failed: {0}")]
    ShellFailed(String),

    #[error("SDK error: {0}")]
    Sdk(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run timed out after {0}s")]
    RunTimeout(f64),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    pub fn node_execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            message: message.into(),
        }
    }
}
