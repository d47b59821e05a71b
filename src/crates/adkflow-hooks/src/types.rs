//! Core types for the hook plane.
//!
//! A hook is a handler registered against one of the well-known lifecycle
//! points in [`HookName`]. Handlers influence execution through the
//! [`HookAction`] vocabulary: CONTINUE runs the next handler, SKIP stops the
//! chain, REPLACE substitutes the payload for the remainder of the chain,
//! ABORT fails the operation, and RETRY asks the caller to re-run it.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object map used for hook payloads and metadata.
pub type JsonMap = Map<String, Value>;

/// Shared mutable run state, passed by reference to handlers that ask for it.
///
/// Writers inside one execution layer should treat this as single-writer;
/// concurrent writes within a layer are undefined.
pub type SharedState = Arc<parking_lot::Mutex<JsonMap>>;

/// Event emission callback handed to hook contexts.
pub type HookEmitFn = Arc<dyn Fn(Value) + Send + Sync>;

/// The closed set of lifecycle points hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    BeforeRun,
    AfterRun,
    OnRunError,
    OnRunCancel,
    BeforeNodeExecute,
    AfterNodeExecute,
    OnNodeError,
    BeforeAgentRun,
    AfterAgentRun,
    OnAgentError,
    BeforeToolCall,
    AfterToolResult,
    OnToolError,
    BeforeLlmRequest,
    AfterLlmResponse,
    BeforeUserInput,
    AfterUserInput,
    OnExecutionPlan,
    BeforeLayerExecute,
    AfterLayerExecute,
    OnHookError,
}

impl HookName {
    /// All hook names, in lifecycle order.
    pub const ALL: &'static [HookName] = &[
        HookName::BeforeRun,
        HookName::AfterRun,
        HookName::OnRunError,
        HookName::OnRunCancel,
        HookName::BeforeNodeExecute,
        HookName::AfterNodeExecute,
        HookName::OnNodeError,
        HookName::BeforeAgentRun,
        HookName::AfterAgentRun,
        HookName::OnAgentError,
        HookName::BeforeToolCall,
        HookName::AfterToolResult,
        HookName::OnToolError,
        HookName::BeforeLlmRequest,
        HookName::AfterLlmResponse,
        HookName::BeforeUserInput,
        HookName::AfterUserInput,
        HookName::OnExecutionPlan,
        HookName::BeforeLayerExecute,
        HookName::AfterLayerExecute,
        HookName::OnHookError,
    ];

    /// Snake-case name used in manifests and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookName::BeforeRun => "before_run",
            HookName::AfterRun => "after_run",
            HookName::OnRunError => "on_run_error",
            HookName::OnRunCancel => "on_run_cancel",
            HookName::BeforeNodeExecute => "before_node_execute",
            HookName::AfterNodeExecute => "after_node_execute",
            HookName::OnNodeError => "on_node_error",
            HookName::BeforeAgentRun => "before_agent_run",
            HookName::AfterAgentRun => "after_agent_run",
            HookName::OnAgentError => "on_agent_error",
            HookName::BeforeToolCall => "before_tool_call",
            HookName::AfterToolResult => "after_tool_result",
            HookName::OnToolError => "on_tool_error",
            HookName::BeforeLlmRequest => "before_llm_request",
            HookName::AfterLlmResponse => "after_llm_response",
            HookName::BeforeUserInput => "before_user_input",
            HookName::AfterUserInput => "after_user_input",
            HookName::OnExecutionPlan => "on_execution_plan",
            HookName::BeforeLayerExecute => "before_layer_execute",
            HookName::AfterLayerExecute => "after_layer_execute",
            HookName::OnHookError => "on_hook_error",
        }
    }

    /// Parse a snake-case hook name.
    pub fn parse(name: &str) -> Option<HookName> {
        HookName::ALL.iter().copied().find(|h| h.as_str() == name)
    }

    /// Coarse lifecycle phase the hook belongs to.
    pub fn phase(&self) -> &'static str {
        match self {
            HookName::BeforeRun
            | HookName::AfterRun
            | HookName::OnRunError
            | HookName::OnRunCancel => "run",
            HookName::BeforeNodeExecute
            | HookName::AfterNodeExecute
            | HookName::OnNodeError => "node",
            HookName::BeforeAgentRun | HookName::AfterAgentRun | HookName::OnAgentError => {
                "agent"
            }
            HookName::BeforeToolCall | HookName::AfterToolResult | HookName::OnToolError => {
                "tool"
            }
            HookName::BeforeLlmRequest | HookName::AfterLlmResponse => "llm",
            HookName::BeforeUserInput | HookName::AfterUserInput => "user_input",
            HookName::OnExecutionPlan
            | HookName::BeforeLayerExecute
            | HookName::AfterLayerExecute => "graph",
            HookName::OnHookError => "meta",
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow-control action returned by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HookAction {
    Continue,
    Skip,
    Retry,
    Abort,
    Replace,
}

/// Retry policy carried by a RETRY result and honored by
/// [`HookExecutor::execute_with_retry`](crate::executor::HookExecutor::execute_with_retry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Initial delay between attempts, in seconds.
    pub initial_interval: f64,
    pub backoff_factor: f64,
    /// Ceiling for the computed delay, in seconds.
    pub max_interval: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }
}

/// Result of a hook chain (or a single handler).
#[derive(Debug, Clone)]
pub struct HookResult {
    pub action: HookAction,
    pub modified_data: Option<Value>,
    pub retry_config: Option<RetryConfig>,
    pub error: Option<String>,
    pub metadata: JsonMap,
}

impl HookResult {
    pub fn continue_() -> Self {
        Self {
            action: HookAction::Continue,
            modified_data: None,
            retry_config: None,
            error: None,
            metadata: JsonMap::new(),
        }
    }

    pub fn skip() -> Self {
        Self {
            action: HookAction::Skip,
            ..Self::continue_()
        }
    }

    pub fn replace(data: Value) -> Self {
        Self {
            action: HookAction::Replace,
            modified_data: Some(data),
            ..Self::continue_()
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self {
            action: HookAction::Abort,
            error: Some(message.into()),
            ..Self::continue_()
        }
    }

    pub fn retry(config: Option<RetryConfig>) -> Self {
        Self {
            action: HookAction::Retry,
            retry_config: config,
            ..Self::continue_()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What a handler hands back to the executor.
///
/// `Pass` maps to CONTINUE, `Result` is used directly, and `Value` is treated
/// as an implicit REPLACE of the chain payload.
#[derive(Debug, Clone)]
pub enum HookReturn {
    Pass,
    Result(HookResult),
    Value(Value),
}

/// Context handed to every handler invocation.
#[derive(Clone)]
pub struct HookContext {
    pub hook_name: HookName,
    pub run_id: String,
    pub session_id: String,
    pub project_path: PathBuf,
    pub phase: String,
    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub agent_name: Option<String>,
    pub data: Value,
    pub metadata: JsonMap,
    pub state: Option<SharedState>,
    pub emit: Option<HookEmitFn>,
}

impl HookContext {
    /// Emit an event through the run's event sink, if one was attached.
    pub fn emit(&self, event: Value) {
        if let Some(emit) = &self.emit {
            emit(event);
        }
    }
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("hook_name", &self.hook_name)
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("agent_name", &self.agent_name)
            .finish_non_exhaustive()
    }
}

/// Boxed future returned by async handlers.
pub type BoxHookFuture = Pin<Box<dyn Future<Output = Result<HookReturn, String>> + Send>>;

/// A registered handler, either synchronous (dispatched to the blocking
/// thread pool under its registered timeout) or asynchronous (awaited
/// directly).
#[derive(Clone)]
pub enum HookHandler {
    Sync(Arc<dyn Fn(HookContext, Value) -> Result<HookReturn, String> + Send + Sync>),
    Async(Arc<dyn Fn(HookContext, Value) -> BoxHookFuture + Send + Sync>),
}

impl HookHandler {
    /// Wrap a plain synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(HookContext, Value) -> Result<HookReturn, String> + Send + Sync + 'static,
    {
        HookHandler::Sync(Arc::new(f))
    }

    /// Wrap an async function returning a handler future.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(HookContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookReturn, String>> + Send + 'static,
    {
        HookHandler::Async(Arc::new(move |ctx, data| Box::pin(f(ctx, data))))
    }
}

impl fmt::Debug for HookHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookHandler::Sync(_) => f.write_str("HookHandler::Sync"),
            HookHandler::Async(_) => f.write_str("HookHandler::Async"),
        }
    }
}

/// A handler registration: the handler plus its ordering and limits.
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub hook_name: HookName,
    pub handler: HookHandler,
    pub priority: i32,
    pub timeout_seconds: f64,
    pub extension_id: String,
    pub method_name: String,
}

impl HookSpec {
    pub fn new(hook_name: HookName, extension_id: impl Into<String>, handler: HookHandler) -> Self {
        let extension_id = extension_id.into();
        Self {
            hook_name,
            handler,
            priority: 0,
            timeout_seconds: 30.0,
            method_name: format!("{}::{}", extension_id, hook_name.as_str()),
            extension_id,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}
