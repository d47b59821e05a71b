//! Callback handler types.
//!
//! Callbacks are agent-local handler chains mapped 1:1 onto the SDK's hook
//! points. The sync/async boundary from the execution contract is encoded in
//! the trait itself: agent and model methods are synchronous (they run on
//! the SDK's calling path and must preserve turn ordering), tool methods are
//! async.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use adkflow_hooks::SharedState;

/// The model request/response payloads travel as JSON documents; a concrete
/// SDK maps them onto its own types.
pub type LlmRequest = Value;
pub type LlmResponse = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackMethod {
    BeforeAgent,
    AfterAgent,
    BeforeModel,
    AfterModel,
    BeforeTool,
    AfterTool,
}

/// What a handler tells the chain to do.
///
/// `Fail` reports a handler error; the executor applies the handler's
/// [`ErrorPolicy`] to it.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Continue,
    Skip { reason: Option<String> },
    Abort { error: String },
    Replace(Value),
    Fail(String),
}

#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Aborted by callback handler: {0}")]
    Aborted(String),

    #[error("Callback handler '{handler}' failed: {message}")]
    HandlerFailed { handler: String, message: String },

    #[error("Callback registry for '{0}' is frozen; handlers must be registered before the SDK callbacks are materialized")]
    Frozen(String),
}

/// Context handed to every handler invocation.
#[derive(Clone)]
pub struct CallbackContext {
    pub agent_name: String,
    pub run_id: String,
    pub state: SharedState,
}

impl CallbackContext {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            run_id: String::new(),
            state: Arc::new(parking_lot::Mutex::new(serde_json::Map::new())),
        }
    }
}

/// Which methods a handler implements; the registry filters chains by this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub before_agent: bool,
    pub after_agent: bool,
    pub before_model: bool,
    pub after_model: bool,
    pub before_tool: bool,
    pub after_tool: bool,
}

impl Capabilities {
    pub fn implements(&self, method: CallbackMethod) -> bool {
        match method {
            CallbackMethod::BeforeAgent => self.before_agent,
            CallbackMethod::AfterAgent => self.after_agent,
            CallbackMethod::BeforeModel => self.before_model,
            CallbackMethod::AfterModel => self.after_model,
            CallbackMethod::BeforeTool => self.before_tool,
            CallbackMethod::AfterTool => self.after_tool,
        }
    }
}

/// An agent-local callback handler.
///
/// Default method bodies are inert; `capabilities` must name the methods a
/// handler actually overrides so unimplemented ones are never dispatched.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    fn on_error(&self) -> ErrorPolicy {
        ErrorPolicy::Continue
    }

    fn capabilities(&self) -> Capabilities;

    fn before_agent(&self, _ctx: &CallbackContext) -> CallbackOutcome {
        CallbackOutcome::Continue
    }

    fn after_agent(&self, _ctx: &CallbackContext) -> CallbackOutcome {
        CallbackOutcome::Continue
    }

    fn before_model(&self, _ctx: &CallbackContext, _request: &LlmRequest) -> CallbackOutcome {
        CallbackOutcome::Continue
    }

    fn after_model(&self, _ctx: &CallbackContext, _response: &LlmResponse) -> CallbackOutcome {
        CallbackOutcome::Continue
    }

    async fn before_tool(
        &self,
        _ctx: &CallbackContext,
        _tool: &str,
        _args: &Value,
    ) -> CallbackOutcome {
        CallbackOutcome::Continue
    }

    async fn after_tool(
        &self,
        _ctx: &CallbackContext,
        _tool: &str,
        _args: &Value,
        _response: &Value,
    ) -> CallbackOutcome {
        CallbackOutcome::Continue
    }
}
