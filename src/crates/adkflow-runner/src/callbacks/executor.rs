//! SDK-facing callback executor.
//!
//! [`SdkCallbacks`] is the materialized form handed to the SDK: sync entry
//! points for agent and model hooks, async entry points for tool hooks.
//! Materializing freezes the underlying registry.

use std::sync::Arc;

use serde_json::{json, Value};

use super::registry::CallbackRegistry;
use super::types::{
    CallbackContext, CallbackError, CallbackMethod, CallbackOutcome, ErrorPolicy, LlmRequest,
    LlmResponse,
};

pub struct SdkCallbacks {
    registry: Arc<CallbackRegistry>,
    ctx: CallbackContext,
}

impl SdkCallbacks {
    /// Materialize SDK callbacks over a registry. The registry is frozen
    /// here; no further handlers can attach.
    pub fn new(registry: CallbackRegistry) -> Self {
        let ctx = CallbackContext::new(registry.agent_name());
        Self::with_context(registry, ctx)
    }

    pub fn with_context(registry: CallbackRegistry, ctx: CallbackContext) -> Self {
        registry.freeze();
        Self {
            registry: Arc::new(registry),
            ctx,
        }
    }

    pub fn agent_name(&self) -> &str {
        self.registry.agent_name()
    }

    /// `before_agent` chain. Synchronous: agent ordering must be preserved.
    pub fn before_agent(&self) -> Result<(), CallbackError> {
        self.run_agent_chain(CallbackMethod::BeforeAgent)
    }

    /// `after_agent` chain. Synchronous.
    pub fn after_agent(&self) -> Result<(), CallbackError> {
        self.run_agent_chain(CallbackMethod::AfterAgent)
    }

    /// `before_model` chain. Synchronous only; REPLACE rewrites the request
    /// for the remaining handlers and the SDK.
    pub fn before_model(&self, request: &mut LlmRequest) -> Result<(), CallbackError> {
        self.run_model_chain(CallbackMethod::BeforeModel, request)
    }

    /// `after_model` chain. Synchronous only.
    pub fn after_model(&self, response: &mut LlmResponse) -> Result<(), CallbackError> {
        self.run_model_chain(CallbackMethod::AfterModel, response)
    }

    /// `before_tool` chain (async allowed).
    ///
    /// Returns `Some(payload)` when a SKIP suppressed the tool call: the SDK
    /// must hand that payload to the model instead of executing the tool.
    /// REPLACE rewrites the arguments in place.
    pub async fn before_tool(
        &self,
        tool: &str,
        args: &mut Value,
    ) -> Result<Option<Value>, CallbackError> {
        for handler in self.registry.get_handlers_for(CallbackMethod::BeforeTool) {
            let outcome = handler.before_tool(&self.ctx, tool, args).await;
            match outcome {
                CallbackOutcome::Continue => {}
                CallbackOutcome::Replace(new_args) => *args = new_args,
                CallbackOutcome::Skip { reason } => {
                    let reason = reason.unwrap_or_else(|| "Skipped by handler".to_string());
                    tracing::debug!(
                        agent = %self.agent_name(),
                        tool,
                        handler = handler.name(),
                        "Tool call skipped by handler"
                    );
                    return Ok(Some(json!({"skipped": true, "reason": reason})));
                }
                CallbackOutcome::Abort { error } => {
                    return Err(CallbackError::Aborted(error));
                }
                CallbackOutcome::Fail(message) => {
                    self.apply_error_policy(handler.as_ref(), message)?;
                }
            }
        }
        Ok(None)
    }

    /// `after_tool` chain (async allowed). REPLACE rewrites the tool output.
    pub async fn after_tool(
        &self,
        tool: &str,
        args: &Value,
        response: &mut Value,
    ) -> Result<(), CallbackError> {
        for handler in self.registry.get_handlers_for(CallbackMethod::AfterTool) {
            let outcome = handler.after_tool(&self.ctx, tool, args, response).await;
            match outcome {
                CallbackOutcome::Continue => {}
                CallbackOutcome::Replace(new_response) => *response = new_response,
                CallbackOutcome::Skip { .. } => return Ok(()),
                CallbackOutcome::Abort { error } => {
                    return Err(CallbackError::Aborted(error));
                }
                CallbackOutcome::Fail(message) => {
                    self.apply_error_policy(handler.as_ref(), message)?;
                }
            }
        }
        Ok(())
    }

    fn run_agent_chain(&self, method: CallbackMethod) -> Result<(), CallbackError> {
        for handler in self.registry.get_handlers_for(method) {
            let outcome = match method {
                CallbackMethod::BeforeAgent => handler.before_agent(&self.ctx),
                CallbackMethod::AfterAgent => handler.after_agent(&self.ctx),
                _ => unreachable!("run_agent_chain only handles agent methods"),
            };
            match outcome {
                CallbackOutcome::Continue => {}
                CallbackOutcome::Replace(_) => {
                    // Agent callbacks have nothing to replace; keep ordering.
                    tracing::warn!(
                        agent = %self.agent_name(),
                        handler = handler.name(),
                        "Agent callback returned REPLACE, ignored"
                    );
                }
                CallbackOutcome::Skip { .. } => return Ok(()),
                CallbackOutcome::Abort { error } => {
                    return Err(CallbackError::Aborted(error));
                }
                CallbackOutcome::Fail(message) => {
                    self.apply_error_policy(handler.as_ref(), message)?;
                }
            }
        }
        Ok(())
    }

    fn run_model_chain(
        &self,
        method: CallbackMethod,
        data: &mut Value,
    ) -> Result<(), CallbackError> {
        for handler in self.registry.get_handlers_for(method) {
            let outcome = match method {
                CallbackMethod::BeforeModel => handler.before_model(&self.ctx, data),
                CallbackMethod::AfterModel => handler.after_model(&self.ctx, data),
                _ => unreachable!("run_model_chain only handles model methods"),
            };
            match outcome {
                CallbackOutcome::Continue => {}
                CallbackOutcome::Replace(new_data) => *data = new_data,
                CallbackOutcome::Skip { .. } => return Ok(()),
                CallbackOutcome::Abort { error } => {
                    return Err(CallbackError::Aborted(error));
                }
                CallbackOutcome::Fail(message) => {
                    self.apply_error_policy(handler.as_ref(), message)?;
                }
            }
        }
        Ok(())
    }

    fn apply_error_policy(
        &self,
        handler: &dyn super::types::CallbackHandler,
        message: String,
    ) -> Result<(), CallbackError> {
        match handler.on_error() {
            ErrorPolicy::Abort => {
                tracing::error!(
                    agent = %self.agent_name(),
                    handler = handler.name(),
                    %message,
                    "Handler error, abort policy"
                );
                Err(CallbackError::HandlerFailed {
                    handler: handler.name().to_string(),
                    message,
                })
            }
            ErrorPolicy::Continue => {
                tracing::warn!(
                    agent = %self.agent_name(),
                    handler = handler.name(),
                    %message,
                    "Handler error, continue policy"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::types::{CallbackHandler, Capabilities};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        priority: i32,
        caps: Capabilities,
        outcome: CallbackOutcome,
        calls: Arc<Mutex<Vec<String>>>,
        policy: ErrorPolicy,
    }

    impl Recorder {
        fn new(name: &str, priority: i32, caps: Capabilities, outcome: CallbackOutcome) -> Self {
            Self {
                name: name.into(),
                priority,
                caps,
                outcome,
                calls: Arc::new(Mutex::new(Vec::new())),
                policy: ErrorPolicy::Continue,
            }
        }

        fn record(&self) -> CallbackOutcome {
            self.calls.lock().push(self.name.clone());
            self.outcome.clone()
        }
    }

    #[async_trait]
    impl CallbackHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn on_error(&self) -> ErrorPolicy {
            self.policy
        }
        fn capabilities(&self) -> Capabilities {
            self.caps
        }
        fn before_model(&self, _ctx: &CallbackContext, _request: &LlmRequest) -> CallbackOutcome {
            self.record()
        }
        async fn before_tool(
            &self,
            _ctx: &CallbackContext,
            _tool: &str,
            _args: &Value,
        ) -> CallbackOutcome {
            self.record()
        }
        async fn after_tool(
            &self,
            _ctx: &CallbackContext,
            _tool: &str,
            _args: &Value,
            _response: &Value,
        ) -> CallbackOutcome {
            self.record()
        }
    }

    fn model_caps() -> Capabilities {
        Capabilities {
            before_model: true,
            ..Default::default()
        }
    }

    fn tool_caps() -> Capabilities {
        Capabilities {
            before_tool: true,
            after_tool: true,
            ..Default::default()
        }
    }

    #[test]
    fn model_chain_runs_in_priority_order() {
        let registry = CallbackRegistry::new("agent");
        let shared = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("second", 5), ("first", 10)] {
            let mut handler =
                Recorder::new(name, priority, model_caps(), CallbackOutcome::Continue);
            handler.calls = shared.clone();
            registry.register(Arc::new(handler)).unwrap();
        }

        let callbacks = SdkCallbacks::new(registry);
        let mut request = json!({"messages": []});
        callbacks.before_model(&mut request).unwrap();
        assert_eq!(shared.lock().as_slice(), &["first", "second"]);
    }

    #[test]
    fn model_replace_rewrites_request() {
        let registry = CallbackRegistry::new("agent");
        registry
            .register(Arc::new(Recorder::new(
                "rewriter",
                0,
                model_caps(),
                CallbackOutcome::Replace(json!({"patched": true})),
            )))
            .unwrap();
        let callbacks = SdkCallbacks::new(registry);
        let mut request = json!({"original": true});
        callbacks.before_model(&mut request).unwrap();
        assert_eq!(request, json!({"patched": true}));
    }

    #[tokio::test]
    async fn before_tool_skip_returns_payload_and_stops_chain() {
        let registry = CallbackRegistry::new("agent");
        let shared = Arc::new(Mutex::new(Vec::new()));
        let mut skipper = Recorder::new(
            "skipper",
            10,
            tool_caps(),
            CallbackOutcome::Skip {
                reason: Some("policy".into()),
            },
        );
        skipper.calls = shared.clone();
        let mut never = Recorder::new("never", 1, tool_caps(), CallbackOutcome::Continue);
        never.calls = shared.clone();
        registry.register(Arc::new(skipper)).unwrap();
        registry.register(Arc::new(never)).unwrap();

        let callbacks = SdkCallbacks::new(registry);
        let mut args = json!({"q": 1});
        let payload = callbacks.before_tool("search", &mut args).await.unwrap();
        assert_eq!(payload, Some(json!({"skipped": true, "reason": "policy"})));
        assert_eq!(shared.lock().as_slice(), &["skipper"]);
    }

    #[tokio::test]
    async fn before_tool_replace_modifies_arguments() {
        let registry = CallbackRegistry::new("agent");
        registry
            .register(Arc::new(Recorder::new(
                "rewriter",
                0,
                tool_caps(),
                CallbackOutcome::Replace(json!({"q": "rewritten"})),
            )))
            .unwrap();
        let callbacks = SdkCallbacks::new(registry);
        let mut args = json!({"q": "original"});
        let payload = callbacks.before_tool("search", &mut args).await.unwrap();
        assert!(payload.is_none());
        assert_eq!(args, json!({"q": "rewritten"}));
    }

    #[tokio::test]
    async fn after_tool_replace_modifies_response() {
        let registry = CallbackRegistry::new("agent");
        registry
            .register(Arc::new(Recorder::new(
                "rewriter",
                0,
                tool_caps(),
                CallbackOutcome::Replace(json!({"sanitized": true})),
            )))
            .unwrap();
        let callbacks = SdkCallbacks::new(registry);
        let mut response = json!({"raw": "secret"});
        callbacks
            .after_tool("search", &json!({}), &mut response)
            .await
            .unwrap();
        assert_eq!(response, json!({"sanitized": true}));
    }

    #[tokio::test]
    async fn abort_surfaces_typed_error() {
        let registry = CallbackRegistry::new("agent");
        registry
            .register(Arc::new(Recorder::new(
                "guard",
                0,
                tool_caps(),
                CallbackOutcome::Abort {
                    error: "forbidden".into(),
                },
            )))
            .unwrap();
        let callbacks = SdkCallbacks::new(registry);
        let err = callbacks
            .before_tool("rm", &mut json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackError::Aborted(_)));
    }

    #[test]
    fn handler_failure_respects_error_policy() {
        let registry = CallbackRegistry::new("agent");
        let mut failing = Recorder::new(
            "fragile",
            10,
            model_caps(),
            CallbackOutcome::Fail("boom".into()),
        );
        failing.policy = ErrorPolicy::Continue;
        let shared = Arc::new(Mutex::new(Vec::new()));
        let mut after = Recorder::new("after", 1, model_caps(), CallbackOutcome::Continue);
        after.calls = shared.clone();
        registry.register(Arc::new(failing)).unwrap();
        registry.register(Arc::new(after)).unwrap();

        let callbacks = SdkCallbacks::new(registry);
        // Continue policy: chain proceeds past the failure.
        callbacks.before_model(&mut json!({})).unwrap();
        assert_eq!(shared.lock().len(), 1);

        let registry = CallbackRegistry::new("agent");
        let mut strict = Recorder::new(
            "strict",
            0,
            model_caps(),
            CallbackOutcome::Fail("boom".into()),
        );
        strict.policy = ErrorPolicy::Abort;
        registry.register(Arc::new(strict)).unwrap();
        let callbacks = SdkCallbacks::new(registry);
        let err = callbacks.before_model(&mut json!({})).unwrap_err();
        assert!(matches!(err, CallbackError::HandlerFailed { .. }));
    }
}
