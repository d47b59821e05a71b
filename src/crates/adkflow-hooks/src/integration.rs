//! Run-scoped hook integration layer.
//!
//! [`HooksIntegration`] is the facade the runner and graph executor talk to:
//! one typed method per lifecycle point. Each method fast-paths when the
//! chain is empty, builds the [`HookContext`], executes the chain, and
//! unpacks REPLACE payloads back into the caller's shapes.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Result;
use crate::executor::HookExecutor;
use crate::registry::{global_registry, HooksRegistry};
use crate::types::{
    HookAction, HookContext, HookEmitFn, HookName, HookResult, JsonMap, SharedState,
};

pub struct HooksIntegration {
    pub run_id: String,
    pub session_id: String,
    pub project_path: PathBuf,
    pub state: Option<SharedState>,
    pub emit: Option<HookEmitFn>,
    executor: HookExecutor,
}

impl HooksIntegration {
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        state: Option<SharedState>,
        emit: Option<HookEmitFn>,
    ) -> Self {
        Self::with_registry(run_id, session_id, project_path, state, emit, global_registry())
    }

    pub fn with_registry(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        state: Option<SharedState>,
        emit: Option<HookEmitFn>,
        registry: Arc<HooksRegistry>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            project_path: project_path.into(),
            state,
            emit,
            executor: HookExecutor::new(registry),
        }
    }

    pub fn executor(&self) -> &HookExecutor {
        &self.executor
    }

    pub fn has_hooks(&self, hook: HookName) -> bool {
        self.executor.has_hooks(hook)
    }

    fn context(
        &self,
        hook_name: HookName,
        data: Value,
        node_id: Option<&str>,
        node_name: Option<&str>,
        agent_name: Option<&str>,
    ) -> HookContext {
        HookContext {
            hook_name,
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            project_path: self.project_path.clone(),
            phase: hook_name.phase().to_string(),
            node_id: node_id.map(str::to_string),
            node_name: node_name.map(str::to_string),
            agent_name: agent_name.map(str::to_string),
            data,
            metadata: JsonMap::new(),
            state: self.state.clone(),
            emit: self.emit.clone(),
        }
    }

    // -------------------------------------------------------------------
    // Run lifecycle
    // -------------------------------------------------------------------

    pub async fn before_run(
        &self,
        inputs: JsonMap,
        config: JsonMap,
    ) -> Result<(HookResult, JsonMap, JsonMap)> {
        if !self.has_hooks(HookName::BeforeRun) {
            return Ok((HookResult::continue_(), inputs, config));
        }
        let payload = json!({"inputs": inputs, "config": config});
        let ctx = self.context(HookName::BeforeRun, payload.clone(), None, None, None);
        let (result, data) = self.executor.execute(HookName::BeforeRun, &ctx, payload).await?;
        let (inputs, config) = unpack_two_maps(data, "inputs", "config");
        Ok((result, inputs, config))
    }

    pub async fn after_run(&self, output: String, status: &str) -> Result<(HookResult, String)> {
        if !self.has_hooks(HookName::AfterRun) {
            return Ok((HookResult::continue_(), output));
        }
        let ctx = self.context(
            HookName::AfterRun,
            json!({"output": output, "status": status}),
            None,
            None,
            None,
        );
        let (result, data) = self
            .executor
            .execute(HookName::AfterRun, &ctx, Value::String(output.clone()))
            .await?;
        let output = value_to_string(data, output);
        Ok((result, output))
    }

    /// Returns `(result, None)` when a SKIP hook suppressed the error,
    /// otherwise the (possibly REPLACE-rewritten) error message.
    pub async fn on_run_error(
        &self,
        error: &str,
        partial_output: Option<&str>,
    ) -> Result<(HookResult, Option<String>)> {
        if !self.has_hooks(HookName::OnRunError) {
            return Ok((HookResult::continue_(), Some(error.to_string())));
        }
        let ctx = self.context(
            HookName::OnRunError,
            json!({"error": error, "partial_output": partial_output}),
            None,
            None,
            None,
        );
        let (result, data) = self
            .executor
            .execute(HookName::OnRunError, &ctx, Value::String(error.to_string()))
            .await?;
        if result.action == HookAction::Skip {
            return Ok((result, None));
        }
        let message = match data {
            Value::Object(map) => map
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(error)
                .to_string(),
            Value::String(s) => s,
            _ => error.to_string(),
        };
        Ok((result, Some(message)))
    }

    pub async fn on_run_cancel(&self) -> Result<HookResult> {
        if !self.has_hooks(HookName::OnRunCancel) {
            return Ok(HookResult::continue_());
        }
        let ctx = self.context(HookName::OnRunCancel, Value::Null, None, None, None);
        let (result, _) = self
            .executor
            .execute(HookName::OnRunCancel, &ctx, Value::Null)
            .await?;
        Ok(result)
    }

    // -------------------------------------------------------------------
    // Custom node lifecycle
    // -------------------------------------------------------------------

    pub async fn before_node_execute(
        &self,
        node_id: &str,
        node_name: &str,
        unit_id: &str,
        inputs: JsonMap,
        config: JsonMap,
    ) -> Result<(HookResult, JsonMap, JsonMap)> {
        if !self.has_hooks(HookName::BeforeNodeExecute) {
            return Ok((HookResult::continue_(), inputs, config));
        }
        let payload = json!({"unit_id": unit_id, "inputs": inputs, "config": config});
        let ctx = self.context(
            HookName::BeforeNodeExecute,
            payload.clone(),
            Some(node_id),
            Some(node_name),
            None,
        );
        let (mut result, data) = self
            .executor
            .execute(HookName::BeforeNodeExecute, &ctx, payload)
            .await?;
        // A REPLACE payload may carry direct outputs; surface them so the
        // graph executor can bypass the unit entirely.
        if let Value::Object(map) = &data {
            if let Some(outputs @ Value::Object(_)) = map.get("outputs") {
                result.modified_data = Some(outputs.clone());
            }
        }
        let (inputs, config) = unpack_two_maps(data, "inputs", "config");
        Ok((result, inputs, config))
    }

    pub async fn after_node_execute(
        &self,
        node_id: &str,
        node_name: &str,
        unit_id: &str,
        outputs: JsonMap,
    ) -> Result<(HookResult, JsonMap)> {
        if !self.has_hooks(HookName::AfterNodeExecute) {
            return Ok((HookResult::continue_(), outputs));
        }
        let ctx = self.context(
            HookName::AfterNodeExecute,
            json!({"unit_id": unit_id, "outputs": outputs}),
            Some(node_id),
            Some(node_name),
            None,
        );
        let (result, data) = self
            .executor
            .execute(HookName::AfterNodeExecute, &ctx, Value::Object(outputs.clone()))
            .await?;
        let outputs = match data {
            Value::Object(map) => map,
            _ => outputs,
        };
        Ok((result, outputs))
    }

    /// Returns `(result, fallback)`; a REPLACE hook supplies fallback outputs.
    pub async fn on_node_error(
        &self,
        node_id: &str,
        node_name: &str,
        unit_id: &str,
        error: &str,
    ) -> Result<(HookResult, Option<Value>)> {
        if !self.has_hooks(HookName::OnNodeError) {
            return Ok((HookResult::continue_(), None));
        }
        let ctx = self.context(
            HookName::OnNodeError,
            json!({"unit_id": unit_id, "error": error}),
            Some(node_id),
            Some(node_name),
            None,
        );
        let (result, data) = self
            .executor
            .execute(HookName::OnNodeError, &ctx, Value::String(error.to_string()))
            .await?;
        let fallback = match &data {
            Value::String(s) if s == error => None,
            Value::Null => None,
            other => Some(other.clone()),
        };
        Ok((result, fallback))
    }

    // -------------------------------------------------------------------
    // Agent lifecycle
    // -------------------------------------------------------------------

    pub async fn before_agent_run(&self, agent_name: &str) -> Result<HookResult> {
        if !self.has_hooks(HookName::BeforeAgentRun) {
            return Ok(HookResult::continue_());
        }
        let ctx = self.context(
            HookName::BeforeAgentRun,
            json!({"agent_name": agent_name}),
            None,
            None,
            Some(agent_name),
        );
        let (result, _) = self
            .executor
            .execute(HookName::BeforeAgentRun, &ctx, Value::Null)
            .await?;
        Ok(result)
    }

    pub async fn after_agent_run(
        &self,
        agent_name: &str,
        output: String,
    ) -> Result<(HookResult, String)> {
        if !self.has_hooks(HookName::AfterAgentRun) {
            return Ok((HookResult::continue_(), output));
        }
        let ctx = self.context(
            HookName::AfterAgentRun,
            json!({"agent_name": agent_name, "output": output}),
            None,
            None,
            Some(agent_name),
        );
        let (result, data) = self
            .executor
            .execute(HookName::AfterAgentRun, &ctx, Value::String(output.clone()))
            .await?;
        Ok((result, value_to_string(data, output)))
    }

    pub async fn on_agent_error(
        &self,
        agent_name: &str,
        error: &str,
    ) -> Result<(HookResult, Option<String>)> {
        if !self.has_hooks(HookName::OnAgentError) {
            return Ok((HookResult::continue_(), Some(error.to_string())));
        }
        let ctx = self.context(
            HookName::OnAgentError,
            json!({"agent_name": agent_name, "error": error}),
            None,
            None,
            Some(agent_name),
        );
        let (result, data) = self
            .executor
            .execute(HookName::OnAgentError, &ctx, Value::String(error.to_string()))
            .await?;
        if result.action == HookAction::Skip {
            return Ok((result, None));
        }
        Ok((result, Some(value_to_string(data, error.to_string()))))
    }

    // -------------------------------------------------------------------
    // Tool lifecycle
    // -------------------------------------------------------------------

    pub async fn before_tool_call(
        &self,
        tool_name: &str,
        arguments: Value,
        agent_name: Option<&str>,
    ) -> Result<(HookResult, Value)> {
        if !self.has_hooks(HookName::BeforeToolCall) {
            return Ok((HookResult::continue_(), arguments));
        }
        let ctx = self.context(
            HookName::BeforeToolCall,
            json!({"tool_name": tool_name, "arguments": arguments}),
            None,
            None,
            agent_name,
        );
        let (result, data) = self
            .executor
            .execute(HookName::BeforeToolCall, &ctx, arguments)
            .await?;
        Ok((result, data))
    }

    pub async fn after_tool_result(
        &self,
        tool_name: &str,
        arguments: &Value,
        result_data: Value,
        agent_name: Option<&str>,
    ) -> Result<(HookResult, Value)> {
        if !self.has_hooks(HookName::AfterToolResult) {
            return Ok((HookResult::continue_(), result_data));
        }
        let ctx = self.context(
            HookName::AfterToolResult,
            json!({"tool_name": tool_name, "arguments": arguments, "result": result_data}),
            None,
            None,
            agent_name,
        );
        let (result, data) = self
            .executor
            .execute(HookName::AfterToolResult, &ctx, result_data)
            .await?;
        Ok((result, data))
    }

    pub async fn on_tool_error(
        &self,
        tool_name: &str,
        arguments: &Value,
        error: &str,
        agent_name: Option<&str>,
    ) -> Result<(HookResult, Option<Value>)> {
        if !self.has_hooks(HookName::OnToolError) {
            return Ok((HookResult::continue_(), None));
        }
        let ctx = self.context(
            HookName::OnToolError,
            json!({"tool_name": tool_name, "arguments": arguments, "error": error}),
            None,
            None,
            agent_name,
        );
        let (result, data) = self
            .executor
            .execute(HookName::OnToolError, &ctx, Value::String(error.to_string()))
            .await?;
        let fallback = match &data {
            Value::String(s) if s == error => None,
            Value::Null => None,
            other => Some(other.clone()),
        };
        Ok((result, fallback))
    }

    // -------------------------------------------------------------------
    // LLM lifecycle
    // -------------------------------------------------------------------

    pub async fn before_llm_request(
        &self,
        messages: Value,
        config: Value,
        agent_name: Option<&str>,
    ) -> Result<(HookResult, Value, Value)> {
        if !self.has_hooks(HookName::BeforeLlmRequest) {
            return Ok((HookResult::continue_(), messages, config));
        }
        let payload = json!({"messages": messages, "config": config});
        let ctx = self.context(
            HookName::BeforeLlmRequest,
            payload.clone(),
            None,
            None,
            agent_name,
        );
        let (result, data) = self
            .executor
            .execute(HookName::BeforeLlmRequest, &ctx, payload)
            .await?;
        match data {
            Value::Object(mut map) => {
                let messages = map.remove("messages").unwrap_or(messages);
                let config = map.remove("config").unwrap_or(config);
                Ok((result, messages, config))
            }
            _ => Ok((result, messages, config)),
        }
    }

    pub async fn after_llm_response(
        &self,
        response: Value,
        agent_name: Option<&str>,
    ) -> Result<(HookResult, Value)> {
        if !self.has_hooks(HookName::AfterLlmResponse) {
            return Ok((HookResult::continue_(), response));
        }
        let ctx = self.context(
            HookName::AfterLlmResponse,
            json!({"response": response}),
            None,
            None,
            agent_name,
        );
        let (result, data) = self
            .executor
            .execute(HookName::AfterLlmResponse, &ctx, response)
            .await?;
        Ok((result, data))
    }

    // -------------------------------------------------------------------
    // User input lifecycle
    // -------------------------------------------------------------------

    pub async fn before_user_input(
        &self,
        prompt: String,
        variable_name: &str,
        node_id: &str,
        node_name: &str,
    ) -> Result<(HookResult, String)> {
        if !self.has_hooks(HookName::BeforeUserInput) {
            return Ok((HookResult::continue_(), prompt));
        }
        let ctx = self.context(
            HookName::BeforeUserInput,
            json!({"prompt": prompt, "variable_name": variable_name}),
            Some(node_id),
            Some(node_name),
            None,
        );
        let (result, data) = self
            .executor
            .execute(HookName::BeforeUserInput, &ctx, Value::String(prompt.clone()))
            .await?;
        Ok((result, value_to_string(data, prompt)))
    }

    pub async fn after_user_input(
        &self,
        response: String,
        variable_name: &str,
        node_id: &str,
        node_name: &str,
    ) -> Result<(HookResult, String)> {
        if !self.has_hooks(HookName::AfterUserInput) {
            return Ok((HookResult::continue_(), response));
        }
        let ctx = self.context(
            HookName::AfterUserInput,
            json!({"response": response, "variable_name": variable_name}),
            Some(node_id),
            Some(node_name),
            None,
        );
        let (result, data) = self
            .executor
            .execute(HookName::AfterUserInput, &ctx, Value::String(response.clone()))
            .await?;
        Ok((result, value_to_string(data, response)))
    }

    // -------------------------------------------------------------------
    // Graph execution lifecycle
    // -------------------------------------------------------------------

    pub async fn on_execution_plan(
        &self,
        layers: Vec<Vec<String>>,
    ) -> Result<(HookResult, Vec<Vec<String>>)> {
        if !self.has_hooks(HookName::OnExecutionPlan) {
            return Ok((HookResult::continue_(), layers));
        }
        let payload = serde_json::to_value(&layers).unwrap_or(Value::Null);
        let ctx = self.context(HookName::OnExecutionPlan, payload.clone(), None, None, None);
        let (result, data) = self
            .executor
            .execute(HookName::OnExecutionPlan, &ctx, payload)
            .await?;
        let layers = serde_json::from_value(data).unwrap_or(layers);
        Ok((result, layers))
    }

    pub async fn before_layer_execute(
        &self,
        layer_index: usize,
        node_ids: Vec<String>,
    ) -> Result<(HookResult, Vec<String>)> {
        if !self.has_hooks(HookName::BeforeLayerExecute) {
            return Ok((HookResult::continue_(), node_ids));
        }
        let payload = json!({"layer_index": layer_index, "node_ids": node_ids});
        let ctx = self.context(HookName::BeforeLayerExecute, payload, None, None, None);
        let (result, data) = self
            .executor
            .execute(
                HookName::BeforeLayerExecute,
                &ctx,
                serde_json::to_value(&node_ids).unwrap_or(Value::Null),
            )
            .await?;
        let node_ids = serde_json::from_value(data).unwrap_or(node_ids);
        Ok((result, node_ids))
    }

    pub async fn after_layer_execute(
        &self,
        layer_index: usize,
        results: JsonMap,
    ) -> Result<(HookResult, JsonMap)> {
        if !self.has_hooks(HookName::AfterLayerExecute) {
            return Ok((HookResult::continue_(), results));
        }
        let payload = json!({"layer_index": layer_index, "results": results});
        let ctx = self.context(HookName::AfterLayerExecute, payload, None, None, None);
        let (result, data) = self
            .executor
            .execute(HookName::AfterLayerExecute, &ctx, Value::Object(results.clone()))
            .await?;
        let results = match data {
            Value::Object(map) => map,
            _ => results,
        };
        Ok((result, results))
    }
}

fn value_to_string(value: Value, fallback: String) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => fallback,
        other => other.to_string(),
    }
}

fn unpack_two_maps(data: Value, first: &str, second: &str) -> (JsonMap, JsonMap) {
    match data {
        Value::Object(mut map) => {
            let a = match map.remove(first) {
                Some(Value::Object(m)) => m,
                _ => JsonMap::new(),
            };
            let b = match map.remove(second) {
                Some(Value::Object(m)) => m,
                _ => JsonMap::new(),
            };
            (a, b)
        }
        _ => (JsonMap::new(), JsonMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HookHandler, HookReturn, HookSpec};

    fn integration_with(specs: Vec<HookSpec>) -> HooksIntegration {
        let registry = Arc::new(HooksRegistry::new());
        for spec in specs {
            registry.register(spec).unwrap();
        }
        HooksIntegration::with_registry("run-1", "sess-1", "/tmp/p", None, None, registry)
    }

    #[tokio::test]
    async fn before_run_fast_path_preserves_maps() {
        let integration = integration_with(vec![]);
        let mut inputs = JsonMap::new();
        inputs.insert("prompt".into(), json!("hi"));
        let (result, out_inputs, _) = integration
            .before_run(inputs.clone(), JsonMap::new())
            .await
            .unwrap();
        assert_eq!(result.action, HookAction::Continue);
        assert_eq!(out_inputs, inputs);
    }

    #[tokio::test]
    async fn before_node_execute_replace_rewrites_config() {
        let integration = integration_with(vec![HookSpec::new(
            HookName::BeforeNodeExecute,
            "rewriter",
            HookHandler::sync(|_, data| {
                let mut map = data.as_object().cloned().unwrap_or_default();
                map.insert("config".into(), json!({"patched": true}));
                Ok(HookReturn::Result(HookResult::replace(Value::Object(map))))
            }),
        )]);

        let (_, _, config) = integration
            .before_node_execute("n1", "Node", "unit.id", JsonMap::new(), JsonMap::new())
            .await
            .unwrap();
        assert_eq!(config.get("patched"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn on_run_error_skip_suppresses() {
        let integration = integration_with(vec![HookSpec::new(
            HookName::OnRunError,
            "suppressor",
            HookHandler::sync(|_, _| Ok(HookReturn::Result(HookResult::skip()))),
        )]);
        let (result, error) = integration.on_run_error("boom", None).await.unwrap();
        assert_eq!(result.action, HookAction::Skip);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn on_execution_plan_replace_swaps_layers() {
        let integration = integration_with(vec![HookSpec::new(
            HookName::OnExecutionPlan,
            "planner",
            HookHandler::sync(|_, _| {
                Ok(HookReturn::Result(HookResult::replace(json!([["only"]]))))
            }),
        )]);
        let (_, layers) = integration
            .on_execution_plan(vec![vec!["a".into()], vec!["b".into()]])
            .await
            .unwrap();
        assert_eq!(layers, vec![vec!["only".to_string()]]);
    }
}
