//! End-to-end workflow orchestration.
//!
//! One run: compile, set up the session and hooks, execute pre-agent custom
//! nodes, drive the agent tree through the SDK, service pause-point user
//! inputs, execute post-agent custom nodes with agent results published as
//! `external_results`, write output files, and emit events throughout.
//! Cancellation and timeouts map to their own run statuses; everything else
//! funnels through the friendly-error filter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use adkflow_compiler::{Compiler, ExecutionConfig, WorkflowIR};
use adkflow_extensions::{get_registry, ExtensionRegistry, SharedState};
use adkflow_hooks::{HookAction, HooksIntegration};
use adkflow_telemetry::{setup_tracing, SpanStatus, TracingManifest};

use crate::agent_factory::{AgentFactory, AgentTreeRunner};
use crate::callbacks::CallbackHandler;
use crate::context_aggregator::execute_context_aggregator;
use crate::engine::{format_error, write_output_files};
use crate::error::{Result, RunnerError};
use crate::events::{EmitFn, EventType, JsonMap, RunEvent, RunResult, RunStatus};
use crate::graph_executor::{build_execution_graph, partition_custom_nodes, GraphExecutor};
use crate::sdk::AgentSdk;
use crate::user_input::{handle_user_input, UserInputBroker};

#[derive(Clone)]
pub struct RunConfig {
    pub project_path: std::path::PathBuf,
    pub tab_id: Option<String>,
    pub input_data: JsonMap,
    pub timeout_seconds: f64,
    pub validate: bool,
    pub enable_cache: bool,
    pub callback_handlers: Vec<Arc<dyn CallbackHandler>>,
    pub event_sender: Option<tokio::sync::mpsc::UnboundedSender<RunEvent>>,
}

impl RunConfig {
    pub fn new(project_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            tab_id: None,
            input_data: JsonMap::new(),
            timeout_seconds: 300.0,
            validate: true,
            enable_cache: true,
            callback_handlers: Vec::new(),
            event_sender: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.input_data
            .insert("prompt".into(), Value::String(prompt.into()));
        self
    }
}

pub struct WorkflowRunner {
    sdk: Arc<dyn AgentSdk>,
    registry: Arc<ExtensionRegistry>,
    user_inputs: Arc<UserInputBroker>,
    cancel_signal: Arc<Notify>,
}

impl WorkflowRunner {
    pub fn new(sdk: Arc<dyn AgentSdk>) -> Self {
        Self::with_registry(sdk, get_registry())
    }

    pub fn with_registry(sdk: Arc<dyn AgentSdk>, registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            sdk,
            registry,
            user_inputs: Arc::new(UserInputBroker::new()),
            cancel_signal: Arc::new(Notify::new()),
        }
    }

    /// Broker used to answer pause-point user inputs.
    pub fn user_inputs(&self) -> Arc<UserInputBroker> {
        self.user_inputs.clone()
    }

    /// Answer a waiting user-input node.
    pub fn provide_user_input(&self, node_id: &str, response: impl Into<String>) -> bool {
        self.user_inputs.provide(node_id, response)
    }

    /// Request cancellation; the run observes it at its next suspension
    /// point and returns a `cancelled` result.
    pub fn cancel(&self) {
        self.cancel_signal.notify_one();
    }

    pub async fn run(&self, config: RunConfig) -> RunResult {
        let env_file = config.project_path.join(".env");
        if env_file.exists() {
            if let Err(error) = dotenvy::from_path_override(&env_file) {
                tracing::warn!(%error, "Failed to load .env");
            }
        }

        let run_id: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
        let started = Instant::now();

        let events: Arc<Mutex<Vec<RunEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sender = config.event_sender.clone();
        let emit: EmitFn = Arc::new(move |event: RunEvent| {
            sink.lock().push(event.clone());
            if let Some(sender) = &sender {
                let _ = sender.send(event);
            }
        });

        emit(
            RunEvent::new(EventType::RunStart)
                .with_data("run_id", json!(run_id))
                .with_data("project_path", json!(config.project_path.display().to_string()))
                .with_data("tab_id", json!(config.tab_id)),
        );

        let timeout = Duration::from_secs_f64(config.timeout_seconds.max(0.0));
        let outcome = tokio::select! {
            _ = self.cancel_signal.notified() => Err(RunnerError::Cancelled),
            timed = tokio::time::timeout(timeout, self.execute(&config, &emit, &run_id)) => {
                match timed {
                    Ok(result) => result,
                    Err(_) => Err(RunnerError::RunTimeout(config.timeout_seconds)),
                }
            }
        };

        let mut metadata = JsonMap::new();
        metadata.insert(
            "project_path".into(),
            json!(config.project_path.display().to_string()),
        );
        metadata.insert("tab_id".into(), json!(config.tab_id));

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let result = |status, output, error: Option<String>| RunResult {
            run_id: run_id.clone(),
            status,
            output,
            error,
            events: events.lock().clone(),
            duration_ms,
            metadata: metadata.clone(),
        };

        match outcome {
            Ok(output) => {
                emit(RunEvent::new(EventType::RunComplete).with_data("output", json!(output)));
                let mut final_result = result(RunStatus::Completed, Some(output), None);
                final_result.events = events.lock().clone();
                final_result
            }
            Err(RunnerError::Cancelled) => {
                let hooks = HooksIntegration::new(&run_id, "", &config.project_path, None, None);
                if let Err(error) = hooks.on_run_cancel().await {
                    tracing::warn!(%error, "on_run_cancel hook failed");
                }
                emit(RunEvent::new(EventType::Error).with_data("error", json!("Run cancelled")));
                result(RunStatus::Cancelled, None, Some("Run cancelled".into()))
            }
            Err(error) => {
                let message = format_error(&error.to_string(), &config.project_path);
                let hooks = HooksIntegration::new(&run_id, "", &config.project_path, None, None);
                let message = match hooks.on_run_error(&message, None).await {
                    Ok((_, Some(replaced))) => replaced,
                    Ok((_, None)) => {
                        // A SKIP hook suppressed the failure entirely.
                        emit(RunEvent::new(EventType::RunComplete)
                            .with_data("output", json!("")));
                        return result(RunStatus::Completed, Some(String::new()), None);
                    }
                    Err(hook_error) => {
                        tracing::warn!(error = %hook_error, "on_run_error hook failed");
                        message
                    }
                };
                emit(RunEvent::new(EventType::Error).with_data("error", json!(message)));
                result(RunStatus::Failed, None, Some(message))
            }
        }
    }

    async fn execute(&self, config: &RunConfig, emit: &EmitFn, run_id: &str) -> Result<String> {
        let compiler = Compiler::with_config(ExecutionConfig {
            validate: config.validate,
            ..Default::default()
        })
        .with_registry(self.registry.clone());
        let ir = compiler.compile(&config.project_path)?;

        let tracing_manifest: Option<TracingManifest> = ir
            .metadata
            .get("logging")
            .and_then(|l| l.get("tracing"))
            .and_then(|t| serde_json::from_value(t.clone()).ok());
        let span_tracker = setup_tracing(tracing_manifest.as_ref(), &config.project_path);
        let run_span = span_tracker.as_ref().map(|t| t.start_span("workflow_run", None));

        let execution = self.execute_compiled(config, emit, run_id, &ir).await;

        if let (Some(tracker), Some(span)) = (span_tracker, run_span) {
            let status = if execution.is_ok() {
                SpanStatus::Ok
            } else {
                SpanStatus::Error
            };
            let mut attributes = serde_json::Map::new();
            attributes.insert("run_id".into(), json!(run_id));
            attributes.insert("project".into(), json!(ir.metadata.get("project_name")));
            tracker.end_span(span, status, attributes);
        }

        execution
    }

    async fn execute_compiled(
        &self,
        config: &RunConfig,
        emit: &EmitFn,
        run_id: &str,
        ir: &WorkflowIR,
    ) -> Result<String> {
        let session_id = self.sdk.create_session().await?;
        let session_state: SharedState = Arc::new(Mutex::new(serde_json::Map::new()));

        let hook_emit = {
            let emit = emit.clone();
            Arc::new(move |payload: Value| {
                let mut event = RunEvent::new(EventType::NodeEvent);
                if let Value::Object(map) = payload {
                    event.data = map;
                }
                emit(event);
            })
        };
        let hooks = Arc::new(HooksIntegration::new(
            run_id,
            &session_id,
            &config.project_path,
            Some(session_state.clone()),
            Some(hook_emit),
        ));

        let (before, inputs, _run_config) = hooks
            .before_run(config.input_data.clone(), JsonMap::new())
            .await?;
        if before.action == HookAction::Skip {
            return Ok(String::new());
        }

        let (pre_ids, post_ids) = partition_custom_nodes(ir);
        let executor = GraphExecutor::new(
            emit.clone(),
            None,
            config.enable_cache,
            self.registry.clone(),
            Some(hooks.clone()),
        );

        // Pre-agent custom nodes feed the prompt as context lines.
        let mut custom_context_lines: Vec<String> = Vec::new();
        if !pre_ids.is_empty() {
            let subset: HashSet<String> = pre_ids.iter().cloned().collect();
            let graph = build_execution_graph(ir, Some(&subset));
            let results = executor
                .execute(
                    &graph,
                    session_state.clone(),
                    &config.project_path,
                    &session_id,
                    run_id,
                    HashMap::new(),
                )
                .await?;
            let mut node_ids: Vec<&String> = results.keys().collect();
            node_ids.sort();
            for node_id in node_ids {
                let outputs = &results[node_id];
                let mut ports: Vec<&String> = outputs.keys().collect();
                ports.sort();
                for port in ports {
                    custom_context_lines.push(format!(
                        "[{node_id}.{port}]: {}",
                        value_as_text(&outputs[port])
                    ));
                }
            }
        }

        // Context aggregators publish their variables into the shared state.
        for aggregator in &ir.context_aggregators {
            let outputs =
                execute_context_aggregator(aggregator, &config.project_path, &JsonMap::new())
                    .await;
            if let Some(Value::Object(variables)) = outputs.get("output") {
                let mut state = session_state.lock();
                for (name, value) in variables {
                    state.insert(name.clone(), value.clone());
                }
            }
        }

        let factory = Arc::new(
            AgentFactory::new(&config.project_path)
                .with_handlers(config.callback_handlers.clone()),
        );
        let tree = factory.create_from_workflow(ir)?;

        // Compose the single user message: trigger variables, custom-node
        // outputs, then the caller's prompt.
        let mut message_parts: Vec<String> = Vec::new();
        for user_input in ir.user_inputs.iter().filter(|u| u.is_trigger) {
            if let Some(value) = inputs.get(&user_input.variable_name).and_then(Value::as_str) {
                session_state
                    .lock()
                    .insert(user_input.variable_name.clone(), json!(value));
                message_parts.push(format!("{}: {}", user_input.variable_name, value));
            }
        }
        message_parts.extend(custom_context_lines);
        let prompt = inputs
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .unwrap_or("Execute the workflow.");
        message_parts.push(prompt.to_string());
        let message = message_parts.join("\n\n");

        let tree_runner = AgentTreeRunner {
            sdk: self.sdk.clone(),
            factory: factory.clone(),
            run_id: run_id.to_string(),
            session_id: session_id.clone(),
            session_state: session_state.clone(),
            hooks: hooks.clone(),
            emit: emit.clone(),
            agent_outputs: Arc::new(Mutex::new(HashMap::new())),
        };
        let mut output = tree_runner.run_agent(&tree, &message).await?;

        // Pause-point user inputs: suspend, then resume downstream agents.
        for user_input in ir.user_inputs.iter().filter(|u| !u.is_trigger) {
            let response =
                handle_user_input(user_input, &self.user_inputs, &hooks, emit).await?;
            session_state
                .lock()
                .insert(user_input.variable_name.clone(), json!(response));

            let mut current = response;
            for agent_id in &user_input.outgoing_agent_ids {
                let subtree = factory.create_subtree(ir, agent_id)?;
                current = tree_runner.run_agent(&subtree, &current).await?;
            }
            if !current.is_empty() {
                output = current;
            }
        }

        // Post-agent custom nodes read agent results from external_results.
        if !post_ids.is_empty() {
            let mut external: HashMap<String, JsonMap> = HashMap::new();
            for (agent_id, agent_output) in tree_runner.agent_outputs.lock().iter() {
                let mut entry = JsonMap::new();
                entry.insert("output".into(), json!(agent_output));
                entry.insert(
                    "finish-reason".into(),
                    factory.get_finish_reason(agent_id).to_value(),
                );
                external.insert(agent_id.clone(), entry);
            }
            let subset: HashSet<String> = post_ids.iter().cloned().collect();
            let graph = build_execution_graph(ir, Some(&subset));
            executor
                .execute(
                    &graph,
                    session_state.clone(),
                    &config.project_path,
                    &session_id,
                    run_id,
                    external,
                )
                .await?;
        }

        write_output_files(ir, &output, &config.project_path, emit).await;

        let (_, output) = hooks.after_run(output, "completed").await?;
        Ok(output)
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Convenience entry point: run one workflow with default settings.
pub async fn run_workflow(
    sdk: Arc<dyn AgentSdk>,
    project_path: impl Into<std::path::PathBuf>,
    input_data: JsonMap,
) -> RunResult {
    let runner = WorkflowRunner::new(sdk);
    let mut config = RunConfig::new(project_path);
    config.input_data = input_data;
    runner.run(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::StaticSdk;
    use adkflow_hooks::HooksRegistry;
    use serde_json::json;
    use std::path::Path;

    fn write_project(dir: &Path, manifest: &Value) {
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_string_pretty(manifest).unwrap(),
        )
        .unwrap();
    }

    fn minimal_manifest() -> Value {
        json!({
            "name": "minimal",
            "version": "3.0",
            "tabs": [{"id": "tab1", "name": "Main"}],
            "nodes": [
                {"id": "start", "type": "start", "data": {"tabId": "tab1"}},
                {"id": "a1", "type": "agent",
                 "data": {"tabId": "tab1", "config": {
                     "name": "A", "model": "gemini-2.0-flash", "description": "Test agent"
                 }}}
            ],
            "edges": [{"id": "e1", "source": "start", "target": "a1"}]
        })
    }

    fn test_runner() -> WorkflowRunner {
        let registry = Arc::new(
            adkflow_extensions::ExtensionRegistry::with_hooks_registry(Arc::new(
                HooksRegistry::new(),
            )),
        );
        WorkflowRunner::with_registry(Arc::new(StaticSdk::echo()), registry)
    }

    #[tokio::test]
    async fn minimal_workflow_completes_with_event_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), &minimal_manifest());

        let runner = test_runner();
        let result = runner
            .run(RunConfig::new(tmp.path()).with_prompt("hello"))
            .await;

        assert_eq!(result.status, RunStatus::Completed, "{:?}", result.error);
        assert_eq!(result.output.as_deref(), Some("[A] hello"));

        let kinds: Vec<EventType> = result.events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds.first(), Some(&EventType::RunStart));
        assert_eq!(kinds.last(), Some(&EventType::RunComplete));
        assert!(kinds.contains(&EventType::AgentStart));
        assert!(kinds.contains(&EventType::AgentOutput));
        assert!(kinds.contains(&EventType::AgentEnd));

        // Causality: start before output before end.
        let start = kinds.iter().position(|k| *k == EventType::AgentStart).unwrap();
        let output = kinds.iter().position(|k| *k == EventType::AgentOutput).unwrap();
        let end = kinds.iter().position(|k| *k == EventType::AgentEnd).unwrap();
        assert!(start < output && output < end);
    }

    #[tokio::test]
    async fn empty_prompt_uses_default_message() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), &minimal_manifest());

        let runner = test_runner();
        let result = runner.run(RunConfig::new(tmp.path())).await;
        assert_eq!(result.output.as_deref(), Some("[A] Execute the workflow."));
    }

    #[tokio::test]
    async fn compile_failure_returns_failed_result() {
        let tmp = tempfile::tempdir().unwrap();
        // No manifest at all.
        let runner = test_runner();
        let result = runner.run(RunConfig::new(tmp.path())).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.is_some());
        assert!(result
            .events
            .iter()
            .any(|e| e.event_type == EventType::Error));
    }

    #[tokio::test]
    async fn credential_failures_get_friendly_guidance() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), &minimal_manifest());

        struct FailingSdk;
        #[async_trait::async_trait]
        impl AgentSdk for FailingSdk {
            async fn create_session(&self) -> Result<String> {
                Err(RunnerError::Sdk("API key not valid".into()))
            }
            async fn run_turn(
                &self,
                _spec: crate::sdk::AgentSpec,
                _session_id: &str,
                _message: &str,
            ) -> Result<crate::sdk::SdkEventStream> {
                unreachable!()
            }
        }

        let registry = Arc::new(
            adkflow_extensions::ExtensionRegistry::with_hooks_registry(Arc::new(
                HooksRegistry::new(),
            )),
        );
        let runner = WorkflowRunner::with_registry(Arc::new(FailingSdk), registry);
        let result = runner.run(RunConfig::new(tmp.path())).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("API credentials not configured"));
    }

    #[tokio::test]
    async fn output_files_are_written_at_run_end() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = minimal_manifest();
        manifest["nodes"].as_array_mut().unwrap().push(json!({
            "id": "of1", "type": "outputFile",
            "data": {"tabId": "tab1", "config": {"name": "result", "file_path": "outputs/result.md"}}
        }));
        manifest["edges"].as_array_mut().unwrap().push(json!({
            "id": "e2", "source": "a1", "target": "of1",
            "sourceHandle": "output", "targetHandle": "file-input"
        }));
        write_project(tmp.path(), &manifest);

        let runner = test_runner();
        let result = runner
            .run(RunConfig::new(tmp.path()).with_prompt("write this"))
            .await;
        assert_eq!(result.status, RunStatus::Completed, "{:?}", result.error);

        let written = std::fs::read_to_string(tmp.path().join("outputs/result.md")).unwrap();
        assert_eq!(written, "[A] write this");
    }

    #[tokio::test]
    async fn run_timeout_maps_to_failed() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), &minimal_manifest());

        struct SlowSdk;
        #[async_trait::async_trait]
        impl AgentSdk for SlowSdk {
            async fn create_session(&self) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".into())
            }
            async fn run_turn(
                &self,
                _spec: crate::sdk::AgentSpec,
                _session_id: &str,
                _message: &str,
            ) -> Result<crate::sdk::SdkEventStream> {
                unreachable!()
            }
        }

        let registry = Arc::new(
            adkflow_extensions::ExtensionRegistry::with_hooks_registry(Arc::new(
                HooksRegistry::new(),
            )),
        );
        let runner = WorkflowRunner::with_registry(Arc::new(SlowSdk), registry);
        let mut config = RunConfig::new(tmp.path());
        config.timeout_seconds = 0.1;
        let result = runner.run(config).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancel_yields_cancelled_status() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), &minimal_manifest());

        struct HangingSdk;
        #[async_trait::async_trait]
        impl AgentSdk for HangingSdk {
            async fn create_session(&self) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".into())
            }
            async fn run_turn(
                &self,
                _spec: crate::sdk::AgentSpec,
                _session_id: &str,
                _message: &str,
            ) -> Result<crate::sdk::SdkEventStream> {
                unreachable!()
            }
        }

        let registry = Arc::new(
            adkflow_extensions::ExtensionRegistry::with_hooks_registry(Arc::new(
                HooksRegistry::new(),
            )),
        );
        let runner = Arc::new(WorkflowRunner::with_registry(
            Arc::new(HangingSdk),
            registry,
        ));

        let canceller = runner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = runner.run(RunConfig::new(tmp.path())).await;
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.error.as_deref(), Some("Run cancelled"));
    }

    #[tokio::test]
    async fn sequential_chain_runs_both_agents() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            &json!({
                "name": "chain",
                "version": "3.0",
                "tabs": [{"id": "tab1", "name": "Main"}],
                "nodes": [
                    {"id": "start", "type": "start", "data": {"tabId": "tab1"}},
                    {"id": "a1", "type": "agent",
                     "data": {"tabId": "tab1", "config": {"name": "First", "description": "d",
                                                            "output_key": "{draft}"}}},
                    {"id": "a2", "type": "agent",
                     "data": {"tabId": "tab1", "config": {"name": "Second", "description": "d"}}}
                ],
                "edges": [
                    {"id": "e1", "source": "start", "target": "a1"},
                    {"id": "e2", "source": "a1", "target": "a2",
                     "sourceHandle": "output", "targetHandle": "agent-input"}
                ]
            }),
        );

        let runner = test_runner();
        let result = runner.run(RunConfig::new(tmp.path()).with_prompt("go")).await;
        assert_eq!(result.status, RunStatus::Completed, "{:?}", result.error);
        // Second agent sees First's output.
        assert_eq!(result.output.as_deref(), Some("[Second] [First] go"));

        let agent_names: Vec<&str> = result
            .events
            .iter()
            .filter(|e| e.event_type == EventType::AgentStart)
            .filter_map(|e| e.agent_name.as_deref())
            .collect();
        assert_eq!(agent_names, vec!["First", "Second"]);
    }
}
