//! The LLM SDK boundary.
//!
//! The runtime composes agents; the SDK runs individual turns. [`AgentSdk`]
//! is the narrow interface a concrete SDK implements: create a session, run
//! one agent turn, stream back [`SdkEvent`]s. The [`EventView`] adapter
//! tolerates absent fields so event handling never depends on a specific
//! SDK's shape.
//!
//! [`StaticSdk`] is the bundled test double: it replays scripted events (or
//! echoes the message) and drives the tool callbacks the way a real SDK
//! would.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use parking_lot::Mutex;
use serde_json::{json, Value};

use adkflow_compiler::ir::{ErrorBehavior, IncludeContents};

use crate::callbacks::SdkCallbacks;
use crate::error::{Result, RunnerError};

/// Why a turn stopped, propagated to post-agent custom nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishReason {
    pub name: String,
    pub description: String,
}

impl FinishReason {
    pub fn stop() -> Self {
        Self {
            name: "STOP".to_string(),
            description: "Natural completion".to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({"name": self.name, "description": self.description})
    }
}

#[derive(Debug, Clone)]
pub enum EventPart {
    Text(String),
    FunctionCall { name: String, arguments: Value },
    FunctionResponse { name: String, response: Value },
}

/// One event from the SDK's turn stream.
#[derive(Debug, Clone, Default)]
pub struct SdkEvent {
    pub author: Option<String>,
    pub parts: Vec<EventPart>,
    pub partial: bool,
    pub is_final_response: bool,
    pub finish_reason: Option<FinishReason>,
}

/// Narrow read adapter over SDK event shapes.
pub trait EventView {
    fn author(&self) -> Option<&str>;
    fn content_parts(&self) -> &[EventPart];
    fn is_final_response(&self) -> bool;
    fn partial(&self) -> bool;
}

impl EventView for SdkEvent {
    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn content_parts(&self) -> &[EventPart] {
        &self.parts
    }

    fn is_final_response(&self) -> bool {
        self.is_final_response
    }

    fn partial(&self) -> bool {
        self.partial
    }
}

impl SdkEvent {
    /// Concatenated text across parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                EventPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Declarative tool binding handed to the SDK. The SDK owns execution; the
/// agent's callback set intercepts it.
#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub name: String,
    pub description: Option<String>,
    pub error_behavior: ErrorBehavior,
    pub file_path: Option<String>,
    pub code: Option<String>,
}

/// Everything the SDK needs to run one agent's turn.
#[derive(Clone)]
pub struct AgentSpec {
    pub name: String,
    pub model: String,
    pub instruction: Option<String>,
    pub temperature: f64,
    pub tools: Vec<ToolDecl>,
    pub output_schema: Option<Value>,
    pub include_contents: IncludeContents,
    pub callbacks: Arc<SdkCallbacks>,
}

pub type SdkEventStream = Pin<Box<dyn Stream<Item = Result<SdkEvent>> + Send>>;

/// The external LLM SDK collaborator.
#[async_trait]
pub trait AgentSdk: Send + Sync {
    /// Create a fresh session; returns its id.
    async fn create_session(&self) -> Result<String>;

    /// Run one agent turn against `message`, streaming events.
    async fn run_turn(
        &self,
        spec: AgentSpec,
        session_id: &str,
        message: &str,
    ) -> Result<SdkEventStream>;
}

/// Scripted SDK double.
///
/// `echo` mode answers with the message text; `scripted` mode replays a
/// fixed event list per agent name. Tool declarations trigger one
/// call/response pair through the agent's callbacks, matching the
/// interception contract of a real SDK.
pub struct StaticSdk {
    scripted: Mutex<HashMap<String, Vec<SdkEvent>>>,
    tool_results: Mutex<HashMap<String, Value>>,
    session_counter: Mutex<u64>,
    echo: bool,
}

impl StaticSdk {
    pub fn echo() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            tool_results: Mutex::new(HashMap::new()),
            session_counter: Mutex::new(0),
            echo: true,
        }
    }

    pub fn scripted() -> Self {
        Self {
            echo: false,
            ..Self::echo()
        }
    }

    /// Script the events returned for an agent name.
    pub fn script_agent(&self, agent_name: impl Into<String>, events: Vec<SdkEvent>) {
        self.scripted.lock().insert(agent_name.into(), events);
    }

    /// Canned result for a tool name (default `{"ok": true}`).
    pub fn script_tool(&self, tool_name: impl Into<String>, result: Value) {
        self.tool_results.lock().insert(tool_name.into(), result);
    }

    fn response_events(&self, spec: &AgentSpec, message: &str) -> Vec<SdkEvent> {
        if let Some(events) = self.scripted.lock().get(&spec.name) {
            return events.clone();
        }
        let text = if self.echo {
            format!("[{}] {}", spec.name, message)
        } else {
            String::new()
        };
        vec![SdkEvent {
            author: Some(spec.name.clone()),
            parts: vec![EventPart::Text(text)],
            partial: false,
            is_final_response: true,
            finish_reason: Some(FinishReason::stop()),
        }]
    }
}

#[async_trait]
impl AgentSdk for StaticSdk {
    async fn create_session(&self) -> Result<String> {
        let mut counter = self.session_counter.lock();
        *counter += 1;
        Ok(format!("session-{counter}"))
    }

    async fn run_turn(
        &self,
        spec: AgentSpec,
        _session_id: &str,
        message: &str,
    ) -> Result<SdkEventStream> {
        let mut events: Vec<Result<SdkEvent>> = Vec::new();

        // Exercise the tool interception contract once per declared tool.
        for tool in &spec.tools {
            let mut args = json!({"query": message});
            let skip_payload = spec
                .callbacks
                .before_tool(&tool.name, &mut args)
                .await
                .map_err(|e| RunnerError::Sdk(e.to_string()))?;

            let mut response = match skip_payload {
                Some(payload) => payload,
                None => self
                    .tool_results
                    .lock()
                    .get(&tool.name)
                    .cloned()
                    .unwrap_or_else(|| json!({"ok": true})),
            };
            spec.callbacks
                .after_tool(&tool.name, &args, &mut response)
                .await
                .map_err(|e| RunnerError::Sdk(e.to_string()))?;

            events.push(Ok(SdkEvent {
                author: Some(spec.name.clone()),
                parts: vec![EventPart::FunctionCall {
                    name: tool.name.clone(),
                    arguments: args,
                }],
                ..Default::default()
            }));
            events.push(Ok(SdkEvent {
                author: Some(spec.name.clone()),
                parts: vec![EventPart::FunctionResponse {
                    name: tool.name.clone(),
                    response,
                }],
                ..Default::default()
            }));
        }

        for event in self.response_events(&spec, message) {
            events.push(Ok(event));
        }

        Ok(Box::pin(futures::stream::iter(events)))
    }
}
