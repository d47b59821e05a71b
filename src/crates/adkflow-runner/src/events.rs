//! Run events and results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type JsonMap = Map<String, Value>;

/// Event sink shared across the run. Sync and cheap; sends on channels, never
/// blocks on I/O.
pub type EmitFn = Arc<dyn Fn(RunEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    AgentStart,
    AgentOutput,
    AgentEnd,
    ToolCall,
    ToolResult,
    Thinking,
    Error,
    LayerStart,
    LayerEnd,
    CustomNodeStart,
    CustomNodeEnd,
    CustomNodeError,
    CustomNodeCacheHit,
    /// Free-form progress payload emitted by a unit during execution.
    NodeEvent,
    UserInputRequired,
    RunComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    #[serde(default)]
    pub data: JsonMap,
}

impl RunEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: now_seconds(),
            agent_id: None,
            agent_name: None,
            data: JsonMap::new(),
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

pub fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub events: Vec<RunEvent>,
    pub duration_ms: f64,
    #[serde(default)]
    pub metadata: JsonMap,
}
