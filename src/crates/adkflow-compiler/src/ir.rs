//! Typed intermediate representation.
//!
//! The IR is the resolved, validated workflow model the runner executes.
//! Cross-references are index-based (`id` strings resolved through the
//! owning [`WorkflowIR`] container), never pointer back-edges.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type JsonMap = Map<String, Value>;

/// Agent composition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Llm,
    Sequential,
    Parallel,
    Loop,
}

impl AgentKind {
    pub fn parse(raw: &str) -> AgentKind {
        match raw {
            "sequential" => AgentKind::Sequential,
            "parallel" => AgentKind::Parallel,
            "loop" => AgentKind::Loop,
            _ => AgentKind::Llm,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Llm => "llm",
            AgentKind::Sequential => "sequential",
            AgentKind::Parallel => "parallel",
            AgentKind::Loop => "loop",
        }
    }
}

/// Whether prior conversation contents are forwarded to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeContents {
    Default,
    None,
}

/// How tool failures surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBehavior {
    FailFast,
    PassToModel,
}

impl ErrorBehavior {
    pub fn parse(raw: &str) -> ErrorBehavior {
        match raw {
            "pass_to_model" => ErrorBehavior::PassToModel,
            _ => ErrorBehavior::FailFast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub planner_type: String,
    pub thinking_budget: Option<i64>,
    pub include_thoughts: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planner_type: "none".to_string(),
            thinking_budget: None,
            include_thoughts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExecutorConfig {
    pub enabled: bool,
    pub stateful: bool,
    pub error_retry_attempts: u32,
    pub optimize_data_file: bool,
    pub code_block_delimiters: Vec<(String, String)>,
    pub execution_result_delimiters: (String, String),
}

impl Default for CodeExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stateful: false,
            error_retry_attempts: 2,
            optimize_data_file: false,
            code_block_delimiters: vec![
                ("```tool_code\n".to_string(), "\n```".to_string()),
                ("```python\n".to_string(), "\n```".to_string()),
            ],
            execution_result_delimiters: ("```tool_output\n".to_string(), "\n```".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpOptionsConfig {
    /// Milliseconds.
    pub timeout: u64,
    pub max_retries: u32,
    /// Milliseconds.
    pub retry_delay: u64,
    pub retry_backoff_multiplier: f64,
}

impl Default for HttpOptionsConfig {
    fn default() -> Self {
        Self {
            timeout: 30_000,
            max_retries: 3,
            retry_delay: 1_000,
            retry_backoff_multiplier: 2.0,
        }
    }
}

/// File references for agent-level callback handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    pub before_model: Option<String>,
    pub after_model: Option<String>,
    pub before_tool: Option<String>,
    pub after_tool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolIR {
    pub name: String,
    pub file_path: Option<String>,
    pub code: Option<String>,
    pub error_behavior: ErrorBehavior,
    pub description: Option<String>,
}

impl ToolIR {
    /// Exactly one of `file_path`/`code` must be populated.
    pub fn is_well_formed(&self) -> bool {
        self.file_path.is_some() != self.code.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIR {
    pub id: String,
    pub name: String,
    pub kind: AgentKind,
    pub model: String,
    pub instruction: Option<String>,
    pub temperature: f64,
    pub tools: Vec<ToolIR>,
    /// Child agent ids, resolved through `WorkflowIR::all_agents`.
    pub subagents: Vec<String>,
    pub output_key: Option<String>,
    pub output_schema: Option<Value>,
    pub input_schema: Option<Value>,
    pub include_contents: IncludeContents,
    pub strip_contents: bool,
    pub max_iterations: u32,
    pub disallow_transfer_to_parent: bool,
    pub disallow_transfer_to_peers: bool,
    pub planner: PlannerConfig,
    pub code_executor: CodeExecutorConfig,
    pub http_options: HttpOptionsConfig,
    pub callbacks: CallbackConfig,
    /// Output keys of immediate sequential predecessors, braces stripped.
    pub upstream_output_keys: Vec<String>,
    /// Context-aggregator node ids feeding this agent.
    pub context_var_sources: Vec<String>,
    pub source_node_id: String,
    pub description: Option<String>,
}

impl AgentIR {
    /// Minimal LLM agent, used by tests and synthetic wrappers.
    pub fn llm(id: impl Into<String>, name: impl Into<String>, model: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            source_node_id: id.clone(),
            id,
            name: name.into(),
            kind: AgentKind::Llm,
            model: model.into(),
            instruction: None,
            temperature: 0.7,
            tools: Vec::new(),
            subagents: Vec::new(),
            output_key: None,
            output_schema: None,
            input_schema: None,
            include_contents: IncludeContents::Default,
            strip_contents: false,
            max_iterations: 5,
            disallow_transfer_to_parent: false,
            disallow_transfer_to_peers: false,
            planner: PlannerConfig::default(),
            code_executor: CodeExecutorConfig::default(),
            http_options: HttpOptionsConfig::default(),
            callbacks: CallbackConfig::default(),
            upstream_output_keys: Vec::new(),
            context_var_sources: Vec::new(),
            description: None,
        }
    }
}

/// One upstream feeding a custom-node input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSource {
    pub node_id: String,
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomNodeIR {
    pub id: String,
    pub unit_id: String,
    pub name: String,
    pub config: JsonMap,
    pub input_connections: HashMap<String, Vec<ConnectionSource>>,
    pub output_connections: HashMap<String, Vec<String>>,
    pub output_node: bool,
    pub always_execute: bool,
    pub lazy_inputs: Vec<String>,
    pub source_node_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    Error,
    PredefinedText,
}

impl TimeoutBehavior {
    pub fn parse(raw: &str) -> TimeoutBehavior {
        match raw {
            "predefined_text" => TimeoutBehavior::PredefinedText,
            _ => TimeoutBehavior::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputIR {
    pub id: String,
    pub name: String,
    /// Sanitized identifier the response is published under.
    pub variable_name: String,
    /// No incoming sequential edges: acts as a start trigger.
    pub is_trigger: bool,
    pub timeout_seconds: f64,
    pub timeout_behavior: TimeoutBehavior,
    pub predefined_text: String,
    pub incoming_agent_ids: Vec<String>,
    pub outgoing_agent_ids: Vec<String>,
    pub source_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFileIR {
    pub name: String,
    /// Project-relative path.
    pub file_path: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleporterIR {
    pub name: String,
    pub direction: String,
    pub tab_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAggregatorIR {
    pub id: String,
    pub name: String,
    pub config: JsonMap,
    pub source_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableNodeIR {
    pub id: String,
    pub name: String,
    pub value: String,
    /// Unconnected variables feed global substitution instead of an agent.
    pub connected: bool,
}

/// The complete compiled workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowIR {
    pub root_agent_id: String,
    pub all_agents: HashMap<String, AgentIR>,
    pub output_files: Vec<OutputFileIR>,
    pub teleporters: HashMap<String, TeleporterIR>,
    pub user_inputs: Vec<UserInputIR>,
    pub custom_nodes: Vec<CustomNodeIR>,
    pub context_aggregators: Vec<ContextAggregatorIR>,
    pub variable_nodes: Vec<VariableNodeIR>,
    pub global_variables: HashMap<String, String>,
    pub has_start_node: bool,
    pub has_end_node: bool,
    pub project_path: String,
    pub tab_ids: Vec<String>,
    pub metadata: JsonMap,
}

impl WorkflowIR {
    pub fn root_agent(&self) -> Option<&AgentIR> {
        self.all_agents.get(&self.root_agent_id)
    }

    pub fn get_agent(&self, id: &str) -> Option<&AgentIR> {
        self.all_agents.get(id)
    }

    pub fn get_custom_node(&self, id: &str) -> Option<&CustomNodeIR> {
        self.custom_nodes.iter().find(|n| n.id == id)
    }
}
