//! IR transformer.
//!
//! Folds the workflow graph into the typed IR: prompt/context/variable nodes
//! become agent instructions, tool nodes become tool bindings, composite
//! hierarchies get built, and auxiliary nodes (teleporters, output files,
//! user inputs, custom units, context aggregators, variables) are lifted
//! into their own IR records.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use adkflow_extensions::{lazy_input_ids, ExtensionRegistry};

use crate::config::ExecutionConfig;
use crate::error::{CompilationError, ErrorLocation, Result};
use crate::graph::{EdgeSemantics, GraphNode, WorkflowGraph};
use crate::hierarchy::HierarchyBuilder;
use crate::ir::{
    AgentIR, AgentKind, CallbackConfig, CodeExecutorConfig, ConnectionSource,
    ContextAggregatorIR, CustomNodeIR, ErrorBehavior, HttpOptionsConfig, IncludeContents,
    JsonMap, OutputFileIR, PlannerConfig, TeleporterIR, TimeoutBehavior, ToolIR, UserInputIR,
    VariableNodeIR, WorkflowIR,
};
use crate::project::LoadedProject;
use crate::substitution::collect_global_variables;

/// Convert a node name to a valid variable name: `"Review Step"` becomes
/// `review_step_input`.
pub fn sanitize_variable_name(name: &str) -> String {
    let mut sanitized: String = name
        .to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    if let Some(first) = sanitized.chars().next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            sanitized.insert(0, '_');
        }
    }
    if sanitized.is_empty() {
        sanitized = "user".to_string();
    }
    format!("{sanitized}_input")
}

fn strip_braces(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_string()
}

fn get_str(config: &JsonMap, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

fn get_bool(config: &JsonMap, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn get_f64(config: &JsonMap, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn get_u64(config: &JsonMap, key: &str, default: u64) -> u64 {
    config.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn nested<'a>(config: &'a JsonMap, key: &str) -> Option<&'a JsonMap> {
    config.get(key).and_then(Value::as_object)
}

/// Flat key wins over the nested shape when both are present.
fn flat_or_nested<'a>(
    config: &'a JsonMap,
    flat_key: &str,
    nested_map: Option<&'a JsonMap>,
    nested_key: &str,
) -> Option<&'a Value> {
    config
        .get(flat_key)
        .or_else(|| nested_map.and_then(|m| m.get(nested_key)))
}

pub struct IRTransformer {
    config: ExecutionConfig,
    registry: Option<Arc<ExtensionRegistry>>,
}

impl IRTransformer {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    /// Use a specific extension registry for custom-node metadata.
    /// Defaults to the process-wide registry.
    pub fn with_registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn registry(&self) -> Arc<ExtensionRegistry> {
        self.registry
            .clone()
            .unwrap_or_else(adkflow_extensions::get_registry)
    }

    pub fn transform(&self, graph: &WorkflowGraph, project: &LoadedProject) -> Result<WorkflowIR> {
        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Starting IR transformation"
        );

        let mut all_agents: HashMap<String, AgentIR> = HashMap::new();
        for node in graph.agent_nodes() {
            let agent = self.transform_agent(node, graph, project)?;
            all_agents.insert(agent.id.clone(), agent);
        }

        self.wire_composite_subagents(graph, &mut all_agents);
        self.populate_upstream_output_keys(graph, &mut all_agents);

        let roots: Vec<String> = graph.root_agents().iter().map(|n| n.id.clone()).collect();
        let root_agent_id = HierarchyBuilder::new(graph, &self.config.default_model)
            .build(roots, &mut all_agents)?;

        let teleporters: HashMap<String, TeleporterIR> = graph
            .teleporter_pairs
            .iter()
            .map(|pair| {
                (
                    pair.name.clone(),
                    TeleporterIR {
                        name: pair.name.clone(),
                        direction: "output".to_string(),
                        tab_id: pair.output_tab_id.clone(),
                        node_id: pair.output_node_id.clone(),
                    },
                )
            })
            .collect();

        let output_files = self.resolve_output_files(graph);
        let user_inputs = self.transform_user_inputs(graph);
        let custom_nodes = self.transform_custom_nodes(graph);
        let context_aggregators = self.transform_context_aggregators(graph);
        let (variable_nodes, global_variables) = self.transform_variables(graph);

        let has_start_node = graph.nodes.values().any(|n| n.node_type == "start");
        let has_end_node = graph.nodes.values().any(|n| n.node_type == "end");

        let mut metadata = JsonMap::new();
        metadata.insert("project_name".into(), Value::String(project.name.clone()));
        metadata.insert("version".into(), Value::String(project.version.clone()));
        if let Some(logging) = &project.logging {
            // The runner resolves tracing settings from this block.
            metadata.insert("logging".into(), logging.clone());
        }

        let mut tab_ids: Vec<String> = project.tabs.iter().map(|t| t.id.clone()).collect();
        tab_ids.dedup();

        tracing::info!(
            agents = all_agents.len(),
            teleporters = teleporters.len(),
            output_files = output_files.len(),
            user_inputs = user_inputs.len(),
            custom_nodes = custom_nodes.len(),
            "IR transformation complete"
        );

        Ok(WorkflowIR {
            root_agent_id,
            all_agents,
            output_files,
            teleporters,
            user_inputs,
            custom_nodes,
            context_aggregators,
            variable_nodes,
            global_variables,
            has_start_node,
            has_end_node,
            project_path: project.path.display().to_string(),
            tab_ids,
            metadata,
        })
    }

    fn transform_agent(
        &self,
        node: &GraphNode,
        graph: &WorkflowGraph,
        project: &LoadedProject,
    ) -> Result<AgentIR> {
        let config = node.config();

        let instruction = self.resolve_instruction(node, graph, project)?;
        let tools = self.resolve_tools(node, graph, project);

        let planner_data = nested(&config, "planner");
        let planner = PlannerConfig {
            planner_type: flat_or_nested(&config, "planner_type", planner_data, "type")
                .and_then(Value::as_str)
                .unwrap_or("none")
                .to_string(),
            thinking_budget: flat_or_nested(&config, "thinking_budget", planner_data, "thinking_budget")
                .and_then(Value::as_i64),
            include_thoughts: flat_or_nested(
                &config,
                "include_thoughts",
                planner_data,
                "include_thoughts",
            )
            .and_then(Value::as_bool)
            .unwrap_or(false),
        };

        let code_data = nested(&config, "code_executor");
        let defaults = CodeExecutorConfig::default();
        let code_executor = CodeExecutorConfig {
            enabled: flat_or_nested(&config, "code_executor_enabled", code_data, "enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            stateful: flat_or_nested(&config, "code_executor_stateful", code_data, "stateful")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            error_retry_attempts: flat_or_nested(
                &config,
                "code_executor_error_retry",
                code_data,
                "error_retry_attempts",
            )
            .and_then(Value::as_u64)
            .unwrap_or(defaults.error_retry_attempts as u64) as u32,
            optimize_data_file: flat_or_nested(
                &config,
                "code_executor_optimize_data_file",
                code_data,
                "optimize_data_file",
            )
            .and_then(Value::as_bool)
            .unwrap_or(false),
            code_block_delimiters: flat_or_nested(
                &config,
                "code_executor_code_block_delimiters",
                code_data,
                "code_block_delimiters",
            )
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(defaults.code_block_delimiters),
            execution_result_delimiters: flat_or_nested(
                &config,
                "code_executor_execution_result_delimiters",
                code_data,
                "execution_result_delimiters",
            )
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(defaults.execution_result_delimiters),
        };

        let http_data = nested(&config, "http_options");
        let http_defaults = HttpOptionsConfig::default();
        let http_options = HttpOptionsConfig {
            timeout: flat_or_nested(&config, "http_timeout", http_data, "timeout")
                .and_then(Value::as_u64)
                .unwrap_or(http_defaults.timeout),
            max_retries: flat_or_nested(&config, "http_max_retries", http_data, "max_retries")
                .and_then(Value::as_u64)
                .unwrap_or(http_defaults.max_retries as u64) as u32,
            retry_delay: flat_or_nested(&config, "http_retry_delay", http_data, "retry_delay")
                .and_then(Value::as_u64)
                .unwrap_or(http_defaults.retry_delay),
            retry_backoff_multiplier: flat_or_nested(
                &config,
                "http_backoff_multiplier",
                http_data,
                "retry_backoff_multiplier",
            )
            .and_then(Value::as_f64)
            .unwrap_or(http_defaults.retry_backoff_multiplier),
        };

        let callbacks = CallbackConfig {
            before_model: get_str(&config, "before_model_callback"),
            after_model: get_str(&config, "after_model_callback"),
            before_tool: get_str(&config, "before_tool_callback"),
            after_tool: get_str(&config, "after_tool_callback"),
        };

        let context_var_sources: Vec<String> = graph
            .incoming_by_semantics(&node.id, EdgeSemantics::Context)
            .iter()
            .filter(|e| {
                graph
                    .get_node(&e.source_id)
                    .map(|n| n.node_type == "contextAggregator")
                    .unwrap_or(false)
            })
            .map(|e| e.source_id.clone())
            .collect();

        Ok(AgentIR {
            id: node.id.clone(),
            name: get_str(&config, "name").unwrap_or_else(|| node.id.clone()),
            kind: AgentKind::parse(&get_str(&config, "type").unwrap_or_default()),
            model: get_str(&config, "model").unwrap_or_else(|| self.config.default_model.clone()),
            instruction,
            temperature: get_f64(&config, "temperature", self.config.default_temperature),
            tools,
            subagents: Vec::new(),
            output_key: get_str(&config, "output_key")
                .map(|k| strip_braces(&k))
                .filter(|k| !k.is_empty()),
            output_schema: config.get("output_schema").cloned(),
            input_schema: config.get("input_schema").cloned(),
            include_contents: resolve_include_contents(&config),
            strip_contents: get_bool(&config, "strip_contents", false),
            max_iterations: get_u64(&config, "max_iterations", 5) as u32,
            disallow_transfer_to_parent: get_bool(&config, "disallow_transfer_to_parent", false),
            disallow_transfer_to_peers: get_bool(&config, "disallow_transfer_to_peers", false),
            planner,
            code_executor,
            http_options,
            callbacks,
            upstream_output_keys: Vec::new(),
            context_var_sources,
            source_node_id: node.id.clone(),
            description: get_str(&config, "description"),
        })
    }

    /// Concatenate connected prompt, context, and variable nodes, in edge
    /// order of appearance.
    fn resolve_instruction(
        &self,
        node: &GraphNode,
        graph: &WorkflowGraph,
        project: &LoadedProject,
    ) -> Result<Option<String>> {
        let mut parts: Vec<String> = Vec::new();

        for edge in graph.incoming(&node.id) {
            if !matches!(
                edge.semantics,
                EdgeSemantics::Instruction | EdgeSemantics::Context
            ) {
                continue;
            }
            let Some(source) = graph.get_node(&edge.source_id) else {
                continue;
            };
            let config = source.config();

            match source.node_type.as_str() {
                "prompt" => {
                    if let Some(file_path) = get_str(&config, "file_path") {
                        match project.get_prompt(&file_path) {
                            Some(loaded) => parts.push(loaded.content.clone()),
                            None => {
                                return Err(CompilationError::PromptLoad {
                                    message: format!("Prompt file not loaded: {file_path}"),
                                    location: ErrorLocation::node(&source.id)
                                        .with_file(&file_path),
                                });
                            }
                        }
                    } else if let Some(text) = get_str(&config, "content") {
                        parts.push(text);
                    }
                }
                "context" => {
                    if let Some(file_path) = get_str(&config, "file_path") {
                        if let Some(loaded) = project.get_prompt(&file_path) {
                            parts.push(format!("## Context\n{}", loaded.content));
                        }
                    }
                }
                "variable" => {
                    let name = get_str(&config, "name").unwrap_or_default();
                    let value = get_str(&config, "value").unwrap_or_default();
                    if !name.is_empty() && !value.is_empty() {
                        parts.push(format!("{{{name}}}: {value}"));
                    }
                }
                _ => {}
            }
        }

        Ok(if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        })
    }

    fn resolve_tools(
        &self,
        node: &GraphNode,
        graph: &WorkflowGraph,
        project: &LoadedProject,
    ) -> Vec<ToolIR> {
        let mut tools: Vec<ToolIR> = Vec::new();

        for edge in graph.incoming_by_semantics(&node.id, EdgeSemantics::Tool) {
            let Some(source) = graph.get_node(&edge.source_id) else {
                continue;
            };
            if !matches!(source.node_type.as_str(), "tool" | "agentTool") {
                continue;
            }
            let config = source.config();
            let error_behavior = ErrorBehavior::parse(
                &get_str(&config, "error_behavior").unwrap_or_default(),
            );

            if let Some(file_path) = get_str(&config, "file_path") {
                if let Some(loaded) = project.get_tool(&file_path) {
                    tools.push(ToolIR {
                        name: get_str(&config, "name").unwrap_or_else(|| loaded.name.clone()),
                        file_path: Some(file_path),
                        code: None,
                        error_behavior,
                        description: get_str(&config, "description"),
                    });
                }
            } else if let Some(code) = get_str(&config, "code") {
                if !code.is_empty() {
                    let short_id: String = source.id.chars().take(8).collect();
                    tools.push(ToolIR {
                        name: get_str(&config, "name")
                            .unwrap_or_else(|| format!("tool_{short_id}")),
                        file_path: None,
                        code: Some(code),
                        error_behavior,
                        description: get_str(&config, "description"),
                    });
                }
            }
        }

        // Builtin tool names listed directly in the agent's config.
        let agent_config = node.config();
        if let Some(Value::Array(refs)) = agent_config.get("tools") {
            for tool_ref in refs {
                if let Some(name) = tool_ref.as_str() {
                    tools.push(ToolIR {
                        name: name.to_string(),
                        file_path: None,
                        code: Some(format!("# Built-in tool: {name}")),
                        error_behavior: ErrorBehavior::FailFast,
                        description: None,
                    });
                }
            }
        }

        tools
    }

    /// Wire subagent lists for explicitly composite agent nodes.
    fn wire_composite_subagents(
        &self,
        graph: &WorkflowGraph,
        all_agents: &mut HashMap<String, AgentIR>,
    ) {
        let composite_ids: Vec<(String, AgentKind)> = all_agents
            .values()
            .filter(|a| a.kind != AgentKind::Llm)
            .map(|a| (a.id.clone(), a.kind))
            .collect();

        for (id, kind) in composite_ids {
            let subagents = match kind {
                AgentKind::Sequential | AgentKind::Loop => {
                    sequential_chain_from(graph, &id, all_agents)
                }
                AgentKind::Parallel => graph
                    .outgoing_by_semantics(&id, EdgeSemantics::Parallel)
                    .iter()
                    .filter(|e| all_agents.contains_key(&e.target_id))
                    .map(|e| e.target_id.clone())
                    .collect(),
                AgentKind::Llm => Vec::new(),
            };
            if let Some(agent) = all_agents.get_mut(&id) {
                agent.subagents = subagents;
            }
        }
    }

    /// Each agent's `upstream_output_keys`: the brace-stripped output keys of
    /// its immediate sequential predecessors.
    fn populate_upstream_output_keys(
        &self,
        graph: &WorkflowGraph,
        all_agents: &mut HashMap<String, AgentIR>,
    ) {
        let ids: Vec<String> = all_agents.keys().cloned().collect();
        for id in ids {
            let mut keys: Vec<String> = Vec::new();
            for edge in graph.incoming_by_semantics(&id, EdgeSemantics::Sequential) {
                if let Some(upstream) = all_agents.get(&edge.source_id) {
                    if let Some(key) = &upstream.output_key {
                        keys.push(key.clone());
                    }
                }
            }
            keys.sort();
            keys.dedup();
            if let Some(agent) = all_agents.get_mut(&id) {
                agent.upstream_output_keys = keys;
            }
        }
    }

    fn resolve_output_files(&self, graph: &WorkflowGraph) -> Vec<OutputFileIR> {
        let mut output_files = Vec::new();
        let mut nodes: Vec<&GraphNode> = graph
            .nodes
            .values()
            .filter(|n| n.node_type == "outputFile")
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        for node in nodes {
            for edge in graph.incoming_by_semantics(&node.id, EdgeSemantics::OutputFile) {
                let Some(source) = graph.get_node(&edge.source_id) else {
                    continue;
                };
                if !source.is_agent() {
                    continue;
                }
                let config = node.config();
                let Some(file_path) = get_str(&config, "file_path").filter(|p| !p.is_empty())
                else {
                    continue;
                };
                output_files.push(OutputFileIR {
                    name: get_str(&config, "name").unwrap_or_else(|| "output".to_string()),
                    file_path,
                    agent_id: source.id.clone(),
                });
            }
        }
        output_files
    }

    /// User-input nodes in trigger mode (no incoming) or pause mode.
    /// Nodes with no outgoing agent connection are dropped.
    fn transform_user_inputs(&self, graph: &WorkflowGraph) -> Vec<UserInputIR> {
        let mut user_inputs = Vec::new();

        for node in graph.user_input_nodes() {
            let config = node.config();
            let short_id: String = node.id.chars().take(8).collect();
            let name = get_str(&config, "name").unwrap_or_else(|| format!("user_input_{short_id}"));

            let agent_endpoint = |edge_source: &str| {
                graph
                    .get_node(edge_source)
                    .filter(|n| n.is_agent())
                    .map(|n| n.id.clone())
            };

            let incoming_agent_ids: Vec<String> = graph
                .incoming_by_semantics(&node.id, EdgeSemantics::Sequential)
                .iter()
                .filter_map(|e| agent_endpoint(&e.source_id))
                .collect();
            let outgoing_agent_ids: Vec<String> = graph
                .outgoing_by_semantics(&node.id, EdgeSemantics::Sequential)
                .iter()
                .filter_map(|e| agent_endpoint(&e.target_id))
                .collect();

            if outgoing_agent_ids.is_empty() {
                continue;
            }

            user_inputs.push(UserInputIR {
                id: node.id.clone(),
                variable_name: sanitize_variable_name(&name),
                name,
                is_trigger: incoming_agent_ids.is_empty(),
                timeout_seconds: get_f64(&config, "timeout", 300.0),
                timeout_behavior: TimeoutBehavior::parse(
                    &get_str(&config, "timeoutBehavior").unwrap_or_default(),
                ),
                predefined_text: get_str(&config, "predefinedText").unwrap_or_default(),
                incoming_agent_ids,
                outgoing_agent_ids,
                source_node_id: node.id.clone(),
            });
        }

        user_inputs
    }

    fn transform_custom_nodes(&self, graph: &WorkflowGraph) -> Vec<CustomNodeIR> {
        let registry = self.registry();
        let mut custom_nodes = Vec::new();

        let mut nodes: Vec<&GraphNode> = graph.nodes.values().filter(|n| n.is_custom()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        for node in nodes {
            let unit_id = node
                .data
                .get("_unit_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| node.node_type.trim_start_matches("custom:").to_string());

            let mut input_connections: HashMap<String, Vec<ConnectionSource>> = HashMap::new();
            for edge in graph.incoming(&node.id) {
                if edge.semantics == EdgeSemantics::Link {
                    continue;
                }
                let port = edge.target_handle.clone().unwrap_or_else(|| "input".into());
                input_connections.entry(port).or_default().push(ConnectionSource {
                    node_id: edge.source_id.clone(),
                    handle: edge.source_handle.clone().unwrap_or_else(|| "output".into()),
                });
            }

            let mut output_connections: HashMap<String, Vec<String>> = HashMap::new();
            for edge in graph.outgoing(&node.id) {
                if edge.semantics == EdgeSemantics::Link {
                    continue;
                }
                let port = edge.source_handle.clone().unwrap_or_else(|| "output".into());
                output_connections
                    .entry(port)
                    .or_default()
                    .push(edge.target_id.clone());
            }

            let (output_node, always_execute, lazy_inputs) = match registry.get_unit(&unit_id) {
                Some(unit) => (
                    unit.output_node(),
                    unit.always_execute(),
                    lazy_input_ids(&unit.setup_interface()),
                ),
                None => (false, false, Vec::new()),
            };

            custom_nodes.push(CustomNodeIR {
                id: node.id.clone(),
                unit_id,
                name: node.name.clone(),
                config: node
                    .data
                    .get("config")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                input_connections,
                output_connections,
                output_node,
                always_execute,
                lazy_inputs,
                source_node_id: node.id.clone(),
            });
        }

        custom_nodes
    }

    fn transform_context_aggregators(&self, graph: &WorkflowGraph) -> Vec<ContextAggregatorIR> {
        let mut aggregators: Vec<ContextAggregatorIR> = graph
            .nodes
            .values()
            .filter(|n| n.node_type == "contextAggregator")
            .map(|node| ContextAggregatorIR {
                id: node.id.clone(),
                name: node.name.clone(),
                config: node.config(),
                source_node_id: node.id.clone(),
            })
            .collect();
        aggregators.sort_by(|a, b| a.id.cmp(&b.id));
        aggregators
    }

    fn transform_variables(
        &self,
        graph: &WorkflowGraph,
    ) -> (Vec<VariableNodeIR>, HashMap<String, String>) {
        let mut variable_nodes: Vec<VariableNodeIR> = graph
            .nodes
            .values()
            .filter(|n| n.node_type == "variable")
            .map(|node| {
                let config = node.config();
                VariableNodeIR {
                    id: node.id.clone(),
                    name: get_str(&config, "name").unwrap_or_default(),
                    value: get_str(&config, "value").unwrap_or_default(),
                    connected: graph.outgoing(&node.id).next().is_some(),
                }
            })
            .collect();
        variable_nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let global_variables = collect_global_variables(graph);
        (variable_nodes, global_variables)
    }
}

fn resolve_include_contents(config: &JsonMap) -> IncludeContents {
    match config.get("include_contents") {
        Some(Value::Bool(true)) | None => IncludeContents::Default,
        Some(Value::Bool(false)) => IncludeContents::None,
        Some(Value::String(s)) if s == "none" => IncludeContents::None,
        Some(_) => IncludeContents::Default,
    }
}

/// All agents reachable from `start` along sequential edges, depth-first,
/// excluding the start itself.
fn sequential_chain_from(
    graph: &WorkflowGraph,
    start: &str,
    all_agents: &HashMap<String, AgentIR>,
) -> Vec<String> {
    let mut chain = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        if id != start && all_agents.contains_key(&id) {
            chain.push(id.clone());
        }
        let mut targets: Vec<String> = graph
            .outgoing_by_semantics(&id, EdgeSemantics::Sequential)
            .iter()
            .map(|e| e.target_id.clone())
            .collect();
        targets.sort();
        // Reverse for stable DFS order off the stack.
        for target in targets.into_iter().rev() {
            stack.push(target);
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_variable_name_examples() {
        assert_eq!(sanitize_variable_name("Review Step"), "review_step_input");
        assert_eq!(sanitize_variable_name("My-Node"), "my_node_input");
        assert_eq!(sanitize_variable_name("123abc"), "_123abc_input");
        assert_eq!(sanitize_variable_name("!!!"), "user_input");
    }

    #[test]
    fn strip_braces_handles_plain_and_wrapped() {
        assert_eq!(strip_braces("{poem}"), "poem");
        assert_eq!(strip_braces("poem"), "poem");
        assert_eq!(strip_braces(" {poem} "), "poem");
    }

    #[test]
    fn include_contents_normalization() {
        let mut config = JsonMap::new();
        assert_eq!(resolve_include_contents(&config), IncludeContents::Default);
        config.insert("include_contents".into(), Value::Bool(true));
        assert_eq!(resolve_include_contents(&config), IncludeContents::Default);
        config.insert("include_contents".into(), Value::Bool(false));
        assert_eq!(resolve_include_contents(&config), IncludeContents::None);
        config.insert("include_contents".into(), Value::String("none".into()));
        assert_eq!(resolve_include_contents(&config), IncludeContents::None);
        config.insert("include_contents".into(), Value::String("other".into()));
        assert_eq!(resolve_include_contents(&config), IncludeContents::Default);
    }
}
