//! Layered graph executor for custom nodes.
//!
//! ComfyUI-style scheduling: find output sinks, trace required nodes
//! backward, partition them into topological layers with Kahn's algorithm,
//! then run each layer's nodes concurrently with per-node caching and
//! IS_CHANGED gating. Agents never execute here; the workflow runner drives
//! them and publishes their results through `external_results`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};

use adkflow_compiler::ir::{AgentIR, CustomNodeIR, WorkflowIR};
use adkflow_extensions::{ExecutionContext, ExtensionRegistry, SharedState};
use adkflow_hooks::{HookAction, HooksIntegration};

use crate::cache::ExecutionCache;
use crate::error::{Result, RunnerError};
use crate::events::{EmitFn, EventType, JsonMap, RunEvent};

#[derive(Debug, Clone)]
pub enum ExecutionNodeIr {
    Agent(AgentIR),
    Custom(CustomNodeIR),
}

#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub id: String,
    pub ir: ExecutionNodeIr,
}

impl ExecutionNode {
    pub fn custom_ir(&self) -> Option<&CustomNodeIR> {
        match &self.ir {
            ExecutionNodeIr::Custom(ir) => Some(ir),
            ExecutionNodeIr::Agent(_) => None,
        }
    }
}

/// Data-flow edge between execution nodes (or from an external upstream).
#[derive(Debug, Clone)]
pub struct ExecutionEdge {
    pub source_id: String,
    pub source_port: String,
    pub target_id: String,
    pub target_port: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    pub nodes: HashMap<String, ExecutionNode>,
    pub edges: Vec<ExecutionEdge>,
}

/// Build the custom-node execution graph from the IR, optionally restricted
/// to a node subset. Edges from agents stay in the edge list: they resolve
/// against `external_results` at input time.
pub fn build_execution_graph(ir: &WorkflowIR, subset: Option<&HashSet<String>>) -> ExecutionGraph {
    let mut graph = ExecutionGraph::default();
    for node in &ir.custom_nodes {
        if let Some(subset) = subset {
            if !subset.contains(&node.id) {
                continue;
            }
        }
        graph.nodes.insert(
            node.id.clone(),
            ExecutionNode {
                id: node.id.clone(),
                ir: ExecutionNodeIr::Custom(node.clone()),
            },
        );
        for (port, sources) in &node.input_connections {
            for source in sources {
                graph.edges.push(ExecutionEdge {
                    source_id: source.node_id.clone(),
                    source_port: source.handle.clone(),
                    target_id: node.id.clone(),
                    target_port: port.clone(),
                });
            }
        }
    }
    graph
}

/// Split custom nodes into pre-agent and post-agent sets.
///
/// A node is post-agent when any input connection resolves to an agent,
/// directly or transitively through other custom nodes; everything else runs
/// before the agent phase.
pub fn partition_custom_nodes(ir: &WorkflowIR) -> (Vec<String>, Vec<String>) {
    let agent_ids: HashSet<&str> = ir.all_agents.keys().map(String::as_str).collect();
    let mut post: HashSet<String> = HashSet::new();

    loop {
        let mut changed = false;
        for node in &ir.custom_nodes {
            if post.contains(&node.id) {
                continue;
            }
            let fed_by_agent = node.input_connections.values().flatten().any(|source| {
                agent_ids.contains(source.node_id.as_str()) || post.contains(&source.node_id)
            });
            if fed_by_agent {
                post.insert(node.id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut pre_nodes = Vec::new();
    let mut post_nodes = Vec::new();
    for node in &ir.custom_nodes {
        if post.contains(&node.id) {
            post_nodes.push(node.id.clone());
        } else {
            pre_nodes.push(node.id.clone());
        }
    }
    (pre_nodes, post_nodes)
}

pub struct GraphExecutor {
    emit: EmitFn,
    cache: Mutex<ExecutionCache>,
    enable_cache: bool,
    registry: Arc<ExtensionRegistry>,
    hooks: Option<Arc<HooksIntegration>>,
}

impl GraphExecutor {
    pub fn new(
        emit: EmitFn,
        cache_dir: Option<PathBuf>,
        enable_cache: bool,
        registry: Arc<ExtensionRegistry>,
        hooks: Option<Arc<HooksIntegration>>,
    ) -> Self {
        Self {
            emit,
            cache: Mutex::new(ExecutionCache::new(cache_dir)),
            enable_cache,
            registry,
            hooks,
        }
    }

    /// Execute the graph. Returns the union of per-node output maps,
    /// seeded with `external_results`.
    pub async fn execute(
        &self,
        graph: &ExecutionGraph,
        session_state: SharedState,
        project_path: &Path,
        session_id: &str,
        run_id: &str,
        external_results: HashMap<String, JsonMap>,
    ) -> Result<HashMap<String, JsonMap>> {
        let output_nodes = self.find_output_nodes(graph);
        if output_nodes.is_empty() {
            return Ok(HashMap::new());
        }

        let required = self.trace_dependencies(graph, &output_nodes);
        let mut layers = self.topological_layers(&required, graph)?;

        if let Some(hooks) = &self.hooks {
            let (result, new_layers) = hooks.on_execution_plan(layers.clone()).await?;
            if result.action == HookAction::Skip {
                return Ok(HashMap::new());
            }
            layers = new_layers;
        }

        let mut results: HashMap<String, JsonMap> = external_results;

        for (layer_index, mut layer) in layers.into_iter().enumerate() {
            if let Some(hooks) = &self.hooks {
                let (result, new_layer) = hooks.before_layer_execute(layer_index, layer).await?;
                if result.action == HookAction::Skip {
                    continue;
                }
                layer = new_layer;
            }
            layer.retain(|id| graph.nodes.contains_key(id));

            (self.emit)(
                RunEvent::new(EventType::LayerStart)
                    .with_data("layer", json!(layer_index))
                    .with_data("nodes", json!(layer)),
            );

            let mut tasks = Vec::new();
            for node_id in &layer {
                let Some(node) = graph.nodes.get(node_id) else {
                    continue;
                };
                let inputs = self.resolve_inputs(node, &results);
                tasks.push(self.execute_node(
                    node,
                    inputs,
                    session_state.clone(),
                    project_path,
                    session_id,
                    run_id,
                ));
            }

            let layer_outputs = futures::future::join_all(tasks).await;

            let mut layer_results: JsonMap = JsonMap::new();
            for (node_id, outcome) in layer.iter().zip(layer_outputs) {
                match outcome {
                    Ok(outputs) => {
                        results.insert(node_id.clone(), outputs.clone());
                        layer_results.insert(node_id.clone(), Value::Object(outputs));
                    }
                    Err(error) => {
                        (self.emit)(
                            RunEvent::new(EventType::CustomNodeError)
                                .with_data("node_id", json!(node_id))
                                .with_data("error", json!(error.to_string())),
                        );
                        return Err(error);
                    }
                }
            }

            if let Some(hooks) = &self.hooks {
                let (result, modified) =
                    hooks.after_layer_execute(layer_index, layer_results).await?;
                if result.action == HookAction::Replace {
                    for (node_id, value) in modified {
                        if let Value::Object(outputs) = value {
                            results.insert(node_id, outputs);
                        }
                    }
                }
            }

            (self.emit)(
                RunEvent::new(EventType::LayerEnd)
                    .with_data("layer", json!(layer_index))
                    .with_data("node_count", json!(layer.len())),
            );
        }

        Ok(results)
    }

    /// Sinks: custom nodes flagged `output_node`, plus any agent node with
    /// no outgoing edges.
    fn find_output_nodes(&self, graph: &ExecutionGraph) -> HashSet<String> {
        let sources: HashSet<&str> = graph.edges.iter().map(|e| e.source_id.as_str()).collect();
        graph
            .nodes
            .values()
            .filter(|node| match &node.ir {
                ExecutionNodeIr::Custom(ir) => ir.output_node,
                ExecutionNodeIr::Agent(_) => !sources.contains(node.id.as_str()),
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// BFS backward from the sinks, restricted to in-graph nodes.
    fn trace_dependencies(
        &self,
        graph: &ExecutionGraph,
        output_nodes: &HashSet<String>,
    ) -> HashSet<String> {
        let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &graph.edges {
            incoming
                .entry(edge.target_id.as_str())
                .or_default()
                .push(edge.source_id.as_str());
        }

        let mut required: HashSet<String> = output_nodes.clone();
        let mut queue: VecDeque<String> = output_nodes.iter().cloned().collect();
        while let Some(node_id) = queue.pop_front() {
            for source in incoming.get(node_id.as_str()).into_iter().flatten() {
                if graph.nodes.contains_key(*source) && required.insert(source.to_string()) {
                    queue.push_back(source.to_string());
                }
            }
        }
        required
    }

    /// Kahn's algorithm over the required subgraph; each layer is the set of
    /// nodes with no remaining in-graph dependencies.
    fn topological_layers(
        &self,
        required: &HashSet<String>,
        graph: &ExecutionGraph,
    ) -> Result<Vec<Vec<String>>> {
        if required.is_empty() {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<&str, usize> =
            required.iter().map(|n| (n.as_str(), 0)).collect();
        for edge in &graph.edges {
            if required.contains(&edge.target_id) && required.contains(&edge.source_id) {
                *in_degree.get_mut(edge.target_id.as_str()).unwrap() += 1;
            }
        }

        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut remaining: HashSet<&str> = required.iter().map(String::as_str).collect();

        while !remaining.is_empty() {
            let mut layer: Vec<String> = remaining
                .iter()
                .filter(|n| in_degree[**n] == 0)
                .map(|n| n.to_string())
                .collect();
            if layer.is_empty() {
                let mut stuck: Vec<String> = remaining.iter().map(|n| n.to_string()).collect();
                stuck.sort();
                return Err(RunnerError::CycleDetected(stuck));
            }
            layer.sort();

            for node in &layer {
                remaining.remove(node.as_str());
                for edge in &graph.edges {
                    if edge.source_id == *node && remaining.contains(edge.target_id.as_str()) {
                        *in_degree.get_mut(edge.target_id.as_str()).unwrap() -= 1;
                    }
                }
            }
            layers.push(layer);
        }

        Ok(layers)
    }

    /// Resolve a node's input ports from upstream results. Each port reads
    /// the first available source; the declared handle wins, falling back to
    /// the source's first output value.
    fn resolve_inputs(
        &self,
        node: &ExecutionNode,
        results: &HashMap<String, JsonMap>,
    ) -> JsonMap {
        let mut inputs = JsonMap::new();
        let Some(ir) = node.custom_ir() else {
            return inputs;
        };

        for (port, sources) in &ir.input_connections {
            for source in sources {
                let Some(outputs) = results.get(&source.node_id) else {
                    continue;
                };
                if outputs.is_empty() {
                    break;
                }
                let value = outputs
                    .get(&source.handle)
                    .or_else(|| outputs.values().next())
                    .cloned();
                if let Some(value) = value {
                    inputs.insert(port.clone(), value);
                }
                break;
            }
        }
        inputs
    }

    async fn execute_node(
        &self,
        node: &ExecutionNode,
        inputs: JsonMap,
        session_state: SharedState,
        project_path: &Path,
        session_id: &str,
        run_id: &str,
    ) -> Result<JsonMap> {
        match &node.ir {
            ExecutionNodeIr::Custom(ir) => {
                self.execute_custom_node(ir, inputs, session_state, project_path, session_id, run_id)
                    .await
            }
            ExecutionNodeIr::Agent(_) => Err(RunnerError::AgentInGraph(node.id.clone())),
        }
    }

    async fn execute_custom_node(
        &self,
        ir: &CustomNodeIR,
        mut inputs: JsonMap,
        session_state: SharedState,
        project_path: &Path,
        session_id: &str,
        run_id: &str,
    ) -> Result<JsonMap> {
        let unit = self
            .registry
            .get_unit(&ir.unit_id)
            .ok_or_else(|| RunnerError::Execution(format!("FlowUnit not found: {}", ir.unit_id)))?;

        let mut config = ir.config.clone();
        if let Some(hooks) = &self.hooks {
            let (result, new_inputs, new_config) = hooks
                .before_node_execute(&ir.id, &ir.name, &ir.unit_id, inputs.clone(), config.clone())
                .await?;
            match result.action {
                HookAction::Skip => return Ok(JsonMap::new()),
                HookAction::Replace => {
                    // A hook may supply outputs directly and bypass the unit.
                    if let Some(Value::Object(outputs)) = result.modified_data {
                        return Ok(outputs);
                    }
                    inputs = new_inputs;
                    config = new_config;
                }
                _ => {
                    inputs = new_inputs;
                    config = new_config;
                }
            }
        }

        let is_changed_value = unit.is_changed(&config, &inputs);

        if self.enable_cache && !ir.always_execute {
            let cache = self.cache.lock();
            let key = cache.compute_key(&ir.id, &inputs, &config, &is_changed_value);
            if !cache.should_execute(&ir.id, &is_changed_value, ir.always_execute) {
                if let Some(cached) = cache.get(&key) {
                    let cached = cached.clone();
                    drop(cache);
                    (self.emit)(
                        RunEvent::new(EventType::CustomNodeCacheHit)
                            .with_data("node_id", json!(ir.id))
                            .with_data("node_name", json!(ir.name)),
                    );
                    return Ok(cached);
                }
            }
        }

        if !ir.lazy_inputs.is_empty() {
            tracing::debug!(
                node_id = %ir.id,
                lazy = ?ir.lazy_inputs,
                "Node declares lazy inputs"
            );
        }

        (self.emit)(
            RunEvent::new(EventType::CustomNodeStart)
                .with_data("node_id", json!(ir.id))
                .with_data("node_name", json!(ir.name)),
        );
        let started = Instant::now();

        let emit = self.emit.clone();
        let ctx = ExecutionContext {
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            node_id: ir.id.clone(),
            node_name: ir.name.clone(),
            project_path: project_path.to_path_buf(),
            state: session_state,
            emit: Some(Arc::new(move |payload: Value| {
                let mut event = RunEvent::new(EventType::NodeEvent);
                if let Value::Object(map) = payload {
                    event.data = map;
                }
                emit(event);
            })),
        };

        let execution = async {
            unit.on_before_execute(&ctx).await?;
            let outputs = unit.run_process(&inputs, &config, &ctx).await?;
            unit.on_after_execute(&ctx, &outputs).await?;
            Ok::<JsonMap, adkflow_extensions::ExtensionError>(outputs)
        };

        match execution.await {
            Ok(mut outputs) => {
                let duration = started.elapsed().as_secs_f64();

                if let Some(hooks) = &self.hooks {
                    let (_result, new_outputs) = hooks
                        .after_node_execute(&ir.id, &ir.name, &ir.unit_id, outputs)
                        .await?;
                    outputs = new_outputs;
                }

                (self.emit)(
                    RunEvent::new(EventType::CustomNodeEnd)
                        .with_data("node_id", json!(ir.id))
                        .with_data("node_name", json!(ir.name))
                        .with_data("duration", json!(duration))
                        .with_data(
                            "output_keys",
                            json!(outputs.keys().cloned().collect::<Vec<_>>()),
                        ),
                );

                if self.enable_cache && !ir.always_execute {
                    let mut cache = self.cache.lock();
                    let key = cache.compute_key(&ir.id, &inputs, &config, &is_changed_value);
                    cache.set(key, outputs.clone());
                    cache.update_is_changed(&ir.id, is_changed_value);
                }

                Ok(outputs)
            }
            Err(error) => {
                if let Some(hooks) = &self.hooks {
                    let (result, fallback) = hooks
                        .on_node_error(&ir.id, &ir.name, &ir.unit_id, &error.to_string())
                        .await?;
                    match result.action {
                        HookAction::Skip => return Ok(JsonMap::new()),
                        HookAction::Replace => {
                            if let Some(fallback) = fallback {
                                return Ok(match fallback {
                                    Value::Object(map) => map,
                                    other => {
                                        let mut map = JsonMap::new();
                                        map.insert("output".into(), other);
                                        map
                                    }
                                });
                            }
                        }
                        _ => {}
                    }
                }

                (self.emit)(
                    RunEvent::new(EventType::CustomNodeError)
                        .with_data("node_id", json!(ir.id))
                        .with_data("node_name", json!(ir.name))
                        .with_data("error", json!(error.to_string())),
                );
                Err(RunnerError::node_execution(&ir.id, error.to_string()))
            }
        }
    }
}
