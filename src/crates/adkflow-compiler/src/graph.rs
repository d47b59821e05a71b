//! Graph builder: typed nodes/edges into one connected workflow graph.
//!
//! The builder fuses every tab, infers edge semantics from handle names and
//! endpoint node types, pairs teleporters across tabs with synthetic LINK
//! edges, and computes entry nodes.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{CompilationError, Result};
use crate::parser::{get_node_config, JsonMap, ParsedNode, ParsedProject};

/// What an edge means for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeSemantics {
    Sequential,
    Parallel,
    Instruction,
    Context,
    Tool,
    OutputFile,
    Link,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    /// Display name from config, falling back to the node id.
    pub name: String,
    pub data: JsonMap,
    pub tab_id: String,
    pub parent_id: Option<String>,
}

impl GraphNode {
    pub fn config(&self) -> JsonMap {
        get_node_config(&self.data)
    }

    pub fn is_agent(&self) -> bool {
        self.node_type == "agent"
    }

    pub fn is_custom(&self) -> bool {
        self.node_type.starts_with("custom:")
    }
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub semantics: EdgeSemantics,
}

/// A matched teleporter OUT/IN pair (same name, distinct tabs).
#[derive(Debug, Clone)]
pub struct TeleporterPair {
    pub name: String,
    pub output_node_id: String,
    pub output_tab_id: String,
    pub input_node_id: String,
    pub input_tab_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    pub nodes: HashMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub teleporter_pairs: Vec<TeleporterPair>,
    pub entry_nodes: Vec<String>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl WorkflowGraph {
    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id)
    }

    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn outgoing_by_semantics(&self, id: &str, semantics: EdgeSemantics) -> Vec<&GraphEdge> {
        self.outgoing(id)
            .filter(|e| e.semantics == semantics)
            .collect()
    }

    pub fn incoming_by_semantics(&self, id: &str, semantics: EdgeSemantics) -> Vec<&GraphEdge> {
        self.incoming(id)
            .filter(|e| e.semantics == semantics)
            .collect()
    }

    pub fn agent_nodes(&self) -> Vec<&GraphNode> {
        let mut nodes: Vec<_> = self.nodes.values().filter(|n| n.is_agent()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn user_input_nodes(&self) -> Vec<&GraphNode> {
        let mut nodes: Vec<_> = self
            .nodes
            .values()
            .filter(|n| n.node_type == "userInput")
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Agents with no incoming SEQUENTIAL edge from another agent.
    pub fn root_agents(&self) -> Vec<&GraphNode> {
        self.agent_nodes()
            .into_iter()
            .filter(|node| {
                !self
                    .incoming_by_semantics(&node.id, EdgeSemantics::Sequential)
                    .iter()
                    .any(|edge| {
                        self.get_node(&edge.source_id)
                            .map(GraphNode::is_agent)
                            .unwrap_or(false)
                    })
            })
            .collect()
    }

    fn rebuild_indexes(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        for (i, edge) in self.edges.iter().enumerate() {
            self.outgoing
                .entry(edge.source_id.clone())
                .or_default()
                .push(i);
            self.incoming
                .entry(edge.target_id.clone())
                .or_default()
                .push(i);
        }
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, parsed: &ParsedProject) -> Result<WorkflowGraph> {
        let mut graph = WorkflowGraph::default();

        for node in parsed.all_nodes() {
            let config = get_node_config(&node.data);
            let name = config
                .get("name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(&node.id)
                .to_string();
            graph.nodes.insert(
                node.id.clone(),
                GraphNode {
                    id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    name,
                    data: node.data.clone(),
                    tab_id: node.tab_id.clone(),
                    parent_id: node.parent_id.clone(),
                },
            );
        }

        for edge in parsed.all_edges() {
            let source = parsed.get_node(&edge.source_id).ok_or_else(|| {
                CompilationError::GraphBuild(format!(
                    "Edge '{}' references missing source '{}'",
                    edge.id, edge.source_id
                ))
            })?;
            let target = parsed.get_node(&edge.target_id).ok_or_else(|| {
                CompilationError::GraphBuild(format!(
                    "Edge '{}' references missing target '{}'",
                    edge.id, edge.target_id
                ))
            })?;
            let semantics = infer_semantics(
                source,
                target,
                edge.source_handle.as_deref(),
                edge.target_handle.as_deref(),
            );
            graph.edges.push(GraphEdge {
                id: edge.id.clone(),
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
                source_handle: edge.source_handle.clone(),
                target_handle: edge.target_handle.clone(),
                semantics,
            });
        }

        pair_teleporters(&mut graph)?;
        graph.rebuild_indexes();
        compute_entry_nodes(&mut graph);

        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            teleporters = graph.teleporter_pairs.len(),
            entries = graph.entry_nodes.len(),
            "Workflow graph built"
        );

        Ok(graph)
    }
}

/// Fixed decision table mapping an edge's handles and endpoint types to
/// semantics. Handles win over node types; `link-` handles mark teleporter
/// geometry and never carry data flow.
fn infer_semantics(
    source: &ParsedNode,
    target: &ParsedNode,
    source_handle: Option<&str>,
    target_handle: Option<&str>,
) -> EdgeSemantics {
    let sh = source_handle.unwrap_or("");
    let th = target_handle.unwrap_or("");

    if sh.starts_with("link-") || th.starts_with("link-") {
        return EdgeSemantics::Link;
    }
    if sh == "parallel" || th == "parallel" {
        return EdgeSemantics::Parallel;
    }
    if th.contains("tool") || matches!(source.node_type.as_str(), "tool" | "agentTool") {
        return EdgeSemantics::Tool;
    }
    if th.contains("instruction") || th.contains("prompt") || source.node_type == "prompt" {
        return EdgeSemantics::Instruction;
    }
    if th.contains("context")
        || source.node_type == "context"
        || source.node_type == "contextAggregator"
    {
        return EdgeSemantics::Context;
    }
    if source.node_type == "variable" {
        // A variable wired into an agent contributes to its instruction.
        return EdgeSemantics::Instruction;
    }
    if target.node_type == "outputFile" || th.contains("file") {
        return EdgeSemantics::OutputFile;
    }
    // A parallel composite fans out to its children.
    if source.node_type == "agent"
        && target.node_type == "agent"
        && get_node_config(&source.data)
            .get("type")
            .and_then(Value::as_str)
            == Some("parallel")
    {
        return EdgeSemantics::Parallel;
    }
    EdgeSemantics::Sequential
}

/// Match teleporter OUT nodes to IN nodes by name and add a synthetic LINK
/// edge per pair so downstream passes see one connected graph.
fn pair_teleporters(graph: &mut WorkflowGraph) -> Result<()> {
    let mut outs: HashMap<String, (String, String)> = HashMap::new();
    let mut ins: HashMap<String, (String, String)> = HashMap::new();

    for node in graph.nodes.values() {
        let name = node.name.clone();
        match node.node_type.as_str() {
            "teleportOut" => {
                outs.insert(name, (node.id.clone(), node.tab_id.clone()));
            }
            "teleportIn" => {
                ins.insert(name, (node.id.clone(), node.tab_id.clone()));
            }
            _ => {}
        }
    }

    for (name, (out_id, out_tab)) in outs {
        let Some((in_id, in_tab)) = ins.get(&name).cloned() else {
            tracing::warn!(teleporter = %name, "Teleporter OUT has no matching IN");
            continue;
        };
        if out_tab == in_tab {
            return Err(CompilationError::GraphBuild(format!(
                "Teleporter '{name}' has both ends in tab '{out_tab}'"
            )));
        }
        graph.edges.push(GraphEdge {
            id: format!("link-{name}"),
            source_id: out_id.clone(),
            target_id: in_id.clone(),
            source_handle: None,
            target_handle: None,
            semantics: EdgeSemantics::Link,
        });
        graph.teleporter_pairs.push(TeleporterPair {
            name,
            output_node_id: out_id,
            output_tab_id: out_tab,
            input_node_id: in_id,
            input_tab_id: in_tab,
        });
    }

    Ok(())
}

/// Entry nodes: `start` nodes, plus any node with no incoming SEQUENTIAL edge.
fn compute_entry_nodes(graph: &mut WorkflowGraph) {
    let mut entries = Vec::new();
    for node in graph.nodes.values() {
        if node.node_type == "start" {
            entries.push(node.id.clone());
            continue;
        }
        let has_sequential_in = graph
            .incoming(&node.id)
            .any(|e| e.semantics == EdgeSemantics::Sequential);
        if !has_sequential_in {
            entries.push(node.id.clone());
        }
    }
    entries.sort();
    graph.entry_nodes = entries;
}
