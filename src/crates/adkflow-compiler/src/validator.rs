//! Workflow validator.
//!
//! Structural checks over the graph and IR. Errors are fatal to the
//! compile; warnings are logged and carried in the report.

use std::collections::{HashMap, HashSet};

use crate::graph::{EdgeSemantics, WorkflowGraph};
use crate::ir::{AgentKind, WorkflowIR};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub message: String,
    pub node_id: Option<String>,
}

impl ValidationIssue {
    fn new(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.clone())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Default)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, graph: &WorkflowGraph, ir: &WorkflowIR) -> ValidationReport {
        let mut report = ValidationReport::default();

        self.check_start_nodes(graph, &mut report);
        self.check_cycles(graph, &mut report);
        self.check_agent_names(ir, &mut report);
        self.check_agent_configs(graph, ir, &mut report);
        self.check_tools(ir, &mut report);

        for warning in &report.warnings {
            tracing::warn!(node_id = ?warning.node_id, "{}", warning.message);
        }
        report
    }

    fn check_start_nodes(&self, graph: &WorkflowGraph, report: &mut ValidationReport) {
        let starts: Vec<_> = graph
            .nodes
            .values()
            .filter(|n| n.node_type == "start")
            .collect();
        if starts.len() > 1 {
            report.errors.push(ValidationIssue::new(
                format!("Workflow has {} start nodes, expected at most one", starts.len()),
                None,
            ));
        }
        for start in starts {
            if graph.outgoing(&start.id).next().is_none() {
                report.warnings.push(ValidationIssue::new(
                    "Start node is not connected to anything",
                    Some(&start.id),
                ));
            }
        }
    }

    /// The SEQUENTIAL ∪ PARALLEL subgraph must be acyclic.
    fn check_cycles(&self, graph: &WorkflowGraph, report: &mut ValidationReport) {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &graph.edges {
            if matches!(
                edge.semantics,
                EdgeSemantics::Sequential | EdgeSemantics::Parallel
            ) {
                adjacency
                    .entry(edge.source_id.as_str())
                    .or_default()
                    .push(edge.target_id.as_str());
            }
        }

        let mut done: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            done: &mut HashSet<&'a str>,
            in_progress: &mut HashSet<&'a str>,
        ) -> bool {
            if done.contains(node) {
                return false;
            }
            if !in_progress.insert(node) {
                return true;
            }
            let mut cyclic = false;
            for next in adjacency.get(node).into_iter().flatten() {
                if visit(next, adjacency, done, in_progress) {
                    cyclic = true;
                    break;
                }
            }
            in_progress.remove(node);
            done.insert(node);
            cyclic
        }

        let ids: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
        for id in ids {
            if visit(id, &adjacency, &mut done, &mut in_progress) {
                report.errors.push(ValidationIssue::new(
                    "Cycle detected in sequential/parallel flow",
                    Some(id),
                ));
                return;
            }
        }
    }

    fn check_agent_names(&self, ir: &WorkflowIR, report: &mut ValidationReport) {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        let mut agents: Vec<_> = ir.all_agents.values().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        for agent in agents {
            if let Some(first) = seen.insert(agent.name.as_str(), agent.id.as_str()) {
                report.errors.push(ValidationIssue::new(
                    format!(
                        "Duplicate agent name '{}' (nodes '{}' and '{}')",
                        agent.name, first, agent.id
                    ),
                    Some(&agent.id),
                ));
            }
        }
    }

    fn check_agent_configs(
        &self,
        graph: &WorkflowGraph,
        ir: &WorkflowIR,
        report: &mut ValidationReport,
    ) {
        let mut agents: Vec<_> = ir.all_agents.values().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));

        for agent in agents {
            let synthetic = agent.id.starts_with("__");

            if !synthetic && agent.description.as_deref().unwrap_or("").is_empty() {
                report.errors.push(ValidationIssue::new(
                    format!("Agent '{}' has no description", agent.name),
                    Some(&agent.id),
                ));
            }

            if agent.kind == AgentKind::Llm && agent.instruction.is_none() {
                let has_instruction_edge = graph.incoming(&agent.id).any(|e| {
                    matches!(
                        e.semantics,
                        EdgeSemantics::Instruction | EdgeSemantics::Context
                    )
                });
                if !synthetic && !has_instruction_edge {
                    report.warnings.push(ValidationIssue::new(
                        format!("LLM agent '{}' has no instruction or prompt", agent.name),
                        Some(&agent.id),
                    ));
                }
            }

            if agent.kind == AgentKind::Loop && agent.max_iterations < 1 {
                report.errors.push(ValidationIssue::new(
                    format!(
                        "Loop agent '{}' must have max_iterations >= 1",
                        agent.name
                    ),
                    Some(&agent.id),
                ));
            }

            if !(0.0..=2.0).contains(&agent.temperature) {
                report.warnings.push(ValidationIssue::new(
                    format!(
                        "Agent '{}' temperature {} is outside [0, 2]",
                        agent.name, agent.temperature
                    ),
                    Some(&agent.id),
                ));
            }
        }
    }

    fn check_tools(&self, ir: &WorkflowIR, report: &mut ValidationReport) {
        let mut agents: Vec<_> = ir.all_agents.values().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        for agent in agents {
            for tool in &agent.tools {
                if !tool.is_well_formed() {
                    report.errors.push(ValidationIssue::new(
                        format!(
                            "Tool '{}' on agent '{}' must have exactly one of code or file_path",
                            tool.name, agent.name
                        ),
                        Some(&agent.id),
                    ));
                }
            }
        }
    }
}
