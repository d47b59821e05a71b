//! Agent hierarchy builder.
//!
//! Walks the sequential chain from the root entry and folds it into one
//! executable agent tree. Fork/join diamonds (an agent with several outgoing
//! sequential edges whose branches later converge) become a synthetic
//! parallel group inside the sequential wrapper; the walk continues from the
//! merge node. Teleporters are transparent to the walk.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{CompilationError, Result};
use crate::graph::{EdgeSemantics, WorkflowGraph};
use crate::ir::{AgentIR, AgentKind};

pub struct HierarchyBuilder<'a> {
    graph: &'a WorkflowGraph,
    default_model: String,
    counter: usize,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(graph: &'a WorkflowGraph, default_model: impl Into<String>) -> Self {
        Self {
            graph,
            default_model: default_model.into(),
            counter: 0,
        }
    }

    /// Build the root agent from the graph's root agents. Synthetic wrappers
    /// are inserted into `all_agents`; the returned id is the tree root.
    pub fn build(
        &mut self,
        roots: Vec<String>,
        all_agents: &mut HashMap<String, AgentIR>,
    ) -> Result<String> {
        match roots.len() {
            0 => Err(CompilationError::transform(
                "No root agent found (all agents have incoming edges)",
            )),
            1 => self.build_chain(&roots[0], None, all_agents),
            _ => {
                // Several independent roots run side by side.
                let mut branch_ids = Vec::new();
                for root in &roots {
                    branch_ids.push(self.build_chain(root, None, all_agents)?);
                }
                Ok(self.synth_parallel(branch_ids, all_agents))
            }
        }
    }

    /// Build the chain starting at `start`, stopping before `stop_at`.
    /// Returns the id of the agent representing the whole segment.
    fn build_chain(
        &mut self,
        start: &str,
        stop_at: Option<&str>,
        all_agents: &mut HashMap<String, AgentIR>,
    ) -> Result<String> {
        let mut sequence: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(start.to_string());

        while let Some(id) = current.take() {
            if Some(id.as_str()) == stop_at || !visited.insert(id.clone()) {
                break;
            }
            if all_agents.contains_key(&id) {
                sequence.push(id.clone());
            }

            let nexts = self.next_agents(&id);
            match nexts.len() {
                0 => {}
                1 => current = Some(nexts[0].clone()),
                _ => {
                    let merge = self.find_merge_node(&nexts);
                    // A branch whose start IS the merge node contributes no
                    // work of its own (a direct edge into the join).
                    let branch_starts: Vec<String> = nexts
                        .iter()
                        .filter(|b| Some(b.as_str()) != merge.as_deref())
                        .cloned()
                        .collect();
                    let mut branch_ids = Vec::new();
                    for branch in &branch_starts {
                        branch_ids.push(self.build_chain(branch, merge.as_deref(), all_agents)?);
                    }
                    match branch_ids.len() {
                        0 => {}
                        1 => sequence.push(branch_ids.remove(0)),
                        _ => sequence.push(self.synth_parallel(branch_ids, all_agents)),
                    }
                    current = merge;
                }
            }
        }

        match sequence.len() {
            0 => Err(CompilationError::transform(format!(
                "Failed to build agent hierarchy from '{start}'"
            ))),
            1 => Ok(sequence.remove(0)),
            _ => Ok(self.synth_sequential(sequence, all_agents)),
        }
    }

    /// Immediate downstream agents along SEQUENTIAL flow. Teleporters and
    /// start nodes are transparent; end and user-input nodes stop the walk.
    fn next_agents(&self, from: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());
        seen.insert(from.to_string());

        while let Some(id) = queue.pop_front() {
            for edge in self.graph.outgoing(&id) {
                if !matches!(
                    edge.semantics,
                    EdgeSemantics::Sequential | EdgeSemantics::Link
                ) {
                    continue;
                }
                let target_id = edge.target_id.clone();
                if !seen.insert(target_id.clone()) {
                    continue;
                }
                let Some(target) = self.graph.get_node(&target_id) else {
                    continue;
                };
                match target.node_type.as_str() {
                    "agent" => found.push(target_id),
                    "teleportOut" | "teleportIn" | "start" => queue.push_back(target_id),
                    _ => {}
                }
            }
        }

        found.sort();
        found
    }

    /// Nearest common descendant of every branch start, in BFS order of the
    /// first branch. `None` when the branches never converge.
    fn find_merge_node(&self, branches: &[String]) -> Option<String> {
        let reachable: Vec<HashSet<String>> = branches
            .iter()
            .map(|b| self.reachable_agents(b))
            .collect();

        // BFS from the first branch; a candidate must be reachable (or the
        // start itself) in every other branch.
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        queue.push_back(branches[0].clone());
        seen.insert(branches[0].clone());

        while let Some(id) = queue.pop_front() {
            let in_all = branches
                .iter()
                .zip(&reachable)
                .skip(1)
                .all(|(start, set)| *start == id || set.contains(&id));
            if in_all && id != branches[0] {
                return Some(id);
            }
            for next in self.next_agents(&id) {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn reachable_agents(&self, start: &str) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.to_string());
        while let Some(id) = queue.pop_front() {
            for next in self.next_agents(&id) {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    fn synth_agent(
        &mut self,
        kind: AgentKind,
        subagents: Vec<String>,
        all_agents: &mut HashMap<String, AgentIR>,
    ) -> String {
        self.counter += 1;
        let prefix = match kind {
            AgentKind::Parallel => "__par",
            _ => "__seq",
        };
        let id = format!("{prefix}_{}", self.counter);
        let mut agent = AgentIR::llm(id.clone(), id.clone(), self.default_model.clone());
        agent.kind = kind;
        agent.subagents = subagents;
        all_agents.insert(id.clone(), agent);
        id
    }

    fn synth_sequential(
        &mut self,
        subagents: Vec<String>,
        all_agents: &mut HashMap<String, AgentIR>,
    ) -> String {
        self.synth_agent(AgentKind::Sequential, subagents, all_agents)
    }

    fn synth_parallel(
        &mut self,
        subagents: Vec<String>,
        all_agents: &mut HashMap<String, AgentIR>,
    ) -> String {
        self.synth_agent(AgentKind::Parallel, subagents, all_agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::parser::{FlowParser, ParsedProject};
    use crate::project::{LoadedProject, Tab};
    use serde_json::{json, Value};
    use std::path::PathBuf;

    fn graph_from(nodes: Vec<Value>, edges: Vec<Value>) -> WorkflowGraph {
        let project = LoadedProject {
            path: PathBuf::from("/tmp/p"),
            name: "t".into(),
            version: "3.0".into(),
            tabs: vec![Tab {
                id: "tab1".into(),
                name: "Main".into(),
                order: 0,
                nodes,
                edges,
            }],
            prompts: Default::default(),
            tools: Default::default(),
            callbacks: Default::default(),
            schemas: Default::default(),
            logging: None,
        };
        let parsed: ParsedProject = FlowParser::new().parse_project(&project).unwrap();
        GraphBuilder::new().build(&parsed).unwrap()
    }

    fn agent(id: &str) -> Value {
        json!({"id": id, "type": "agent",
               "data": {"tabId": "tab1", "config": {"name": id, "description": "d"}}})
    }

    fn edge(id: &str, source: &str, target: &str) -> Value {
        json!({"id": id, "source": source, "target": target})
    }

    fn agents_map(graph: &WorkflowGraph) -> HashMap<String, AgentIR> {
        graph
            .agent_nodes()
            .iter()
            .map(|n| (n.id.clone(), AgentIR::llm(n.id.clone(), n.name.clone(), "m")))
            .collect()
    }

    #[test]
    fn single_agent_is_its_own_root() {
        let graph = graph_from(vec![agent("a1")], vec![]);
        let mut agents = agents_map(&graph);
        let root = HierarchyBuilder::new(&graph, "m")
            .build(vec!["a1".into()], &mut agents)
            .unwrap();
        assert_eq!(root, "a1");
        assert_eq!(agents.len(), 1);
    }

    #[test]
    fn chain_becomes_sequential_wrapper() {
        let graph = graph_from(
            vec![agent("a1"), agent("a2"), agent("a3")],
            vec![edge("e1", "a1", "a2"), edge("e2", "a2", "a3")],
        );
        let mut agents = agents_map(&graph);
        let root = HierarchyBuilder::new(&graph, "m")
            .build(vec!["a1".into()], &mut agents)
            .unwrap();

        let wrapper = &agents[&root];
        assert_eq!(wrapper.kind, AgentKind::Sequential);
        assert_eq!(wrapper.subagents, vec!["a1", "a2", "a3"]);
        // 3 originals + 1 wrapper
        assert_eq!(agents.len(), 4);
    }

    #[test]
    fn diamond_folds_into_parallel_then_merge() {
        // a1 -> (b, c) -> d
        let graph = graph_from(
            vec![agent("a1"), agent("b"), agent("c"), agent("d")],
            vec![
                edge("e1", "a1", "b"),
                edge("e2", "a1", "c"),
                edge("e3", "b", "d"),
                edge("e4", "c", "d"),
            ],
        );
        let mut agents = agents_map(&graph);
        let root = HierarchyBuilder::new(&graph, "m")
            .build(vec!["a1".into()], &mut agents)
            .unwrap();

        let wrapper = agents[&root].clone();
        assert_eq!(wrapper.kind, AgentKind::Sequential);
        assert_eq!(wrapper.subagents.len(), 3, "a1, parallel group, d");
        assert_eq!(wrapper.subagents[0], "a1");
        assert_eq!(wrapper.subagents[2], "d");

        let parallel = agents[&wrapper.subagents[1]].clone();
        assert_eq!(parallel.kind, AgentKind::Parallel);
        let mut children = parallel.subagents.clone();
        children.sort();
        assert_eq!(children, vec!["b", "c"]);
    }

    #[test]
    fn fork_without_merge_ends_after_parallel() {
        let graph = graph_from(
            vec![agent("a1"), agent("b"), agent("c")],
            vec![edge("e1", "a1", "b"), edge("e2", "a1", "c")],
        );
        let mut agents = agents_map(&graph);
        let root = HierarchyBuilder::new(&graph, "m")
            .build(vec!["a1".into()], &mut agents)
            .unwrap();

        let wrapper = agents[&root].clone();
        assert_eq!(wrapper.kind, AgentKind::Sequential);
        assert_eq!(wrapper.subagents.len(), 2);
        let parallel = agents[&wrapper.subagents[1]].clone();
        assert_eq!(parallel.kind, AgentKind::Parallel);
    }

    #[test]
    fn chain_crosses_teleporters() {
        let nodes = vec![
            agent("a1"),
            json!({"id": "out1", "type": "teleportOut",
                   "data": {"tabId": "tab1", "config": {"name": "hop"}}}),
        ];
        // Teleporter IN lives in another tab; fuse manually via two tabs.
        let project = LoadedProject {
            path: PathBuf::from("/tmp/p"),
            name: "t".into(),
            version: "3.0".into(),
            tabs: vec![
                Tab {
                    id: "tab1".into(),
                    name: "One".into(),
                    order: 0,
                    nodes,
                    edges: vec![edge("e1", "a1", "out1")],
                },
                Tab {
                    id: "tab2".into(),
                    name: "Two".into(),
                    order: 1,
                    nodes: vec![
                        json!({"id": "in1", "type": "teleportIn",
                               "data": {"tabId": "tab2", "config": {"name": "hop"}}}),
                        json!({"id": "a2", "type": "agent",
                               "data": {"tabId": "tab2", "config": {"name": "a2", "description": "d"}}}),
                    ],
                    edges: vec![edge("e2", "in1", "a2")],
                },
            ],
            prompts: Default::default(),
            tools: Default::default(),
            callbacks: Default::default(),
            schemas: Default::default(),
            logging: None,
        };
        let parsed = FlowParser::new().parse_project(&project).unwrap();
        let graph = GraphBuilder::new().build(&parsed).unwrap();

        let mut agents = agents_map(&graph);
        let root = HierarchyBuilder::new(&graph, "m")
            .build(vec!["a1".into()], &mut agents)
            .unwrap();
        assert_eq!(agents[&root].subagents, vec!["a1", "a2"]);
    }

    #[test]
    fn no_roots_is_an_error() {
        let graph = graph_from(vec![], vec![]);
        let mut agents = HashMap::new();
        let err = HierarchyBuilder::new(&graph, "m")
            .build(vec![], &mut agents)
            .unwrap_err();
        assert!(err.to_string().contains("No root agent"));
    }
}
