//! Flow parser: raw tab JSON into typed nodes and edges.
//!
//! A pure transformation; no file or registry access. Nodes typed
//! `custom:<unit_id>` get `_unit_id` stashed into their data so later stages
//! treat the unit id uniformly.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::project::LoadedProject;

pub type JsonMap = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub id: String,
    pub node_type: String,
    pub position: Position,
    pub data: JsonMap,
    pub tab_id: String,
    pub parent_id: Option<String>,
    pub extent: Option<String>,
    pub measured: Option<Value>,
    pub handle_positions: JsonMap,
}

#[derive(Debug, Clone)]
pub struct ParsedEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub animated: bool,
}

/// One tab's parsed flow.
#[derive(Debug, Clone)]
pub struct ParsedFlow {
    pub tab_id: String,
    pub nodes: Vec<ParsedNode>,
    pub edges: Vec<ParsedEdge>,
}

/// The whole parsed project with lookup helpers.
#[derive(Debug, Clone, Default)]
pub struct ParsedProject {
    pub flows: Vec<ParsedFlow>,
}

impl ParsedProject {
    pub fn all_nodes(&self) -> impl Iterator<Item = &ParsedNode> {
        self.flows.iter().flat_map(|f| f.nodes.iter())
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &ParsedEdge> {
        self.flows.iter().flat_map(|f| f.edges.iter())
    }

    pub fn get_node(&self, id: &str) -> Option<&ParsedNode> {
        self.all_nodes().find(|n| n.id == id)
    }

    pub fn get_edges_from(&self, id: &str) -> Vec<&ParsedEdge> {
        self.all_edges().filter(|e| e.source_id == id).collect()
    }

    pub fn get_edges_to(&self, id: &str) -> Vec<&ParsedEdge> {
        self.all_edges().filter(|e| e.target_id == id).collect()
    }

    pub fn get_children(&self, parent_id: &str) -> Vec<&ParsedNode> {
        self.all_nodes()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .collect()
    }

    pub fn get_nodes_by_type(&self, node_type: &str) -> Vec<&ParsedNode> {
        self.all_nodes()
            .filter(|n| n.node_type == node_type)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct FlowParser;

impl FlowParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_project(&self, project: &LoadedProject) -> Result<ParsedProject> {
        let mut flows = Vec::with_capacity(project.tabs.len());
        for tab in &project.tabs {
            let nodes = tab
                .nodes
                .iter()
                .filter_map(|raw| parse_node(raw, &tab.id))
                .collect();
            let edges = tab.edges.iter().filter_map(parse_edge).collect();
            flows.push(ParsedFlow {
                tab_id: tab.id.clone(),
                nodes,
                edges,
            });
        }
        Ok(ParsedProject { flows })
    }
}

fn parse_node(raw: &Value, tab_id: &str) -> Option<ParsedNode> {
    let id = raw.get("id")?.as_str()?.to_string();
    let raw_type = raw.get("type").and_then(Value::as_str).unwrap_or("default");

    let mut data = raw
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    // Custom unit nodes carry their unit id in the type tag.
    let node_type = if let Some(unit_id) = raw_type.strip_prefix("custom:") {
        data.insert("_unit_id".to_string(), Value::String(unit_id.to_string()));
        raw_type.to_string()
    } else {
        raw_type.to_string()
    };

    let position = raw
        .get("position")
        .map(|p| Position {
            x: p.get("x").and_then(Value::as_f64).unwrap_or(0.0),
            y: p.get("y").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .unwrap_or_default();

    let parent_id = raw
        .get("parentId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let extent = raw.get("extent").and_then(Value::as_str).map(str::to_string);
    let measured = raw.get("measured").cloned();
    let handle_positions = data
        .get("handlePositions")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Some(ParsedNode {
        id,
        node_type,
        position,
        data,
        tab_id: tab_id.to_string(),
        parent_id,
        extent,
        measured,
        handle_positions,
    })
}

fn parse_edge(raw: &Value) -> Option<ParsedEdge> {
    Some(ParsedEdge {
        id: raw.get("id")?.as_str()?.to_string(),
        source_id: raw.get("source")?.as_str()?.to_string(),
        target_id: raw.get("target")?.as_str()?.to_string(),
        source_handle: raw
            .get("sourceHandle")
            .and_then(Value::as_str)
            .map(str::to_string),
        target_handle: raw
            .get("targetHandle")
            .and_then(Value::as_str)
            .map(str::to_string),
        animated: raw.get("animated").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Node `data.config` when present, otherwise `data` itself. Several node
/// shapes store their settings at either level.
pub fn get_node_config(data: &JsonMap) -> JsonMap {
    match data.get("config") {
        Some(Value::Object(config)) => config.clone(),
        _ => data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Tab;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn project_with(nodes: Vec<Value>, edges: Vec<Value>) -> LoadedProject {
        LoadedProject {
            path: PathBuf::from("/tmp/project"),
            name: "test".into(),
            version: "3.0".into(),
            tabs: vec![Tab {
                id: "tab1".into(),
                name: "Main".into(),
                order: 0,
                nodes,
                edges,
            }],
            prompts: HashMap::new(),
            tools: HashMap::new(),
            callbacks: HashMap::new(),
            schemas: HashMap::new(),
            logging: None,
        }
    }

    #[test]
    fn parses_nodes_and_edges() {
        let project = project_with(
            vec![
                json!({"id": "n1", "type": "agent", "position": {"x": 10.0, "y": 20.0},
                       "data": {"tabId": "tab1", "config": {"name": "A"}}}),
                json!({"id": "n2", "type": "prompt", "data": {"tabId": "tab1"}}),
            ],
            vec![json!({"id": "e1", "source": "n2", "target": "n1",
                        "sourceHandle": "output", "targetHandle": "instruction"})],
        );

        let parsed = FlowParser::new().parse_project(&project).unwrap();
        assert_eq!(parsed.flows.len(), 1);
        let node = parsed.get_node("n1").unwrap();
        assert_eq!(node.node_type, "agent");
        assert_eq!(node.position, Position { x: 10.0, y: 20.0 });
        let edge = &parsed.flows[0].edges[0];
        assert_eq!(edge.source_handle.as_deref(), Some("output"));
        assert_eq!(edge.target_handle.as_deref(), Some("instruction"));
        assert!(!edge.animated);
    }

    #[test]
    fn custom_type_stashes_unit_id() {
        let project = project_with(
            vec![json!({"id": "c1", "type": "custom:my.unit", "data": {"tabId": "tab1"}})],
            vec![],
        );
        let parsed = FlowParser::new().parse_project(&project).unwrap();
        let node = parsed.get_node("c1").unwrap();
        assert_eq!(node.node_type, "custom:my.unit");
        assert_eq!(node.data.get("_unit_id"), Some(&json!("my.unit")));
    }

    #[test]
    fn helpers_filter_by_relation() {
        let project = project_with(
            vec![
                json!({"id": "parent", "type": "group", "data": {}}),
                json!({"id": "child", "type": "agent", "parentId": "parent", "data": {}}),
                json!({"id": "other", "type": "agent", "data": {}}),
            ],
            vec![
                json!({"id": "e1", "source": "child", "target": "other"}),
                json!({"id": "e2", "source": "other", "target": "child"}),
            ],
        );
        let parsed = FlowParser::new().parse_project(&project).unwrap();
        assert_eq!(parsed.get_children("parent").len(), 1);
        assert_eq!(parsed.get_edges_from("child").len(), 1);
        assert_eq!(parsed.get_edges_to("child").len(), 1);
        assert_eq!(parsed.get_nodes_by_type("agent").len(), 2);
    }

    #[test]
    fn node_config_falls_back_to_data() {
        let mut with_config = JsonMap::new();
        with_config.insert("config".into(), json!({"name": "inner"}));
        assert_eq!(get_node_config(&with_config).get("name"), Some(&json!("inner")));

        let mut flat = JsonMap::new();
        flat.insert("name".into(), json!("flat"));
        assert_eq!(get_node_config(&flat).get("name"), Some(&json!("flat")));
    }
}
