//! Global-variable substitution.
//!
//! Unconnected Variable nodes define `{name}` tokens that get replaced in
//! every string field of every node's data, recursively through nested maps
//! and lists. Unknown tokens stay literal; non-string values are untouched.
//! The pass is idempotent as long as variable values contain no tokens of
//! their own.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::graph::WorkflowGraph;
use crate::parser::get_node_config;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

/// Variables defined by Variable nodes with no outgoing edges.
pub fn collect_global_variables(graph: &WorkflowGraph) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    for node in graph.nodes.values() {
        if node.node_type != "variable" {
            continue;
        }
        if graph.outgoing(&node.id).next().is_some() {
            continue;
        }
        let config = get_node_config(&node.data);
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let value = config
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !name.is_empty() {
            variables.insert(name.to_string(), value.to_string());
        }
    }
    variables
}

/// Replace `{name}` tokens in every node's data. Returns the number of
/// token replacements performed.
pub fn substitute_globals(graph: &mut WorkflowGraph, variables: &HashMap<String, String>) -> usize {
    if variables.is_empty() {
        return 0;
    }
    let mut count = 0;
    for node in graph.nodes.values_mut() {
        for value in node.data.values_mut() {
            count += substitute_value(value, variables);
        }
    }
    if count > 0 {
        tracing::debug!(replacements = count, "Global variable substitution applied");
    }
    count
}

fn substitute_value(value: &mut Value, variables: &HashMap<String, String>) -> usize {
    match value {
        Value::String(s) => {
            let mut count = 0;
            let replaced = token_pattern().replace_all(s, |caps: &regex::Captures<'_>| {
                match variables.get(&caps[1]) {
                    Some(replacement) => {
                        count += 1;
                        replacement.clone()
                    }
                    None => caps[0].to_string(),
                }
            });
            if count > 0 {
                *s = replaced.into_owned();
            }
            count
        }
        Value::Object(map) => map
            .values_mut()
            .map(|v| substitute_value(v, variables))
            .sum(),
        Value::Array(list) => list
            .iter_mut()
            .map(|v| substitute_value(v, variables))
            .sum(),
        _ => 0,
    }
}
