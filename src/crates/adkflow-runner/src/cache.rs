//! Execution result cache with IS_CHANGED gating.
//!
//! Keys are SHA-256 over a canonicalized form of `(node_id, inputs, config,
//! is_changed)`. Canonicalization folds maps into sorted key/value pairs and
//! stringifies scalars, so logically-equal inputs hash identically. The
//! IS_CHANGED comparison is equality-based except the sentinel "NaN", which
//! never equals itself and always forces execution.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::events::JsonMap;

/// True when an IS_CHANGED value means "always re-execute".
///
/// JSON numbers cannot carry a real NaN, so units signal it with the string
/// form; a float NaN smuggled through a custom Value is honored too.
fn is_nan_like(value: &Value) -> bool {
    match value {
        Value::String(s) => s == "NaN" || s == "nan",
        Value::Number(n) => n.as_f64().map(f64::is_nan).unwrap_or(false),
        _ => false,
    }
}

/// Fold a value into a canonical, order-independent shape.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                    .collect(),
            )
        }
        Value::Array(list) => Value::Array(list.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

pub struct ExecutionCache {
    #[allow(dead_code)]
    cache_dir: Option<PathBuf>,
    memory: HashMap<String, JsonMap>,
    is_changed_prev: HashMap<String, Value>,
}

impl ExecutionCache {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            memory: HashMap::new(),
            is_changed_prev: HashMap::new(),
        }
    }

    /// Stable key over node id, inputs, config, and the IS_CHANGED value.
    pub fn compute_key(
        &self,
        node_id: &str,
        inputs: &JsonMap,
        config: &JsonMap,
        is_changed_value: &Value,
    ) -> String {
        let payload = json!({
            "node_id": node_id,
            "inputs": canonicalize(&Value::Object(inputs.clone())),
            "config": canonicalize(&Value::Object(config.clone())),
            "is_changed": is_changed_value.to_string(),
        });
        let serialized = serde_json::to_string(&payload).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<&JsonMap> {
        self.memory.get(key)
    }

    pub fn set(&mut self, key: String, outputs: JsonMap) {
        self.memory.insert(key, outputs);
    }

    /// Whether the node must run, per IS_CHANGED semantics. The first run
    /// always executes.
    pub fn should_execute(
        &self,
        node_id: &str,
        is_changed_value: &Value,
        always_execute: bool,
    ) -> bool {
        if always_execute || is_nan_like(is_changed_value) {
            return true;
        }
        match self.is_changed_prev.get(node_id) {
            None => true,
            Some(prev) => prev != is_changed_value,
        }
    }

    pub fn update_is_changed(&mut self, node_id: impl Into<String>, value: Value) {
        self.is_changed_prev.insert(node_id.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn key_is_stable_under_map_ordering() {
        let cache = ExecutionCache::new(None);
        let a = map(&[("x", json!(1)), ("y", json!({"b": 2, "a": 1}))]);
        let mut b = JsonMap::new();
        b.insert("y".into(), json!({"a": 1, "b": 2}));
        b.insert("x".into(), json!(1));

        let key_a = cache.compute_key("n1", &a, &JsonMap::new(), &Value::Null);
        let key_b = cache.compute_key("n1", &b, &JsonMap::new(), &Value::Null);
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.len(), 64);
    }

    #[test]
    fn key_differs_by_node_inputs_config_and_is_changed() {
        let cache = ExecutionCache::new(None);
        let inputs = map(&[("x", json!(1))]);
        let base = cache.compute_key("n1", &inputs, &JsonMap::new(), &Value::Null);

        assert_ne!(
            base,
            cache.compute_key("n2", &inputs, &JsonMap::new(), &Value::Null)
        );
        assert_ne!(
            base,
            cache.compute_key("n1", &map(&[("x", json!(2))]), &JsonMap::new(), &Value::Null)
        );
        assert_ne!(
            base,
            cache.compute_key("n1", &inputs, &map(&[("c", json!(1))]), &Value::Null)
        );
        assert_ne!(
            base,
            cache.compute_key("n1", &inputs, &JsonMap::new(), &json!("v2"))
        );
    }

    #[test]
    fn first_run_always_executes() {
        let cache = ExecutionCache::new(None);
        assert!(cache.should_execute("n1", &json!("stable"), false));
    }

    #[test]
    fn equal_is_changed_skips_after_first_run() {
        let mut cache = ExecutionCache::new(None);
        cache.update_is_changed("n1", json!("stable"));
        assert!(!cache.should_execute("n1", &json!("stable"), false));
        assert!(cache.should_execute("n1", &json!("different"), false));
    }

    #[test]
    fn nan_always_executes() {
        let mut cache = ExecutionCache::new(None);
        cache.update_is_changed("n1", json!("NaN"));
        assert!(cache.should_execute("n1", &json!("NaN"), false));
    }

    #[test]
    fn always_execute_overrides_comparison() {
        let mut cache = ExecutionCache::new(None);
        cache.update_is_changed("n1", json!("stable"));
        assert!(cache.should_execute("n1", &json!("stable"), true));
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut cache = ExecutionCache::new(None);
        let outputs = map(&[("output", json!("value"))]);
        cache.set("key".into(), outputs.clone());
        assert_eq!(cache.get("key"), Some(&outputs));
        assert_eq!(cache.get("other"), None);
    }
}
