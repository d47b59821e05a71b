//! Behavior catalog backing declarative extension packages.
//!
//! A declared unit binds to a named [`UnitBehavior`]. The catalog ships a
//! small builtin set; the host process registers richer behaviors (shell,
//! HTTP) at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Result;
use crate::unit::{ExecutionContext, JsonMap};

/// Named computation bound to declared units and hooks.
#[async_trait]
pub trait UnitBehavior: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        ctx: &ExecutionContext,
    ) -> Result<JsonMap>;

    fn is_changed(&self, _config: &JsonMap, _inputs: &JsonMap) -> Value {
        Value::Null
    }
}

/// Registry of named behaviors, shared by the extension registry.
pub struct BehaviorCatalog {
    behaviors: RwLock<HashMap<String, Arc<dyn UnitBehavior>>>,
}

impl BehaviorCatalog {
    /// Catalog pre-seeded with the builtin behaviors.
    pub fn with_builtins() -> Self {
        let catalog = Self {
            behaviors: RwLock::new(HashMap::new()),
        };
        catalog.register(Arc::new(PassthroughBehavior));
        catalog.register(Arc::new(TemplateBehavior));
        catalog.register(Arc::new(StateGetBehavior));
        catalog.register(Arc::new(StateSetBehavior));
        catalog
    }

    pub fn register(&self, behavior: Arc<dyn UnitBehavior>) {
        self.behaviors
            .write()
            .insert(behavior.name().to_string(), behavior);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UnitBehavior>> {
        self.behaviors.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.behaviors.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Forwards inputs to outputs unchanged.
pub struct PassthroughBehavior;

#[async_trait]
impl UnitBehavior for PassthroughBehavior {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn run(
        &self,
        inputs: &JsonMap,
        _config: &JsonMap,
        _ctx: &ExecutionContext,
    ) -> Result<JsonMap> {
        Ok(inputs.clone())
    }
}

/// Renders `config.template`, replacing `{port}` tokens with input values.
pub struct TemplateBehavior;

#[async_trait]
impl UnitBehavior for TemplateBehavior {
    fn name(&self) -> &str {
        "template"
    }

    async fn run(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        _ctx: &ExecutionContext,
    ) -> Result<JsonMap> {
        let template = config
            .get("template")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut rendered = template.to_string();
        for (key, value) in inputs {
            rendered = rendered.replace(&format!("{{{key}}}"), &value_to_string(value));
        }
        let mut outputs = JsonMap::new();
        outputs.insert("output".into(), Value::String(rendered));
        Ok(outputs)
    }
}

/// Reads `config.key` from the shared session state.
pub struct StateGetBehavior;

#[async_trait]
impl UnitBehavior for StateGetBehavior {
    fn name(&self) -> &str {
        "state_get"
    }

    async fn run(
        &self,
        _inputs: &JsonMap,
        config: &JsonMap,
        ctx: &ExecutionContext,
    ) -> Result<JsonMap> {
        let key = config.get("key").and_then(Value::as_str).unwrap_or("");
        let value = ctx.state_get(key).unwrap_or(Value::Null);
        let mut outputs = JsonMap::new();
        outputs.insert("output".into(), value);
        Ok(outputs)
    }
}

/// Writes the `value` input into the shared session state under `config.key`.
pub struct StateSetBehavior;

#[async_trait]
impl UnitBehavior for StateSetBehavior {
    fn name(&self) -> &str {
        "state_set"
    }

    async fn run(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        ctx: &ExecutionContext,
    ) -> Result<JsonMap> {
        let key = config.get("key").and_then(Value::as_str).unwrap_or("");
        let value = inputs.get("value").cloned().unwrap_or(Value::Null);
        if !key.is_empty() {
            ctx.state_set(key, value.clone());
        }
        let mut outputs = JsonMap::new();
        outputs.insert("output".into(), value);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            session_id: "s".into(),
            run_id: "r".into(),
            node_id: "n".into(),
            node_name: "N".into(),
            project_path: PathBuf::from("/tmp"),
            state: Arc::new(parking_lot::Mutex::new(JsonMap::new())),
            emit: None,
        }
    }

    #[tokio::test]
    async fn template_replaces_input_tokens() {
        let behavior = TemplateBehavior;
        let mut inputs = JsonMap::new();
        inputs.insert("name".into(), json!("world"));
        inputs.insert("count".into(), json!(3));
        let mut config = JsonMap::new();
        config.insert("template".into(), json!("hello {name} x{count}"));

        let out = behavior.run(&inputs, &config, &ctx()).await.unwrap();
        assert_eq!(out.get("output"), Some(&json!("hello world x3")));
    }

    #[tokio::test]
    async fn state_set_then_get_round_trips() {
        let context = ctx();
        let mut config = JsonMap::new();
        config.insert("key".into(), json!("shared"));
        let mut inputs = JsonMap::new();
        inputs.insert("value".into(), json!({"nested": true}));

        StateSetBehavior
            .run(&inputs, &config, &context)
            .await
            .unwrap();
        let out = StateGetBehavior
            .run(&JsonMap::new(), &config, &context)
            .await
            .unwrap();
        assert_eq!(out.get("output"), Some(&json!({"nested": true})));
    }

    #[test]
    fn catalog_ships_builtins() {
        let catalog = BehaviorCatalog::with_builtins();
        for name in ["passthrough", "template", "state_get", "state_set"] {
            assert!(catalog.get(name).is_some(), "missing builtin {name}");
        }
    }
}
