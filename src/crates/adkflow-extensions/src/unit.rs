//! The FlowUnit abstraction.
//!
//! A FlowUnit is a pluggable computation node: it declares an identity and a
//! UI interface, and implements `run_process` plus optional lifecycle hooks.
//! Units must be stateless across executions; per-run data travels through
//! the [`ExecutionContext`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::schema::UnitInterface;

pub use adkflow_hooks::SharedState;

/// JSON object map used for unit inputs, configs, and outputs.
pub type JsonMap = serde_json::Map<String, Value>;

/// Event emission callback scoped to a node by the graph executor.
pub type UnitEmitFn = Arc<dyn Fn(Value) + Send + Sync>;

/// Per-execution context handed to every unit invocation.
#[derive(Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_name: String,
    pub project_path: PathBuf,
    pub state: SharedState,
    pub emit: Option<UnitEmitFn>,
}

impl ExecutionContext {
    /// Emit an event tagged with this node's identity.
    pub fn emit(&self, event: Value) {
        if let Some(emit) = &self.emit {
            let event = match event {
                Value::Object(mut map) => {
                    map.insert("node_id".into(), Value::String(self.node_id.clone()));
                    map.insert("node_name".into(), Value::String(self.node_name.clone()));
                    Value::Object(map)
                }
                other => other,
            };
            emit(event);
        }
    }

    /// Read a value out of the shared session state.
    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    /// Write a value into the shared session state.
    pub fn state_set(&self, key: impl Into<String>, value: Value) {
        self.state.lock().insert(key.into(), value);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("node_name", &self.node_name)
            .finish_non_exhaustive()
    }
}

/// A pluggable custom computation node.
///
/// `is_changed` feeds the executor's cache invalidation: values compare by
/// equality, NaN forces re-execution, and the default (`Null`) leaves
/// invalidation to the input/config cache key alone.
#[async_trait]
pub trait FlowUnit: Send + Sync {
    fn unit_id(&self) -> &str;
    fn ui_label(&self) -> &str;
    fn menu_location(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Marks this unit as an execution sink for the graph executor.
    fn output_node(&self) -> bool {
        false
    }

    /// Bypasses result caching entirely.
    fn always_execute(&self) -> bool {
        false
    }

    /// Build the UI interface (ports, fields, layout) for the editor.
    fn setup_interface(&self) -> UnitInterface;

    fn is_changed(&self, _config: &JsonMap, _inputs: &JsonMap) -> Value {
        Value::Null
    }

    fn validate_config(&self, _config: &JsonMap) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn on_before_execute(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    async fn run_process(
        &self,
        inputs: &JsonMap,
        config: &JsonMap,
        ctx: &ExecutionContext,
    ) -> Result<JsonMap>;

    async fn on_after_execute(&self, _ctx: &ExecutionContext, _outputs: &JsonMap) -> Result<()> {
        Ok(())
    }
}

/// Input ports declared lazy by the unit's interface.
pub fn lazy_input_ids(interface: &UnitInterface) -> Vec<String> {
    interface
        .inputs
        .iter()
        .filter(|p| p.lazy)
        .map(|p| p.id.clone())
        .collect()
}
