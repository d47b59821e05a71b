//! Pause-point user input handling.
//!
//! A non-trigger user-input node suspends the run: the runner emits
//! `user_input_required`, parks on a oneshot future the host resolves
//! through [`UserInputBroker::provide`], and honors the node's timeout
//! behavior when nobody answers.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use adkflow_compiler::ir::{TimeoutBehavior, UserInputIR};
use adkflow_hooks::HooksIntegration;

use crate::error::{Result, RunnerError};
use crate::events::{EmitFn, EventType, RunEvent};

/// Routes host-provided responses to waiting user-input nodes.
#[derive(Default)]
pub struct UserInputBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl UserInputBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, node_id: &str) -> oneshot::Receiver<String> {
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(node_id.to_string(), sender);
        receiver
    }

    /// Resolve a waiting node. Returns false when nothing was waiting.
    pub fn provide(&self, node_id: &str, response: impl Into<String>) -> bool {
        match self.pending.lock().remove(node_id) {
            Some(sender) => sender.send(response.into()).is_ok(),
            None => false,
        }
    }

    pub fn waiting_nodes(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}

/// Suspend on a user-input node and return the response text.
pub async fn handle_user_input(
    ir: &UserInputIR,
    broker: &UserInputBroker,
    hooks: &HooksIntegration,
    emit: &EmitFn,
) -> Result<String> {
    let (_, prompt) = hooks
        .before_user_input(ir.name.clone(), &ir.variable_name, &ir.id, &ir.name)
        .await?;

    let receiver = broker.register(&ir.id);
    emit(
        RunEvent::new(EventType::UserInputRequired)
            .with_data("node_id", json!(ir.id))
            .with_data("node_name", json!(ir.name))
            .with_data("prompt", json!(prompt))
            .with_data("variable_name", json!(ir.variable_name))
            .with_data("timeout_seconds", json!(ir.timeout_seconds)),
    );

    let timeout = Duration::from_secs_f64(ir.timeout_seconds.max(0.0));
    let response = match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => {
            return Err(RunnerError::Execution(format!(
                "User input channel for '{}' was dropped",
                ir.name
            )))
        }
        Err(_) => match ir.timeout_behavior {
            TimeoutBehavior::PredefinedText => {
                tracing::warn!(
                    node_id = %ir.id,
                    "User input timed out, using predefined text"
                );
                ir.predefined_text.clone()
            }
            TimeoutBehavior::Error => {
                return Err(RunnerError::UserInputTimeout {
                    node: ir.name.clone(),
                    timeout_seconds: ir.timeout_seconds,
                })
            }
        },
    };

    let (_, response) = hooks
        .after_user_input(response, &ir.variable_name, &ir.id, &ir.name)
        .await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user_input(timeout_seconds: f64, behavior: TimeoutBehavior) -> UserInputIR {
        UserInputIR {
            id: "ui1".into(),
            name: "Review".into(),
            variable_name: "review_input".into(),
            is_trigger: false,
            timeout_seconds,
            timeout_behavior: behavior,
            predefined_text: "default answer".into(),
            incoming_agent_ids: vec!["a1".into()],
            outgoing_agent_ids: vec!["a2".into()],
            source_node_id: "ui1".into(),
        }
    }

    fn test_hooks() -> HooksIntegration {
        HooksIntegration::with_registry(
            "run-1",
            "sess-1",
            "/tmp/p",
            None,
            None,
            Arc::new(adkflow_hooks::HooksRegistry::new()),
        )
    }

    #[tokio::test]
    async fn provided_response_resolves_wait() {
        let broker = Arc::new(UserInputBroker::new());
        let hooks = test_hooks();
        let events: Arc<Mutex<Vec<RunEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let emit: EmitFn = Arc::new(move |e| sink.lock().push(e));

        let ir = user_input(5.0, TimeoutBehavior::Error);
        let waiter = {
            let broker = broker.clone();
            let emit = emit.clone();
            async move { handle_user_input(&ir, &broker, &hooks, &emit).await }
        };

        let provider = async {
            // Wait until the node registers, then answer.
            for _ in 0..100 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if broker.provide("ui1", "user says hi") {
                    return;
                }
            }
            panic!("node never registered");
        };

        let (result, _) = tokio::join!(waiter, provider);
        assert_eq!(result.unwrap(), "user says hi");
        assert!(events
            .lock()
            .iter()
            .any(|e| e.event_type == EventType::UserInputRequired));
    }

    #[tokio::test]
    async fn timeout_with_predefined_text_falls_back() {
        let broker = UserInputBroker::new();
        let hooks = test_hooks();
        let emit: EmitFn = Arc::new(|_| {});

        let ir = user_input(0.05, TimeoutBehavior::PredefinedText);
        let response = handle_user_input(&ir, &broker, &hooks, &emit).await.unwrap();
        assert_eq!(response, "default answer");
    }

    #[tokio::test]
    async fn timeout_with_error_behavior_raises() {
        let broker = UserInputBroker::new();
        let hooks = test_hooks();
        let emit: EmitFn = Arc::new(|_| {});

        let ir = user_input(0.05, TimeoutBehavior::Error);
        let err = handle_user_input(&ir, &broker, &hooks, &emit).await.unwrap_err();
        assert!(matches!(err, RunnerError::UserInputTimeout { .. }));
    }

    #[test]
    fn provide_without_waiter_returns_false() {
        let broker = UserInputBroker::new();
        assert!(!broker.provide("nobody", "hello"));
    }
}
